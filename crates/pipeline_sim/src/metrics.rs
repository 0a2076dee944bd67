//! Metrics collection: a passive observer fed by the systems as events happen.
//!
//! The collector only keeps counters derived from what it is told (grants,
//! releases, failures, terminal states). It never reads pool state, so a report
//! is a pure function of the recorded events. [MetricsCollector::report] can be
//! called at any time; the kernel calls it once the run is over.

use std::collections::BTreeMap;

use bevy_ecs::prelude::Resource;
use serde::Serialize;

use crate::clock::{ms_to_secs, ONE_SEC_MS};
use crate::ecs::{StageOutcome, TerminalState};
use crate::pool::DeviceId;
use crate::stages::{QualityRejection, StageKind};

/// Counters for one device unit.
#[derive(Debug, Clone, Default)]
struct DeviceLedger {
    name: String,
    stage: Option<StageKind>,
    stage_index: usize,
    capacity: u32,
    entries: u64,
    grants: u64,
    total_wait_ms: u64,
    busy_ms: u64,
    service_ms: u64,
    open_holds: u64,
    open_started_sum_ms: u64,
    processed: u64,
    interrupted: u64,
    gate_passed: u64,
    gate_rejected: u64,
    failures: u64,
    repairs: u64,
    downtime_ms: u64,
    down_since: Option<u64>,
}

impl DeviceLedger {
    fn busy_ms_at(&self, now: u64) -> u64 {
        self.busy_ms + (self.open_holds * now).saturating_sub(self.open_started_sum_ms)
    }

    fn downtime_ms_at(&self, now: u64) -> u64 {
        self.downtime_ms
            + self
                .down_since
                .map(|since| now.saturating_sub(since))
                .unwrap_or(0)
    }
}

#[derive(Debug, Default, Resource)]
pub struct MetricsCollector {
    devices: Vec<DeviceLedger>,
    batches_created: u64,
    completed: u64,
    failed: u64,
    incomplete: u64,
    cycle_times_ms: Vec<u64>,
    failure_reasons: BTreeMap<QualityRejection, u64>,
}

impl MetricsCollector {
    pub fn register_device(
        &mut self,
        id: DeviceId,
        name: &str,
        stage: StageKind,
        stage_index: usize,
        capacity: u32,
    ) {
        if self.devices.len() <= id.0 {
            self.devices.resize_with(id.0 + 1, DeviceLedger::default);
        }
        self.devices[id.0] = DeviceLedger {
            name: name.to_string(),
            stage: Some(stage),
            stage_index,
            capacity,
            ..DeviceLedger::default()
        };
    }

    fn device(&mut self, id: DeviceId) -> Option<&mut DeviceLedger> {
        self.devices.get_mut(id.0)
    }

    pub fn record_batch_created(&mut self) {
        self.batches_created += 1;
    }

    /// A batch joined a device's queue (including re-entry after an eviction).
    pub fn record_stage_entry(&mut self, id: DeviceId) {
        if let Some(device) = self.device(id) {
            device.entries += 1;
        }
    }

    pub fn record_grant(&mut self, id: DeviceId, requested_at: u64, now: u64) {
        if let Some(device) = self.device(id) {
            device.grants += 1;
            device.total_wait_ms += now.saturating_sub(requested_at);
            device.open_holds += 1;
            device.open_started_sum_ms += now;
        }
    }

    pub fn record_hold_closed(
        &mut self,
        id: DeviceId,
        started_at: u64,
        now: u64,
        outcome: StageOutcome,
    ) {
        let Some(device) = self.device(id) else {
            return;
        };
        let held = now.saturating_sub(started_at);
        device.open_holds = device.open_holds.saturating_sub(1);
        device.open_started_sum_ms = device.open_started_sum_ms.saturating_sub(started_at);
        device.busy_ms += held;
        match outcome {
            StageOutcome::Interrupted => device.interrupted += 1,
            StageOutcome::Processed | StageOutcome::Rejected(_) => {
                device.processed += 1;
                device.service_ms += held;
            }
        }
    }

    pub fn record_inspection(&mut self, id: DeviceId, passed: bool) {
        if let Some(device) = self.device(id) {
            if passed {
                device.gate_passed += 1;
            } else {
                device.gate_rejected += 1;
            }
        }
    }

    pub fn record_failure(&mut self, id: DeviceId, now: u64) {
        if let Some(device) = self.device(id) {
            device.failures += 1;
            device.down_since = Some(now);
        }
    }

    pub fn record_repair(&mut self, id: DeviceId, now: u64) {
        if let Some(device) = self.device(id) {
            device.repairs += 1;
            if let Some(since) = device.down_since.take() {
                device.downtime_ms += now.saturating_sub(since);
            }
        }
    }

    pub fn record_terminal(&mut self, state: TerminalState, cycle_time_ms: Option<u64>) {
        match state {
            TerminalState::Completed => {
                self.completed += 1;
                if let Some(cycle) = cycle_time_ms {
                    self.cycle_times_ms.push(cycle);
                }
            }
            TerminalState::Failed(reason) => {
                self.failed += 1;
                *self.failure_reasons.entry(reason).or_default() += 1;
            }
            TerminalState::Incomplete => self.incomplete += 1,
            TerminalState::InFlight => {}
        }
    }

    pub fn batches_created(&self) -> u64 {
        self.batches_created
    }

    /// Quality-gate `(passed, rejected)` counts of one device.
    pub fn gate_counts(&self, id: DeviceId) -> (u64, u64) {
        self.devices
            .get(id.0)
            .map(|device| (device.gate_passed, device.gate_rejected))
            .unwrap_or((0, 0))
    }

    /// Builds the report as of `now` (elapsed simulation time).
    pub fn report(&self, now: u64) -> MetricsReport {
        let devices: Vec<DeviceMetrics> = self
            .devices
            .iter()
            .enumerate()
            .filter_map(|(index, ledger)| device_metrics(index, ledger, now))
            .collect();
        let stages = stage_metrics(&devices, &self.devices);
        let bottleneck_stage = stages
            .iter()
            .filter(|stage| stage.mean_utilization > 0.0)
            .fold(None::<&StageMetrics>, |best, stage| match best {
                Some(best) if best.mean_utilization >= stage.mean_utilization => Some(best),
                _ => Some(stage),
            })
            .map(|stage| stage.stage);

        MetricsReport {
            run: self.run_metrics(now),
            stages,
            devices,
            bottleneck_stage,
        }
    }

    fn run_metrics(&self, now: u64) -> RunMetrics {
        let finished = self.completed + self.failed;
        let completion_rate = if finished == 0 {
            0.0
        } else {
            self.completed as f64 / finished as f64
        };
        let (avg, median, p90) = calculate_stats(&self.cycle_times_ms);
        let hours = now as f64 / (3600 * ONE_SEC_MS) as f64;
        let throughput_per_hour = if hours > 0.0 {
            self.completed as f64 / hours
        } else {
            0.0
        };
        let in_flight = self
            .batches_created
            .saturating_sub(self.completed + self.failed + self.incomplete);

        RunMetrics {
            elapsed_secs: ms_to_secs(now),
            batches_created: self.batches_created,
            completed: self.completed,
            failed: self.failed,
            incomplete: self.incomplete,
            in_flight,
            completion_rate,
            average_cycle_time_secs: avg / ONE_SEC_MS as f64,
            median_cycle_time_secs: median / ONE_SEC_MS as f64,
            p90_cycle_time_secs: p90 / ONE_SEC_MS as f64,
            throughput_per_hour,
            failure_reasons: self
                .failure_reasons
                .iter()
                .map(|(reason, count)| (reason.as_str().to_string(), *count))
                .collect(),
        }
    }
}

fn device_metrics(index: usize, ledger: &DeviceLedger, now: u64) -> Option<DeviceMetrics> {
    let stage = ledger.stage?;
    let busy_ms = ledger.busy_ms_at(now);
    let utilization = if now == 0 || ledger.capacity == 0 {
        0.0
    } else {
        (busy_ms as f64 / (now as f64 * f64::from(ledger.capacity))).clamp(0.0, 1.0)
    };
    let average_queue_wait_secs = if ledger.grants == 0 {
        0.0
    } else {
        ms_to_secs(ledger.total_wait_ms) / ledger.grants as f64
    };
    let mean_service_time_secs = if ledger.processed == 0 {
        0.0
    } else {
        ms_to_secs(ledger.service_ms) / ledger.processed as f64
    };
    let gate_total = ledger.gate_passed + ledger.gate_rejected;

    Some(DeviceMetrics {
        device_id: ledger.name.clone(),
        device_index: index,
        stage,
        stage_index: ledger.stage_index,
        capacity: ledger.capacity,
        utilization,
        processed_count: ledger.processed,
        interrupted_count: ledger.interrupted,
        failure_count: ledger.failures,
        repair_count: ledger.repairs,
        downtime_secs: ms_to_secs(ledger.downtime_ms_at(now)),
        busy_time_secs: ms_to_secs(busy_ms),
        average_queue_wait_secs,
        mean_service_time_secs,
        queue_length: ledger.entries.saturating_sub(ledger.grants),
        gate: (gate_total > 0).then(|| GateMetrics {
            passed: ledger.gate_passed,
            rejected: ledger.gate_rejected,
            pass_rate: ledger.gate_passed as f64 / gate_total as f64,
        }),
    })
}

fn stage_metrics(devices: &[DeviceMetrics], ledgers: &[DeviceLedger]) -> Vec<StageMetrics> {
    let mut stages: Vec<StageMetrics> = Vec::new();
    // (total wait ms, grants) per entry of `stages`.
    let mut waits: Vec<(u64, u64)> = Vec::new();
    for device in devices {
        let position = match stages.iter().position(|s| s.stage_index == device.stage_index) {
            Some(position) => position,
            None => {
                stages.push(StageMetrics {
                    stage: device.stage,
                    stage_index: device.stage_index,
                    units: 0,
                    total_capacity: 0,
                    mean_utilization: 0.0,
                    processed_count: 0,
                    failure_count: 0,
                    average_queue_wait_secs: 0.0,
                    queue_length: 0,
                });
                waits.push((0, 0));
                stages.len() - 1
            }
        };
        let stage = &mut stages[position];
        stage.units += 1;
        stage.total_capacity += device.capacity;
        stage.mean_utilization += device.utilization;
        stage.processed_count += device.processed_count;
        stage.failure_count += device.failure_count;
        stage.queue_length += device.queue_length;
        if let Some(ledger) = ledgers.get(device.device_index) {
            waits[position].0 += ledger.total_wait_ms;
            waits[position].1 += ledger.grants;
        }
    }
    for (stage, (wait_ms, grants)) in stages.iter_mut().zip(waits) {
        if stage.units > 0 {
            stage.mean_utilization /= f64::from(stage.units);
        }
        stage.average_queue_wait_secs = if grants == 0 {
            0.0
        } else {
            ms_to_secs(wait_ms) / grants as f64
        };
    }
    stages.sort_by_key(|stage| stage.stage_index);
    stages
}

/// Average, median and 90th percentile of `values`.
pub fn calculate_stats(values: &[u64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let mut sorted = values.to_vec();
    sorted.sort();

    let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
    let median = if sorted.len() % 2 == 0 {
        (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) as f64 / 2.0
    } else {
        sorted[sorted.len() / 2] as f64
    };
    // P90: floor(0.9 * (n-1))
    let p90_idx = ((sorted.len() - 1) as f64 * 0.9) as usize;
    let p90 = sorted[p90_idx.min(sorted.len() - 1)] as f64;

    (avg, median, p90)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateMetrics {
    pub passed: u64,
    pub rejected: u64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceMetrics {
    pub device_id: String,
    pub device_index: usize,
    pub stage: StageKind,
    pub stage_index: usize,
    pub capacity: u32,
    /// Busy unit-time over available unit-time, in `[0, 1]`.
    pub utilization: f64,
    pub processed_count: u64,
    pub interrupted_count: u64,
    pub failure_count: u64,
    pub repair_count: u64,
    pub downtime_secs: f64,
    pub busy_time_secs: f64,
    pub average_queue_wait_secs: f64,
    pub mean_service_time_secs: f64,
    pub queue_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetrics {
    pub stage: StageKind,
    pub stage_index: usize,
    pub units: u32,
    pub total_capacity: u32,
    pub mean_utilization: f64,
    pub processed_count: u64,
    pub failure_count: u64,
    pub average_queue_wait_secs: f64,
    pub queue_length: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetrics {
    pub elapsed_secs: f64,
    pub batches_created: u64,
    pub completed: u64,
    pub failed: u64,
    pub incomplete: u64,
    /// Batches not yet classified; zero once the run has finished.
    pub in_flight: u64,
    /// Completed over completed plus failed; incomplete batches are excluded.
    pub completion_rate: f64,
    pub average_cycle_time_secs: f64,
    pub median_cycle_time_secs: f64,
    pub p90_cycle_time_secs: f64,
    pub throughput_per_hour: f64,
    pub failure_reasons: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub run: RunMetrics,
    pub stages: Vec<StageMetrics>,
    pub devices: Vec<DeviceMetrics>,
    /// Stage with the highest mean utilization; the earlier stage wins ties.
    pub bottleneck_stage: Option<StageKind>,
}

impl MetricsReport {
    pub fn stage(&self, stage: StageKind) -> Option<&StageMetrics> {
        self.stages.iter().find(|metrics| metrics.stage == stage)
    }

    pub fn devices_for(&self, stage: StageKind) -> impl Iterator<Item = &DeviceMetrics> {
        self.devices.iter().filter(move |device| device.stage == stage)
    }
}

//! Per-device telemetry records and the rolling snapshot buffer.
//!
//! Records are plain data shaped for an external publisher. Each stage reports a
//! fixed gauge set chosen by its [TelemetryProfile].

use std::collections::VecDeque;

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::clock::secs_to_ms;
use crate::metrics::MetricsCollector;
use crate::pool::{DevicePools, ResourcePool};
use crate::stages::{Pipeline, StageKind, TelemetryProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Idle,
    Busy,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "profile", rename_all = "snake_case")]
pub enum StageGauges {
    Processing {
        busy_units: u32,
        capacity: u32,
    },
    Inspection {
        passed: u64,
        rejected: u64,
        pass_rate: f64,
    },
    Storage {
        occupied: u32,
        capacity: u32,
        fill_ratio: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceTelemetry {
    pub device_id: String,
    pub stage: StageKind,
    pub status: DeviceState,
    pub utilization: f64,
    pub queue_length: usize,
    pub processed_count: u64,
    pub timestamp_ms: u64,
    pub gauges: StageGauges,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub timestamp_ms: u64,
    pub devices: Vec<DeviceTelemetry>,
}

/// Snapshot settings as they appear in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub interval_secs: f64,
    pub max_snapshots: usize,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300.0,
            max_snapshots: 10_000,
        }
    }
}

#[derive(Debug, Clone, Resource)]
pub struct SnapshotConfig {
    pub interval_ms: u64,
    pub max_snapshots: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig::from(&SnapshotSettings::default())
    }
}

impl From<&SnapshotSettings> for SnapshotConfig {
    fn from(settings: &SnapshotSettings) -> Self {
        Self {
            interval_ms: secs_to_ms(settings.interval_secs).max(1),
            max_snapshots: settings.max_snapshots,
        }
    }
}

/// Rolling snapshot buffer.
#[derive(Debug, Default, Resource)]
pub struct TelemetrySnapshots {
    pub snapshots: VecDeque<TelemetrySnapshot>,
    pub last_snapshot_at: Option<u64>,
}

impl TelemetrySnapshots {
    pub fn push(&mut self, snapshot: TelemetrySnapshot, max_snapshots: usize) {
        self.last_snapshot_at = Some(snapshot.timestamp_ms);
        if max_snapshots == 0 {
            return;
        }
        while self.snapshots.len() >= max_snapshots {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }
}

fn device_state(pool: &ResourcePool) -> DeviceState {
    if !pool.is_up() {
        DeviceState::Down
    } else if pool.busy_count() > 0 {
        DeviceState::Busy
    } else {
        DeviceState::Idle
    }
}

fn gauges(profile: TelemetryProfile, pool: &ResourcePool, metrics: &MetricsCollector) -> StageGauges {
    match profile {
        TelemetryProfile::Processing => StageGauges::Processing {
            busy_units: pool.busy_count(),
            capacity: pool.capacity,
        },
        TelemetryProfile::Inspection => {
            let (passed, rejected) = metrics.gate_counts(pool.id);
            let total = passed + rejected;
            StageGauges::Inspection {
                passed,
                rejected,
                pass_rate: if total == 0 {
                    0.0
                } else {
                    passed as f64 / total as f64
                },
            }
        }
        TelemetryProfile::Storage => StageGauges::Storage {
            occupied: pool.busy_count(),
            capacity: pool.capacity,
            fill_ratio: if pool.capacity == 0 {
                0.0
            } else {
                f64::from(pool.busy_count()) / f64::from(pool.capacity)
            },
        },
    }
}

/// One record per device, in device order, as of `now`.
pub fn device_telemetry(
    pools: &DevicePools,
    pipeline: &Pipeline,
    metrics: &MetricsCollector,
    now: u64,
) -> Vec<DeviceTelemetry> {
    pools
        .iter()
        .map(|pool| {
            let profile = pipeline
                .stage(pool.stage_index)
                .map(|stage| stage.telemetry)
                .unwrap_or(TelemetryProfile::Processing);
            DeviceTelemetry {
                device_id: pool.name.clone(),
                stage: pool.stage,
                status: device_state(pool),
                utilization: pool.utilization(now),
                queue_length: pool.queue_length(),
                processed_count: pool.processed_count(),
                timestamp_ms: now,
                gauges: gauges(profile, pool, metrics),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DeviceId;
    use bevy_ecs::prelude::World;

    fn snapshot(at: u64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            timestamp_ms: at,
            devices: Vec::new(),
        }
    }

    #[test]
    fn snapshot_buffer_evicts_oldest() {
        let mut buffer = TelemetrySnapshots::default();
        for at in [0, 300, 600, 900] {
            buffer.push(snapshot(at), 3);
        }
        let kept: Vec<u64> = buffer.snapshots.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(kept, vec![300, 600, 900]);
        assert_eq!(buffer.last_snapshot_at, Some(900));
    }

    #[test]
    fn storage_profile_reports_fill_ratio() {
        let mut world = World::new();
        let batch = world.spawn_empty().id();
        let mut pool = ResourcePool::new(
            DeviceId(0),
            "storage_refrigerator_1",
            StageKind::StorageRefrigerator,
            9,
            20,
        );
        pool.acquire(batch, 0).expect("acquire");

        let gauges = gauges(TelemetryProfile::Storage, &pool, &MetricsCollector::default());
        assert_eq!(
            gauges,
            StageGauges::Storage {
                occupied: 1,
                capacity: 20,
                fill_ratio: 0.05
            }
        );
        assert_eq!(device_state(&pool), DeviceState::Busy);
    }

    #[test]
    fn settings_convert_to_milliseconds() {
        let config = SnapshotConfig::from(&SnapshotSettings {
            interval_secs: 2.5,
            max_snapshots: 4,
        });
        assert_eq!(config.interval_ms, 2_500);
        assert_eq!(config.max_snapshots, 4);
    }
}

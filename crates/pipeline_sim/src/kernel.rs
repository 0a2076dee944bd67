//! Public kernel surface: construct a run from a scenario, run it, read results.
//!
//! The kernel performs no I/O. Configuration arrives fully formed and results
//! leave as plain values; exporting them is the caller's business.

use std::collections::{BTreeMap, VecDeque};

use bevy_ecs::prelude::{Entity, Schedule, World};
use serde::Serialize;
use tracing::{error, info};

use crate::clock::{Event, EventKind, SimulationClock};
use crate::ecs::{Batch, BatchLedger, TerminalState};
use crate::error::{ConfigurationError, KernelError, KernelSnapshot, PoolSnapshot};
use crate::metrics::{MetricsCollector, MetricsReport};
use crate::pool::DevicePools;
use crate::runner::{
    initialize_simulation, run_until_empty_with_hook, simulation_schedule, EventCounters,
};
use crate::scenario::{build_scenario, ScenarioConfig, ScenarioSeed, SimulationHorizonMs};
use crate::stages::Pipeline;
use crate::telemetry::{device_telemetry, DeviceTelemetry, TelemetrySnapshot, TelemetrySnapshots};

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub events_processed: u64,
    pub events_by_kind: BTreeMap<EventKind, u64>,
    pub final_clock_ms: u64,
    pub horizon_ms: u64,
    /// Events were still pending past the horizon when the run stopped.
    pub stopped_by_horizon: bool,
    pub batches_archived: usize,
}

/// One scenario, ready to run or already run.
pub struct KernelHandle {
    world: World,
    schedule: Schedule,
    outcome: Option<Result<RunSummary, KernelError>>,
}

impl KernelHandle {
    /// Validates `config` and builds every pool and stage of the run.
    pub fn construct(config: &ScenarioConfig) -> Result<Self, ConfigurationError> {
        let mut world = World::new();
        build_scenario(&mut world, config)?;
        initialize_simulation(&mut world);
        Ok(Self {
            world,
            schedule: simulation_schedule(),
            outcome: None,
        })
    }

    /// Runs until the horizon is exhausted or no events remain.
    ///
    /// Calling `run` again returns the first outcome without touching the state.
    pub fn run(&mut self) -> Result<RunSummary, KernelError> {
        self.run_with_hook(|_, _| {})
    }

    /// Like [`KernelHandle::run`], calling `hook` after every processed event.
    pub fn run_with_hook<F>(&mut self, hook: F) -> Result<RunSummary, KernelError>
    where
        F: FnMut(&World, &Event),
    {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        info!(
            seed = self.world.resource::<ScenarioSeed>().0,
            horizon_ms = self.horizon_ms(),
            devices = self.pools().len(),
            "run started"
        );

        let outcome = match run_until_empty_with_hook(
            &mut self.world,
            &mut self.schedule,
            usize::MAX,
            hook,
        ) {
            Ok(_) => Ok(self.finish()),
            Err(violation) => {
                let snapshot = self.kernel_snapshot();
                error!(
                    %violation,
                    now_ms = snapshot.now_ms,
                    pending_events = snapshot.pending_events,
                    "run aborted"
                );
                Err(KernelError::InvariantViolation {
                    violation,
                    snapshot: Box::new(snapshot),
                })
            }
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Closes the run at the horizon: every batch still traversing is archived
    /// as incomplete.
    fn finish(&mut self) -> RunSummary {
        let horizon_ms = self.horizon_ms();
        let stopped_by_horizon = self
            .world
            .resource::<SimulationClock>()
            .next_event_time()
            .is_some();
        self.world
            .resource_mut::<SimulationClock>()
            .advance_to(horizon_ms);

        let mut query = self.world.query::<(Entity, &Batch)>();
        let leftovers: Vec<Entity> = query.iter(&self.world).map(|(entity, _)| entity).collect();
        for entity in leftovers {
            let Some(mut batch) = self.world.entity_mut(entity).take::<Batch>() else {
                continue;
            };
            self.world.despawn(entity);
            batch.terminal_state = TerminalState::Incomplete;
            self.world
                .resource_mut::<MetricsCollector>()
                .record_terminal(TerminalState::Incomplete, None);
            self.world.resource_mut::<BatchLedger>().archive(batch);
        }

        let batches_archived = {
            let mut ledger = self.world.resource_mut::<BatchLedger>();
            ledger.batches.sort_by_key(|batch| batch.serial);
            ledger.batches.len()
        };

        let counters = self.world.resource::<EventCounters>();
        let summary = RunSummary {
            events_processed: counters.total,
            events_by_kind: counters.by_kind.clone(),
            final_clock_ms: self.now_ms(),
            horizon_ms,
            stopped_by_horizon,
            batches_archived,
        };

        let ledger = self.world.resource::<BatchLedger>();
        info!(
            events = summary.events_processed,
            final_clock_ms = summary.final_clock_ms,
            stopped_by_horizon,
            completed = ledger.count(TerminalState::Completed),
            incomplete = ledger.count(TerminalState::Incomplete),
            archived = batches_archived,
            "run finished"
        );
        summary
    }

    fn kernel_snapshot(&self) -> KernelSnapshot {
        let clock = self.world.resource::<SimulationClock>();
        KernelSnapshot {
            now_ms: clock.now(),
            pending_events: clock.pending_event_count(),
            events_processed: self.event_counts().total,
            pools: self
                .pools()
                .iter()
                .map(|pool| PoolSnapshot {
                    device_id: pool.name.clone(),
                    stage: pool.stage,
                    status: pool.failure.status,
                    capacity: pool.capacity,
                    busy_count: pool.busy_count(),
                    queue_length: pool.queue_length(),
                    cumulative_busy_ms: pool.cumulative_busy_ms(),
                    processed_count: pool.processed_count(),
                })
                .collect(),
        }
    }

    /// Metrics as of the current clock; after `run` that is the horizon.
    pub fn get_metrics(&self) -> MetricsReport {
        self.world.resource::<MetricsCollector>().report(self.now_ms())
    }

    /// Current state of every device, in device order.
    pub fn snapshot_telemetry(&self) -> Vec<DeviceTelemetry> {
        device_telemetry(
            self.pools(),
            self.world.resource::<Pipeline>(),
            self.world.resource::<MetricsCollector>(),
            self.now_ms(),
        )
    }

    /// Periodic snapshots captured during the run, oldest first.
    pub fn telemetry_history(&self) -> &VecDeque<TelemetrySnapshot> {
        &self.world.resource::<TelemetrySnapshots>().snapshots
    }

    /// Batches that reached a terminal state, by serial once the run finished.
    pub fn archived_batches(&self) -> &[Batch] {
        &self.world.resource::<BatchLedger>().batches
    }

    pub fn pools(&self) -> &DevicePools {
        self.world.resource::<DevicePools>()
    }

    pub fn event_counts(&self) -> &EventCounters {
        self.world.resource::<EventCounters>()
    }

    pub fn now_ms(&self) -> u64 {
        self.world.resource::<SimulationClock>().now()
    }

    pub fn horizon_ms(&self) -> u64 {
        self.world.resource::<SimulationHorizonMs>().0
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn has_run(&self) -> bool {
        self.outcome.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageKind;

    fn short_config() -> ScenarioConfig {
        ScenarioConfig::default().with_horizon_secs(4.0 * 3600.0)
    }

    #[test]
    fn construct_rejects_invalid_configuration() {
        let config = ScenarioConfig::default().with_unit_count(StageKind::Centrifuge, 0);
        assert!(matches!(
            KernelHandle::construct(&config),
            Err(ConfigurationError::NoUnits {
                stage: StageKind::Centrifuge
            })
        ));
    }

    #[test]
    fn run_ends_at_the_horizon() {
        let mut kernel = KernelHandle::construct(&short_config()).expect("valid");
        let summary = kernel.run().expect("run");

        assert_eq!(summary.horizon_ms, 4 * 3_600_000);
        assert_eq!(summary.final_clock_ms, summary.horizon_ms);
        assert!(summary.stopped_by_horizon);
        assert!(summary.events_processed > 0);
        assert_eq!(summary.events_by_kind.get(&EventKind::SimulationStarted), Some(&1));
        assert_eq!(kernel.now_ms(), summary.horizon_ms);
    }

    #[test]
    fn every_batch_is_archived_with_a_terminal_state() {
        let mut kernel = KernelHandle::construct(&short_config()).expect("valid");
        let summary = kernel.run().expect("run");
        let report = kernel.get_metrics();

        let archived = kernel.archived_batches();
        assert_eq!(archived.len(), summary.batches_archived);
        assert_eq!(archived.len() as u64, report.run.batches_created);
        assert!(archived.iter().all(|batch| batch.terminal_state.is_terminal()));
        assert!(archived.windows(2).all(|pair| pair[0].serial < pair[1].serial));
        assert_eq!(report.run.in_flight, 0);
    }

    #[test]
    fn repeated_run_and_metrics_are_stable() {
        let mut kernel = KernelHandle::construct(&short_config()).expect("valid");
        let first = kernel.run().expect("run");
        let report = kernel.get_metrics();
        let second = kernel.run().expect("second run");

        assert!(kernel.has_run());
        assert_eq!(first, second);
        assert_eq!(report, kernel.get_metrics());
    }

    #[test]
    fn telemetry_has_one_record_per_device() {
        let mut kernel = KernelHandle::construct(&short_config()).expect("valid");
        kernel.run().expect("run");

        let records = kernel.snapshot_telemetry();
        assert_eq!(records.len(), kernel.pools().len());
        assert!(records
            .iter()
            .all(|record| record.timestamp_ms == kernel.horizon_ms()));
        assert!(!kernel.telemetry_history().is_empty());
    }
}

use bevy_ecs::prelude::World;
use tracing::debug;

use crate::clock::{secs_to_ms, SimulationClock};
use crate::ecs::BatchLedger;
use crate::error::ConfigurationError;
use crate::metrics::MetricsCollector;
use crate::pool::{DeviceId, DevicePools, ResourcePool};
use crate::runner::EventCounters;
use crate::scenario::params::{ActivePolicies, ScenarioConfig, ScenarioSeed, SimulationHorizonMs};
use crate::stages::{Pipeline, StageProcess};
use crate::systems::arrival::ArrivalGenerator;
use crate::telemetry::{SnapshotConfig, TelemetrySnapshots};

/// Validates `config` and inserts every resource a run needs into `world`.
///
/// Devices are numbered in pipeline order; unit `n` of a stage is named
/// `<stage>_<n>` (1-based).
pub fn build_scenario(world: &mut World, config: &ScenarioConfig) -> Result<(), ConfigurationError> {
    config.validate()?;

    let mut pipeline = Pipeline::default();
    let mut pools = DevicePools::default();
    let mut metrics = MetricsCollector::default();

    for (index, stage_config) in config.stages.iter().enumerate() {
        let mut stage = StageProcess::from_config(index, stage_config);
        for unit in 1..=stage_config.unit_count {
            let id = DeviceId(pools.len());
            let name = format!("{}_{}", stage_config.stage, unit);
            metrics.register_device(
                id,
                &name,
                stage_config.stage,
                index,
                stage_config.capacity_per_unit,
            );
            pools.pools.push(ResourcePool::new(
                id,
                name,
                stage_config.stage,
                index,
                stage_config.capacity_per_unit,
            ));
            stage.devices.push(id);
        }
        debug!(
            stage = %stage.kind,
            units = stage.devices.len(),
            capacity = stage_config.capacity_per_unit,
            failures = stage.failure.is_some(),
            "stage configured"
        );
        pipeline.stages.push(stage);
    }

    world.insert_resource(SimulationClock::default());
    world.insert_resource(SimulationHorizonMs(secs_to_ms(config.horizon_secs)));
    world.insert_resource(ScenarioSeed(config.seed));
    world.insert_resource(ActivePolicies {
        routing: config.routing,
        failure: config.failure_policy,
    });
    world.insert_resource(ArrivalGenerator::new(config.arrival_interval.build()));
    world.insert_resource(pipeline);
    world.insert_resource(pools);
    world.insert_resource(metrics);
    world.insert_resource(BatchLedger::default());
    world.insert_resource(EventCounters::default());
    world.insert_resource(SnapshotConfig::from(&config.snapshots));
    world.insert_resource(TelemetrySnapshots::default());
    Ok(())
}

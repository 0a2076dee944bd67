#![allow(dead_code)]

use std::collections::BTreeMap;

use pipeline_sim::ecs::Batch;
use pipeline_sim::pool::DeviceId;
use pipeline_sim::scenario::ScenarioConfig;
use pipeline_sim::stages::StageKind;
use pipeline_sim::KernelHandle;

pub const HOUR_SECS: f64 = 3600.0;

/// Baseline line with one unit at every stage.
pub fn single_unit_line(horizon_secs: f64) -> ScenarioConfig {
    ScenarioConfig::default()
        .with_unit_count_all(1)
        .with_horizon_secs(horizon_secs)
}

/// Arrivals every `mean_secs` on average, overloading every stage slower than that.
pub fn congested_line(horizon_secs: f64, mean_secs: f64) -> ScenarioConfig {
    single_unit_line(horizon_secs).with_arrival_mean_secs(mean_secs)
}

pub fn with_capacity_doubled(config: &ScenarioConfig, stage: StageKind) -> ScenarioConfig {
    let capacity = config
        .stage(stage)
        .map(|stage| stage.capacity_per_unit)
        .expect("stage configured");
    config.clone().with_capacity(stage, capacity * 2)
}

/// Constructs and runs `config`, panicking on any error.
pub fn run_kernel(config: &ScenarioConfig) -> KernelHandle {
    let mut kernel = KernelHandle::construct(config).expect("valid scenario");
    kernel.run().expect("run completes");
    kernel
}

/// Held time of every closed step in `batches`, summed per device.
pub fn held_ms_by_device(batches: &[Batch]) -> BTreeMap<DeviceId, u64> {
    let mut held = BTreeMap::new();
    for step in batches.iter().flat_map(|batch| batch.process_history.iter()) {
        if let Some(ms) = step.held_ms() {
            *held.entry(step.device).or_default() += ms;
        }
    }
    held
}

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::clock::secs_to_ms;
use crate::distributions::DistributionSpec;
use crate::error::ConfigurationError;
use crate::pool::{FailurePolicy, RoutingPolicy};
use crate::stages::{StageConfig, StageKind};
use crate::telemetry::SnapshotSettings;

/// Default horizon: one 8-hour shift.
const DEFAULT_HORIZON_SECS: f64 = 8.0 * 3600.0;

const DEFAULT_ARRIVAL_MEAN_SECS: f64 = 300.0;

const DEFAULT_SEED: u64 = 42;

/// Simulation end time in milliseconds. Events after this instant are not processed.
#[derive(Debug, Clone, Copy, Resource)]
pub struct SimulationHorizonMs(pub u64);

/// Seed from which every random draw of the run is derived.
#[derive(Debug, Clone, Copy, Resource)]
pub struct ScenarioSeed(pub u64);

/// Routing and failure policies of the run.
#[derive(Debug, Clone, Copy, Default, Resource)]
pub struct ActivePolicies {
    pub routing: RoutingPolicy,
    pub failure: FailurePolicy,
}

/// Complete description of one run. JSON files may give only the fields they
/// change; everything else falls back to the baseline line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Every stage in pipeline order.
    pub stages: Vec<StageConfig>,
    pub arrival_interval: DistributionSpec,
    pub horizon_secs: f64,
    pub seed: u64,
    pub routing: RoutingPolicy,
    pub failure_policy: FailurePolicy,
    pub snapshots: SnapshotSettings,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            stages: StageConfig::baseline_pipeline(),
            arrival_interval: DistributionSpec::exponential(DEFAULT_ARRIVAL_MEAN_SECS),
            horizon_secs: DEFAULT_HORIZON_SECS,
            seed: DEFAULT_SEED,
            routing: RoutingPolicy::default(),
            failure_policy: FailurePolicy::default(),
            snapshots: SnapshotSettings::default(),
        }
    }
}

impl ScenarioConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_horizon_secs(mut self, horizon_secs: f64) -> Self {
        self.horizon_secs = horizon_secs;
        self
    }

    /// Poisson arrivals with the given mean inter-arrival time.
    pub fn with_arrival_mean_secs(mut self, mean_secs: f64) -> Self {
        self.arrival_interval = DistributionSpec::exponential(mean_secs);
        self
    }

    pub fn with_arrival_interval(mut self, interval: DistributionSpec) -> Self {
        self.arrival_interval = interval;
        self
    }

    /// Enables the failure model on every stage with the same MTBF and MTTR.
    pub fn with_failures(mut self, mtbf_secs: f64, mttr_secs: f64) -> Self {
        for stage in &mut self.stages {
            stage.enable_failures = true;
            stage.mtbf_secs = mtbf_secs;
            stage.mttr_secs = mttr_secs;
        }
        self
    }

    /// Enables the failure model on one stage only.
    pub fn with_stage_failures(mut self, stage: StageKind, mtbf_secs: f64, mttr_secs: f64) -> Self {
        if let Some(config) = self.stage_mut(stage) {
            config.enable_failures = true;
            config.mtbf_secs = mtbf_secs;
            config.mttr_secs = mttr_secs;
        }
        self
    }

    pub fn with_unit_count(mut self, stage: StageKind, unit_count: u32) -> Self {
        if let Some(config) = self.stage_mut(stage) {
            config.unit_count = unit_count;
        }
        self
    }

    /// Sets every stage to `unit_count` parallel units.
    pub fn with_unit_count_all(mut self, unit_count: u32) -> Self {
        for stage in &mut self.stages {
            stage.unit_count = unit_count;
        }
        self
    }

    pub fn with_capacity(mut self, stage: StageKind, capacity_per_unit: u32) -> Self {
        if let Some(config) = self.stage_mut(stage) {
            config.capacity_per_unit = capacity_per_unit;
        }
        self
    }

    pub fn with_service_time(mut self, stage: StageKind, service_time: DistributionSpec) -> Self {
        if let Some(config) = self.stage_mut(stage) {
            config.service_time = service_time;
        }
        self
    }

    pub fn with_routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_stages(mut self, stages: Vec<StageConfig>) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotSettings) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn stage(&self, stage: StageKind) -> Option<&StageConfig> {
        self.stages.iter().find(|config| config.stage == stage)
    }

    pub fn stage_mut(&mut self, stage: StageKind) -> Option<&mut StageConfig> {
        self.stages.iter_mut().find(|config| config.stage == stage)
    }

    /// Checks every parameter; nothing supplied is silently replaced.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if secs_to_ms(self.horizon_secs) == 0 {
            return Err(ConfigurationError::NonPositiveHorizon(self.horizon_secs));
        }
        for (position, expected) in StageKind::PIPELINE.iter().enumerate() {
            let found = self.stages.get(position).map(|config| config.stage);
            if found != Some(*expected) {
                return Err(ConfigurationError::StageOrder {
                    position,
                    expected: *expected,
                    found,
                });
            }
        }
        if let Some(extra) = self.stages.get(StageKind::PIPELINE.len()) {
            return Err(ConfigurationError::ExtraStage {
                position: StageKind::PIPELINE.len(),
                found: extra.stage,
            });
        }
        for stage in &self.stages {
            stage.validate()?;
        }
        self.arrival_interval
            .validate()
            .map_err(ConfigurationError::ArrivalInterval)?;
        if !(self.snapshots.interval_secs.is_finite() && self.snapshots.interval_secs > 0.0) {
            return Err(ConfigurationError::SnapshotInterval);
        }
        Ok(())
    }
}

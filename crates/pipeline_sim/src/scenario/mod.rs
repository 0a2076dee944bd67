//! Scenario setup: validate a configuration and turn it into world resources.
//!
//! A [ScenarioConfig] is immutable input. [build_scenario] creates one resource
//! pool per device unit, the runtime stage processes and the arrival generator.

mod build;
mod params;

pub use build::build_scenario;
pub use params::{ActivePolicies, ScenarioConfig, ScenarioSeed, SimulationHorizonMs};

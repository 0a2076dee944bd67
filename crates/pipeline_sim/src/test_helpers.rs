//! Test helpers for common test setup and utilities.
//!
//! Worlds built here have every scenario resource but no `SimulationStarted`
//! event, so a test can schedule exactly the events it wants to drive.

use bevy_ecs::prelude::World;

use crate::kernel::{KernelHandle, RunSummary};
use crate::metrics::MetricsReport;
use crate::runner::{run_next_event, simulation_schedule};
use crate::scenario::{build_scenario, ScenarioConfig};

/// Baseline scenario world with an empty event queue.
pub fn test_world() -> World {
    test_world_with(ScenarioConfig::default())
}

/// World for `config` with an empty event queue.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn test_world_with(config: ScenarioConfig) -> World {
    let mut world = World::new();
    build_scenario(&mut world, &config).expect("test scenario should be valid");
    world
}

/// Runs the next event through the full simulation schedule.
///
/// Returns false when nothing was processed.
///
/// # Panics
///
/// Panics if the step raised an invariant violation.
pub fn run_one(world: &mut World) -> bool {
    let mut schedule = simulation_schedule();
    run_next_event(world, &mut schedule).expect("step should not violate an invariant")
}

/// Constructs and runs `config` to the end, returning the summary and report.
///
/// # Panics
///
/// Panics if `config` is invalid or the run aborts.
pub fn run_scenario(config: &ScenarioConfig) -> (RunSummary, MetricsReport) {
    let mut kernel = KernelHandle::construct(config).expect("test scenario should be valid");
    let summary = kernel.run().expect("run should complete");
    (summary, kernel.get_metrics())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulationClock;

    #[test]
    fn test_world_starts_with_an_empty_queue() {
        let mut world = test_world();
        assert!(world.resource::<SimulationClock>().is_empty());
        assert!(!run_one(&mut world));
    }
}

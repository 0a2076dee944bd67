use bevy_ecs::prelude::{Res, ResMut};
use tracing::info;

use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::pool::DevicePools;
use crate::scenario::{ScenarioSeed, SimulationHorizonMs};
use crate::stages::Pipeline;
use crate::systems::arrival::ArrivalGenerator;
use crate::systems::failure::schedule_next_failure;

/// Starts the arrival generator and the failure process of every failure-enabled device.
pub fn simulation_started_system(
    mut clock: ResMut<SimulationClock>,
    mut generator: ResMut<ArrivalGenerator>,
    mut pools: ResMut<DevicePools>,
    pipeline: Res<Pipeline>,
    seed: Res<ScenarioSeed>,
    horizon: Res<SimulationHorizonMs>,
    event: Res<CurrentEvent>,
) {
    if event.0.kind != EventKind::SimulationStarted {
        return;
    }

    let first_arrival = generator.schedule_next(&mut clock, seed.0, horizon.0);
    for pool in pools.pools.iter_mut() {
        schedule_next_failure(&mut clock, &pipeline, pool, seed.0);
    }
    info!(
        seed = seed.0,
        horizon_ms = horizon.0,
        devices = pools.len(),
        first_arrival_ms = ?first_arrival,
        "simulation started"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioConfig;
    use crate::test_helpers::{run_one, test_world_with};

    #[test]
    fn start_schedules_arrival_and_failures() {
        let mut world = test_world_with(ScenarioConfig::default().with_failures(7_200.0, 600.0));
        world
            .resource_mut::<SimulationClock>()
            .schedule_at(0, EventKind::SimulationStarted, None);
        assert!(run_one(&mut world));

        let pending = world.resource::<SimulationClock>().pending_event_count();
        let devices = world.resource::<DevicePools>().len();
        // One arrival plus one failure per device.
        assert_eq!(pending, devices + 1);
        assert!(world
            .resource::<DevicePools>()
            .iter()
            .all(|pool| pool.failure.next_failure_at.is_some()));
    }

    #[test]
    fn failures_disabled_schedules_only_the_arrival() {
        let mut world = test_world_with(ScenarioConfig::default());
        world
            .resource_mut::<SimulationClock>()
            .schedule_at(0, EventKind::SimulationStarted, None);
        assert!(run_one(&mut world));
        assert_eq!(world.resource::<SimulationClock>().pending_event_count(), 1);
    }
}

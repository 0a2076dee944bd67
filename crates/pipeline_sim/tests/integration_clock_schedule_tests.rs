mod support;

use bevy_ecs::prelude::World;
use pipeline_sim::clock::{CurrentEvent, EventKind, SimulationClock};
use pipeline_sim::ecs::{Batch, WorkflowPhase};
use pipeline_sim::runner::{initialize_simulation, EventCounters};
use pipeline_sim::scenario::{build_scenario, ScenarioConfig};
use support::schedule::EventStepper;

fn started_world(config: &ScenarioConfig) -> World {
    let mut world = World::new();
    build_scenario(&mut world, config).expect("valid scenario");
    initialize_simulation(&mut world);
    world
}

#[test]
fn first_steps_start_the_run_and_admit_a_batch() {
    let mut world = started_world(&ScenarioConfig::default());
    let mut stepper = EventStepper::new();

    assert!(stepper.step(&mut world));
    assert_eq!(world.resource::<CurrentEvent>().0.kind, EventKind::SimulationStarted);
    assert_eq!(world.resource::<SimulationClock>().now(), 0);
    assert_eq!(world.resource::<SimulationClock>().pending_event_count(), 1);

    assert!(stepper.step(&mut world));
    assert_eq!(world.resource::<CurrentEvent>().0.kind, EventKind::BatchArrival);
    let arrival_ms = world.resource::<SimulationClock>().now();
    assert!(arrival_ms > 0);

    assert!(stepper.step(&mut world));
    assert_eq!(world.resource::<CurrentEvent>().0.kind, EventKind::StageRequested);
    let batches: Vec<Batch> = world.query::<&Batch>().iter(&world).cloned().collect();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].id, "BATCH-00001");
    assert_eq!(batches[0].arrival_time, arrival_ms);
    assert!(matches!(batches[0].phase, WorkflowPhase::InService { .. }));
}

#[test]
fn runner_stops_at_the_horizon_with_events_pending() {
    let config = ScenarioConfig::default().with_horizon_secs(2.0 * 3600.0);
    let mut world = started_world(&config);
    let mut stepper = EventStepper::new();
    let steps = stepper.drain(&mut world);

    let clock = world.resource::<SimulationClock>();
    assert!(clock.now() <= 7_200_000);
    assert!(clock.next_event_time().is_some_and(|at| at > 7_200_000));
    assert_eq!(world.resource::<EventCounters>().total, steps as u64);
}

#[test]
fn max_steps_bounds_a_partial_drain() {
    let mut world = started_world(&ScenarioConfig::default());
    let mut stepper = EventStepper::new();
    assert_eq!(stepper.step_at_most(&mut world, 10), 10);
    assert_eq!(world.resource::<EventCounters>().total, 10);
}

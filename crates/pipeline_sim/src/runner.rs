//! Simulation runner: advances the clock and routes events into the ECS.
//!
//! Clock progression and event routing happen here, outside systems. Each step
//! pops the next event from [SimulationClock], inserts it as [CurrentEvent],
//! then runs the schedule. Systems that detect a broken engine invariant raise
//! it on the clock; the runner turns it into an error after the step.

use std::collections::BTreeMap;

use bevy_ecs::prelude::{Res, Resource};
use bevy_ecs::prelude::{Schedule, World};
use bevy_ecs::schedule::{apply_deferred, ExecutorKind, IntoSystemConfigs};

use crate::clock::{CurrentEvent, Event, EventKind, SimulationClock};
use crate::error::InvariantViolation;
use crate::scenario::SimulationHorizonMs;
use crate::systems::{
    arrival::batch_arrival_system,
    failure::{device_failed_system, device_repaired_system},
    simulation_started::simulation_started_system,
    telemetry_snapshot::capture_snapshot_system,
    workflow::{service_completed_system, stage_request_system},
};
use crate::telemetry::{SnapshotConfig, TelemetrySnapshots};

/// Events processed so far, by kind.
#[derive(Debug, Clone, Default, Resource)]
pub struct EventCounters {
    pub total: u64,
    pub by_kind: BTreeMap<EventKind, u64>,
}

impl EventCounters {
    pub fn record(&mut self, kind: EventKind) {
        self.total += 1;
        *self.by_kind.entry(kind).or_default() += 1;
    }

    pub fn count(&self, kind: EventKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

// Condition functions for each event kind
fn is_simulation_started(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::SimulationStarted)
        .unwrap_or(false)
}

fn is_batch_arrival(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::BatchArrival)
        .unwrap_or(false)
}

fn is_stage_requested(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::StageRequested)
        .unwrap_or(false)
}

fn is_service_completed(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::ServiceCompleted)
        .unwrap_or(false)
}

fn is_device_failed(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::DeviceFailed)
        .unwrap_or(false)
}

fn is_device_repaired(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::DeviceRepaired)
        .unwrap_or(false)
}

/// Condition: telemetry snapshot interval has elapsed.
fn should_capture_snapshot(
    clock: Option<Res<SimulationClock>>,
    config: Option<Res<SnapshotConfig>>,
    snapshots: Option<Res<TelemetrySnapshots>>,
) -> bool {
    let (Some(clock), Some(config), Some(snapshots)) = (clock, config, snapshots) else {
        return false;
    };
    match snapshots.last_snapshot_at {
        None => true,
        Some(last) => clock.now().saturating_sub(last) >= config.interval_ms,
    }
}

/// Runs one simulation step: pops the next event, inserts it as [CurrentEvent], then runs
/// the schedule.
///
/// Returns `Ok(true)` if an event was processed and `Ok(false)` if the queue is empty or the
/// next event lies after [SimulationHorizonMs]. Events exactly at the horizon are processed.
pub fn run_next_event(world: &mut World, schedule: &mut Schedule) -> Result<bool, InvariantViolation> {
    run_next_event_with_hook(world, schedule, |_, _| {})
}

/// Runs one simulation step and invokes `hook` after the schedule completes.
pub fn run_next_event_with_hook<F>(
    world: &mut World,
    schedule: &mut Schedule,
    mut hook: F,
) -> Result<bool, InvariantViolation>
where
    F: FnMut(&World, &Event),
{
    let stop_at = world.get_resource::<SimulationHorizonMs>().map(|h| h.0);
    let next_ts = world
        .get_resource::<SimulationClock>()
        .and_then(|c| c.next_event_time());
    if let (Some(end_ms), Some(ts)) = (stop_at, next_ts) {
        if ts > end_ms {
            return Ok(false);
        }
    }

    let event = match world.resource_mut::<SimulationClock>().pop_next() {
        Some(e) => e,
        None => return Ok(false),
    };
    world.insert_resource(CurrentEvent(event));

    if let Some(mut counters) = world.get_resource_mut::<EventCounters>() {
        counters.record(event.kind);
    }

    schedule.run(world);
    if let Some(violation) = world.resource_mut::<SimulationClock>().take_fault() {
        return Err(violation);
    }
    hook(world, &event);
    Ok(true)
}

/// Runs simulation steps until the queue is empty, the horizon is reached or `max_steps`
/// is hit. Returns the number of steps executed.
pub fn run_until_empty(
    world: &mut World,
    schedule: &mut Schedule,
    max_steps: usize,
) -> Result<usize, InvariantViolation> {
    run_until_empty_with_hook(world, schedule, max_steps, |_, _| {})
}

/// Runs simulation steps until empty and invokes `hook` after each step.
pub fn run_until_empty_with_hook<F>(
    world: &mut World,
    schedule: &mut Schedule,
    max_steps: usize,
    mut hook: F,
) -> Result<usize, InvariantViolation>
where
    F: FnMut(&World, &Event),
{
    let mut steps = 0;
    while steps < max_steps && run_next_event_with_hook(world, schedule, &mut hook)? {
        steps += 1;
    }
    Ok(steps)
}

/// Builds the simulation schedule: every event-reacting system gated on its event kind,
/// then [apply_deferred] so spawned batches exist before the snapshot system and the
/// next step.
///
/// The executor is single-threaded and the systems are chained, so a step is fully
/// ordered and reproducible.
pub fn simulation_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.set_executor_kind(ExecutorKind::SingleThreaded);

    schedule.add_systems(
        (
            simulation_started_system.run_if(is_simulation_started),
            batch_arrival_system.run_if(is_batch_arrival),
            stage_request_system.run_if(is_stage_requested),
            service_completed_system.run_if(is_service_completed),
            device_failed_system.run_if(is_device_failed),
            device_repaired_system.run_if(is_device_repaired),
            apply_deferred,
            capture_snapshot_system.run_if(should_capture_snapshot),
        )
            .chain(),
    );

    schedule
}

/// Initializes the simulation by scheduling the SimulationStarted event at time 0.
/// Call this after building the scenario and before running events.
pub fn initialize_simulation(world: &mut World) {
    let mut clock = world.resource_mut::<SimulationClock>();
    clock.schedule_at(0, EventKind::SimulationStarted, None);
}

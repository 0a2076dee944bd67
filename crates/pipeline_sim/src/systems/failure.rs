//! Device failure and repair.
//!
//! Each pool with an enabled failure model alternates between up and down:
//! an exponential uptime (mean MTBF) ends in `DeviceFailed`, an exponential
//! repair (mean MTTR) ends in `DeviceRepaired`, and the next uptime is drawn.
//! Only the repair brings a device back up.

use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::{info, warn};

use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::ecs::{Batch, ProcessStep, StageOutcome, WorkflowPhase};
use crate::error::InvariantViolation;
use crate::metrics::MetricsCollector;
use crate::pool::{DeviceId, DevicePools, ResourcePool};
use crate::scenario::{ActivePolicies, ScenarioSeed};
use crate::stages::Pipeline;
use crate::systems::workflow::dispatch_waiting;

/// Schedules the next failure of `pool`, if its stage has a failure model.
pub(crate) fn schedule_next_failure(
    clock: &mut SimulationClock,
    pipeline: &Pipeline,
    pool: &mut ResourcePool,
    seed: u64,
) {
    let Some(model) = pipeline
        .stage(pool.stage_index)
        .and_then(|stage| stage.failure.as_ref())
    else {
        return;
    };
    let uptime_ms = model.sample_uptime_ms(seed, pool.id, pool.failure.cycle);
    let at = clock.now().saturating_add(uptime_ms);
    pool.failure.next_failure_at = Some(at);
    clock.schedule_at(at, EventKind::DeviceFailed, Some(EventSubject::Device(pool.id)));
}

fn device_subject(event: &CurrentEvent) -> Option<DeviceId> {
    match event.0.subject {
        Some(EventSubject::Device(id)) => Some(id),
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn device_failed_system(
    mut clock: ResMut<SimulationClock>,
    mut pools: ResMut<DevicePools>,
    mut metrics: ResMut<MetricsCollector>,
    pipeline: Res<Pipeline>,
    policies: Res<ActivePolicies>,
    seed: Res<ScenarioSeed>,
    event: Res<CurrentEvent>,
    mut batches: Query<&mut Batch>,
) {
    if event.0.kind != EventKind::DeviceFailed {
        return;
    }
    let Some(pool) = device_subject(&event).and_then(|id| pools.get_mut(id)) else {
        clock.raise(InvariantViolation::UnknownSubject { event: event.0 });
        return;
    };
    if !pool.is_up() {
        return;
    }
    let now = clock.now();
    let device = pool.id;

    let evicted = pool.fail(now, policies.failure);
    metrics.record_failure(device, now);
    warn!(
        device = %pool.name,
        at_ms = now,
        in_flight = pool.busy_count(),
        evicted = evicted.len(),
        "device failed"
    );

    for hold in evicted {
        let Ok(mut batch) = batches.get_mut(hold.batch) else {
            clock.raise(InvariantViolation::UnknownWaiter { device });
            return;
        };
        let Some(step) = batch.open_step_mut() else {
            continue;
        };
        let stage = step.stage;
        step.exit_time = Some(now);
        step.outcome = Some(StageOutcome::Interrupted);
        metrics.record_hold_closed(device, hold.started_at, now, StageOutcome::Interrupted);

        // Back in the queue at the head; service restarts from scratch.
        batch.process_history.push(ProcessStep {
            stage,
            device,
            requested_at: now,
            enter_time: None,
            exit_time: None,
            outcome: None,
        });
        metrics.record_stage_entry(device);
        batch.attempt += 1;
        batch.phase = WorkflowPhase::Waiting { device };
    }

    let Some(model) = pipeline
        .stage(pool.stage_index)
        .and_then(|stage| stage.failure.as_ref())
    else {
        return;
    };
    let repair_ms = model.sample_repair_ms(seed.0, device, pool.failure.cycle);
    pool.failure.next_repair_at = Some(now.saturating_add(repair_ms));
    clock.schedule_in(repair_ms, EventKind::DeviceRepaired, Some(EventSubject::Device(device)));
}

pub fn device_repaired_system(
    mut clock: ResMut<SimulationClock>,
    mut pools: ResMut<DevicePools>,
    mut metrics: ResMut<MetricsCollector>,
    pipeline: Res<Pipeline>,
    seed: Res<ScenarioSeed>,
    event: Res<CurrentEvent>,
    mut batches: Query<&mut Batch>,
) {
    if event.0.kind != EventKind::DeviceRepaired {
        return;
    }
    let Some(pool) = device_subject(&event).and_then(|id| pools.get_mut(id)) else {
        clock.raise(InvariantViolation::UnknownSubject { event: event.0 });
        return;
    };
    if pool.is_up() {
        return;
    }
    let now = clock.now();
    let device = pool.id;
    let downtime_ms = pool.repair(now);
    metrics.record_repair(device, now);
    info!(
        device = %pool.name,
        at_ms = now,
        downtime_ms,
        waiting = pool.queue_length(),
        "device repaired"
    );

    schedule_next_failure(&mut clock, &pipeline, pool, seed.0);
    dispatch_waiting(
        device,
        &mut clock,
        &mut pools,
        &pipeline,
        &mut metrics,
        seed.0,
        &mut batches,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{DeviceStatus, FailurePolicy};
    use crate::scenario::ScenarioConfig;
    use crate::stages::StageKind;
    use crate::test_helpers::{run_one, test_world_with};

    fn scanner_failure_world(policy: FailurePolicy) -> bevy_ecs::prelude::World {
        test_world_with(
            ScenarioConfig::default()
                .with_stage_failures(StageKind::BloodBagScanner, 7_200.0, 600.0)
                .with_failure_policy(policy),
        )
    }

    #[test]
    fn failure_takes_the_device_down_and_schedules_a_repair() {
        let mut world = scanner_failure_world(FailurePolicy::FinishInFlight);
        world.resource_mut::<SimulationClock>().schedule_at(
            1_000,
            EventKind::DeviceFailed,
            Some(EventSubject::Device(DeviceId(0))),
        );
        assert!(run_one(&mut world));

        let pool = world
            .resource::<DevicePools>()
            .get(DeviceId(0))
            .cloned()
            .expect("scanner");
        assert_eq!(pool.failure.status, DeviceStatus::Down);
        let repair_at = pool.failure.next_repair_at.expect("repair scheduled");
        assert!(repair_at > 1_000);

        assert!(run_one(&mut world));
        let pools = world.resource::<DevicePools>();
        let pool = pools.get(DeviceId(0)).expect("scanner");
        assert_eq!(world.resource::<SimulationClock>().now(), repair_at);
        assert!(pool.is_up());
        assert_eq!(pool.failure.cycle, 1);
        assert!(pool.failure.next_failure_at.is_some_and(|at| at > repair_at));
    }

    #[test]
    fn restart_policy_interrupts_the_holder() {
        let mut world = scanner_failure_world(FailurePolicy::RestartInFlight);
        let entity = world.spawn(Batch::new(1, 0)).id();
        {
            let mut clock = world.resource_mut::<SimulationClock>();
            clock.schedule_at(0, EventKind::StageRequested, Some(EventSubject::Batch(entity)));
            clock.schedule_at(
                500,
                EventKind::DeviceFailed,
                Some(EventSubject::Device(DeviceId(0))),
            );
        }
        assert!(run_one(&mut world));
        assert!(run_one(&mut world));

        let batch = world.get::<Batch>(entity).expect("batch");
        assert_eq!(batch.attempt, 1);
        assert_eq!(batch.phase, WorkflowPhase::Waiting { device: DeviceId(0) });
        assert_eq!(batch.process_history.len(), 2);
        assert_eq!(
            batch.process_history[0].outcome,
            Some(StageOutcome::Interrupted)
        );
        assert_eq!(batch.process_history[0].held_ms(), Some(500));

        let pool = world.resource::<DevicePools>().get(DeviceId(0)).cloned().expect("scanner");
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.queue_length(), 1);
        assert_eq!(pool.cumulative_busy_ms(), 500);
    }
}

//! Workflow orchestration: drives each batch through the stages in order.
//!
//! A batch's workflow is suspended in its [WorkflowPhase] between events. A
//! `StageRequested` event routes the batch to a unit and acquires it; a
//! `ServiceCompleted` event releases the unit, applies the quality gate and
//! decides the next step with [next_step]. Suspending (scheduling the next
//! event) and finishing (archiving with a terminal state) are separate paths.

use bevy_ecs::prelude::{Commands, Entity, Query, Res, ResMut};
use tracing::debug;

use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::ecs::{
    Batch, BatchLedger, ProcessStep, StageOutcome, TerminalState, WorkflowPhase,
};
use crate::error::InvariantViolation;
use crate::metrics::MetricsCollector;
use crate::pool::{Acquire, DeviceId, DevicePools};
use crate::scenario::{ActivePolicies, ScenarioSeed};
use crate::stages::{Pipeline, StageProcess};

/// What a batch does after a hold ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    /// Request the stage at this index.
    Advance(usize),
    /// Stay at the current stage and wait for service again.
    Retry,
    /// Stop traversal with this terminal state.
    Finish(TerminalState),
}

/// Decides the next step of a batch after a hold at `current` ends with `outcome`.
pub fn next_step(current: usize, stage_count: usize, outcome: StageOutcome) -> WorkflowStep {
    match outcome {
        StageOutcome::Rejected(reason) => WorkflowStep::Finish(TerminalState::Failed(reason)),
        StageOutcome::Interrupted => WorkflowStep::Retry,
        StageOutcome::Processed if current + 1 < stage_count => WorkflowStep::Advance(current + 1),
        StageOutcome::Processed => WorkflowStep::Finish(TerminalState::Completed),
    }
}

/// Marks a granted hold as started and schedules its completion.
#[allow(clippy::too_many_arguments)]
fn start_service(
    clock: &mut SimulationClock,
    metrics: &mut MetricsCollector,
    stage: &StageProcess,
    seed: u64,
    entity: Entity,
    batch: &mut Batch,
    device: DeviceId,
    requested_at: u64,
) {
    let now = clock.now();
    metrics.record_grant(device, requested_at, now);
    if let Some(step) = batch.open_step_mut() {
        step.enter_time = Some(now);
    }
    let hold = batch.next_hold();
    batch.phase = WorkflowPhase::InService { device, hold };

    let duration_ms = stage.sample_service_ms(seed, batch.serial, batch.attempt);
    clock.schedule_in(
        duration_ms,
        EventKind::ServiceCompleted,
        Some(EventSubject::Hold {
            batch: entity,
            hold,
        }),
    );
    debug!(
        batch = %batch.id,
        stage = %stage.kind,
        device = %device,
        wait_ms = now.saturating_sub(requested_at),
        duration_ms,
        "service started"
    );
}

/// Grants freed units of `device` to waiting batches in FIFO order.
pub(crate) fn dispatch_waiting(
    device: DeviceId,
    clock: &mut SimulationClock,
    pools: &mut DevicePools,
    pipeline: &Pipeline,
    metrics: &mut MetricsCollector,
    seed: u64,
    batches: &mut Query<&mut Batch>,
) {
    let now = clock.now();
    loop {
        let Some(pool) = pools.get_mut(device) else {
            return;
        };
        let stage_index = pool.stage_index;
        let waiter = match pool.grant_next(now) {
            Ok(Some(waiter)) => waiter,
            Ok(None) => return,
            Err(violation) => {
                clock.raise(violation);
                return;
            }
        };
        let (Some(stage), Ok(mut batch)) = (pipeline.stage(stage_index), batches.get_mut(waiter.batch))
        else {
            clock.raise(InvariantViolation::UnknownWaiter { device });
            return;
        };
        start_service(
            clock,
            metrics,
            stage,
            seed,
            waiter.batch,
            &mut batch,
            device,
            waiter.requested_at,
        );
    }
}

/// Routes the batch to a unit of its current stage and requests it.
#[allow(clippy::too_many_arguments)]
pub fn stage_request_system(
    mut clock: ResMut<SimulationClock>,
    mut pools: ResMut<DevicePools>,
    mut metrics: ResMut<MetricsCollector>,
    pipeline: Res<Pipeline>,
    policies: Res<ActivePolicies>,
    seed: Res<ScenarioSeed>,
    event: Res<CurrentEvent>,
    mut batches: Query<&mut Batch>,
) {
    if event.0.kind != EventKind::StageRequested {
        return;
    }
    let Some(EventSubject::Batch(entity)) = event.0.subject else {
        clock.raise(InvariantViolation::UnknownSubject { event: event.0 });
        return;
    };
    let Ok(mut batch) = batches.get_mut(entity) else {
        clock.raise(InvariantViolation::UnknownSubject { event: event.0 });
        return;
    };
    let Some(stage) = pipeline.stage(batch.current_stage_index) else {
        clock.raise(InvariantViolation::UnknownSubject { event: event.0 });
        return;
    };
    let Some(device) = pools.route(
        policies.routing,
        &stage.devices,
        seed.0,
        stage.index,
        batch.serial,
    ) else {
        clock.raise(InvariantViolation::UnknownSubject { event: event.0 });
        return;
    };

    let now = clock.now();
    batch.process_history.push(ProcessStep {
        stage: stage.kind,
        device,
        requested_at: now,
        enter_time: None,
        exit_time: None,
        outcome: None,
    });
    metrics.record_stage_entry(device);

    let Some(pool) = pools.get_mut(device) else {
        return;
    };
    match pool.acquire(entity, now) {
        Ok(Acquire::Granted) => start_service(
            &mut clock,
            &mut metrics,
            stage,
            seed.0,
            entity,
            &mut batch,
            device,
            now,
        ),
        Ok(Acquire::Queued { position }) => {
            batch.phase = WorkflowPhase::Waiting { device };
            debug!(batch = %batch.id, device = %pool.name, position, "batch queued");
        }
        Err(violation) => clock.raise(violation),
    }
}

/// Ends a hold: releases the unit, runs the quality gate and moves the batch on.
#[allow(clippy::too_many_arguments)]
pub fn service_completed_system(
    mut commands: Commands,
    mut clock: ResMut<SimulationClock>,
    mut pools: ResMut<DevicePools>,
    mut metrics: ResMut<MetricsCollector>,
    mut ledger: ResMut<BatchLedger>,
    pipeline: Res<Pipeline>,
    seed: Res<ScenarioSeed>,
    event: Res<CurrentEvent>,
    mut batches: Query<&mut Batch>,
) {
    if event.0.kind != EventKind::ServiceCompleted {
        return;
    }
    let Some(EventSubject::Hold { batch: entity, hold }) = event.0.subject else {
        clock.raise(InvariantViolation::UnknownSubject { event: event.0 });
        return;
    };
    let now = clock.now();

    let device = {
        // A hold interrupted by a device failure leaves its completion behind,
        // possibly after the batch itself has finished.
        let Ok(mut batch) = batches.get_mut(entity) else {
            return;
        };
        let WorkflowPhase::InService {
            device,
            hold: active,
        } = batch.phase
        else {
            return;
        };
        if active != hold {
            return;
        }
        let Some(stage) = pipeline.stage(batch.current_stage_index) else {
            clock.raise(InvariantViolation::UnknownSubject { event: event.0 });
            return;
        };
        let Some(pool) = pools.get_mut(device) else {
            clock.raise(InvariantViolation::UnknownSubject { event: event.0 });
            return;
        };
        if let Err(violation) = pool.release(entity, now, true) {
            clock.raise(violation);
            return;
        }

        let inspection = stage.inspect(seed.0, batch.serial);
        let outcome = match inspection.as_ref().and_then(|inspection| inspection.rejection) {
            Some(reason) => StageOutcome::Rejected(reason),
            None => StageOutcome::Processed,
        };
        if let Some(inspection) = &inspection {
            inspection.record(&mut batch.quality_metrics);
            metrics.record_inspection(device, inspection.passed());
        }
        stage.record_measurements(seed.0, batch.serial, &mut batch.quality_metrics);

        let started_at = match batch.open_step_mut() {
            Some(step) => {
                step.exit_time = Some(now);
                step.outcome = Some(outcome);
                step.enter_time.unwrap_or(now)
            }
            None => now,
        };
        metrics.record_hold_closed(device, started_at, now, outcome);

        match next_step(batch.current_stage_index, pipeline.len(), outcome) {
            WorkflowStep::Advance(next) => {
                debug!(
                    batch = %batch.id,
                    stage = %stage.kind,
                    held_ms = now.saturating_sub(started_at),
                    next_stage = next,
                    "stage completed"
                );
                batch.current_stage_index = next;
                batch.attempt = 0;
                batch.phase = WorkflowPhase::Ready;
                clock.schedule_at(now, EventKind::StageRequested, Some(EventSubject::Batch(entity)));
            }
            WorkflowStep::Retry => {
                batch.phase = WorkflowPhase::Ready;
                clock.schedule_at(now, EventKind::StageRequested, Some(EventSubject::Batch(entity)));
            }
            WorkflowStep::Finish(state) => {
                batch.terminal_state = state;
                batch.phase = WorkflowPhase::Done;
                if state == TerminalState::Completed {
                    batch.completed_at = Some(now);
                }
                metrics.record_terminal(state, batch.cycle_time_ms());
                match state {
                    TerminalState::Failed(reason) => {
                        debug!(batch = %batch.id, stage = %stage.kind, %reason, "batch rejected by quality gate");
                    }
                    _ => {
                        debug!(batch = %batch.id, cycle_ms = ?batch.cycle_time_ms(), "batch completed");
                    }
                }
                ledger.archive(batch.clone());
                commands.entity(entity).despawn();
            }
        }
        device
    };

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

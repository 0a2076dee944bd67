use std::collections::BTreeMap;

use bevy_ecs::prelude::{Component, Resource};
use serde::Serialize;

use crate::pool::DeviceId;
use crate::stages::{QualityRejection, StageKind};

/// How a single hold at a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum StageOutcome {
    Processed,
    Rejected(QualityRejection),
    /// The device failed under the restart policy; the stage is attempted again.
    Interrupted,
}

/// One visit of a batch to a device. `enter_time` is when the unit was granted,
/// `requested_at` when the batch joined the device's queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStep {
    pub stage: StageKind,
    pub device: DeviceId,
    pub requested_at: u64,
    pub enter_time: Option<u64>,
    pub exit_time: Option<u64>,
    pub outcome: Option<StageOutcome>,
}

impl ProcessStep {
    /// Time the device was held for this step, once it is closed.
    pub fn held_ms(&self) -> Option<u64> {
        match (self.enter_time, self.exit_time) {
            (Some(enter), Some(exit)) => Some(exit.saturating_sub(enter)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TerminalState {
    InFlight,
    Completed,
    Failed(QualityRejection),
    /// The horizon was reached while the batch was still traversing.
    Incomplete,
}

impl TerminalState {
    pub fn is_terminal(self) -> bool {
        self != TerminalState::InFlight
    }
}

/// Where a batch's workflow is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// A `StageRequested` event is pending for the current stage.
    Ready,
    Waiting { device: DeviceId },
    InService { device: DeviceId, hold: u64 },
    Done,
}

#[derive(Debug, Clone, PartialEq, Component, Serialize)]
pub struct Batch {
    /// 1-based creation order; also the batch's identity in random draws.
    pub serial: u64,
    pub id: String,
    pub arrival_time: u64,
    pub current_stage_index: usize,
    pub process_history: Vec<ProcessStep>,
    pub quality_metrics: BTreeMap<String, f64>,
    pub terminal_state: TerminalState,
    pub completed_at: Option<u64>,
    pub phase: WorkflowPhase,
    /// Attempts made at the current stage (restarts after an interruption).
    pub attempt: u32,
    #[serde(skip)]
    pub hold_seq: u64,
}

impl Batch {
    pub fn new(serial: u64, arrival_time: u64) -> Self {
        Self {
            serial,
            id: format!("BATCH-{serial:05}"),
            arrival_time,
            current_stage_index: 0,
            process_history: Vec::new(),
            quality_metrics: BTreeMap::new(),
            terminal_state: TerminalState::InFlight,
            completed_at: None,
            phase: WorkflowPhase::Ready,
            attempt: 0,
            hold_seq: 0,
        }
    }

    /// Arrival to final exit, for completed batches only.
    pub fn cycle_time_ms(&self) -> Option<u64> {
        match self.terminal_state {
            TerminalState::Completed => self
                .completed_at
                .map(|at| at.saturating_sub(self.arrival_time)),
            _ => None,
        }
    }

    /// The step currently open (queued or in service), if any.
    pub fn open_step_mut(&mut self) -> Option<&mut ProcessStep> {
        self.process_history
            .last_mut()
            .filter(|step| step.exit_time.is_none())
    }

    /// Starts a new hold and returns its number.
    pub fn next_hold(&mut self) -> u64 {
        self.hold_seq += 1;
        self.hold_seq
    }
}

/// Batches that reached a terminal state, in archive order until the run ends,
/// then sorted by serial.
#[derive(Debug, Default, Resource)]
pub struct BatchLedger {
    pub batches: Vec<Batch>,
}

impl BatchLedger {
    pub fn archive(&mut self, batch: Batch) {
        self.batches.push(batch);
    }

    pub fn count(&self, state: TerminalState) -> usize {
        self.batches
            .iter()
            .filter(|batch| batch.terminal_state == state)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_ids_are_zero_padded() {
        assert_eq!(Batch::new(7, 0).id, "BATCH-00007");
        assert_eq!(Batch::new(123_456, 0).id, "BATCH-123456");
    }

    #[test]
    fn cycle_time_only_for_completed_batches() {
        let mut batch = Batch::new(1, 1_000);
        batch.completed_at = Some(5_000);
        assert_eq!(batch.cycle_time_ms(), None);
        batch.terminal_state = TerminalState::Completed;
        assert_eq!(batch.cycle_time_ms(), Some(4_000));
    }

    #[test]
    fn open_step_ignores_closed_history() {
        let mut batch = Batch::new(1, 0);
        batch.process_history.push(ProcessStep {
            stage: StageKind::BloodBagScanner,
            device: DeviceId(0),
            requested_at: 0,
            enter_time: Some(0),
            exit_time: Some(10),
            outcome: Some(StageOutcome::Processed),
        });
        assert!(batch.open_step_mut().is_none());
        assert_eq!(batch.process_history[0].held_ms(), Some(10));
    }
}

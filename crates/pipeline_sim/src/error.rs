//! Error types surfaced to callers of the kernel.
//!
//! Batch-level rejections and device faults are not errors: they are recovered
//! inside the run and only show up in metrics. Only bad configuration and
//! engine invariant violations reach the caller.

use serde::Serialize;
use thiserror::Error;

use crate::clock::Event;
use crate::pool::{DeviceId, DeviceStatus};
use crate::stages::StageKind;

/// Invalid scenario parameters, raised by `KernelHandle::construct`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("horizon must be at least one millisecond, got {0} s")]
    NonPositiveHorizon(f64),
    #[error("pipeline must configure every stage exactly once in order; expected {expected} at position {position}, found {found:?}")]
    StageOrder {
        position: usize,
        expected: StageKind,
        found: Option<StageKind>,
    },
    #[error("pipeline has an extra stage {found} at position {position}")]
    ExtraStage { position: usize, found: StageKind },
    #[error("{stage}: unit_count must be at least 1")]
    NoUnits { stage: StageKind },
    #[error("{stage}: capacity_per_unit must be at least 1")]
    NoCapacity { stage: StageKind },
    #[error("{stage}: service_time is invalid: {reason}")]
    ServiceTime {
        stage: StageKind,
        reason: &'static str,
    },
    #[error("{stage}: mtbf_secs must be positive, got {value}")]
    NonPositiveMtbf { stage: StageKind, value: f64 },
    #[error("{stage}: mttr_secs must be positive, got {value}")]
    NonPositiveMttr { stage: StageKind, value: f64 },
    #[error("{stage}: measurement `{name}` has an empty or inverted range")]
    Measurement { stage: StageKind, name: String },
    #[error("{stage}: quality gate is invalid: {reason}")]
    QualityGate {
        stage: StageKind,
        reason: &'static str,
    },
    #[error("arrival_interval is invalid: {0}")]
    ArrivalInterval(&'static str),
    #[error("snapshot interval must be positive")]
    SnapshotInterval,
}

/// Engine invariants whose violation aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("event {event:?} scheduled in the past (clock at {now_ms} ms)")]
    EventInPast { event: Event, now_ms: u64 },
    #[error("device {device} would hold {busy} units with capacity {capacity}")]
    CapacityExceeded {
        device: DeviceId,
        busy: u32,
        capacity: u32,
    },
    #[error("device {device} released a unit it did not grant (batch {batch})")]
    ReleaseWithoutHold { device: DeviceId, batch: String },
    #[error("device {device} granted a unit while down")]
    GrantWhileDown { device: DeviceId },
    #[error("device {device} granted a unit to a batch that no longer exists")]
    UnknownWaiter { device: DeviceId },
    #[error("event {event:?} refers to an unknown subject")]
    UnknownSubject { event: Event },
}

/// State of one pool at the moment a run aborted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub device_id: String,
    pub stage: StageKind,
    pub status: DeviceStatus,
    pub capacity: u32,
    pub busy_count: u32,
    pub queue_length: usize,
    pub cumulative_busy_ms: u64,
    pub processed_count: u64,
}

/// Kernel state captured for diagnostics when a run aborts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelSnapshot {
    pub now_ms: u64,
    pub pending_events: usize,
    pub events_processed: u64,
    pub pools: Vec<PoolSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("run aborted at {} ms: {violation}", snapshot.now_ms)]
    InvariantViolation {
        violation: InvariantViolation,
        snapshot: Box<KernelSnapshot>,
    },
}

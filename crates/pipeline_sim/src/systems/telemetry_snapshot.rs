use bevy_ecs::prelude::{Res, ResMut};

use crate::clock::SimulationClock;
use crate::metrics::MetricsCollector;
use crate::pool::DevicePools;
use crate::stages::Pipeline;
use crate::telemetry::{device_telemetry, SnapshotConfig, TelemetrySnapshot, TelemetrySnapshots};

/// Records the telemetry of every device into the rolling buffer.
pub fn capture_snapshot_system(
    clock: Res<SimulationClock>,
    config: Res<SnapshotConfig>,
    mut snapshots: ResMut<TelemetrySnapshots>,
    pools: Res<DevicePools>,
    pipeline: Res<Pipeline>,
    metrics: Res<MetricsCollector>,
) {
    let now = clock.now();
    let snapshot = TelemetrySnapshot {
        timestamp_ms: now,
        devices: device_telemetry(&pools, &pipeline, &metrics, now),
    };
    snapshots.push(snapshot, config.max_snapshots);
}

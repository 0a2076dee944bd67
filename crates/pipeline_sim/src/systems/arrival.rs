//! Arrival generator: creates batches at sampled intervals until the horizon.

use bevy_ecs::prelude::{Commands, Res, ResMut, Resource};
use tracing::debug;

use crate::clock::{secs_to_ms, CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::distributions::{stream_rng, DurationSampler, RngStream};
use crate::ecs::Batch;
use crate::metrics::MetricsCollector;
use crate::scenario::{ScenarioSeed, SimulationHorizonMs};

#[derive(Debug, Resource)]
pub struct ArrivalGenerator {
    interval: Box<dyn DurationSampler>,
    draws: u64,
    created: u64,
}

impl ArrivalGenerator {
    pub fn new(interval: Box<dyn DurationSampler>) -> Self {
        Self {
            interval,
            draws: 0,
            created: 0,
        }
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    /// Draws the next inter-arrival interval (at least 1 ms).
    pub fn next_interval_ms(&mut self, seed: u64) -> u64 {
        let mut rng = stream_rng(seed, RngStream::Arrival, &[self.draws]);
        self.draws += 1;
        secs_to_ms(self.interval.sample_secs(&mut rng)).max(1)
    }

    /// Schedules the next arrival unless it would land after the horizon.
    /// Returns the scheduled time.
    pub fn schedule_next(
        &mut self,
        clock: &mut SimulationClock,
        seed: u64,
        horizon_ms: u64,
    ) -> Option<u64> {
        let at = clock.now().saturating_add(self.next_interval_ms(seed));
        if at > horizon_ms {
            debug!(at_ms = at, horizon_ms, "arrival generator stopped at horizon");
            return None;
        }
        clock.schedule_at(at, EventKind::BatchArrival, None);
        Some(at)
    }
}

/// Creates one batch and starts its workflow at the first stage.
pub fn batch_arrival_system(
    mut commands: Commands,
    mut clock: ResMut<SimulationClock>,
    mut generator: ResMut<ArrivalGenerator>,
    mut metrics: ResMut<MetricsCollector>,
    seed: Res<ScenarioSeed>,
    horizon: Res<SimulationHorizonMs>,
    event: Res<CurrentEvent>,
) {
    if event.0.kind != EventKind::BatchArrival {
        return;
    }

    let now = clock.now();
    generator.created += 1;
    let batch = Batch::new(generator.created, now);
    debug!(batch = %batch.id, at_ms = now, "batch arrived");

    let entity = commands.spawn(batch).id();
    metrics.record_batch_created();
    clock.schedule_at(now, EventKind::StageRequested, Some(EventSubject::Batch(entity)));

    generator.schedule_next(&mut clock, seed.0, horizon.0);
}

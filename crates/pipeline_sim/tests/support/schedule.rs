#![allow(dead_code)]

use bevy_ecs::prelude::World;
use bevy_ecs::schedule::Schedule;
use pipeline_sim::runner::{run_next_event, run_until_empty, simulation_schedule};

/// Steps a hand-built world through the pipeline schedule one event at a time.
///
/// Panics on an invariant violation, which is what a test wants to see.
pub struct EventStepper {
    schedule: Schedule,
}

impl EventStepper {
    pub fn new() -> Self {
        Self {
            schedule: simulation_schedule(),
        }
    }

    /// Processes the next event; `false` once the queue is empty or past the horizon.
    pub fn step(&mut self, world: &mut World) -> bool {
        run_next_event(world, &mut self.schedule).expect("kernel invariant held")
    }

    /// Processes at most `limit` events and returns how many ran.
    pub fn step_at_most(&mut self, world: &mut World, limit: usize) -> usize {
        run_until_empty(world, &mut self.schedule, limit).expect("kernel invariant held")
    }

    pub fn drain(&mut self, world: &mut World) -> usize {
        self.step_at_most(world, usize::MAX)
    }
}

//! Simulation clock and event queue.
//!
//! Events are ordered by `(timestamp, sequence)`. The sequence is an insertion
//! counter, so events scheduled for the same millisecond fire in the order they
//! were scheduled. The clock only moves forward when an event is popped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::prelude::{Entity, Resource};
use serde::Serialize;

use crate::error::InvariantViolation;
use crate::pool::DeviceId;

pub const ONE_SEC_MS: u64 = 1000;

/// Converts configuration seconds into simulation milliseconds (rounded).
pub fn secs_to_ms(secs: f64) -> u64 {
    if secs <= 0.0 || !secs.is_finite() {
        return 0;
    }
    (secs * ONE_SEC_MS as f64).round() as u64
}

pub fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / ONE_SEC_MS as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SimulationStarted,
    BatchArrival,
    StageRequested,
    ServiceCompleted,
    DeviceFailed,
    DeviceRepaired,
}

/// What an event resumes. `Hold` carries the hold number so a completion that
/// belongs to an interrupted hold can be recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSubject {
    Batch(Entity),
    Hold { batch: Entity, hold: u64 },
    Device(DeviceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: u64,
    pub sequence: u64,
    pub kind: EventKind,
    pub subject: Option<EventSubject>,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by (timestamp, sequence).
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The event being handled by the current schedule run.
#[derive(Debug, Clone, Copy, Resource)]
pub struct CurrentEvent(pub Event);

#[derive(Debug, Default, Resource)]
pub struct SimulationClock {
    now: u64,
    next_sequence: u64,
    events: BinaryHeap<Event>,
    fault: Option<InvariantViolation>,
}

impl SimulationClock {
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedules an event at an absolute timestamp.
    ///
    /// A timestamp earlier than `now` is never enqueued; it is recorded as an
    /// engine fault that the runner turns into a hard error after the step.
    pub fn schedule_at(&mut self, timestamp: u64, kind: EventKind, subject: Option<EventSubject>) {
        let event = Event {
            timestamp,
            sequence: self.next_sequence,
            kind,
            subject,
        };
        self.next_sequence += 1;
        if timestamp < self.now {
            self.raise(InvariantViolation::EventInPast {
                event,
                now_ms: self.now,
            });
            return;
        }
        self.events.push(event);
    }

    pub fn schedule_in(&mut self, delay_ms: u64, kind: EventKind, subject: Option<EventSubject>) {
        let timestamp = self.now.saturating_add(delay_ms);
        self.schedule_at(timestamp, kind, subject);
    }

    pub fn pop_next(&mut self) -> Option<Event> {
        let event = self.events.pop()?;
        self.now = event.timestamp;
        Some(event)
    }

    pub fn next_event_time(&self) -> Option<u64> {
        self.events.peek().map(|event| event.timestamp)
    }

    pub fn pending_event_count(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Moves the clock forward without firing anything. Used once the run ends so
    /// that elapsed time equals the horizon. Never moves backwards.
    pub fn advance_to(&mut self, timestamp: u64) {
        if timestamp > self.now {
            self.now = timestamp;
        }
    }

    /// Records an engine invariant violation. The first one wins.
    pub fn raise(&mut self, violation: InvariantViolation) {
        if self.fault.is_none() {
            self.fault = Some(violation);
        }
    }

    pub fn fault(&self) -> Option<&InvariantViolation> {
        self.fault.as_ref()
    }

    pub fn take_fault(&mut self) -> Option<InvariantViolation> {
        self.fault.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_pops_events_in_time_order() {
        let mut clock = SimulationClock::default();
        clock.schedule_at(10, EventKind::BatchArrival, None);
        clock.schedule_at(5, EventKind::BatchArrival, None);
        clock.schedule_at(20, EventKind::BatchArrival, None);

        let first = clock.pop_next().expect("first event");
        assert_eq!(first.timestamp, 5);
        assert_eq!(clock.now(), 5);

        let second = clock.pop_next().expect("second event");
        assert_eq!(second.timestamp, 10);
        assert_eq!(clock.now(), 10);

        let third = clock.pop_next().expect("third event");
        assert_eq!(third.timestamp, 20);
        assert_eq!(clock.now(), 20);

        assert!(clock.pop_next().is_none());
        assert!(clock.is_empty());
    }

    #[test]
    fn same_timestamp_fires_in_insertion_order() {
        let mut clock = SimulationClock::default();
        clock.schedule_at(7, EventKind::DeviceFailed, None);
        clock.schedule_at(7, EventKind::BatchArrival, None);
        clock.schedule_at(7, EventKind::StageRequested, None);

        let kinds: Vec<EventKind> = std::iter::from_fn(|| clock.pop_next())
            .map(|event| event.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::DeviceFailed,
                EventKind::BatchArrival,
                EventKind::StageRequested
            ]
        );
    }

    #[test]
    fn scheduling_in_the_past_raises_a_fault() {
        let mut clock = SimulationClock::default();
        clock.schedule_at(100, EventKind::BatchArrival, None);
        clock.pop_next();

        clock.schedule_at(50, EventKind::BatchArrival, None);
        assert!(clock.is_empty(), "past events are not enqueued");
        match clock.fault() {
            Some(InvariantViolation::EventInPast { event, now_ms }) => {
                assert_eq!(event.timestamp, 50);
                assert_eq!(*now_ms, 100);
            }
            other => panic!("unexpected fault: {other:?}"),
        }
    }

    #[test]
    fn advance_to_never_moves_backwards() {
        let mut clock = SimulationClock::default();
        clock.advance_to(500);
        clock.advance_to(200);
        assert_eq!(clock.now(), 500);
    }

    #[test]
    fn seconds_round_to_milliseconds() {
        assert_eq!(secs_to_ms(1.5), 1500);
        assert_eq!(secs_to_ms(0.0004), 0);
        assert_eq!(secs_to_ms(-3.0), 0);
        assert_eq!(ms_to_secs(2500), 2.5);
    }
}

//! Capacity-limited resource pools, one per device unit.
//!
//! A pool grants up to `capacity` concurrent holds. Requests that cannot be
//! granted wait in a FIFO queue and are granted in order whenever a unit frees
//! up or the device comes back from repair. Busy time is accumulated per hold
//! when it is released, so utilization can be derived without sampling.

use std::collections::VecDeque;
use std::fmt;

use bevy_ecs::prelude::{Entity, Resource};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::distributions::{stream_rng, RngStream};
use crate::error::InvariantViolation;
use crate::stages::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Up,
    Down,
}

/// How a batch picks one of the parallel units of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Shortest wait queue; ties go to a unit that can start now, then to the
    /// least busy unit so far, then to the lowest index.
    #[default]
    ShortestQueue,
    /// Seeded uniform choice per batch and stage.
    Random,
}

/// What happens to in-flight holds when a device fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Holders finish normally; only new grants wait for the repair.
    #[default]
    FinishInFlight,
    /// Holders are evicted and re-queued at the head, restarting after repair.
    RestartInFlight,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureState {
    pub status: DeviceStatus,
    pub next_failure_at: Option<u64>,
    pub next_repair_at: Option<u64>,
    pub down_since: Option<u64>,
    /// Completed failure cycles; also the index of the next failure draw.
    pub cycle: u64,
}

impl Default for FailureState {
    fn default() -> Self {
        Self {
            status: DeviceStatus::Up,
            next_failure_at: None,
            next_repair_at: None,
            down_since: None,
            cycle: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub batch: Entity,
    pub requested_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveHold {
    pub batch: Entity,
    pub started_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    Queued { position: usize },
}

#[derive(Debug, Clone)]
pub struct ResourcePool {
    pub id: DeviceId,
    pub name: String,
    pub stage: StageKind,
    pub stage_index: usize,
    pub capacity: u32,
    pub failure: FailureState,
    busy_count: u32,
    queue: VecDeque<Waiter>,
    holders: Vec<ActiveHold>,
    cumulative_busy_ms: u64,
    processed_count: u64,
}

impl ResourcePool {
    pub fn new(
        id: DeviceId,
        name: impl Into<String>,
        stage: StageKind,
        stage_index: usize,
        capacity: u32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            stage,
            stage_index,
            capacity,
            failure: FailureState::default(),
            busy_count: 0,
            queue: VecDeque::new(),
            holders: Vec::new(),
            cumulative_busy_ms: 0,
            processed_count: 0,
        }
    }

    pub fn is_up(&self) -> bool {
        self.failure.status == DeviceStatus::Up
    }

    pub fn has_free_unit(&self) -> bool {
        self.is_up() && self.busy_count < self.capacity
    }

    pub fn busy_count(&self) -> u32 {
        self.busy_count
    }

    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> impl Iterator<Item = &Waiter> {
        self.queue.iter()
    }

    pub fn holders(&self) -> &[ActiveHold] {
        &self.holders
    }

    /// Busy time of released holds only.
    pub fn cumulative_busy_ms(&self) -> u64 {
        self.cumulative_busy_ms
    }

    /// Busy time including the elapsed part of holds still open at `now`.
    pub fn busy_ms_at(&self, now: u64) -> u64 {
        let open: u64 = self
            .holders
            .iter()
            .map(|hold| now.saturating_sub(hold.started_at))
            .sum();
        self.cumulative_busy_ms + open
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count
    }

    /// Busy time over available unit-time, clamped to `[0, 1]`.
    pub fn utilization(&self, now: u64) -> f64 {
        if now == 0 || self.capacity == 0 {
            return 0.0;
        }
        let available = now as f64 * f64::from(self.capacity);
        (self.busy_ms_at(now) as f64 / available).clamp(0.0, 1.0)
    }

    /// Requests one unit. Granted immediately when the device is up, a unit is
    /// free and nobody is already waiting; queued otherwise.
    pub fn acquire(&mut self, batch: Entity, now: u64) -> Result<Acquire, InvariantViolation> {
        if self.queue.is_empty() && self.has_free_unit() {
            self.grant(batch, now)?;
            return Ok(Acquire::Granted);
        }
        self.queue.push_back(Waiter {
            batch,
            requested_at: now,
        });
        Ok(Acquire::Queued {
            position: self.queue.len(),
        })
    }

    fn grant(&mut self, batch: Entity, now: u64) -> Result<(), InvariantViolation> {
        if !self.is_up() {
            return Err(InvariantViolation::GrantWhileDown { device: self.id });
        }
        if self.busy_count >= self.capacity {
            return Err(InvariantViolation::CapacityExceeded {
                device: self.id,
                busy: self.busy_count + 1,
                capacity: self.capacity,
            });
        }
        self.busy_count += 1;
        self.holders.push(ActiveHold {
            batch,
            started_at: now,
        });
        Ok(())
    }

    /// Releases the unit held by `batch` and returns how long it was held.
    /// `completed` is false when the hold ends without finishing its service.
    pub fn release(
        &mut self,
        batch: Entity,
        now: u64,
        completed: bool,
    ) -> Result<u64, InvariantViolation> {
        let Some(position) = self.holders.iter().position(|hold| hold.batch == batch) else {
            return Err(InvariantViolation::ReleaseWithoutHold {
                device: self.id,
                batch: format!("{batch:?}"),
            });
        };
        let hold = self.holders.remove(position);
        let held = now.saturating_sub(hold.started_at);
        self.busy_count -= 1;
        self.cumulative_busy_ms += held;
        if completed {
            self.processed_count += 1;
        }
        Ok(held)
    }

    /// Grants a unit to the head of the queue if the device can serve it now.
    pub fn grant_next(&mut self, now: u64) -> Result<Option<Waiter>, InvariantViolation> {
        if !self.has_free_unit() {
            return Ok(None);
        }
        let Some(waiter) = self.queue.pop_front() else {
            return Ok(None);
        };
        self.grant(waiter.batch, now)?;
        Ok(Some(waiter))
    }

    /// Takes the device down. Under [FailurePolicy::RestartInFlight] every open
    /// hold is closed (its elapsed time still counts as busy) and the holders are
    /// put back at the head of the queue in their original order.
    pub fn fail(&mut self, now: u64, policy: FailurePolicy) -> Vec<ActiveHold> {
        self.failure.status = DeviceStatus::Down;
        self.failure.down_since = Some(now);
        self.failure.next_failure_at = None;

        if policy == FailurePolicy::FinishInFlight {
            return Vec::new();
        }
        let evicted = std::mem::take(&mut self.holders);
        for hold in evicted.iter().rev() {
            self.cumulative_busy_ms += now.saturating_sub(hold.started_at);
            self.queue.push_front(Waiter {
                batch: hold.batch,
                requested_at: now,
            });
        }
        self.busy_count = 0;
        evicted
    }

    /// Brings the device back up and returns how long it was down.
    pub fn repair(&mut self, now: u64) -> u64 {
        let downtime = self
            .failure
            .down_since
            .map(|since| now.saturating_sub(since))
            .unwrap_or(0);
        self.failure.status = DeviceStatus::Up;
        self.failure.down_since = None;
        self.failure.next_repair_at = None;
        self.failure.cycle += 1;
        downtime
    }
}

/// All pools of the run, indexed by [DeviceId].
#[derive(Debug, Default, Resource)]
pub struct DevicePools {
    pub pools: Vec<ResourcePool>,
}

impl DevicePools {
    pub fn get(&self, id: DeviceId) -> Option<&ResourcePool> {
        self.pools.get(id.0)
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut ResourcePool> {
        self.pools.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourcePool> {
        self.pools.iter()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn stage_pools(&self, stage_index: usize) -> impl Iterator<Item = &ResourcePool> {
        self.pools
            .iter()
            .filter(move |pool| pool.stage_index == stage_index)
    }

    /// Picks one of `candidates` for a batch according to `policy`.
    pub fn route(
        &self,
        policy: RoutingPolicy,
        candidates: &[DeviceId],
        seed: u64,
        stage_index: usize,
        batch_serial: u64,
    ) -> Option<DeviceId> {
        if candidates.len() <= 1 {
            return candidates.first().copied();
        }
        match policy {
            RoutingPolicy::ShortestQueue => candidates
                .iter()
                .filter_map(|id| self.get(*id))
                .min_by_key(|pool| {
                    (
                        pool.queue_length(),
                        !pool.has_free_unit(),
                        pool.cumulative_busy_ms(),
                        pool.id,
                    )
                })
                .map(|pool| pool.id),
            RoutingPolicy::Random => {
                let mut rng = stream_rng(
                    seed,
                    RngStream::Routing,
                    &[stage_index as u64, batch_serial],
                );
                let pick = rng.gen_range(0..candidates.len());
                candidates.get(pick).copied()
            }
        }
    }
}

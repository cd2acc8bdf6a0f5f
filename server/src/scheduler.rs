//! Deadline-keyed delayed tasks polled from the server tick.
//!
//! A key identifies what a task affects, so scheduling the same key again
//! moves its deadline instead of queueing a second task, and everything tied
//! to an entity can be cancelled at once when that entity is knocked out or
//! leaves.

use std::collections::HashMap;
use std::time::Instant;
use tpk_shared::{EntityId, Field};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Next decrement of the prephase countdown.
    Countdown,
    /// Restore a temporarily buffed stat to its base value.
    RevertBuff { entity: EntityId, field: Field },
    /// Bring a knocked-out hero back.
    Revive { entity: EntityId },
}

impl Timer {
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Timer::Countdown => None,
            Timer::RevertBuff { entity, .. } | Timer::Revive { entity } => Some(*entity),
        }
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    deadlines: HashMap<Timer, Instant>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `timer` at `at`, replacing any earlier deadline for it.
    pub fn schedule(&mut self, timer: Timer, at: Instant) {
        self.deadlines.insert(timer, at);
    }

    pub fn cancel(&mut self, timer: &Timer) -> bool {
        self.deadlines.remove(timer).is_some()
    }

    /// Cancels every timer tied to `entity` and returns them.
    pub fn cancel_entity(&mut self, entity: EntityId) -> Vec<Timer> {
        let cancelled: Vec<Timer> = self
            .deadlines
            .keys()
            .filter(|timer| timer.entity() == Some(entity))
            .copied()
            .collect();

        for timer in &cancelled {
            self.deadlines.remove(timer);
        }
        cancelled
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub fn due(&mut self, now: Instant) -> Vec<Timer> {
        let mut due: Vec<(Timer, Instant)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(timer, at)| (*timer, *at))
            .collect();
        due.sort_by_key(|(_, at)| *at);

        for (timer, _) in &due {
            self.deadlines.remove(timer);
        }
        due.into_iter().map(|(timer, _)| timer).collect()
    }

    pub fn is_scheduled(&self, timer: &Timer) -> bool {
        self.deadlines.contains_key(timer)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

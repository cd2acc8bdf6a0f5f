//! Artifact possession state machine.
//!
//! ```text
//! Free --pickup--> Carried(hero) --reach own spawn--> Scored
//!                        |
//!                        +--carrier knocked out / removed--> Free (dropped)
//! ```
//!
//! The carrier is held by entity id only. If that hero disappears the match
//! calls [`ObjectiveController::carrier_removed`] and the artifact falls
//! back to `Free`. A scored instance is finished; the match replaces it via
//! [`ObjectiveController::respawn`].

use log::{debug, info};
use tpk_shared::{EntityId, ObjectiveSnapshot, ObjectiveState, Rarity, Vec3, SCORE_RADIUS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectiveEvent {
    PickedUp { carrier: EntityId },
    Dropped { carrier: EntityId, at: Vec3 },
    Scored { carrier: EntityId, points: i32 },
}

#[derive(Debug)]
pub struct ObjectiveController {
    instance: EntityId,
    rarity: Rarity,
    state: ObjectiveState,
    position: Vec3,
    owner_spawn: Option<Vec3>,
    score_radius: f32,
    version: u64,
}

impl ObjectiveController {
    pub fn new(instance: EntityId, rarity: Rarity, position: Vec3) -> Self {
        Self {
            instance,
            rarity,
            state: ObjectiveState::Free,
            position,
            owner_spawn: None,
            score_radius: SCORE_RADIUS,
            version: 1,
        }
    }

    pub fn with_score_radius(mut self, radius: f32) -> Self {
        self.score_radius = radius;
        self
    }

    /// Picks the artifact up. No-op if it is already carried or scored, or
    /// if the would-be carrier is knocked out.
    pub fn pickup(
        &mut self,
        carrier: EntityId,
        carrier_knocked_out: bool,
        carrier_spawn: Vec3,
    ) -> Option<ObjectiveEvent> {
        if self.state != ObjectiveState::Free {
            debug!("Artifact {} not free, ignoring pickup by {}", self.instance, carrier);
            return None;
        }
        if carrier_knocked_out {
            debug!("Knocked out entity {} cannot pick up artifact", carrier);
            return None;
        }

        self.state = ObjectiveState::Carried(carrier);
        self.owner_spawn = Some(carrier_spawn);
        self.version += 1;
        info!("Entity {} picked up artifact {}", carrier, self.instance);
        Some(ObjectiveEvent::PickedUp { carrier })
    }

    /// Moves a carried artifact along with its carrier and scores it once the
    /// carrier is within the scoring radius of its own spawn.
    pub fn carrier_moved(&mut self, carrier: EntityId, position: Vec3) -> Option<ObjectiveEvent> {
        if self.carrier() != Some(carrier) {
            return None;
        }
        self.position = position;
        self.version += 1;
        self.reach_owner_spawn(position)
    }

    pub fn reach_owner_spawn(&mut self, position: Vec3) -> Option<ObjectiveEvent> {
        let carrier = self.carrier()?;
        let spawn = self.owner_spawn?;

        if position.distance(&spawn) > self.score_radius {
            return None;
        }

        let points = self.rarity.score();
        self.state = ObjectiveState::Scored;
        self.position = position;
        self.version += 1;
        info!(
            "Entity {} scored artifact {} for {} points",
            carrier, self.instance, points
        );
        Some(ObjectiveEvent::Scored { carrier, points })
    }

    /// Drops the artifact where the knocked-out carrier last stood.
    pub fn owner_knocked_out(&mut self, last_location: Vec3) -> Option<ObjectiveEvent> {
        let carrier = self.carrier()?;

        self.state = ObjectiveState::Free;
        self.owner_spawn = None;
        self.position = last_location;
        self.version += 1;
        info!("Entity {} dropped artifact {}", carrier, self.instance);
        Some(ObjectiveEvent::Dropped {
            carrier,
            at: last_location,
        })
    }

    /// Invalidates the weak carrier reference when that entity goes away.
    pub fn carrier_removed(&mut self, entity: EntityId, last_location: Vec3) -> Option<ObjectiveEvent> {
        if self.carrier() != Some(entity) {
            return None;
        }
        self.owner_knocked_out(last_location)
    }

    /// Replaces a scored instance with a fresh one.
    pub fn respawn(&self, instance: EntityId, rarity: Rarity, position: Vec3) -> Self {
        Self {
            instance,
            rarity,
            state: ObjectiveState::Free,
            position,
            owner_spawn: None,
            score_radius: self.score_radius,
            version: self.version + 1,
        }
    }

    pub fn carrier(&self) -> Option<EntityId> {
        match self.state {
            ObjectiveState::Carried(carrier) => Some(carrier),
            _ => None,
        }
    }

    pub fn instance(&self) -> EntityId {
        self.instance
    }

    pub fn rarity(&self) -> Rarity {
        self.rarity
    }

    pub fn state(&self) -> ObjectiveState {
        self.state
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn is_scored(&self) -> bool {
        self.state == ObjectiveState::Scored
    }

    pub fn snapshot(&self) -> ObjectiveSnapshot {
        ObjectiveSnapshot {
            instance: self.instance,
            rarity: self.rarity,
            state: self.state,
            position: self.position,
            version: self.version,
        }
    }
}

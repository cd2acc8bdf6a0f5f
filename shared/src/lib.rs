//! Wire protocol and value types shared by the arena server and clients.
//!
//! Everything that crosses the network lives here: identifiers, the
//! `Role` that decides who may write what, the replicated field model,
//! match phase and objective views, and the `Packet` enum itself. Combat
//! math sits in [`stats`] so the server and the predicting client run
//! identical code.

pub mod stats;

pub use stats::{HeroStats, HeroType};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_MAX_PLAYERS: usize = 2;
/// Prephase countdown length in countdown ticks.
pub const PREPHASE_COUNTDOWN: i32 = 300;
/// Countdown value while no countdown is running.
pub const COUNTDOWN_INACTIVE: i32 = -1;
/// Maximum distance from the carrier's spawn at which the artifact scores.
pub const SCORE_RADIUS: f32 = 10.0;
pub const BUFF_AMOUNT: i32 = 5;
/// Largest heal a single request may ask for.
pub const MAX_HEAL: i32 = 30;
pub const BUFF_DURATION_SECS: u64 = 30;

pub type PlayerId = u32;
pub type EntityId = u32;

/// Process-side designation used by the authorization gate.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Server,
    Client(PlayerId),
}

impl Role {
    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            Role::Server => None,
            Role::Client(id) => Some(*id),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client(id) => write!(f, "client {}", id),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Named replicated fields of an entity.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    MaxHealth,
    Health,
    BaseAttack,
    Attack,
    BaseDefense,
    Defense,
    BaseSpeed,
    Speed,
    KnockedOut,
    CarryingObjective,
    Score,
    Hero,
}

impl Field {
    /// Current-stat field driven by a base-stat field, if any.
    pub fn current_of(self) -> Option<Field> {
        match self {
            Field::BaseAttack => Some(Field::Attack),
            Field::BaseDefense => Some(Field::Defense),
            Field::BaseSpeed => Some(Field::Speed),
            _ => None,
        }
    }

    /// Base-stat field a current stat reverts to, if any.
    pub fn base_of(self) -> Option<Field> {
        match self {
            Field::Attack => Some(Field::BaseAttack),
            Field::Defense => Some(Field::BaseDefense),
            Field::Speed => Some(Field::BaseSpeed),
            _ => None,
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            Field::KnockedOut | Field::CarryingObjective => ValueKind::Flag,
            Field::Hero => ValueKind::Hero,
            _ => ValueKind::Int,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Flag,
    Hero,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Int => f.write_str("an integer"),
            ValueKind::Flag => f.write_str("a flag"),
            ValueKind::Hero => f.write_str("a hero type"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Int(i32),
    Flag(bool),
    Hero(HeroType),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Int(_) => ValueKind::Int,
            FieldValue::Flag(_) => ValueKind::Flag,
            FieldValue::Hero(_) => ValueKind::Hero,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            FieldValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_hero(&self) -> Option<HeroType> {
        match self {
            FieldValue::Hero(hero) => Some(*hero),
            _ => None,
        }
    }
}

/// One replicated write: the unit observers apply.
///
/// `version` increases by one for every applied write of the same
/// `(entity, field)`, so observers can drop duplicates and stale repeats.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ReplicationEvent {
    pub entity: EntityId,
    pub field: Field,
    pub value: FieldValue,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    AttackBuff,
    DefenseBuff,
    SpeedBuff,
}

impl ItemKind {
    /// Current-stat field the item temporarily raises.
    pub fn buffed_field(self) -> Field {
        match self {
            ItemKind::AttackBuff => Field::Attack,
            ItemKind::DefenseBuff => Field::Defense,
            ItemKind::SpeedBuff => Field::Speed,
        }
    }
}

/// Mutation a client asks the server to perform on its behalf.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum Mutation {
    TakeDamage { target: EntityId, amount: i32 },
    Heal { amount: i32 },
    SelectHero { hero: HeroType },
    ConsumeItem { item: ItemKind },
    ReportPosition { position: Vec3 },
    PickUpObjective,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPhase {
    #[default]
    WaitingForPlayers,
    RoomFull,
    Active,
    Ended,
}

impl MatchPhase {
    pub fn is_prephase(self) -> bool {
        matches!(self, MatchPhase::WaitingForPlayers | MatchPhase::RoomFull)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSnapshot {
    pub phase: MatchPhase,
    pub countdown: i32,
    pub prephase_ui_visible: bool,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rarity {
    #[default]
    Common,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// Points awarded for scoring an artifact of this rarity.
    ///
    /// Rare intentionally pays more than Epic and Legendary; the table is
    /// kept exactly as the game shipped it.
    pub fn score(self) -> i32 {
        match self {
            Rarity::Common => 100,
            Rarity::Rare => 1000,
            Rarity::Epic => 250,
            Rarity::Legendary => 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveState {
    Free,
    Carried(EntityId),
    Scored,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ObjectiveSnapshot {
    pub instance: EntityId,
    pub rarity: Rarity,
    pub state: ObjectiveState,
    pub position: Vec3,
    pub version: u64,
}

/// Broadcast notices for the presentation layer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Announcement {
    ArtifactAcquired { player: PlayerId },
    ArtifactDropped { player: PlayerId },
    ArtifactScored { player: PlayerId, points: i32 },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Request {
        sequence: u32,
        mutation: Mutation,
    },
    /// Keeps an idle session from timing out.
    Heartbeat,
    Disconnect,

    Connected {
        client_id: PlayerId,
        entity_id: EntityId,
    },
    Replicate {
        events: Vec<ReplicationEvent>,
        last_processed_request: HashMap<PlayerId, u32>,
    },
    Despawn {
        entity: EntityId,
    },
    /// Entities alive when a snapshot was taken. Ids are allocated in
    /// increasing order, so any id below `allocated_below` that is missing
    /// from `live` is gone for good.
    Roster {
        live: Vec<EntityId>,
        allocated_below: EntityId,
    },
    Phase(PhaseSnapshot),
    Objective(ObjectiveSnapshot),
    Announcement(Announcement),
    Disconnected {
        reason: String,
    },
}

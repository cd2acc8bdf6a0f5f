//! Placement lookups injected into the match.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tpk_shared::{PlayerId, Rarity, Vec3};

/// Supplies spawn coordinates. The match never hard-codes positions.
pub trait SpawnLocator {
    /// Spawn point of a player; `None` if the arena has no spawn points.
    fn spawn_location(&mut self, player: PlayerId) -> Option<Vec3>;

    /// Where the next artifact appears.
    fn objective_location(&mut self) -> Vec3;

    fn objective_rarity(&mut self) -> Rarity {
        Rarity::Common
    }
}

/// The default two-room arena.
pub struct ArenaSpawns {
    player_spawns: Vec<Vec3>,
    objective_spawns: Vec<Vec3>,
    rng: StdRng,
}

impl ArenaSpawns {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            player_spawns: vec![
                Vec3::new(-55.0, 0.65, 20.0),
                Vec3::new(-55.0, 0.65, 100.0),
            ],
            objective_spawns: vec![
                Vec3::new(0.0, 1.0, 60.0),
                Vec3::new(25.0, 1.0, 40.0),
                Vec3::new(25.0, 1.0, 80.0),
            ],
            rng,
        }
    }

    pub fn with_player_spawns(mut self, spawns: Vec<Vec3>) -> Self {
        self.player_spawns = spawns;
        self
    }

    pub fn with_objective_spawns(mut self, spawns: Vec<Vec3>) -> Self {
        self.objective_spawns = spawns;
        self
    }
}

impl Default for ArenaSpawns {
    fn default() -> Self {
        Self::new()
    }
}

impl SpawnLocator for ArenaSpawns {
    /// Player ids start at 1 and map onto the table in order, wrapping when
    /// there are more players than spawn rooms. Id 0 gets a random room.
    fn spawn_location(&mut self, player: PlayerId) -> Option<Vec3> {
        if self.player_spawns.is_empty() {
            return None;
        }

        let index = if player == 0 {
            self.rng.gen_range(0..self.player_spawns.len())
        } else {
            (player as usize - 1) % self.player_spawns.len()
        };
        Some(self.player_spawns[index])
    }

    fn objective_location(&mut self) -> Vec3 {
        if self.objective_spawns.is_empty() {
            return Vec3::default();
        }
        let index = self.rng.gen_range(0..self.objective_spawns.len());
        self.objective_spawns[index]
    }
}

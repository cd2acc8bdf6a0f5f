//! Hero stat table and the combat math shared by server and client.
//!
//! The server applies these functions authoritatively; the owning client
//! runs the very same functions to predict its own requests, so both sides
//! always agree on the outcome of a given input.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Defense value at which incoming damage is fully negated.
pub const DEFENSE_DIVISOR: f32 = 50.0;

/// Playable hero archetypes. Selecting one swaps the stat block.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeroType {
    #[default]
    King,
    Rogue,
    Wizard,
    Armoured,
}

/// Base stat block of a hero archetype.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct HeroStats {
    pub max_health: i32,
    pub attack: i32,
    pub defense: i32,
    pub speed: i32,
}

impl HeroType {
    pub const ALL: [HeroType; 4] = [
        HeroType::King,
        HeroType::Rogue,
        HeroType::Wizard,
        HeroType::Armoured,
    ];

    pub fn base_stats(self) -> HeroStats {
        match self {
            HeroType::King => HeroStats {
                max_health: 100,
                attack: 12,
                defense: 10,
                speed: 10,
            },
            HeroType::Rogue => HeroStats {
                max_health: 80,
                attack: 15,
                defense: 5,
                speed: 14,
            },
            HeroType::Wizard => HeroStats {
                max_health: 70,
                attack: 18,
                defense: 3,
                speed: 10,
            },
            HeroType::Armoured => HeroStats {
                max_health: 140,
                attack: 8,
                defense: 20,
                speed: 7,
            },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HeroType::King => "king",
            HeroType::Rogue => "rogue",
            HeroType::Wizard => "wizard",
            HeroType::Armoured => "armoured",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|hero| hero.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for HeroType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Damage left after defense mitigation.
///
/// `round(clamp(amount * (1 - defense / 50), 0, i32::MAX))`, rounding half
/// to even. Negative results (heal-by-damage) are clamped away and huge
/// results saturate instead of wrapping.
pub fn mitigated_damage(amount: i32, defense: i32) -> i32 {
    let reduction = defense as f32 / DEFENSE_DIVISOR;
    let raw = amount as f32 * (1.0 - reduction);
    raw.clamp(0.0, i32::MAX as f32).round_ties_even() as i32
}

/// Health after taking `amount` raw damage, clamped to `[0, max_health]`.
pub fn health_after_damage(health: i32, max_health: i32, defense: i32, amount: i32) -> i32 {
    let damage = mitigated_damage(amount, defense);
    clamp_health(health.saturating_sub(damage), max_health)
}

/// Health after healing by `amount`, clamped to `[0, max_health]`.
pub fn health_after_heal(health: i32, max_health: i32, amount: i32) -> i32 {
    clamp_health(health.saturating_add(amount), max_health)
}

pub fn clamp_health(health: i32, max_health: i32) -> i32 {
    health.clamp(0, max_health.max(0))
}

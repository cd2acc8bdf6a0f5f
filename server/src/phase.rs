//! Prephase lobby state machine.
//!
//! ```text
//! WaitingForPlayers --(players >= max)--> RoomFull --(countdown hits 0)--> Active --> Ended
//! ```
//!
//! Only the authority drives transitions. Observers feed replicated
//! snapshots into [`MatchPhaseController::observe`]. The countdown is
//! advanced by [`MatchPhaseController::tick_countdown`], which the match
//! calls from a scheduled timer once per countdown interval.

use log::{debug, info};
use tpk_shared::{MatchPhase, PhaseSnapshot, Role, COUNTDOWN_INACTIVE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseChange {
    RoomFilled { countdown: i32 },
    CountdownTick { countdown: i32 },
    Started,
    Ended,
}

#[derive(Debug)]
pub struct MatchPhaseController {
    role: Role,
    phase: MatchPhase,
    countdown: i32,
    countdown_start: i32,
    max_players: usize,
    prephase_ui_visible: bool,
    version: u64,
}

impl MatchPhaseController {
    pub fn new(role: Role, max_players: usize, countdown_start: i32) -> Self {
        Self {
            role,
            phase: MatchPhase::WaitingForPlayers,
            countdown: COUNTDOWN_INACTIVE,
            countdown_start: countdown_start.max(0),
            max_players,
            prephase_ui_visible: true,
            version: 0,
        }
    }

    fn is_authority(&self) -> bool {
        if !self.role.is_server() {
            debug!("Ignoring phase transition on {}", self.role);
            return false;
        }
        true
    }

    /// Re-evaluates the lobby after a player joined.
    ///
    /// Returns `RoomFilled` exactly once, when the room first reaches
    /// `max_players` while waiting.
    pub fn update_player_count(&mut self, player_count: usize) -> Option<PhaseChange> {
        if !self.is_authority() || self.phase != MatchPhase::WaitingForPlayers {
            return None;
        }

        if player_count < self.max_players {
            debug!("Prephase waiting: {}/{} players", player_count, self.max_players);
            return None;
        }

        self.phase = MatchPhase::RoomFull;
        self.countdown = self.countdown_start;
        self.version += 1;
        info!("Room full, starting {} tick countdown", self.countdown);

        if self.countdown == 0 {
            return self.start();
        }
        Some(PhaseChange::RoomFilled {
            countdown: self.countdown,
        })
    }

    /// Decrements the countdown by one; starts the match when it reaches zero.
    pub fn tick_countdown(&mut self) -> Option<PhaseChange> {
        if !self.is_authority() || self.phase != MatchPhase::RoomFull || self.countdown <= 0 {
            return None;
        }

        self.countdown -= 1;
        self.version += 1;

        if self.countdown == 0 {
            return self.start();
        }
        Some(PhaseChange::CountdownTick {
            countdown: self.countdown,
        })
    }

    fn start(&mut self) -> Option<PhaseChange> {
        self.phase = MatchPhase::Active;
        self.countdown = COUNTDOWN_INACTIVE;
        self.prephase_ui_visible = false;
        self.version += 1;
        info!("Prephase over, match active");
        Some(PhaseChange::Started)
    }

    pub fn end(&mut self) -> Option<PhaseChange> {
        if !self.is_authority() || self.phase == MatchPhase::Ended {
            return None;
        }

        self.phase = MatchPhase::Ended;
        self.countdown = COUNTDOWN_INACTIVE;
        self.prephase_ui_visible = false;
        self.version += 1;
        info!("Match ended");
        Some(PhaseChange::Ended)
    }

    /// Applies a replicated snapshot on an observer. Older versions are dropped.
    pub fn observe(&mut self, snapshot: PhaseSnapshot) -> bool {
        if self.role.is_server() || snapshot.version <= self.version {
            return false;
        }

        self.phase = snapshot.phase;
        self.countdown = snapshot.countdown;
        self.prephase_ui_visible = snapshot.prephase_ui_visible;
        self.version = snapshot.version;
        true
    }

    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            phase: self.phase,
            countdown: self.countdown,
            prephase_ui_visible: self.prephase_ui_visible,
            version: self.version,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn countdown(&self) -> i32 {
        self.countdown
    }

    pub fn is_counting_down(&self) -> bool {
        self.phase == MatchPhase::RoomFull && self.countdown > 0
    }

    pub fn is_in_prephase(&self) -> bool {
        self.phase.is_prephase()
    }

    /// Combat and objective play are accepted only once the match is active.
    pub fn accepts_gameplay(&self) -> bool {
        self.phase == MatchPhase::Active
    }

    pub fn prephase_ui_visible(&self) -> bool {
        self.prephase_ui_visible
    }
}

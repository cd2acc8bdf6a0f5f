//! The authoritative match: every mutation of replicated state happens here.
//!
//! `Match` owns the store, registry, phase and objective controllers and the
//! scheduler, and is driven from a single server task. Client requests are
//! re-validated and re-applied as [`Role::Server`]; the events they produce
//! leave through the [`ReplicationChannel`] on the next flush.

use crate::authority::{AuthorityStore, DamageOutcome};
use crate::error::{ReplicationError, Result};
use crate::objective::{ObjectiveController, ObjectiveEvent};
use crate::phase::{MatchPhaseController, PhaseChange};
use crate::registry::{EntityHandle, EntityKind, EntityRegistry};
use crate::replication::{GameMessage, ReplicationChannel};
use crate::scheduler::{Scheduler, Timer};
use crate::spawns::SpawnLocator;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tpk_shared::{
    Announcement, EntityId, Field, FieldValue, HeroType, MatchPhase, Mutation, PlayerId, Role,
    Vec3, BUFF_AMOUNT, BUFF_DURATION_SECS, DEFAULT_MAX_PLAYERS, MAX_HEAL, PREPHASE_COUNTDOWN,
    SCORE_RADIUS,
};

/// Tunables of a single match.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub max_players: usize,
    pub countdown_start: i32,
    pub countdown_interval: Duration,
    pub score_radius: f32,
    /// How close a hero must stand to the artifact to pick it up.
    pub pickup_radius: f32,
    /// Largest `Heal` a single request may carry.
    pub max_heal: i32,
    pub buff_amount: i32,
    pub buff_duration: Duration,
    pub revive_delay: Duration,
    /// Full snapshot every this many ticks; 0 disables periodic snapshots.
    pub snapshot_interval_ticks: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_players: DEFAULT_MAX_PLAYERS,
            countdown_start: PREPHASE_COUNTDOWN,
            countdown_interval: Duration::from_secs(1),
            score_radius: SCORE_RADIUS,
            pickup_radius: 3.0,
            max_heal: MAX_HEAL,
            buff_amount: BUFF_AMOUNT,
            buff_duration: Duration::from_secs(BUFF_DURATION_SECS),
            revive_delay: Duration::from_secs(5),
            snapshot_interval_ticks: 60,
        }
    }
}

pub struct Match {
    config: MatchConfig,
    registry: EntityRegistry,
    store: AuthorityStore,
    phase: MatchPhaseController,
    objective: ObjectiveController,
    scheduler: Scheduler,
    channel: ReplicationChannel,
    spawns: Box<dyn SpawnLocator + Send + Sync>,
    positions: HashMap<EntityId, Vec3>,
    pub tick: u32,
}

impl Match {
    pub fn new(
        config: MatchConfig,
        mut spawns: Box<dyn SpawnLocator + Send + Sync>,
        game_tx: mpsc::UnboundedSender<GameMessage>,
    ) -> Self {
        let mut registry = EntityRegistry::new();
        let instance = registry.allocate_id();
        if let Err(e) = registry.register(EntityHandle::objective(instance)) {
            error!("Failed to register artifact {}: {}", instance, e);
        }

        let objective =
            ObjectiveController::new(instance, spawns.objective_rarity(), spawns.objective_location())
                .with_score_radius(config.score_radius);
        info!(
            "Artifact {} ({:?}) spawned at {:?}",
            instance,
            objective.rarity(),
            objective.position()
        );

        Self {
            phase: MatchPhaseController::new(Role::Server, config.max_players, config.countdown_start),
            config,
            registry,
            store: AuthorityStore::new(),
            objective,
            scheduler: Scheduler::new(),
            channel: ReplicationChannel::new(game_tx),
            spawns,
            positions: HashMap::new(),
            tick: 0,
        }
    }

    /// Spawns a hero for a newly connected player and returns its entity id.
    ///
    /// Joining twice hands back the existing hero.
    pub fn on_join(&mut self, player: PlayerId, now: Instant) -> Result<EntityId> {
        if let Ok(handle) = self.registry.find_by_player_id(player) {
            return Ok(handle.id);
        }
        if self.phase.phase() == MatchPhase::Ended {
            return Err(ReplicationError::invalid(player, "match has ended"));
        }

        let id = self.registry.allocate_id();
        self.registry.register(EntityHandle::hero(id, player))?;
        if let Err(e) = self
            .store
            .insert_entity(id, Role::Server, AuthorityStore::hero_fields(HeroType::default()))
        {
            let _ = self.registry.unregister(id);
            return Err(e);
        }

        let spawn = self.spawn_point(player);
        self.positions.insert(id, spawn);
        self.channel.add_observer(player);
        info!("Player {} joined as entity {} at {:?}", player, id, spawn);

        let change = self.phase.update_player_count(self.registry.hero_count());
        self.apply_phase_change(change, now);

        self.channel.flush(&mut self.store);
        self.channel.send_snapshot(
            Some(player),
            &self.store,
            self.registry.next_id(),
            self.phase.snapshot(),
            self.objective.snapshot(),
        );
        Ok(id)
    }

    /// Removes a player's hero, dropping the artifact if it was carrying it.
    pub fn on_leave(&mut self, player: PlayerId) -> Result<()> {
        let hero = self.registry.find_by_player_id(player)?.id;
        let last = self.positions.remove(&hero).unwrap_or_default();

        if let Some(event) = self.objective.carrier_removed(hero, last) {
            self.handle_objective_event(event);
        }

        self.scheduler.cancel_entity(hero);
        self.registry.unregister(hero)?;
        self.store.remove_entity(hero)?;
        self.channel.remove_observer(player);
        self.channel.flush(&mut self.store);
        self.channel.despawn(hero);
        info!("Player {} left, entity {} removed", player, hero);
        Ok(())
    }

    /// Re-validates and applies one client request as the server.
    ///
    /// The request is acknowledged whether or not it was accepted, so the
    /// client can drop its prediction and take the authoritative value.
    pub fn handle_request(
        &mut self,
        player: PlayerId,
        sequence: u32,
        mutation: Mutation,
        now: Instant,
    ) -> Result<()> {
        let result = self.apply_request(player, mutation, now);
        self.channel.acknowledge(player, sequence);

        match &result {
            Err(e @ ReplicationError::Authorization { .. }) => {
                warn!("Rejected request {} from player {}: {}", sequence, player, e)
            }
            Err(e) if e.is_not_found() => {
                debug!("Skipped request {} from player {}: {}", sequence, player, e)
            }
            Err(e) => warn!("Invalid request {} from player {}: {}", sequence, player, e),
            Ok(()) => {}
        }

        if self.channel.flush(&mut self.store) == 0 {
            self.channel.send_acks(player);
        }
        result
    }

    fn apply_request(&mut self, player: PlayerId, mutation: Mutation, now: Instant) -> Result<()> {
        if self.phase.phase() == MatchPhase::Ended {
            return Err(ReplicationError::invalid(player, "match has ended"));
        }
        let hero = self.registry.find_by_player_id(player)?.id;

        match mutation {
            Mutation::TakeDamage { target, amount } => {
                if !self.phase.accepts_gameplay() {
                    return Err(ReplicationError::invalid(player, "combat is not active"));
                }
                if amount < 0 {
                    return Err(ReplicationError::invalid(player, "negative damage"));
                }
                if self.registry.get(target)?.kind != EntityKind::Hero {
                    return Err(ReplicationError::invalid(player, "target is not a hero"));
                }
                if self.store.is_knocked_out(hero)? {
                    return Err(ReplicationError::invalid(player, "knocked out heroes cannot attack"));
                }

                if let DamageOutcome::Applied {
                    dealt,
                    knocked_out,
                    ..
                } = self.store.apply_damage(target, amount, Role::Server)?
                {
                    debug!("Entity {} dealt {} damage to {}", hero, dealt, target);
                    if knocked_out {
                        self.handle_knockout(target, now);
                    }
                }
            }
            Mutation::Heal { amount } => {
                if amount < 0 {
                    return Err(ReplicationError::invalid(player, "negative heal"));
                }
                if amount > self.config.max_heal {
                    return Err(ReplicationError::invalid(player, "heal exceeds the per-request cap"));
                }
                self.store.heal(hero, amount, Role::Server)?;
            }
            Mutation::SelectHero { hero: kind } => self.select_hero(player, hero, kind)?,
            Mutation::ConsumeItem { item } => {
                if self.store.is_knocked_out(hero)? {
                    return Err(ReplicationError::invalid(player, "knocked out"));
                }
                self.apply_buff(hero, item.buffed_field(), now)?;
            }
            Mutation::ReportPosition { position } => {
                self.positions.insert(hero, position);
                if let Some(event) = self.objective.carrier_moved(hero, position) {
                    self.handle_objective_event(event);
                }
            }
            Mutation::PickUpObjective => {
                if !self.phase.accepts_gameplay() {
                    return Err(ReplicationError::invalid(player, "match is not active"));
                }
                let position = self.positions.get(&hero).copied().unwrap_or_default();
                if position.distance(&self.objective.position()) > self.config.pickup_radius {
                    return Err(ReplicationError::invalid(player, "too far from the artifact"));
                }

                let knocked_out = self.store.is_knocked_out(hero)?;
                let spawn = self.spawn_point(player);
                if let Some(event) = self.objective.pickup(hero, knocked_out, spawn) {
                    self.handle_objective_event(event);
                    // Picking it up on the home spawn scores right away.
                    if let Some(event) = self.objective.reach_owner_spawn(position) {
                        self.handle_objective_event(event);
                    }
                }
            }
        }
        Ok(())
    }

    fn select_hero(&mut self, player: PlayerId, entity: EntityId, kind: HeroType) -> Result<()> {
        if self.store.is_knocked_out(entity)? {
            return Err(ReplicationError::invalid(player, "knocked out"));
        }

        let stats = kind.base_stats();
        self.scheduler.cancel_entity(entity);
        self.store
            .write(entity, Field::Hero, FieldValue::Hero(kind), Role::Server)?;
        self.store
            .write(entity, Field::MaxHealth, FieldValue::Int(stats.max_health), Role::Server)?;
        self.store
            .write(entity, Field::BaseAttack, FieldValue::Int(stats.attack), Role::Server)?;
        self.store
            .write(entity, Field::BaseDefense, FieldValue::Int(stats.defense), Role::Server)?;
        self.store
            .write(entity, Field::BaseSpeed, FieldValue::Int(stats.speed), Role::Server)?;
        if self.phase.is_in_prephase() {
            self.store
                .write(entity, Field::Health, FieldValue::Int(stats.max_health), Role::Server)?;
        }
        info!("Player {} selected {}", player, kind);
        Ok(())
    }

    /// Raises a current stat above its base until the buff timer fires.
    fn apply_buff(&mut self, entity: EntityId, field: Field, now: Instant) -> Result<()> {
        let base_field = field.base_of().ok_or(ReplicationError::FieldNotFound { entity, field })?;
        let base = self.store.read_int(entity, base_field)?;

        self.store.write(
            entity,
            field,
            FieldValue::Int(base.saturating_add(self.config.buff_amount)),
            Role::Server,
        )?;
        self.scheduler
            .schedule(Timer::RevertBuff { entity, field }, now + self.config.buff_duration);
        debug!("Entity {} buffed {:?} for {:?}", entity, field, self.config.buff_duration);
        Ok(())
    }

    fn handle_knockout(&mut self, entity: EntityId, now: Instant) {
        self.scheduler.cancel_entity(entity);
        if let Err(e) = self.store.reset_current_stats(entity, Role::Server) {
            error!("Failed to reset stats of entity {}: {}", entity, e);
        }

        let last = self.positions.get(&entity).copied().unwrap_or_default();
        if self.objective.carrier() == Some(entity) {
            if let Some(event) = self.objective.owner_knocked_out(last) {
                self.handle_objective_event(event);
            }
        }

        self.scheduler
            .schedule(Timer::Revive { entity }, now + self.config.revive_delay);
    }

    fn handle_objective_event(&mut self, event: ObjectiveEvent) {
        match event {
            ObjectiveEvent::PickedUp { carrier } => {
                self.set_carrying(carrier, true);
                if let Some(player) = self.player_of(carrier) {
                    self.channel
                        .announce(Announcement::ArtifactAcquired { player });
                }
            }
            ObjectiveEvent::Dropped { carrier, .. } => {
                self.set_carrying(carrier, false);
                if let Some(player) = self.player_of(carrier) {
                    self.channel.announce(Announcement::ArtifactDropped { player });
                }
            }
            ObjectiveEvent::Scored { carrier, points } => {
                self.set_carrying(carrier, false);
                if let Err(e) = self.store.add_score(carrier, points, Role::Server) {
                    error!("Failed to award {} points to entity {}: {}", points, carrier, e);
                }
                if let Some(player) = self.player_of(carrier) {
                    self.channel
                        .announce(Announcement::ArtifactScored { player, points });
                }
                self.replace_objective();
            }
        }
        self.channel.publish_objective(self.objective.snapshot());
    }

    /// Destroys the scored artifact and spawns the next one.
    fn replace_objective(&mut self) {
        let old = self.objective.instance();
        if let Err(e) = self.registry.unregister(old) {
            warn!("Scored artifact {} was not registered: {}", old, e);
        }
        self.channel.despawn(old);

        let instance = self.registry.allocate_id();
        if let Err(e) = self.registry.register(EntityHandle::objective(instance)) {
            error!("Failed to register artifact {}: {}", instance, e);
        }
        let rarity = self.spawns.objective_rarity();
        let position = self.spawns.objective_location();
        self.objective = self.objective.respawn(instance, rarity, position);
        info!("Artifact {} ({:?}) spawned at {:?}", instance, rarity, position);
    }

    fn set_carrying(&mut self, entity: EntityId, carrying: bool) {
        if !self.store.contains(entity) {
            return;
        }
        if let Err(e) = self.store.write(
            entity,
            Field::CarryingObjective,
            FieldValue::Flag(carrying),
            Role::Server,
        ) {
            error!("Failed to update possession of entity {}: {}", entity, e);
        }
    }

    /// Fires due timers, replicates queued writes and emits periodic snapshots.
    pub fn tick(&mut self, now: Instant) {
        self.tick = self.tick.wrapping_add(1);

        for timer in self.scheduler.due(now) {
            match timer {
                Timer::Countdown => {
                    let change = self.phase.tick_countdown();
                    self.apply_phase_change(change, now);
                }
                Timer::RevertBuff { entity, field } => self.revert_buff(entity, field),
                Timer::Revive { entity } => self.revive(entity),
            }
        }

        self.channel.flush(&mut self.store);

        let interval = self.config.snapshot_interval_ticks;
        if interval > 0 && self.tick % interval == 0 && self.channel.has_observers() {
            self.channel.send_snapshot(
                None,
                &self.store,
                self.registry.next_id(),
                self.phase.snapshot(),
                self.objective.snapshot(),
            );
        }
    }

    fn revert_buff(&mut self, entity: EntityId, field: Field) {
        let Some(base_field) = field.base_of() else {
            return;
        };
        let result = self
            .store
            .read(entity, base_field)
            .and_then(|base| self.store.write(entity, field, base, Role::Server));
        match result {
            Ok(_) => debug!("Entity {} {:?} buff expired", entity, field),
            Err(e) => debug!("Could not revert {:?} buff on entity {}: {}", field, entity, e),
        }
    }

    fn revive(&mut self, entity: EntityId) {
        if let Err(e) = self.store.revive(entity, Role::Server) {
            debug!("Could not revive entity {}: {}", entity, e);
            return;
        }
        if let Some(player) = self.player_of(entity) {
            let spawn = self.spawn_point(player);
            self.positions.insert(entity, spawn);
        }
    }

    fn apply_phase_change(&mut self, change: Option<PhaseChange>, now: Instant) {
        let Some(change) = change else {
            return;
        };

        match change {
            PhaseChange::RoomFilled { .. } | PhaseChange::CountdownTick { .. } => {
                self.scheduler
                    .schedule(Timer::Countdown, now + self.config.countdown_interval);
            }
            PhaseChange::Started | PhaseChange::Ended => {
                self.scheduler.cancel(&Timer::Countdown);
            }
        }
        self.channel.publish_phase(self.phase.snapshot());
    }

    /// Ends the match and destroys every entity.
    pub fn teardown(&mut self) {
        let change = self.phase.end();
        if change.is_some() {
            self.channel.publish_phase(self.phase.snapshot());
        }

        for id in self.registry.ids() {
            if let Err(e) = self.registry.unregister(id) {
                warn!("Entity {} vanished during teardown: {}", id, e);
            }
            if self.store.contains(id) {
                let _ = self.store.remove_entity(id);
            }
            self.channel.despawn(id);
        }

        self.store.drain_outbound();
        self.scheduler.clear();
        self.positions.clear();
        info!("Match torn down after {} ticks", self.tick);
    }

    fn spawn_point(&mut self, player: PlayerId) -> Vec3 {
        self.spawns.spawn_location(player).unwrap_or_default()
    }

    fn player_of(&self, entity: EntityId) -> Option<PlayerId> {
        self.registry.get(entity).ok().and_then(|handle| handle.player_id())
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn store(&self) -> &AuthorityStore {
        &self.store
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn phase(&self) -> &MatchPhaseController {
        &self.phase
    }

    pub fn objective(&self) -> &ObjectiveController {
        &self.objective
    }

    pub fn channel(&self) -> &ReplicationChannel {
        &self.channel
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn position_of(&self, entity: EntityId) -> Option<Vec3> {
        self.positions.get(&entity).copied()
    }

    pub fn hero_of(&self, player: PlayerId) -> Option<EntityId> {
        self.registry.find_by_player_id(player).ok().map(|handle| handle.id)
    }
}

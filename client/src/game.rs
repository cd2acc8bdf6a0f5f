//! Observer-side replica of the server's state, with request prediction.
//!
//! The client never owns a replicated value. It applies the server's
//! versioned events to a [`ReplicaStore`] and, for its own hero, layers a
//! prediction of still-unacknowledged requests on top. When the server
//! acknowledges a request the prediction is rebuilt from the confirmed
//! state plus whatever is still pending.

use log::{debug, info};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tpk_shared::stats::{clamp_health, health_after_heal};
use tpk_shared::{
    Announcement, EntityId, Field, FieldValue, MatchPhase, Mutation, ObjectiveSnapshot,
    PhaseSnapshot, PlayerId, ReplicationEvent, BUFF_AMOUNT, COUNTDOWN_INACTIVE, MAX_HEAL,
};

/// Result of applying one replicated event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Same version already applied.
    Duplicate,
    /// An older version than the one held.
    Stale,
    /// The entity has been despawned; late events cannot bring it back.
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ReplicaField {
    value: FieldValue,
    version: u64,
}

/// Last known authoritative value of every replicated field.
#[derive(Debug, Clone, Default)]
pub struct ReplicaStore {
    entities: HashMap<EntityId, BTreeMap<Field, ReplicaField>>,
    despawned: HashSet<EntityId>,
    applied: u64,
    dropped: u64,
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an event unless an equal or newer version is already held.
    pub fn apply(&mut self, event: &ReplicationEvent) -> ApplyOutcome {
        if self.despawned.contains(&event.entity) {
            self.dropped += 1;
            return ApplyOutcome::Removed;
        }

        let fields = self.entities.entry(event.entity).or_default();

        if let Some(current) = fields.get(&event.field) {
            if event.version == current.version {
                self.dropped += 1;
                return ApplyOutcome::Duplicate;
            }
            if event.version < current.version {
                self.dropped += 1;
                return ApplyOutcome::Stale;
            }
        }

        fields.insert(
            event.field,
            ReplicaField {
                value: event.value,
                version: event.version,
            },
        );
        self.applied += 1;
        ApplyOutcome::Applied
    }

    /// Applies a batch and returns how many events changed the replica.
    pub fn apply_all(&mut self, events: &[ReplicationEvent]) -> usize {
        events
            .iter()
            .filter(|event| self.apply(event) == ApplyOutcome::Applied)
            .count()
    }

    /// Drops an entity and refuses any later event for it.
    ///
    /// Entity ids are never reused, so this is permanent.
    pub fn remove_entity(&mut self, entity: EntityId) -> bool {
        self.despawned.insert(entity);
        self.entities.remove(&entity).is_some()
    }

    /// Applies a snapshot roster and returns the entities it removed.
    ///
    /// Every id below `allocated_below` that is not in `live` is dead,
    /// whether or not its despawn ever arrived.
    pub fn apply_roster(&mut self, live: &[EntityId], allocated_below: EntityId) -> Vec<EntityId> {
        let live: HashSet<EntityId> = live.iter().copied().collect();
        self.despawned
            .extend((0..allocated_below).filter(|id| !live.contains(id)));

        let mut removed: Vec<EntityId> = self
            .entities
            .keys()
            .copied()
            .filter(|id| self.despawned.contains(id))
            .collect();
        removed.sort_unstable();
        for id in &removed {
            self.entities.remove(id);
        }
        removed
    }


    pub fn read(&self, entity: EntityId, field: Field) -> Option<FieldValue> {
        self.entities
            .get(&entity)
            .and_then(|fields| fields.get(&field))
            .map(|f| f.value)
    }

    pub fn version(&self, entity: EntityId, field: Field) -> Option<u64> {
        self.entities
            .get(&entity)
            .and_then(|fields| fields.get(&field))
            .map(|f| f.version)
    }

    pub fn read_int(&self, entity: EntityId, field: Field) -> Option<i32> {
        self.read(entity, field).and_then(|value| value.as_int())
    }

    pub fn read_flag(&self, entity: EntityId, field: Field) -> Option<bool> {
        self.read(entity, field).and_then(|value| value.as_flag())
    }

    fn values_of(&self, entity: EntityId) -> BTreeMap<Field, FieldValue> {
        self.entities
            .get(&entity)
            .map(|fields| fields.iter().map(|(k, v)| (*k, v.value)).collect())
            .unwrap_or_default()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn applied_count(&self) -> u64 {
        self.applied
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Forgets everything, including despawned ids. Used when the session ends.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.despawned.clear();
    }
}

/// Replays requests the server has not acknowledged yet on top of the
/// confirmed fields of the local hero.
fn predict(
    confirmed: BTreeMap<Field, FieldValue>,
    pending: &[(u32, Mutation)],
    in_prephase: bool,
) -> BTreeMap<Field, FieldValue> {
    let mut view = confirmed;
    let int = |view: &BTreeMap<Field, FieldValue>, field| {
        view.get(&field).and_then(|v: &FieldValue| v.as_int())
    };

    for (_, mutation) in pending {
        let knocked_out = view
            .get(&Field::KnockedOut)
            .and_then(|v| v.as_flag())
            .unwrap_or(false);

        match *mutation {
            Mutation::Heal { amount } if !knocked_out && (0..=MAX_HEAL).contains(&amount) => {
                if let (Some(health), Some(max)) =
                    (int(&view, Field::Health), int(&view, Field::MaxHealth))
                {
                    view.insert(Field::Health, FieldValue::Int(health_after_heal(health, max, amount)));
                }
            }
            Mutation::SelectHero { hero } if !knocked_out => {
                let stats = hero.base_stats();
                view.insert(Field::Hero, FieldValue::Hero(hero));
                view.insert(Field::MaxHealth, FieldValue::Int(stats.max_health));
                for (base, value) in [
                    (Field::BaseAttack, stats.attack),
                    (Field::BaseDefense, stats.defense),
                    (Field::BaseSpeed, stats.speed),
                ] {
                    view.insert(base, FieldValue::Int(value));
                    if let Some(current) = base.current_of() {
                        view.insert(current, FieldValue::Int(value));
                    }
                }
                let health = if in_prephase {
                    stats.max_health
                } else {
                    clamp_health(int(&view, Field::Health).unwrap_or(0), stats.max_health)
                };
                view.insert(Field::Health, FieldValue::Int(health));
            }
            Mutation::ConsumeItem { item } if !knocked_out => {
                let field = item.buffed_field();
                if let Some(base) = field.base_of().and_then(|base| int(&view, base)) {
                    view.insert(field, FieldValue::Int(base.saturating_add(BUFF_AMOUNT)));
                }
            }
            _ => {}
        }
    }
    view
}

pub struct ClientGameState {
    pub confirmed: ReplicaStore,
    pub client_id: Option<PlayerId>,
    pub entity_id: Option<EntityId>,
    phase: Option<PhaseSnapshot>,
    objective: Option<ObjectiveSnapshot>,
    pending_requests: Vec<(u32, Mutation)>,
    predicted: BTreeMap<Field, FieldValue>,
    next_sequence: u32,
    last_acknowledged: u32,
    announcements: VecDeque<Announcement>,
}

impl ClientGameState {
    pub fn new() -> Self {
        Self {
            confirmed: ReplicaStore::new(),
            client_id: None,
            entity_id: None,
            phase: None,
            objective: None,
            pending_requests: Vec::new(),
            predicted: BTreeMap::new(),
            next_sequence: 1,
            last_acknowledged: 0,
            announcements: VecDeque::new(),
        }
    }

    pub fn set_identity(&mut self, client_id: PlayerId, entity_id: EntityId) {
        self.client_id = Some(client_id);
        self.entity_id = Some(entity_id);
        self.rebuild_prediction();
    }

    /// Assigns the next sequence number to a request and, if enabled,
    /// predicts its effect on the local hero.
    pub fn record_request(&mut self, mutation: Mutation, prediction_enabled: bool) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        if prediction_enabled {
            self.pending_requests.push((sequence, mutation));
            self.rebuild_prediction();
        }
        sequence
    }

    /// Applies a `Replicate` packet and reconciles against its acknowledgement.
    pub fn apply_replicate(
        &mut self,
        events: &[ReplicationEvent],
        last_processed_request: &HashMap<PlayerId, u32>,
        reconciliation_enabled: bool,
    ) -> usize {
        let applied = self.confirmed.apply_all(events);

        if let Some(ack) = self
            .client_id
            .and_then(|id| last_processed_request.get(&id).copied())
        {
            if ack > self.last_acknowledged {
                self.last_acknowledged = ack;
                self.pending_requests.retain(|(sequence, _)| *sequence > ack);
            }
        }

        if reconciliation_enabled {
            self.rebuild_prediction();
        }
        applied
    }

    fn rebuild_prediction(&mut self) {
        let Some(entity) = self.entity_id else {
            self.predicted.clear();
            return;
        };

        let confirmed = self.confirmed.values_of(entity);
        self.predicted = predict(confirmed, &self.pending_requests, self.is_in_prephase());
    }

    pub fn despawn(&mut self, entity: EntityId) {
        if self.confirmed.remove_entity(entity) {
            debug!("Entity {} despawned", entity);
        }
        self.forget_if_local(entity);
    }

    /// Drops every entity a snapshot roster says is gone.
    pub fn apply_roster(&mut self, live: &[EntityId], allocated_below: EntityId) -> usize {
        let removed = self.confirmed.apply_roster(live, allocated_below);
        for entity in &removed {
            debug!("Entity {} missing from roster, removed", entity);
            self.forget_if_local(*entity);
        }
        removed.len()
    }

    fn forget_if_local(&mut self, entity: EntityId) {
        if Some(entity) == self.entity_id {
            self.entity_id = None;
            self.predicted.clear();
        }
    }

    /// Drops the replica and every per-session view after a disconnect.
    pub fn reset(&mut self) {
        self.confirmed.clear();
        self.phase = None;
        self.objective = None;
        self.pending_requests.clear();
        self.predicted.clear();
        self.entity_id = None;
    }

    /// Accepts a phase snapshot only if it is newer than the one held.
    pub fn observe_phase(&mut self, snapshot: PhaseSnapshot) -> bool {
        if matches!(self.phase, Some(current) if snapshot.version <= current.version) {
            return false;
        }
        let changed = self.phase.map(|p| p.phase) != Some(snapshot.phase);
        self.phase = Some(snapshot);
        if changed {
            info!("Match phase is now {:?}", snapshot.phase);
        }
        true
    }

    pub fn observe_objective(&mut self, snapshot: ObjectiveSnapshot) -> bool {
        if matches!(self.objective, Some(current) if snapshot.version <= current.version) {
            return false;
        }
        self.objective = Some(snapshot);
        true
    }

    pub fn push_announcement(&mut self, announcement: Announcement) {
        self.announcements.push_back(announcement);
    }

    pub fn take_announcements(&mut self) -> Vec<Announcement> {
        self.announcements.drain(..).collect()
    }

    /// Value shown to the player: predicted for the local hero, confirmed
    /// for everyone else.
    pub fn read(&self, entity: EntityId, field: Field) -> Option<FieldValue> {
        if Some(entity) == self.entity_id {
            if let Some(value) = self.predicted.get(&field) {
                return Some(*value);
            }
        }
        self.confirmed.read(entity, field)
    }

    pub fn read_int(&self, entity: EntityId, field: Field) -> Option<i32> {
        self.read(entity, field).and_then(|value| value.as_int())
    }

    pub fn local_health(&self) -> Option<i32> {
        self.entity_id
            .and_then(|entity| self.read_int(entity, Field::Health))
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase.map(|p| p.phase).unwrap_or_default()
    }

    pub fn countdown(&self) -> i32 {
        self.phase.map(|p| p.countdown).unwrap_or(COUNTDOWN_INACTIVE)
    }

    pub fn is_in_prephase(&self) -> bool {
        self.phase().is_prephase()
    }

    pub fn prephase_ui_visible(&self) -> bool {
        self.phase.map(|p| p.prephase_ui_visible).unwrap_or(true)
    }

    pub fn objective(&self) -> Option<ObjectiveSnapshot> {
        self.objective
    }

    pub fn pending_requests(&self) -> usize {
        self.pending_requests.len()
    }

    pub fn last_acknowledged(&self) -> u32 {
        self.last_acknowledged
    }
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpk_shared::{HeroType, ItemKind, ObjectiveState, Rarity, Vec3};

    fn event(entity: EntityId, field: Field, value: i32, version: u64) -> ReplicationEvent {
        ReplicationEvent {
            entity,
            field,
            value: FieldValue::Int(value),
            version,
        }
    }

    fn hero_events(entity: EntityId, health: i32) -> Vec<ReplicationEvent> {
        vec![
            event(entity, Field::MaxHealth, 100, 1),
            event(entity, Field::Health, health, 1),
            event(entity, Field::BaseAttack, 12, 1),
            event(entity, Field::Attack, 12, 1),
            ReplicationEvent {
                entity,
                field: Field::KnockedOut,
                value: FieldValue::Flag(false),
                version: 1,
            },
        ]
    }

    fn acks(player: PlayerId, sequence: u32) -> HashMap<PlayerId, u32> {
        let mut map = HashMap::new();
        map.insert(player, sequence);
        map
    }

    #[test]
    fn test_duplicate_and_stale_events_are_dropped() {
        let mut replica = ReplicaStore::new();

        assert_eq!(replica.apply(&event(1, Field::Health, 80, 2)), ApplyOutcome::Applied);
        assert_eq!(replica.apply(&event(1, Field::Health, 80, 2)), ApplyOutcome::Duplicate);
        assert_eq!(replica.apply(&event(1, Field::Health, 90, 1)), ApplyOutcome::Stale);
        assert_eq!(replica.read_int(1, Field::Health), Some(80));
        assert_eq!(replica.version(1, Field::Health), Some(2));
        assert_eq!(replica.dropped_count(), 2);
    }

    #[test]
    fn test_fields_version_independently() {
        let mut replica = ReplicaStore::new();
        replica.apply(&event(1, Field::Health, 50, 5));
        assert_eq!(replica.apply(&event(1, Field::Score, 100, 1)), ApplyOutcome::Applied);
        assert_eq!(replica.apply(&event(2, Field::Health, 70, 1)), ApplyOutcome::Applied);
        assert_eq!(replica.entity_ids(), vec![1, 2]);
    }

    #[test]
    fn test_prediction_then_reconciliation() {
        let mut state = ClientGameState::new();
        state.set_identity(1, 5);
        state.apply_replicate(&hero_events(5, 60), &HashMap::new(), true);

        let sequence = state.record_request(Mutation::Heal { amount: 30 }, true);
        assert_eq!(state.local_health(), Some(90));
        assert_eq!(state.confirmed.read_int(5, Field::Health), Some(60));
        assert_eq!(state.pending_requests(), 1);

        // Server applied it.
        state.apply_replicate(&[event(5, Field::Health, 90, 2)], &acks(1, sequence), true);
        assert_eq!(state.pending_requests(), 0);
        assert_eq!(state.local_health(), Some(90));
    }

    #[test]
    fn test_rejected_request_rolls_back() {
        let mut state = ClientGameState::new();
        state.set_identity(1, 5);
        state.apply_replicate(&hero_events(5, 60), &HashMap::new(), true);

        let sequence = state.record_request(Mutation::Heal { amount: 30 }, true);
        assert_eq!(state.local_health(), Some(90));

        // Acknowledged without any change: the server refused it.
        state.apply_replicate(&[], &acks(1, sequence), true);
        assert_eq!(state.local_health(), Some(60));
    }

    #[test]
    fn test_unacknowledged_requests_replay_over_new_state() {
        let mut state = ClientGameState::new();
        state.set_identity(1, 5);
        state.apply_replicate(&hero_events(5, 60), &HashMap::new(), true);

        let first = state.record_request(Mutation::Heal { amount: 10 }, true);
        state.record_request(Mutation::Heal { amount: 10 }, true);
        assert_eq!(state.local_health(), Some(80));

        // First heal confirmed while the hero also took damage.
        state.apply_replicate(&[event(5, Field::Health, 50, 2)], &acks(1, first), true);
        assert_eq!(state.pending_requests(), 1);
        assert_eq!(state.local_health(), Some(60));
    }

    #[test]
    fn test_buff_and_hero_prediction() {
        let mut state = ClientGameState::new();
        state.set_identity(1, 5);
        state.apply_replicate(&hero_events(5, 100), &HashMap::new(), true);

        state.record_request(Mutation::ConsumeItem { item: ItemKind::AttackBuff }, true);
        assert_eq!(state.read_int(5, Field::Attack), Some(17));

        state.record_request(Mutation::SelectHero { hero: HeroType::Wizard }, true);
        assert_eq!(state.read_int(5, Field::Attack), Some(18));
        assert_eq!(state.read_int(5, Field::MaxHealth), Some(70));
        assert_eq!(state.local_health(), Some(70));
    }

    #[test]
    fn test_no_prediction_when_disabled() {
        let mut state = ClientGameState::new();
        state.set_identity(1, 5);
        state.apply_replicate(&hero_events(5, 60), &HashMap::new(), true);

        let sequence = state.record_request(Mutation::Heal { amount: 30 }, false);
        assert_eq!(sequence, 1);
        assert_eq!(state.local_health(), Some(60));
    }

    #[test]
    fn test_phase_observation_only_moves_forward() {
        let mut state = ClientGameState::new();
        assert_eq!(state.countdown(), COUNTDOWN_INACTIVE);

        let room_full = PhaseSnapshot {
            phase: MatchPhase::RoomFull,
            countdown: 300,
            prephase_ui_visible: true,
            version: 2,
        };
        assert!(state.observe_phase(room_full));
        assert!(!state.observe_phase(PhaseSnapshot {
            phase: MatchPhase::WaitingForPlayers,
            countdown: -1,
            prephase_ui_visible: true,
            version: 1,
        }));
        assert_eq!(state.phase(), MatchPhase::RoomFull);
        assert_eq!(state.countdown(), 300);
    }

    #[test]
    fn test_objective_and_despawn() {
        let mut state = ClientGameState::new();
        state.set_identity(1, 5);
        state.apply_replicate(&hero_events(5, 100), &HashMap::new(), true);

        let snapshot = ObjectiveSnapshot {
            instance: 1,
            rarity: Rarity::Common,
            state: ObjectiveState::Carried(5),
            position: Vec3::default(),
            version: 3,
        };
        assert!(state.observe_objective(snapshot));
        assert!(!state.observe_objective(ObjectiveSnapshot {
            state: ObjectiveState::Free,
            version: 2,
            ..snapshot
        }));
        assert_eq!(state.objective().map(|o| o.state), Some(ObjectiveState::Carried(5)));

        state.despawn(5);
        assert!(!state.confirmed.contains(5));
        assert_eq!(state.entity_id, None);
        assert_eq!(state.local_health(), None);
    }

    #[test]
    fn test_late_events_cannot_revive_despawned_entity() {
        let mut replica = ReplicaStore::new();
        replica.apply_all(&hero_events(3, 100));
        assert!(replica.remove_entity(3));

        assert_eq!(replica.apply(&event(3, Field::Health, 60, 2)), ApplyOutcome::Removed);
        assert_eq!(replica.apply_all(&hero_events(3, 100)), 0);
        assert!(!replica.contains(3));
    }

    #[test]
    fn test_roster_removes_missing_entities() {
        let mut state = ClientGameState::new();
        state.set_identity(1, 2);
        for entity in [2, 4, 6] {
            state.apply_replicate(&hero_events(entity, 100), &HashMap::new(), true);
        }

        // Entity 4's despawn was lost; 6 is newer than the roster.
        assert_eq!(state.apply_roster(&[2], 5), 1);
        assert_eq!(state.confirmed.entity_ids(), vec![2, 6]);
        assert_eq!(state.confirmed.apply_all(&hero_events(4, 100)), 0);
        assert_eq!(state.entity_id, Some(2));

        assert_eq!(state.apply_roster(&[6], 7), 1);
        assert_eq!(state.entity_id, None);
        assert_eq!(state.confirmed.entity_ids(), vec![6]);
    }

    #[test]
    fn test_reset_forgets_session() {
        let mut state = ClientGameState::new();
        state.set_identity(1, 2);
        state.apply_replicate(&hero_events(2, 100), &HashMap::new(), true);
        state.despawn(9);
        state.record_request(Mutation::Heal { amount: 5 }, true);

        state.reset();

        assert!(state.confirmed.is_empty());
        assert_eq!(
            state.confirmed.apply(&event(9, Field::Health, 100, 1)),
            ApplyOutcome::Applied
        );
        assert_eq!(state.pending_requests(), 0);
        assert_eq!(state.entity_id, None);
        assert_eq!(state.phase(), MatchPhase::WaitingForPlayers);
    }
}

//! Canonical replicated state and the single authorization gate.
//!
//! Every replicated entity keeps its fields here together with the role
//! that is allowed to write them. All writes funnel through
//! [`AuthorityStore::authorize`]; no other code path mutates a field.
//! Each value-changing write bumps the field's version and queues a
//! [`ReplicationEvent`] that the replication channel drains once per tick.

use crate::error::{ReplicationError, Result};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tpk_shared::stats::{clamp_health, health_after_damage, health_after_heal};
use tpk_shared::{EntityId, Field, FieldValue, HeroType, ReplicationEvent, Role};

/// A field value together with its replication version.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Versioned {
    pub value: FieldValue,
    pub version: u64,
}

#[derive(Debug)]
struct EntityState {
    authority: Role,
    fields: BTreeMap<Field, Versioned>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value changed and an event was queued.
    Applied,
    /// The field already held this value; nothing was queued.
    Unchanged,
    /// The write was swallowed by game rules (e.g. the entity is knocked out).
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    Applied {
        dealt: i32,
        health: i32,
        knocked_out: bool,
    },
    Ignored,
}

#[derive(Debug, Default)]
pub struct AuthorityStore {
    entities: HashMap<EntityId, EntityState>,
    outbound: VecDeque<ReplicationEvent>,
}

impl AuthorityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full field set of a freshly spawned hero of the given type.
    pub fn hero_fields(hero: HeroType) -> Vec<(Field, FieldValue)> {
        let stats = hero.base_stats();
        vec![
            (Field::Hero, FieldValue::Hero(hero)),
            (Field::MaxHealth, FieldValue::Int(stats.max_health)),
            (Field::Health, FieldValue::Int(stats.max_health)),
            (Field::BaseAttack, FieldValue::Int(stats.attack)),
            (Field::Attack, FieldValue::Int(stats.attack)),
            (Field::BaseDefense, FieldValue::Int(stats.defense)),
            (Field::Defense, FieldValue::Int(stats.defense)),
            (Field::BaseSpeed, FieldValue::Int(stats.speed)),
            (Field::Speed, FieldValue::Int(stats.speed)),
            (Field::KnockedOut, FieldValue::Flag(false)),
            (Field::CarryingObjective, FieldValue::Flag(false)),
            (Field::Score, FieldValue::Int(0)),
        ]
    }

    /// Adds an entity owned by `authority` with its initial fields.
    ///
    /// Initial values are replicated like any other write (version 1).
    pub fn insert_entity(
        &mut self,
        entity: EntityId,
        authority: Role,
        fields: impl IntoIterator<Item = (Field, FieldValue)>,
    ) -> Result<()> {
        if self.entities.contains_key(&entity) {
            return Err(ReplicationError::DuplicateEntity(entity));
        }

        let fields: Vec<(Field, FieldValue)> = fields.into_iter().collect();
        if let Some((field, _)) = fields.iter().find(|(field, value)| field.kind() != value.kind()) {
            return Err(ReplicationError::TypeMismatch {
                field: *field,
                expected: field.kind(),
            });
        }

        self.entities.insert(
            entity,
            EntityState {
                authority,
                fields: BTreeMap::new(),
            },
        );

        for (field, value) in fields {
            self.set(entity, field, value)?;
        }

        info!("Entity {} created with authority {}", entity, authority);
        Ok(())
    }

    pub fn remove_entity(&mut self, entity: EntityId) -> Result<()> {
        self.entities
            .remove(&entity)
            .map(|_| info!("Entity {} removed", entity))
            .ok_or(ReplicationError::EntityNotFound(entity))
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

    pub fn authority_of(&self, entity: EntityId) -> Result<Role> {
        self.entities
            .get(&entity)
            .map(|state| state.authority)
            .ok_or(ReplicationError::EntityNotFound(entity))
    }

    /// The one place that decides whether `requester` may write `entity`.
    fn authorize(&self, entity: EntityId, requester: Role) -> Result<()> {
        let authority = self.authority_of(entity)?;
        if authority == requester {
            Ok(())
        } else {
            Err(ReplicationError::Authorization {
                entity,
                requester,
                authority,
            })
        }
    }

    pub fn read(&self, entity: EntityId, field: Field) -> Result<FieldValue> {
        self.read_versioned(entity, field).map(|v| v.value)
    }

    pub fn read_versioned(&self, entity: EntityId, field: Field) -> Result<Versioned> {
        let state = self
            .entities
            .get(&entity)
            .ok_or(ReplicationError::EntityNotFound(entity))?;
        state
            .fields
            .get(&field)
            .copied()
            .ok_or(ReplicationError::FieldNotFound { entity, field })
    }

    pub fn read_int(&self, entity: EntityId, field: Field) -> Result<i32> {
        self.read(entity, field)?
            .as_int()
            .ok_or(ReplicationError::TypeMismatch {
                field,
                expected: field.kind(),
            })
    }

    pub fn read_flag(&self, entity: EntityId, field: Field) -> Result<bool> {
        self.read(entity, field)?
            .as_flag()
            .ok_or(ReplicationError::TypeMismatch {
                field,
                expected: field.kind(),
            })
    }

    pub fn is_knocked_out(&self, entity: EntityId) -> Result<bool> {
        match self.read_flag(entity, Field::KnockedOut) {
            Err(ReplicationError::FieldNotFound { .. }) => Ok(false),
            other => other,
        }
    }

    /// Writes a field after the authorization gate and the clamping policy.
    ///
    /// Base stats also reset their current counterpart, and lowering the
    /// maximum health re-clamps the current health.
    pub fn write(
        &mut self,
        entity: EntityId,
        field: Field,
        value: FieldValue,
        requester: Role,
    ) -> Result<WriteOutcome> {
        self.authorize(entity, requester)?;

        if field.kind() != value.kind() {
            return Err(ReplicationError::TypeMismatch {
                field,
                expected: field.kind(),
            });
        }

        let outcome = match (field, value) {
            (Field::Health, FieldValue::Int(health)) => {
                let max_health = self.read_int(entity, Field::MaxHealth)?;
                self.set(entity, Field::Health, FieldValue::Int(clamp_health(health, max_health)))?
            }
            (Field::MaxHealth, FieldValue::Int(max_health)) => {
                let max_health = max_health.max(0);
                let outcome = self.set(entity, Field::MaxHealth, FieldValue::Int(max_health))?;
                if let Ok(health) = self.read_int(entity, Field::Health) {
                    self.set(entity, Field::Health, FieldValue::Int(clamp_health(health, max_health)))?;
                }
                outcome
            }
            (base, FieldValue::Int(stat)) if base.current_of().is_some() => {
                let outcome = self.set(entity, base, value)?;
                if let Some(current) = base.current_of() {
                    let current_outcome = self.set(entity, current, FieldValue::Int(stat))?;
                    if current_outcome == WriteOutcome::Applied {
                        return Ok(WriteOutcome::Applied);
                    }
                }
                outcome
            }
            _ => self.set(entity, field, value)?,
        };

        Ok(outcome)
    }

    /// Applies defense-mitigated damage.
    ///
    /// Knocked-out entities ignore damage. Health reaching zero knocks the
    /// entity out in the same batch of events.
    pub fn apply_damage(
        &mut self,
        entity: EntityId,
        amount: i32,
        requester: Role,
    ) -> Result<DamageOutcome> {
        self.authorize(entity, requester)?;

        if self.is_knocked_out(entity)? {
            debug!("Entity {} is knocked out, ignoring {} damage", entity, amount);
            return Ok(DamageOutcome::Ignored);
        }

        let health = self.read_int(entity, Field::Health)?;
        let max_health = self.read_int(entity, Field::MaxHealth)?;
        let defense = self.read_int(entity, Field::Defense).unwrap_or(0);

        let new_health = health_after_damage(health, max_health, defense, amount);
        self.set(entity, Field::Health, FieldValue::Int(new_health))?;

        let knocked_out = new_health == 0;
        if knocked_out {
            self.set(entity, Field::KnockedOut, FieldValue::Flag(true))?;
            info!("Entity {} knocked out", entity);
        }

        Ok(DamageOutcome::Applied {
            dealt: health - new_health,
            health: new_health,
            knocked_out,
        })
    }

    pub fn heal(&mut self, entity: EntityId, amount: i32, requester: Role) -> Result<WriteOutcome> {
        self.authorize(entity, requester)?;

        if self.is_knocked_out(entity)? {
            return Ok(WriteOutcome::Ignored);
        }

        let health = self.read_int(entity, Field::Health)?;
        let max_health = self.read_int(entity, Field::MaxHealth)?;
        self.set(
            entity,
            Field::Health,
            FieldValue::Int(health_after_heal(health, max_health, amount)),
        )
    }

    /// Adds to the entity's score and returns the new total.
    pub fn add_score(&mut self, entity: EntityId, amount: i32, requester: Role) -> Result<i32> {
        self.authorize(entity, requester)?;

        let score = self.read_int(entity, Field::Score)?.saturating_add(amount);
        self.set(entity, Field::Score, FieldValue::Int(score))?;
        Ok(score)
    }

    /// Restores current attack, defense and speed to their base values.
    pub fn reset_current_stats(&mut self, entity: EntityId, requester: Role) -> Result<()> {
        self.authorize(entity, requester)?;

        for current in [Field::Attack, Field::Defense, Field::Speed] {
            if let Some(base) = current.base_of() {
                if let Ok(value) = self.read(entity, base) {
                    self.set(entity, current, value)?;
                }
            }
        }
        Ok(())
    }

    /// Brings a knocked-out entity back with full health and base stats.
    pub fn revive(&mut self, entity: EntityId, requester: Role) -> Result<()> {
        self.authorize(entity, requester)?;

        let max_health = self.read_int(entity, Field::MaxHealth)?;
        self.set(entity, Field::KnockedOut, FieldValue::Flag(false))?;
        self.set(entity, Field::Health, FieldValue::Int(max_health))?;
        self.reset_current_stats(entity, requester)?;
        info!("Entity {} revived", entity);
        Ok(())
    }

    /// Stores a value that already passed the gate and queues its event.
    fn set(&mut self, entity: EntityId, field: Field, value: FieldValue) -> Result<WriteOutcome> {
        let state = self
            .entities
            .get_mut(&entity)
            .ok_or(ReplicationError::EntityNotFound(entity))?;

        let version = match state.fields.get(&field) {
            Some(current) if current.value == value => return Ok(WriteOutcome::Unchanged),
            Some(current) => current.version + 1,
            None => 1,
        };

        state.fields.insert(field, Versioned { value, version });
        self.outbound.push_back(ReplicationEvent {
            entity,
            field,
            value,
            version,
        });
        Ok(WriteOutcome::Applied)
    }

    /// Takes every queued event in write order.
    pub fn drain_outbound(&mut self) -> Vec<ReplicationEvent> {
        self.outbound.drain(..).collect()
    }

    pub fn pending_events(&self) -> usize {
        self.outbound.len()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Every field of every entity at its current version.
    pub fn snapshot(&self) -> Vec<ReplicationEvent> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();

        ids.into_iter()
            .flat_map(|entity| {
                self.entities[&entity]
                    .fields
                    .iter()
                    .map(move |(field, versioned)| ReplicationEvent {
                        entity,
                        field: *field,
                        value: versioned.value,
                        version: versioned.version,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HERO: EntityId = 1;

    fn store_with_hero() -> AuthorityStore {
        let mut store = AuthorityStore::new();
        store
            .insert_entity(HERO, Role::Server, AuthorityStore::hero_fields(HeroType::King))
            .unwrap();
        store.drain_outbound();
        store
    }

    fn set_defense(store: &mut AuthorityStore, defense: i32) {
        store
            .write(HERO, Field::BaseDefense, FieldValue::Int(defense), Role::Server)
            .unwrap();
    }

    #[test]
    fn test_insert_replicates_initial_fields() {
        let mut store = AuthorityStore::new();
        store
            .insert_entity(HERO, Role::Server, AuthorityStore::hero_fields(HeroType::Rogue))
            .unwrap();

        let events = store.drain_outbound();
        assert_eq!(events.len(), AuthorityStore::hero_fields(HeroType::Rogue).len());
        assert!(events.iter().all(|e| e.version == 1));
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 80);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut store = store_with_hero();
        let err = store.insert_entity(HERO, Role::Server, Vec::new()).unwrap_err();
        assert_eq!(err, ReplicationError::DuplicateEntity(HERO));
    }

    #[test]
    fn test_insert_with_wrong_value_kind_rolls_back() {
        let mut store = AuthorityStore::new();
        let err = store
            .insert_entity(2, Role::Server, vec![(Field::Score, FieldValue::Flag(true))])
            .unwrap_err();
        assert!(matches!(err, ReplicationError::TypeMismatch { .. }));
        assert!(!store.contains(2));
    }

    #[test]
    fn test_write_requires_authority() {
        let mut store = store_with_hero();
        let err = store
            .write(HERO, Field::Score, FieldValue::Int(9000), Role::Client(1))
            .unwrap_err();

        assert!(matches!(err, ReplicationError::Authorization { .. }));
        assert_eq!(store.read_int(HERO, Field::Score).unwrap(), 0);
        assert_eq!(store.pending_events(), 0);
    }

    #[test]
    fn test_client_authority_entity_rejects_server() {
        let mut store = AuthorityStore::new();
        store
            .insert_entity(7, Role::Client(3), vec![(Field::Score, FieldValue::Int(0))])
            .unwrap();

        assert!(store
            .write(7, Field::Score, FieldValue::Int(1), Role::Client(3))
            .is_ok());
        assert!(store
            .write(7, Field::Score, FieldValue::Int(2), Role::Server)
            .is_err());
        assert_eq!(store.read_int(7, Field::Score).unwrap(), 1);
    }

    #[test]
    fn test_write_type_mismatch() {
        let mut store = store_with_hero();
        let err = store
            .write(HERO, Field::KnockedOut, FieldValue::Int(1), Role::Server)
            .unwrap_err();
        assert_eq!(
            err,
            ReplicationError::TypeMismatch {
                field: Field::KnockedOut,
                expected: tpk_shared::ValueKind::Flag
            }
        );
    }

    #[test]
    fn test_read_missing_entity() {
        let store = AuthorityStore::new();
        assert_eq!(
            store.read(42, Field::Health).unwrap_err(),
            ReplicationError::EntityNotFound(42)
        );
    }

    #[test]
    fn test_health_write_clamped() {
        let mut store = store_with_hero();
        store
            .write(HERO, Field::Health, FieldValue::Int(5000), Role::Server)
            .unwrap();
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 100);

        store
            .write(HERO, Field::Health, FieldValue::Int(-20), Role::Server)
            .unwrap();
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 0);
    }

    #[test]
    fn test_lowering_max_health_reclamps_health() {
        let mut store = store_with_hero();
        store
            .write(HERO, Field::MaxHealth, FieldValue::Int(60), Role::Server)
            .unwrap();
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 60);
    }

    #[test]
    fn test_base_write_resets_current() {
        let mut store = store_with_hero();
        let outcome = store
            .write(HERO, Field::BaseAttack, FieldValue::Int(30), Role::Server)
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);
        assert_eq!(store.read_int(HERO, Field::BaseAttack).unwrap(), 30);
        assert_eq!(store.read_int(HERO, Field::Attack).unwrap(), 30);
    }

    #[test]
    fn test_unchanged_write_does_not_bump_version() {
        let mut store = store_with_hero();
        let before = store.read_versioned(HERO, Field::Score).unwrap();
        let outcome = store
            .write(HERO, Field::Score, FieldValue::Int(0), Role::Server)
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(store.read_versioned(HERO, Field::Score).unwrap(), before);
        assert_eq!(store.pending_events(), 0);
    }

    #[test]
    fn test_versions_increase_per_field() {
        let mut store = store_with_hero();
        for score in 1..=3 {
            store
                .write(HERO, Field::Score, FieldValue::Int(score), Role::Server)
                .unwrap();
        }

        let events = store.drain_outbound();
        let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![2, 3, 4]);
    }

    #[test]
    fn test_damage_with_full_defense() {
        let mut store = store_with_hero();
        set_defense(&mut store, 50);

        let outcome = store.apply_damage(HERO, 100, Role::Server).unwrap();
        assert_eq!(
            outcome,
            DamageOutcome::Applied {
                dealt: 0,
                health: 100,
                knocked_out: false
            }
        );
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 100);
    }

    #[test]
    fn test_damage_without_defense() {
        let mut store = store_with_hero();
        set_defense(&mut store, 0);

        store.apply_damage(HERO, 40, Role::Server).unwrap();
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 60);
    }

    #[test]
    fn test_damage_requires_authority() {
        let mut store = store_with_hero();
        assert!(store.apply_damage(HERO, 40, Role::Client(1)).is_err());
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 100);
    }

    #[test]
    fn test_lethal_damage_knocks_out() {
        let mut store = store_with_hero();
        let outcome = store.apply_damage(HERO, i32::MAX, Role::Server).unwrap();

        assert_eq!(
            outcome,
            DamageOutcome::Applied {
                dealt: 100,
                health: 0,
                knocked_out: true
            }
        );
        assert!(store.is_knocked_out(HERO).unwrap());
    }

    #[test]
    fn test_knocked_out_ignores_damage_until_revived() {
        let mut store = store_with_hero();
        set_defense(&mut store, 0);
        store.apply_damage(HERO, 500, Role::Server).unwrap();
        store.drain_outbound();

        // Knocked out with some health left via a direct write.
        store
            .write(HERO, Field::Health, FieldValue::Int(30), Role::Server)
            .unwrap();
        for amount in [1, 50, i32::MAX, -10] {
            assert_eq!(
                store.apply_damage(HERO, amount, Role::Server).unwrap(),
                DamageOutcome::Ignored
            );
            assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 30);
        }

        store.revive(HERO, Role::Server).unwrap();
        assert!(!store.is_knocked_out(HERO).unwrap());
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 100);

        store.apply_damage(HERO, 40, Role::Server).unwrap();
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 60);
    }

    #[test]
    fn test_heal_clamped_and_ignored_when_knocked_out() {
        let mut store = store_with_hero();
        set_defense(&mut store, 0);
        store.apply_damage(HERO, 50, Role::Server).unwrap();

        store.heal(HERO, 500, Role::Server).unwrap();
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 100);

        store.apply_damage(HERO, 500, Role::Server).unwrap();
        assert_eq!(
            store.heal(HERO, 10, Role::Server).unwrap(),
            WriteOutcome::Ignored
        );
        assert_eq!(store.read_int(HERO, Field::Health).unwrap(), 0);
    }

    #[test]
    fn test_add_score_saturates() {
        let mut store = store_with_hero();
        assert_eq!(store.add_score(HERO, 100, Role::Server).unwrap(), 100);
        assert_eq!(store.add_score(HERO, i32::MAX, Role::Server).unwrap(), i32::MAX);
    }

    #[test]
    fn test_reset_current_stats() {
        let mut store = store_with_hero();
        store
            .write(HERO, Field::Defense, FieldValue::Int(99), Role::Server)
            .unwrap();
        store.reset_current_stats(HERO, Role::Server).unwrap();
        assert_eq!(store.read_int(HERO, Field::Defense).unwrap(), 10);
    }

    #[test]
    fn test_snapshot_contains_all_fields() {
        let mut store = store_with_hero();
        store
            .insert_entity(2, Role::Server, AuthorityStore::hero_fields(HeroType::Wizard))
            .unwrap();
        store.write(2, Field::Score, FieldValue::Int(5), Role::Server).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2 * AuthorityStore::hero_fields(HeroType::King).len());
        assert!(snapshot[0].entity <= snapshot[snapshot.len() - 1].entity);

        let score = snapshot
            .iter()
            .find(|e| e.entity == 2 && e.field == Field::Score)
            .unwrap();
        assert_eq!(score.value, FieldValue::Int(5));
        assert_eq!(score.version, 2);
    }

    #[test]
    fn test_remove_entity() {
        let mut store = store_with_hero();
        assert_eq!(store.entity_ids(), vec![HERO]);
        store.remove_entity(HERO).unwrap();
        assert!(store.is_empty());
        assert!(store.entity_ids().is_empty());
        assert_eq!(
            store.remove_entity(HERO).unwrap_err(),
            ReplicationError::EntityNotFound(HERO)
        );
    }
}

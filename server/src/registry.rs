//! Live entity handles indexed by entity id and by controlling player.
//!
//! Components receive the registry explicitly instead of searching a scene
//! for tagged objects. The registry is owned by a single match and is not
//! synchronized; callers serialize access.

use crate::error::{ReplicationError, Result};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use tpk_shared::{EntityId, PlayerId, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Hero,
    Objective,
}

/// Identity and ownership of a live entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityHandle {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Role the entity belongs to: the controlling client for heroes,
    /// the server for world objects.
    pub owner: Role,
}

impl EntityHandle {
    pub fn hero(id: EntityId, player: PlayerId) -> Self {
        Self {
            id,
            kind: EntityKind::Hero,
            owner: Role::Client(player),
        }
    }

    pub fn objective(id: EntityId) -> Self {
        Self {
            id,
            kind: EntityKind::Objective,
            owner: Role::Server,
        }
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.owner.player_id()
    }
}

#[derive(Debug)]
pub struct EntityRegistry {
    entities: BTreeMap<EntityId, EntityHandle>,
    heroes_by_player: HashMap<PlayerId, EntityId>,
    next_entity_id: EntityId,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            heroes_by_player: HashMap::new(),
            next_entity_id: 1,
        }
    }

    /// Hands out a fresh entity id; ids are never reused within a match.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Lowest id not handed out yet.
    pub fn next_id(&self) -> EntityId {
        self.next_entity_id
    }

    pub fn register(&mut self, handle: EntityHandle) -> Result<()> {
        if self.entities.contains_key(&handle.id) {
            return Err(ReplicationError::DuplicateEntity(handle.id));
        }

        if handle.kind == EntityKind::Hero {
            if let Some(player) = handle.player_id() {
                if self.heroes_by_player.contains_key(&player) {
                    return Err(ReplicationError::invalid(player, "player already has a hero"));
                }
                self.heroes_by_player.insert(player, handle.id);
            }
        }

        self.next_entity_id = self.next_entity_id.max(handle.id + 1);
        self.entities.insert(handle.id, handle);
        debug!("Registered {:?} {} owned by {}", handle.kind, handle.id, handle.owner);
        Ok(())
    }

    pub fn unregister(&mut self, id: EntityId) -> Result<EntityHandle> {
        let handle = self
            .entities
            .remove(&id)
            .ok_or(ReplicationError::EntityNotFound(id))?;

        if let Some(player) = handle.player_id() {
            if self.heroes_by_player.get(&player) == Some(&id) {
                self.heroes_by_player.remove(&player);
            }
        }

        debug!("Unregistered {:?} {}", handle.kind, id);
        Ok(handle)
    }

    pub fn get(&self, id: EntityId) -> Result<&EntityHandle> {
        self.entities
            .get(&id)
            .ok_or(ReplicationError::EntityNotFound(id))
    }

    /// Hero controlled by the given player.
    pub fn find_by_player_id(&self, player: PlayerId) -> Result<&EntityHandle> {
        self.heroes_by_player
            .get(&player)
            .and_then(|id| self.entities.get(id))
            .ok_or(ReplicationError::PlayerNotFound(player))
    }

    /// Every entity owned by `role`, in id order.
    pub fn all_of_role(&self, role: Role) -> Vec<&EntityHandle> {
        self.entities
            .values()
            .filter(|handle| handle.owner == role)
            .collect()
    }

    pub fn heroes(&self) -> Vec<&EntityHandle> {
        self.entities
            .values()
            .filter(|handle| handle.kind == EntityKind::Hero)
            .collect()
    }

    pub fn hero_count(&self) -> usize {
        self.heroes_by_player.len()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_find_by_player() {
        let mut registry = EntityRegistry::new();
        let id = registry.allocate_id();
        registry.register(EntityHandle::hero(id, 7)).unwrap();

        let found = registry.find_by_player_id(7).unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.kind, EntityKind::Hero);
        assert_eq!(registry.hero_count(), 1);
    }

    #[test]
    fn test_lookup_miss_is_not_found() {
        let registry = EntityRegistry::new();
        assert_eq!(
            registry.find_by_player_id(3).unwrap_err(),
            ReplicationError::PlayerNotFound(3)
        );
        assert_eq!(
            registry.get(9).unwrap_err(),
            ReplicationError::EntityNotFound(9)
        );
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = EntityRegistry::new();
        registry.register(EntityHandle::objective(1)).unwrap();
        assert_eq!(
            registry.register(EntityHandle::objective(1)).unwrap_err(),
            ReplicationError::DuplicateEntity(1)
        );
    }

    #[test]
    fn test_one_hero_per_player() {
        let mut registry = EntityRegistry::new();
        registry.register(EntityHandle::hero(1, 4)).unwrap();
        let err = registry.register(EntityHandle::hero(2, 4)).unwrap_err();
        assert!(matches!(err, ReplicationError::InvalidRequest { player: 4, .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_clears_player_index() {
        let mut registry = EntityRegistry::new();
        registry.register(EntityHandle::hero(1, 4)).unwrap();

        let handle = registry.unregister(1).unwrap();
        assert_eq!(handle.player_id(), Some(4));
        assert!(registry.find_by_player_id(4).is_err());
        assert!(registry.unregister(1).is_err());
    }

    #[test]
    fn test_all_of_role() {
        let mut registry = EntityRegistry::new();
        registry.register(EntityHandle::hero(1, 1)).unwrap();
        registry.register(EntityHandle::hero(2, 2)).unwrap();
        registry.register(EntityHandle::objective(3)).unwrap();

        let server_owned = registry.all_of_role(Role::Server);
        assert_eq!(server_owned.len(), 1);
        assert_eq!(server_owned[0].kind, EntityKind::Objective);

        let player_two = registry.all_of_role(Role::Client(2));
        assert_eq!(player_two.len(), 1);
        assert_eq!(player_two[0].id, 2);

        assert!(registry.all_of_role(Role::Client(9)).is_empty());
        assert_eq!(registry.heroes().len(), 2);
    }

    #[test]
    fn test_allocated_ids_skip_registered() {
        let mut registry = EntityRegistry::new();
        registry.register(EntityHandle::objective(5)).unwrap();
        assert_eq!(registry.allocate_id(), 6);
        assert_eq!(registry.allocate_id(), 7);
        assert_eq!(registry.next_id(), 8);
    }
}

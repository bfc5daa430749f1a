//! Replicable entities, the scenes that own them and the type-tag factory
//!
//! Game logic owns the payload types. The networking core only sees the
//! [`EntityPayload`] trait plus the metadata kept on [`SyncedEntity`].

use log::warn;
use shared::{ByteReader, ByteWriter, CodecError, EntityId, EntityState, PlayerId};
use std::any::Any;
use std::collections::HashMap;

/// Type-specific state of an entity
pub trait EntityPayload: Any {
    fn serialize(&self, writer: &mut ByteWriter);

    /// Applies a remote update
    fn synchronize(&mut self, reader: &mut ByteReader<'_>) -> Result<(), CodecError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Dirty flags cleared by every send pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncFlags {
    pub must_sync: bool,
    pub must_sync_reliably: bool,
}

pub struct SyncedEntity {
    id: EntityId,
    type_tag: u8,
    owner: Option<PlayerId>,
    state: EntityState,
    flags: SyncFlags,
    removed: bool,
    host_assignable: bool,
    payload: Box<dyn EntityPayload>,
}

impl SyncedEntity {
    /// A new, active, unowned entity that must be sent reliably once
    pub fn new(id: EntityId, type_tag: u8, payload: Box<dyn EntityPayload>) -> Self {
        Self {
            id,
            type_tag,
            owner: None,
            state: EntityState::Active,
            flags: SyncFlags {
                must_sync: true,
                must_sync_reliably: true,
            },
            removed: false,
            host_assignable: false,
            payload,
        }
    }

    pub fn with_owner(mut self, owner: PlayerId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Unowned instances of this entity are given to the match host
    pub fn host_assignable(mut self) -> Self {
        self.host_assignable = true;
        self
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn type_tag(&self) -> u8 {
        self.type_tag
    }

    pub fn owner(&self) -> Option<PlayerId> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: Option<PlayerId>) {
        self.owner = owner;
    }

    pub fn is_host_assignable(&self) -> bool {
        self.host_assignable
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == EntityState::Active
    }

    /// Marks the entity for removal; the owner sends it one last time
    pub fn deactivate(&mut self) {
        self.state = EntityState::Inactive;
        self.flags.must_sync = true;
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub(crate) fn set_removed(&mut self) {
        self.removed = true;
    }

    pub fn flags(&self) -> SyncFlags {
        self.flags
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.must_sync || self.flags.must_sync_reliably
    }

    /// Requests a send on the next pass; `reliably` for one-shot changes
    pub fn mark_dirty(&mut self, reliably: bool) {
        self.flags.must_sync = true;
        self.flags.must_sync_reliably |= reliably;
    }

    pub(crate) fn clear_flags(&mut self) {
        self.flags = SyncFlags::default();
    }

    pub fn payload(&self) -> &dyn EntityPayload {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> &mut dyn EntityPayload {
        self.payload.as_mut()
    }

    pub fn payload_as<T: EntityPayload>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    pub fn payload_as_mut<T: EntityPayload>(&mut self) -> Option<&mut T> {
        self.payload.as_any_mut().downcast_mut::<T>()
    }
}

impl std::fmt::Debug for SyncedEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedEntity")
            .field("id", &self.id)
            .field("type_tag", &self.type_tag)
            .field("owner", &self.owner)
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("removed", &self.removed)
            .finish()
    }
}

/// Entities of one scene, keyed by id
#[derive(Debug, Default)]
pub struct Scene {
    tag: u8,
    entities: HashMap<EntityId, SyncedEntity>,
}

impl Scene {
    pub fn new(tag: u8) -> Self {
        Self {
            tag,
            entities: HashMap::new(),
        }
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn get(&self, id: &EntityId) -> Option<&SyncedEntity> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut SyncedEntity> {
        self.entities.get_mut(id)
    }

    /// Inserts or replaces the entity with the same id
    pub fn insert(&mut self, entity: SyncedEntity) -> Option<SyncedEntity> {
        self.entities.insert(entity.id, entity)
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<SyncedEntity> {
        self.entities.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncedEntity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SyncedEntity> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drops entities flagged removed, returning their ids
    pub fn prune_removed(&mut self) -> Vec<EntityId> {
        let removed: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.removed)
            .map(|e| e.id)
            .collect();
        for id in &removed {
            self.entities.remove(id);
        }
        removed
    }
}

/// Every scene the replication service may address by tag
#[derive(Debug, Default)]
pub struct SceneSet {
    scenes: HashMap<u8, Scene>,
}

impl SceneSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scene(mut self, scene: Scene) -> Self {
        self.add(scene);
        self
    }

    pub fn add(&mut self, scene: Scene) {
        self.scenes.insert(scene.tag, scene);
    }

    pub fn get(&self, tag: u8) -> Option<&Scene> {
        self.scenes.get(&tag)
    }

    pub fn get_mut(&mut self, tag: u8) -> Option<&mut Scene> {
        self.scenes.get_mut(&tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Scene> {
        self.scenes.values_mut()
    }

    /// Finds an entity in any scene
    pub fn find(&self, id: &EntityId) -> Option<&SyncedEntity> {
        self.scenes.values().find_map(|s| s.get(id))
    }

    pub fn entity_count(&self) -> usize {
        self.scenes.values().map(Scene::len).sum()
    }

    pub fn prune_removed(&mut self) -> usize {
        self.scenes
            .values_mut()
            .map(|s| s.prune_removed().len())
            .sum()
    }
}

type Constructor = Box<dyn Fn() -> Box<dyn EntityPayload>>;

/// Entity type tag → payload constructor
#[derive(Default)]
pub struct EntityFactory {
    constructors: HashMap<u8, Constructor>,
}

impl EntityFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first constructor registered for a tag wins
    pub fn register<F>(&mut self, type_tag: u8, constructor: F) -> bool
    where
        F: Fn() -> Box<dyn EntityPayload> + 'static,
    {
        if self.constructors.contains_key(&type_tag) {
            warn!("Entity type tag {} already registered; ignoring", type_tag);
            return false;
        }
        self.constructors.insert(type_tag, Box::new(constructor));
        true
    }

    pub fn with<F>(mut self, type_tag: u8, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn EntityPayload> + 'static,
    {
        self.register(type_tag, constructor);
        self
    }

    pub fn create(&self, type_tag: u8) -> Option<Box<dyn EntityPayload>> {
        self.constructors.get(&type_tag).map(|ctor| ctor())
    }

    pub fn knows(&self, type_tag: u8) -> bool {
        self.constructors.contains_key(&type_tag)
    }
}

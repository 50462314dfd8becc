//! Entity table and id lifecycle.
//!
//! Synced ids live in `[FIRST_ENTITY_ID, MAX_SYNCED_ENTITIES)` and cycle
//! through a FIFO free queue. A destroyed id stays out of circulation until
//! no connected player can still reference it; each reuse bumps the 8-bit
//! version so `(id, version)` stays unambiguous across reordered packets.

use std::collections::{HashMap, VecDeque};

use bytemuck::Pod;

use crate::descriptor::{ClassId, ClassRegistry, EntityClass, EntityRole};
use crate::rpc::{ExecuteFlags, RpcPool};
use crate::seq::Tick;
use crate::serializer::StateSerializer;

pub type EntityId = u16;
pub type EntityVersion = u8;

/// First replicated id; id 0 is reserved for local use.
pub const FIRST_ENTITY_ID: EntityId = 1;
/// Exclusive upper bound of the replicated id range.
pub const MAX_SYNCED_ENTITIES: usize = 8192;
/// "No entity" sentinel, used for absent parents and pawns.
pub const INVALID_ENTITY_ID: EntityId = u16::MAX;

#[derive(Debug, thiserror::Error)]
pub enum AddEntityError {
    #[error("class {0} is not registered")]
    UnknownClass(ClassId),
    #[error("synced entity ids exhausted")]
    IdExhausted,
}

#[derive(Debug, thiserror::Error)]
#[error("no entity with id {0}")]
pub struct NoSuchEntity(pub EntityId);

/// One live synced entity.
#[derive(Debug)]
pub struct EntityEntry {
    pub class_id: ClassId,
    pub id: EntityId,
    pub version: EntityVersion,
    pub owner: u8,
    pub parent: EntityId,
    pub children: Vec<EntityId>,
    pub controlled_pawn: EntityId,
    pub block: Box<[u8]>,
}

/// A local-only entity: same shape, never replicated.
#[derive(Debug)]
pub struct LocalEntity {
    pub class_id: ClassId,
    pub id: EntityId,
    pub block: Box<[u8]>,
}

/// All entity state the game hooks may touch during a tick.
pub struct EntityWorld {
    classes: ClassRegistry,
    entries: Box<[Option<EntityEntry>]>,
    serializers: Box<[StateSerializer]>,
    free_ids: VecDeque<EntityId>,
    singletons: HashMap<ClassId, EntityId>,
    locals: HashMap<EntityId, LocalEntity>,
    next_local_id: EntityId,
    rpc_pool: RpcPool,
    current_tick: Tick,
}

impl EntityWorld {
    pub fn new(classes: ClassRegistry) -> Self {
        Self {
            classes,
            entries: (0..MAX_SYNCED_ENTITIES).map(|_| None).collect(),
            serializers: (0..MAX_SYNCED_ENTITIES)
                .map(|_| StateSerializer::default())
                .collect(),
            free_ids: (FIRST_ENTITY_ID..MAX_SYNCED_ENTITIES as EntityId).collect(),
            singletons: HashMap::new(),
            locals: HashMap::new(),
            next_local_id: MAX_SYNCED_ENTITIES as EntityId,
            rpc_pool: RpcPool::new(),
            current_tick: 0,
        }
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub(crate) fn set_current_tick(&mut self, tick: Tick) {
        self.current_tick = tick;
    }

    pub fn class(&self, id: ClassId) -> Option<&EntityClass> {
        self.classes.get(id)
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityEntry> {
        self.entries.get(id as usize).and_then(|e| e.as_ref())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut EntityEntry> {
        self.entries.get_mut(id as usize).and_then(|e| e.as_mut())
    }

    pub(crate) fn serializer(&self, id: EntityId) -> &StateSerializer {
        &self.serializers[id as usize]
    }

    /// Ids of every serializer still carrying replication state, including
    /// destroyed entities awaiting acknowledgement.
    pub(crate) fn replicated_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.serializers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_live())
            .map(|(index, _)| index as EntityId)
    }

    pub fn alive_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entries
            .iter()
            .flatten()
            .map(|entry| entry.id)
    }

    pub fn alive_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    /// Creates a synced entity. Singleton classes return the existing
    /// instance when one is already live.
    pub fn add(&mut self, class_id: ClassId, owner: u8) -> Result<EntityId, AddEntityError> {
        let class = self
            .classes
            .get(class_id)
            .ok_or(AddEntityError::UnknownClass(class_id))?;

        if class.role == EntityRole::Singleton {
            if let Some(&existing) = self.singletons.get(&class_id) {
                return Ok(existing);
            }
        }
        let block_size = class.block_size();
        let is_singleton = class.role == EntityRole::Singleton;

        let id = self.free_ids.pop_front().ok_or_else(|| {
            log::warn!("entity id range exhausted (class {class_id})");
            AddEntityError::IdExhausted
        })?;

        let serializer = &mut self.serializers[id as usize];
        let version = serializer.version().wrapping_add(1);
        serializer.init(class_id, owner, version, self.current_tick);

        self.entries[id as usize] = Some(EntityEntry {
            class_id,
            id,
            version,
            owner,
            parent: INVALID_ENTITY_ID,
            children: Vec::new(),
            controlled_pawn: INVALID_ENTITY_ID,
            block: vec![0; block_size].into_boxed_slice(),
        });
        if is_singleton {
            self.singletons.insert(class_id, id);
        }
        Ok(id)
    }

    /// Creates a local-only entity outside the replicated id range.
    pub fn add_local(&mut self, class_id: ClassId) -> Result<EntityId, AddEntityError> {
        let class = self
            .classes
            .get(class_id)
            .ok_or(AddEntityError::UnknownClass(class_id))?;
        let id = self.next_local_id;
        self.next_local_id = self.next_local_id.wrapping_add(1).max(MAX_SYNCED_ENTITIES as EntityId);
        self.locals.insert(
            id,
            LocalEntity {
                class_id,
                id,
                block: vec![0; class.block_size()].into_boxed_slice(),
            },
        );
        Ok(id)
    }

    pub fn local(&self, id: EntityId) -> Option<&LocalEntity> {
        self.locals.get(&id)
    }

    pub fn local_mut(&mut self, id: EntityId) -> Option<&mut LocalEntity> {
        self.locals.get_mut(&id)
    }

    pub fn remove_local(&mut self, id: EntityId) -> bool {
        self.locals.remove(&id).is_some()
    }

    pub fn singleton(&self, class_id: ClassId) -> Option<EntityId> {
        self.singletons.get(&class_id).copied()
    }

    /// Destroys an entity (and, for controllers, their controlled pawn).
    /// Children are detached, the serializer keeps the destruction marker
    /// until every player has acknowledged past it; with no players
    /// connected the id recycles immediately.
    pub fn destroy(&mut self, id: EntityId, no_players: bool) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(entry) = self.entries[id as usize].take() else {
                continue;
            };

            for child in &entry.children {
                if let Some(child_entry) = self.get_mut(*child) {
                    child_entry.parent = INVALID_ENTITY_ID;
                }
            }
            if entry.parent != INVALID_ENTITY_ID {
                if let Some(parent) = self.get_mut(entry.parent) {
                    parent.children.retain(|&c| c != id);
                }
            }
            if entry.controlled_pawn != INVALID_ENTITY_ID {
                pending.push(entry.controlled_pawn);
            }
            self.singletons.remove(&entry.class_id);

            let tick = self.current_tick;
            self.serializers[id as usize].mark_destroyed(tick, &mut self.rpc_pool);
            if no_players {
                self.recycle(id);
            }
        }
    }

    /// Returns a destroyed id to the free queue once no player needs its
    /// destruction record any longer.
    pub(crate) fn recycle(&mut self, id: EntityId) {
        self.serializers[id as usize].release(&mut self.rpc_pool);
        self.free_ids.push_back(id);
    }

    /// Releases every serializer that is only waiting on acknowledgements.
    /// Called when the last player leaves.
    pub(crate) fn recycle_all_pending(&mut self) {
        let pending: Vec<EntityId> = self
            .replicated_ids()
            .filter(|&id| self.serializers[id as usize].destroyed_at().is_some())
            .collect();
        for id in pending {
            self.recycle(id);
        }
    }

    /// Reparents `child`. Both sides of the relation stay consistent and
    /// the parent's owner propagates to the child and all descendants.
    pub fn set_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> Result<(), NoSuchEntity> {
        let old_parent = self.get(child).ok_or(NoSuchEntity(child))?.parent;
        if let Some(parent_id) = parent {
            if self.get(parent_id).is_none() {
                return Err(NoSuchEntity(parent_id));
            }
        }

        if old_parent != INVALID_ENTITY_ID {
            if let Some(old) = self.get_mut(old_parent) {
                old.children.retain(|&c| c != child);
            }
        }

        match parent {
            Some(parent_id) => {
                let owner = self.get(parent_id).map(|p| p.owner).unwrap_or(0);
                let parent_entry = self.get_mut(parent_id).ok_or(NoSuchEntity(parent_id))?;
                if !parent_entry.children.contains(&child) {
                    parent_entry.children.push(child);
                }
                self.get_mut(child).ok_or(NoSuchEntity(child))?.parent = parent_id;
                self.propagate_owner(child, owner);
            }
            None => {
                self.get_mut(child).ok_or(NoSuchEntity(child))?.parent = INVALID_ENTITY_ID;
            }
        }
        Ok(())
    }

    pub fn set_owner(&mut self, id: EntityId, owner: u8) -> Result<(), NoSuchEntity> {
        self.get(id).ok_or(NoSuchEntity(id))?;
        self.propagate_owner(id, owner);
        Ok(())
    }

    fn propagate_owner(&mut self, root: EntityId, owner: u8) {
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            if let Some(entry) = self.get_mut(id) {
                entry.owner = owner;
                pending.extend_from_slice(&entry.children);
                self.serializers[id as usize].set_owner(owner);
            }
        }
    }

    pub fn set_controlled_pawn(
        &mut self,
        controller: EntityId,
        pawn: Option<EntityId>,
    ) -> Result<(), NoSuchEntity> {
        let owner = self.get(controller).ok_or(NoSuchEntity(controller))?.owner;
        if let Some(pawn_id) = pawn {
            self.get(pawn_id).ok_or(NoSuchEntity(pawn_id))?;
            self.propagate_owner(pawn_id, owner);
        }
        let entry = self.get_mut(controller).ok_or(NoSuchEntity(controller))?;
        entry.controlled_pawn = pawn.unwrap_or(INVALID_ENTITY_ID);
        Ok(())
    }

    /// The controller a player owns, if any.
    pub fn controller_of(&self, player: u8) -> Option<EntityId> {
        self.entries.iter().flatten().find_map(|entry| {
            let class = self.classes.get(entry.class_id)?;
            (class.role == EntityRole::Controller && entry.owner == player).then_some(entry.id)
        })
    }

    /// Writes one synced field, bounds-checked against the class layout.
    pub fn set_field<T: Pod>(
        &mut self,
        id: EntityId,
        field_index: usize,
        value: T,
    ) -> Result<(), NoSuchEntity> {
        let entry = self.get(id).ok_or(NoSuchEntity(id))?;
        let field = self
            .classes
            .get(entry.class_id)
            .and_then(|c| c.fields.get(field_index))
            .copied()
            .ok_or(NoSuchEntity(id))?;
        debug_assert_eq!(field.size, size_of::<T>());
        let entry = self.get_mut(id).ok_or(NoSuchEntity(id))?;
        entry.block[field.offset..field.offset + field.size]
            .copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    pub fn field_bytes(&self, id: EntityId, field_index: usize) -> Option<&[u8]> {
        let entry = self.get(id)?;
        let field = self.classes.get(entry.class_id)?.fields.get(field_index)?;
        Some(&entry.block[field.offset..field.offset + field.size])
    }

    /// Queues a remote call on an entity; it rides the next diffs of every
    /// player in its audience.
    pub fn queue_rpc(
        &mut self,
        id: EntityId,
        rpc_id: u8,
        flags: ExecuteFlags,
        element_size: u16,
        element_count: u16,
        payload: &[u8],
    ) -> Result<(), NoSuchEntity> {
        if self.get(id).is_none() {
            return Err(NoSuchEntity(id));
        }
        debug_assert_eq!(payload.len(), element_size as usize * element_count as usize);

        let mut call = self.rpc_pool.acquire();
        call.tick = self.current_tick;
        call.rpc_id = rpc_id;
        call.flags = flags;
        call.element_size = element_size;
        call.element_count = element_count;
        call.data.extend_from_slice(payload);
        self.serializers[id as usize].queue_rpc(call);
        Ok(())
    }

    /// Drops history and remote calls below the retention floor on every
    /// replicated serializer.
    pub(crate) fn trim_all(&mut self, minimal_tick: Tick) {
        for serializer in self.serializers.iter_mut().filter(|s| s.is_live()) {
            serializer.trim(minimal_tick, &mut self.rpc_pool);
        }
    }

    /// Reads a committed field block snapshot. Lag-compensated game logic
    /// rewinds through this; ticks outside the retained window are gone.
    pub fn history(&self, id: EntityId, tick: Tick) -> Option<&[u8]> {
        self.serializers
            .get(id as usize)
            .filter(|s| s.is_live())
            .and_then(|s| s.snapshot(tick))
    }

    /// Commits every live entity's field block as this tick's snapshot.
    pub(crate) fn write_all_history(&mut self, tick: Tick) {
        for entry in self.entries.iter().flatten() {
            self.serializers[entry.id as usize].write_history(tick, &entry.block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FieldDescriptor;

    fn world() -> EntityWorld {
        let mut classes = ClassRegistry::new();
        classes.register(
            1,
            EntityClass::new("thing", EntityRole::Entity, vec![FieldDescriptor::new(0, 4)]),
        );
        classes.register(
            2,
            EntityClass::new("ctl", EntityRole::Controller, vec![]),
        );
        classes.register(
            3,
            EntityClass::new("pawn", EntityRole::Pawn, vec![FieldDescriptor::new(0, 4)]),
        );
        classes.register(
            4,
            EntityClass::new("match_info", EntityRole::Singleton, vec![FieldDescriptor::new(0, 2)]),
        );
        EntityWorld::new(classes)
    }

    #[test]
    fn unknown_class_is_rejected() {
        let mut world = world();
        assert!(matches!(
            world.add(99, 0),
            Err(AddEntityError::UnknownClass(99))
        ));
    }

    #[test]
    fn version_increments_on_reuse() {
        let mut world = world();

        let id = world.add(1, 0).unwrap();
        let v1 = world.get(id).unwrap().version;
        world.destroy(id, true);

        // No players connected: the id is available again right away.
        let seen = loop {
            let next = world.add(1, 0).unwrap();
            if next == id {
                break next;
            }
        };
        assert_eq!(world.get(seen).unwrap().version, v1.wrapping_add(1));
    }

    #[test]
    fn destroyed_id_is_retained_while_players_remain() {
        let mut world = world();
        let id = world.add(1, 0).unwrap();
        world.destroy(id, false);

        assert!(world.get(id).is_none());
        assert!(world.serializer(id).is_live());
        assert!(world.serializer(id).destroyed_at().is_some());
        assert!(!world.free_ids.contains(&id));

        world.recycle(id);
        assert!(world.free_ids.contains(&id));
    }

    #[test]
    fn parent_child_stay_consistent() {
        let mut world = world();
        let parent = world.add(1, 0).unwrap();
        let child = world.add(1, 0).unwrap();

        world.set_parent(child, Some(parent)).unwrap();
        assert_eq!(world.get(child).unwrap().parent, parent);
        assert!(world.get(parent).unwrap().children.contains(&child));

        world.set_parent(child, None).unwrap();
        assert_eq!(world.get(child).unwrap().parent, INVALID_ENTITY_ID);
        assert!(world.get(parent).unwrap().children.is_empty());
    }

    #[test]
    fn owner_cascades_through_descendants() {
        let mut world = world();
        let root = world.add(1, 0).unwrap();
        let mid = world.add(1, 0).unwrap();
        let leaf = world.add(1, 0).unwrap();
        world.set_parent(mid, Some(root)).unwrap();
        world.set_parent(leaf, Some(mid)).unwrap();

        world.set_owner(root, 5).unwrap();
        assert_eq!(world.get(mid).unwrap().owner, 5);
        assert_eq!(world.get(leaf).unwrap().owner, 5);
        assert_eq!(world.serializer(leaf).owner(), 5);

        // Reparenting under an owned entity re-propagates.
        let other = world.add(1, 3).unwrap();
        world.set_parent(other, Some(root)).unwrap();
        assert_eq!(world.get(other).unwrap().owner, 5);
    }

    #[test]
    fn destroying_controller_takes_its_pawn() {
        let mut world = world();
        let controller = world.add(2, 4).unwrap();
        let pawn = world.add(3, 0).unwrap();
        world.set_controlled_pawn(controller, Some(pawn)).unwrap();
        assert_eq!(world.get(pawn).unwrap().owner, 4);

        world.destroy(controller, true);
        assert!(world.get(controller).is_none());
        assert!(world.get(pawn).is_none());
    }

    #[test]
    fn singleton_is_unique() {
        let mut world = world();
        let first = world.add(4, 0).unwrap();
        let second = world.add(4, 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(world.singleton(4), Some(first));

        world.destroy(first, true);
        assert_eq!(world.singleton(4), None);
    }

    #[test]
    fn local_entities_live_outside_the_synced_range() {
        let mut world = world();
        let id = world.add_local(1).unwrap();
        assert!(id as usize >= MAX_SYNCED_ENTITIES);
        assert!(world.local(id).is_some());
        assert!(world.remove_local(id));
    }
}

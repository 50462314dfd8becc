//! Synchronized field layout per entity class.
//!
//! Classes register before the engine starts. Descriptor order is stable
//! and defines the wire layout of both baselines and diffs.

use bitflags::bitflags;

pub type ClassId = u16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncFlags: u8 {
        /// Client may interpolate this field between snapshots.
        const INTERPOLATED = 1 << 0;
        /// Tracked for rollback/lag compensation on the client.
        const ROLLBACK = 1 << 1;
        /// Replicated only to the owning player.
        const OWNER_ONLY = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u8 {
        /// `GameHooks::on_update` runs for instances every logic tick.
        const UPDATEABLE = 1 << 0;
        /// Instances commit per-tick history for lag compensation.
        const LAG_COMPENSATED = 1 << 1;
    }
}

/// Replication role of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRole {
    Entity,
    Controller,
    Pawn,
    Singleton,
}

/// One synchronized field inside a class's sync block.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    /// Byte offset within the sync block.
    pub offset: usize,
    /// Byte width on the wire and in the block.
    pub size: usize,
    /// Change-notify hook index, resolved by the client by name table.
    pub on_change: Option<u8>,
    pub flags: SyncFlags,
}

impl FieldDescriptor {
    pub fn new(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            on_change: None,
            flags: SyncFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: SyncFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_on_change(mut self, hook: u8) -> Self {
        self.on_change = Some(hook);
        self
    }
}

#[derive(Debug, Clone)]
pub struct EntityClass {
    pub name: &'static str,
    pub role: EntityRole,
    pub flags: ClassFlags,
    pub fields: Vec<FieldDescriptor>,
    block_size: usize,
}

impl EntityClass {
    pub fn new(name: &'static str, role: EntityRole, fields: Vec<FieldDescriptor>) -> Self {
        let block_size = fields
            .iter()
            .map(|f| f.offset + f.size)
            .max()
            .unwrap_or(0);
        Self {
            name,
            role,
            flags: ClassFlags::empty(),
            fields,
            block_size,
        }
    }

    pub fn with_flags(mut self, flags: ClassFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Size of the sync block an instance carries.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes one full record's field section takes for the given audience.
    pub fn visible_size(&self, is_owner: bool) -> usize {
        self.fields
            .iter()
            .filter(|f| is_owner || !f.flags.contains(SyncFlags::OWNER_ONLY))
            .map(|f| f.size)
            .sum()
    }
}

/// Table of registered classes, fixed after startup.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<Option<EntityClass>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ClassId, class: EntityClass) {
        let index = id as usize;
        if index >= self.classes.len() {
            self.classes.resize(index + 1, None);
        }
        self.classes[index] = Some(class);
    }

    pub fn get(&self, id: ClassId) -> Option<&EntityClass> {
        self.classes.get(id as usize).and_then(|c| c.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_covers_last_field() {
        let class = EntityClass::new(
            "probe",
            EntityRole::Entity,
            vec![
                FieldDescriptor::new(0, 4),
                FieldDescriptor::new(4, 2),
                FieldDescriptor::new(8, 8),
            ],
        );
        assert_eq!(class.block_size(), 16);
    }

    #[test]
    fn owner_only_fields_shrink_non_owner_view() {
        let class = EntityClass::new(
            "probe",
            EntityRole::Pawn,
            vec![
                FieldDescriptor::new(0, 4),
                FieldDescriptor::new(4, 4).with_flags(SyncFlags::OWNER_ONLY),
            ],
        );
        assert_eq!(class.visible_size(true), 8);
        assert_eq!(class.visible_size(false), 4);
    }

    #[test]
    fn registry_lookup() {
        let mut registry = ClassRegistry::new();
        registry.register(
            7,
            EntityClass::new("probe", EntityRole::Entity, vec![FieldDescriptor::new(0, 1)]),
        );
        assert!(registry.get(7).is_some());
        assert!(registry.get(8).is_none());
    }
}

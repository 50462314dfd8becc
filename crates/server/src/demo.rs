//! Demo game content: a flat arena of movable cubes.
//!
//! Each connecting player gets a controller and a cube pawn. The input
//! block is two little f32 axes; the update hook integrates them into the
//! pawn's replicated position at a fixed speed.

use std::collections::HashMap;

use syncline::{
    ClassFlags, ClassId, ClassRegistry, EntityClass, EntityId, EntityRole, EntityWorld,
    FieldDescriptor, GameHooks, PlayerId, SyncFlags,
};

pub const CLASS_CUBE: ClassId = 1;
pub const CLASS_CONTROLLER: ClassId = 2;

pub const FIELD_X: usize = 0;
pub const FIELD_Y: usize = 1;
pub const FIELD_COLOR: usize = 2;

/// Two f32 movement axes.
pub const INPUT_SIZE: usize = 8;

const MOVE_SPEED: f32 = 5.0;

pub fn registry() -> ClassRegistry {
    let mut classes = ClassRegistry::new();
    classes.register(
        CLASS_CUBE,
        EntityClass::new(
            "cube",
            EntityRole::Pawn,
            vec![
                FieldDescriptor::new(0, 4).with_flags(SyncFlags::INTERPOLATED),
                FieldDescriptor::new(4, 4).with_flags(SyncFlags::INTERPOLATED),
                FieldDescriptor::new(8, 4),
            ],
        )
        .with_flags(ClassFlags::UPDATEABLE),
    );
    classes.register(
        CLASS_CONTROLLER,
        EntityClass::new("cube_controller", EntityRole::Controller, vec![]),
    );
    classes
}

#[derive(Default)]
pub struct DemoHooks {
    pawns: HashMap<PlayerId, EntityId>,
    axes: HashMap<PlayerId, (f32, f32)>,
    dt: f32,
}

impl DemoHooks {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            dt: 1.0 / tick_rate as f32,
            ..Self::default()
        }
    }

    pub fn bind_pawn(&mut self, player: PlayerId, pawn: EntityId) {
        self.pawns.insert(player, pawn);
    }

    pub fn unbind(&mut self, player: PlayerId) {
        self.pawns.remove(&player);
        self.axes.remove(&player);
    }

    fn field_f32(world: &EntityWorld, id: EntityId, field: usize) -> f32 {
        world
            .field_bytes(id, field)
            .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .unwrap_or(0.0)
    }
}

impl GameHooks for DemoHooks {
    fn on_input(&mut self, _world: &mut EntityWorld, player: PlayerId, input: &[u8]) {
        if input.len() < INPUT_SIZE {
            return;
        }
        let x = f32::from_ne_bytes([input[0], input[1], input[2], input[3]]);
        let y = f32::from_ne_bytes([input[4], input[5], input[6], input[7]]);
        self.axes
            .insert(player, (x.clamp(-1.0, 1.0), y.clamp(-1.0, 1.0)));
    }

    fn on_update(&mut self, world: &mut EntityWorld, id: EntityId) {
        let Some((player, _)) = self.pawns.iter().find(|&(_, &pawn)| pawn == id) else {
            return;
        };
        let Some(&(ax, ay)) = self.axes.get(player) else {
            return;
        };
        if ax == 0.0 && ay == 0.0 {
            return;
        }

        let x = Self::field_f32(world, id, FIELD_X) + ax * MOVE_SPEED * self.dt;
        let y = Self::field_f32(world, id, FIELD_Y) + ay * MOVE_SPEED * self.dt;
        let _ = world.set_field(id, FIELD_X, x);
        let _ = world.set_field(id, FIELD_Y, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncline::{EngineConfig, ServerEngine};

    #[test]
    fn input_moves_the_pawn() {
        let mut engine = ServerEngine::new(
            EngineConfig {
                input_size: INPUT_SIZE,
                ..EngineConfig::default()
            },
            registry(),
        );
        let mut hooks = DemoHooks::new(30);
        let pawn = engine.add_entity(CLASS_CUBE, 1, |_, _| {}).unwrap();
        hooks.bind_pawn(1, pawn);

        let mut input = Vec::new();
        input.extend_from_slice(&1.0f32.to_ne_bytes());
        input.extend_from_slice(&0.0f32.to_ne_bytes());
        hooks.on_input(engine.world_mut(), 1, &input);
        hooks.on_update(engine.world_mut(), pawn);

        let x = DemoHooks::field_f32(engine.world(), pawn, FIELD_X);
        assert!(x > 0.0);
    }
}

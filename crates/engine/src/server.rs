//! Server engine.
//!
//! One instance owns the whole replication state for one game: entity
//! world, player table, pools, clock. Ingress decoding, the logic tick and
//! snapshot building all run on the caller's thread; `update` returns when
//! the consumed ticks are complete.
//!
//! ```text
//! transport -> handle_packet -> input heaps / request queue
//!                                     |
//!                               logic tick (hooks)
//!                                     |
//!                       serializer history -> snapshot builder -> transport
//! ```

use std::collections::VecDeque;

use crate::clock::TickClock;
use crate::descriptor::{ClassFlags, ClassId, ClassRegistry, EntityRole};
use crate::entity::{AddEntityError, EntityId, EntityWorld, NoSuchEntity};
use crate::input::{InputPool, InputTarget, decode_client_input};
use crate::player::{PlayerId, PlayerState, PlayerTable};
use crate::protocol::PacketKind;
use crate::seq::{Tick, lerp_seq};
use crate::snapshot::run_send_tick;
use crate::transport::PeerTransport;

/// Game-side callbacks driven by the logic tick.
pub trait GameHooks {
    /// One pending client request, delivered in arrival order before any
    /// input is processed.
    fn on_request(&mut self, world: &mut EntityWorld, player: PlayerId, data: &[u8]) {
        let _ = (world, player, data);
    }

    /// One consumed input block for this tick.
    fn on_input(&mut self, world: &mut EntityWorld, player: PlayerId, input: &[u8]);

    /// Per-tick update of one entity whose class carries the updateable
    /// marker.
    fn on_update(&mut self, world: &mut EntityWorld, id: EntityId) {
        let _ = (world, id);
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Logic ticks per second.
    pub tick_rate: u32,
    /// Send cadence in ticks, 1 to 3.
    pub send_rate: u8,
    /// First byte of every packet, chosen by the host protocol.
    pub header_byte: u8,
    /// Fixed size of one client input block.
    pub input_size: usize,
    pub max_players: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            send_rate: 1,
            header_byte: 0xAA,
            input_size: 8,
            max_players: 32,
        }
    }
}

pub struct ServerEngine {
    config: EngineConfig,
    clock: TickClock,
    tick: Tick,
    world: EntityWorld,
    players: PlayerTable,
    input_pool: InputPool,
    pending_requests: VecDeque<(PlayerId, Vec<u8>)>,
}

impl ServerEngine {
    pub fn new(config: EngineConfig, classes: ClassRegistry) -> Self {
        let config = EngineConfig {
            send_rate: config.send_rate.clamp(1, 3),
            ..config
        };
        Self {
            clock: TickClock::new(config.tick_rate),
            tick: 0,
            world: EntityWorld::new(classes),
            players: PlayerTable::new(config.max_players),
            input_pool: InputPool::new(config.input_size),
            pending_requests: VecDeque::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn world(&self) -> &EntityWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut EntityWorld {
        &mut self.world
    }

    pub fn players_count(&self) -> usize {
        self.players.len()
    }

    pub fn player_state(&self, id: PlayerId) -> Option<PlayerState> {
        self.players.get(id).map(|p| p.state)
    }

    /// Binds a transport peer to a new player slot. Returns `None` when the
    /// table is full; the caller decides what to tell the peer.
    pub fn add_player(&mut self, peer: Box<dyn PeerTransport>) -> Option<PlayerId> {
        let id = self.players.add(peer)?;
        log::info!("player {id} connected");
        Some(id)
    }

    /// Disconnects a player: their controller (and its pawn) are destroyed,
    /// pending input returns to the pool, the id goes back into rotation.
    pub fn remove_player(&mut self, id: PlayerId) -> bool {
        if self.players.get(id).is_none() {
            return false;
        }
        if let Some(controller) = self.world.controller_of(id) {
            let last_player = self.players.len() == 1;
            self.world.destroy(controller, last_player);
        }
        self.pending_requests.retain(|(player, _)| *player != id);
        self.players.remove(id, &mut self.input_pool);
        if self.players.is_empty() {
            // Nobody left to acknowledge pending destructions.
            self.world.recycle_all_pending();
        }
        log::info!("player {id} removed");
        true
    }

    /// Creates a synced entity and runs its init hook before the first
    /// snapshot can include it.
    pub fn add_entity(
        &mut self,
        class: ClassId,
        owner: PlayerId,
        init: impl FnOnce(&mut EntityWorld, EntityId),
    ) -> Result<EntityId, AddEntityError> {
        let id = self.world.add(class, owner)?;
        init(&mut self.world, id);
        Ok(id)
    }

    /// Creates the controller entity representing a player's will.
    pub fn add_controller(
        &mut self,
        class: ClassId,
        owner: PlayerId,
        init: impl FnOnce(&mut EntityWorld, EntityId),
    ) -> Result<EntityId, AddEntityError> {
        debug_assert!(
            self.world.class(class).is_none_or(|c| c.role == EntityRole::Controller),
            "class {class} is not a controller class"
        );
        self.add_entity(class, owner, init)
    }

    /// Creates (or returns) the unique instance of a singleton class.
    pub fn add_singleton(
        &mut self,
        class: ClassId,
        init: impl FnOnce(&mut EntityWorld, EntityId),
    ) -> Result<EntityId, AddEntityError> {
        if let Some(existing) = self.world.singleton(class) {
            return Ok(existing);
        }
        self.add_entity(class, 0, init)
    }

    pub fn destroy_entity(&mut self, id: EntityId) {
        self.world.destroy(id, self.players.is_empty());
    }

    pub fn set_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> Result<(), NoSuchEntity> {
        self.world.set_parent(child, parent)
    }

    pub fn set_controlled_pawn(
        &mut self,
        controller: EntityId,
        pawn: Option<EntityId>,
    ) -> Result<(), NoSuchEntity> {
        self.world.set_controlled_pawn(controller, pawn)
    }

    /// Ingress entry point: one datagram from `player`'s peer.
    pub fn handle_packet(&mut self, player_id: PlayerId, data: &[u8]) {
        if data.len() < 2 {
            log::warn!("player {player_id}: runt packet ({} bytes)", data.len());
            return;
        }
        if data[0] != self.config.header_byte {
            log::warn!(
                "player {player_id}: bad header byte {:#04x}",
                data[0]
            );
            return;
        }
        let Some(kind) = PacketKind::from_byte(data[1]) else {
            log::warn!("player {player_id}: unknown packet kind {:#04x}", data[1]);
            return;
        };
        let payload = &data[2..];

        match kind {
            PacketKind::ClientInput => self.handle_client_input(player_id, payload),
            PacketKind::ClientRequest => {
                if self.players.get(player_id).is_some() {
                    self.pending_requests.push_back((player_id, payload.to_vec()));
                } else {
                    log::warn!("request from unknown player {player_id}");
                }
            }
            _ => {
                log::warn!(
                    "player {player_id}: egress-only packet kind {:?} received",
                    kind
                );
            }
        }
    }

    fn handle_client_input(&mut self, player_id: PlayerId, payload: &[u8]) {
        let server_tick = self.tick;
        let Some(player) = self.players.get_mut(player_id) else {
            log::warn!("input from unknown player {player_id}");
            return;
        };

        let mut target = InputTarget {
            waiting_for_first_input: player.state == PlayerState::WaitingForFirstInput,
            current_server_tick: &mut player.current_server_tick,
            last_received_tick: &mut player.last_received_tick,
            buffer: &mut player.available_input,
        };
        match decode_client_input(&mut target, server_tick, payload, &mut self.input_pool) {
            Ok(summary) => {
                if summary.first_input {
                    player.state = PlayerState::WaitingForFirstInputProcess;
                }
            }
            Err(err) => {
                // State is unchanged beyond frames decoded before the error.
                log::error!("player {player_id}: dropping input packet: {err}");
            }
        }
    }

    /// Drives the engine. Consumes whole tick quanta from `delta` seconds;
    /// each quantum runs one logic tick and, on send ticks with players
    /// connected, the snapshot builder.
    pub fn update(&mut self, delta: f32, hooks: &mut dyn GameHooks) {
        self.clock.accumulate(delta);
        while self.clock.consume_tick() {
            self.logic_tick(hooks);
            self.tick = self.tick.wrapping_add(1);
            self.world.set_current_tick(self.tick);
            if !self.players.is_empty() && self.tick % self.config.send_rate as Tick == 0 {
                run_send_tick(
                    &mut self.world,
                    &mut self.players,
                    self.config.header_byte,
                    self.config.send_rate,
                    self.tick,
                );
            }
        }
    }

    fn logic_tick(&mut self, hooks: &mut dyn GameHooks) {
        self.world.set_current_tick(self.tick);

        while let Some((player, data)) = self.pending_requests.pop_front() {
            hooks.on_request(&mut self.world, player, &data);
        }

        for player_id in self.players.active_ids() {
            let Some(player) = self.players.get_mut(player_id) else {
                continue;
            };
            if !matches!(
                player.state,
                PlayerState::Active | PlayerState::WaitingForFirstInputProcess
            ) {
                continue;
            }
            let Some(frame) = player.available_input.pop_oldest() else {
                continue;
            };

            player.last_processed_tick = frame.tick;
            player.state_a_tick = frame.state_a;
            player.state_b_tick = frame.state_b;
            player.lerp_time = frame.lerp;
            player.simulated_server_tick =
                lerp_seq(frame.state_a, frame.state_b.wrapping_sub(1), frame.lerp);
            if player.state == PlayerState::WaitingForFirstInputProcess {
                player.state = PlayerState::Active;
            }

            if let Some(block) = frame.data {
                hooks.on_input(&mut self.world, player_id, &block);
                self.input_pool.release(block);
            }
        }

        let updateable: Vec<EntityId> = self
            .world
            .alive_ids()
            .filter(|&id| {
                self.world
                    .get(id)
                    .and_then(|entry| self.world.class(entry.class_id))
                    .is_some_and(|class| class.flags.contains(ClassFlags::UPDATEABLE))
            })
            .collect();
        for id in updateable {
            hooks.on_update(&mut self.world, id);
        }

        self.world.write_all_history(self.tick);
    }
}

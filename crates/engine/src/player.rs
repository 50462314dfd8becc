//! Player slots and lifecycle.
//!
//! Ids are 8-bit, drawn from a FIFO free queue; id 0 stands for the server
//! itself. Slots also live in a compact array iterated by the snapshot
//! builder, maintained by swap-remove with an `array_index` fixup.

use std::collections::VecDeque;

use crate::input::{InputBuffer, InputPool};
use crate::seq::Tick;
use crate::transport::PeerTransport;

pub type PlayerId = u8;

pub const MAX_PLAYERS: usize = 255;
/// Owner id meaning "the server".
pub const SERVER_PLAYER_ID: PlayerId = 0;

/// Replication lifecycle of a connected player.
///
/// ```text
/// RequestBaseline -> WaitingForFirstInput -> WaitingForFirstInputProcess -> Active
/// ```
///
/// A diff overflow past the part limit sends an active player back to
/// `RequestBaseline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    RequestBaseline,
    WaitingForFirstInput,
    WaitingForFirstInputProcess,
    Active,
}

pub struct Player {
    pub id: PlayerId,
    pub array_index: usize,
    pub state: PlayerState,
    pub peer: Box<dyn PeerTransport>,
    /// Older tick of the interpolation pair the client reported last.
    pub state_a_tick: Tick,
    /// Newer tick of the interpolation pair.
    pub state_b_tick: Tick,
    /// Latest server tick the client has confirmed seeing; diffs are
    /// computed against it.
    pub current_server_tick: Tick,
    pub last_received_tick: Tick,
    pub last_processed_tick: Tick,
    pub simulated_server_tick: Tick,
    pub lerp_time: f32,
    pub available_input: InputBuffer,
}

impl Player {
    fn new(id: PlayerId, array_index: usize, peer: Box<dyn PeerTransport>) -> Self {
        Self {
            id,
            array_index,
            state: PlayerState::RequestBaseline,
            peer,
            state_a_tick: 0,
            state_b_tick: 0,
            current_server_tick: 0,
            last_received_tick: 0,
            last_processed_tick: 0,
            simulated_server_tick: 0,
            lerp_time: 0.0,
            available_input: InputBuffer::new(),
        }
    }

    /// Part of the minimal-tick computation and diff sending.
    pub fn is_synchronized(&self) -> bool {
        self.state != PlayerState::RequestBaseline
    }
}

pub struct PlayerTable {
    slots: Vec<Option<Player>>,
    active: Vec<PlayerId>,
    free_ids: VecDeque<PlayerId>,
    max_players: usize,
}

impl PlayerTable {
    pub fn new(max_players: usize) -> Self {
        let max_players = max_players.min(MAX_PLAYERS);
        Self {
            slots: (0..=MAX_PLAYERS).map(|_| None).collect(),
            active: Vec::with_capacity(max_players),
            free_ids: (1..=max_players as PlayerId).collect(),
            max_players,
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.active.len() >= self.max_players
    }

    /// Binds a peer to a fresh slot in `RequestBaseline` state. Returns
    /// `None` when the table is full.
    pub fn add(&mut self, peer: Box<dyn PeerTransport>) -> Option<PlayerId> {
        let id = self.free_ids.pop_front()?;
        let player = Player::new(id, self.active.len(), peer);
        self.active.push(id);
        self.slots[id as usize] = Some(player);
        Some(id)
    }

    /// Frees a slot, compacting the active array and returning the removed
    /// player so the caller can recycle its pending input.
    pub fn remove(&mut self, id: PlayerId, pool: &mut InputPool) -> Option<Player> {
        let mut player = self.slots[id as usize].take()?;
        player.available_input.clear(pool);

        let index = player.array_index;
        self.active.swap_remove(index);
        if let Some(&moved) = self.active.get(index) {
            if let Some(moved_player) = self.slots[moved as usize].as_mut() {
                moved_player.array_index = index;
            }
        }
        self.free_ids.push_back(id);
        Some(player)
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.slots.get(id as usize).and_then(|p| p.as_ref())
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.slots.get_mut(id as usize).and_then(|p| p.as_mut())
    }

    /// Player ids in active-array order, the order snapshots go out in.
    pub fn active_ids(&self) -> Vec<PlayerId> {
        self.active.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.active.iter().filter_map(|&id| self.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryPeer;

    fn peer() -> Box<dyn PeerTransport> {
        Box::new(MemoryPeer::new(1200).0)
    }

    #[test]
    fn add_starts_in_request_baseline() {
        let mut table = PlayerTable::new(8);
        let id = table.add(peer()).unwrap();
        assert_eq!(table.get(id).unwrap().state, PlayerState::RequestBaseline);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn full_table_rejects() {
        let mut table = PlayerTable::new(2);
        table.add(peer()).unwrap();
        table.add(peer()).unwrap();
        assert!(table.add(peer()).is_none());
    }

    #[test]
    fn swap_remove_fixes_array_index() {
        let mut pool = InputPool::new(4);
        let mut table = PlayerTable::new(8);
        let a = table.add(peer()).unwrap();
        let b = table.add(peer()).unwrap();
        let c = table.add(peer()).unwrap();

        table.remove(a, &mut pool);
        // The last player moved into slot 0.
        assert_eq!(table.get(c).unwrap().array_index, 0);
        assert_eq!(table.get(b).unwrap().array_index, 1);
        assert_eq!(table.active_ids(), vec![c, b]);
    }

    #[test]
    fn ids_recycle_fifo() {
        let mut pool = InputPool::new(4);
        let mut table = PlayerTable::new(3);
        let a = table.add(peer()).unwrap();
        let b = table.add(peer()).unwrap();
        table.add(peer()).unwrap();

        table.remove(a, &mut pool);
        table.remove(b, &mut pool);
        assert_eq!(table.add(peer()), Some(a));
        assert_eq!(table.add(peer()), Some(b));
    }
}

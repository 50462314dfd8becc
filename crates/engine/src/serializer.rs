//! Per-entity replication state.
//!
//! One serializer exists for every synced entity id, allocated up front and
//! reused across id generations. It retains the snapshot window
//! `[minimal_tick, current_tick]`, answers baseline and diff requests per
//! player, and owns the entity's pending remote calls.

use std::collections::VecDeque;

use crate::descriptor::{EntityClass, SyncFlags};
use crate::entity::{EntityId, EntityVersion};
use crate::protocol::{RecordKind, put_pod};
use crate::rpc::{RemoteCall, RpcPool};
use crate::seq::{Tick, seq_diff};

/// Outcome of one diff request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffResult {
    /// Nothing was written for this player.
    NotChanged,
    /// A record was written.
    Done,
    /// Destruction is acknowledged by every active player; the id may be
    /// recycled. Nothing was written.
    DoneAndDestroy,
}

#[derive(Debug, Default)]
pub struct StateSerializer {
    class_id: u16,
    owner: u8,
    version: EntityVersion,
    created_tick: Tick,
    live: bool,
    destroyed_at: Option<Tick>,
    history: VecDeque<(Tick, Box<[u8]>)>,
    rpcs: VecDeque<RemoteCall>,
}

impl StateSerializer {
    /// Binds the serializer to a fresh entity generation on this id.
    pub fn init(&mut self, class_id: u16, owner: u8, version: EntityVersion, tick: Tick) {
        self.class_id = class_id;
        self.owner = owner;
        self.version = version;
        self.created_tick = tick;
        self.live = true;
        self.destroyed_at = None;
        self.history.clear();
        debug_assert!(self.rpcs.is_empty());
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn class_id(&self) -> u16 {
        self.class_id
    }

    pub fn version(&self) -> EntityVersion {
        self.version
    }

    pub fn owner(&self) -> u8 {
        self.owner
    }

    pub fn set_owner(&mut self, owner: u8) {
        self.owner = owner;
    }

    pub fn destroyed_at(&self) -> Option<Tick> {
        self.destroyed_at
    }

    pub fn mark_destroyed(&mut self, tick: Tick, pool: &mut RpcPool) {
        self.destroyed_at = Some(tick);
        while let Some(call) = self.rpcs.pop_front() {
            pool.release(call);
        }
    }

    /// Drops all retained state and returns the id to circulation. The
    /// version survives so the next generation increments from it.
    pub fn release(&mut self, pool: &mut RpcPool) {
        self.live = false;
        self.destroyed_at = None;
        self.history.clear();
        while let Some(call) = self.rpcs.pop_front() {
            pool.release(call);
        }
    }

    pub fn queue_rpc(&mut self, call: RemoteCall) {
        self.rpcs.push_back(call);
    }

    pub fn pending_rpcs(&self) -> usize {
        self.rpcs.len()
    }

    /// Commits the field block as the snapshot for `tick`.
    pub fn write_history(&mut self, tick: Tick, block: &[u8]) {
        self.history.push_back((tick, block.into()));
    }

    pub fn snapshot(&self, tick: Tick) -> Option<&[u8]> {
        self.history
            .iter()
            .rev()
            .find(|(t, _)| *t == tick)
            .map(|(_, block)| block.as_ref())
    }

    /// Discards snapshots and remote calls no active player can still ask
    /// for.
    pub fn trim(&mut self, minimal_tick: Tick, pool: &mut RpcPool) {
        while let Some((tick, _)) = self.history.front() {
            if seq_diff(*tick, minimal_tick) < 0 {
                self.history.pop_front();
            } else {
                break;
            }
        }
        while let Some(call) = self.rpcs.front() {
            if seq_diff(minimal_tick, call.tick) > 0 {
                let call = self.rpcs.pop_front().unwrap();
                pool.release(call);
            } else {
                break;
            }
        }
    }

    /// Upper bound on bytes one diff or baseline record of this entity can
    /// occupy, including currently queued remote calls.
    pub fn max_size_hint(&self, class: &EntityClass) -> usize {
        let fields: usize = class.fields.iter().map(|f| f.size + 1).sum();
        let rpcs: usize = self.rpcs.iter().map(|c| c.wire_size()).sum();
        // id + kind + class + version + owner + field section + rpc count
        2 + 1 + 2 + 1 + 1 + fields + 1 + rpcs
    }

    /// Emits the full current state visible to `player`, record-framed the
    /// same way diffs are.
    pub fn make_baseline(
        &self,
        entity_id: EntityId,
        player: u8,
        class: &EntityClass,
        block: &[u8],
        out: &mut Vec<u8>,
    ) {
        self.write_full_record(entity_id, player, class, block, None, out);
    }

    /// Emits this entity's delta from `ack_tick` to `current_tick` for
    /// `player`, or a full/destroy record where the delta cannot apply.
    #[allow(clippy::too_many_arguments)]
    pub fn make_diff(
        &self,
        entity_id: EntityId,
        player: u8,
        class: &EntityClass,
        block: Option<&[u8]>,
        current_tick: Tick,
        minimal_tick: Tick,
        ack_tick: Tick,
        out: &mut Vec<u8>,
    ) -> DiffResult {
        if let Some(destroy_tick) = self.destroyed_at {
            if seq_diff(minimal_tick, destroy_tick) > 0 {
                return DiffResult::DoneAndDestroy;
            }
            if seq_diff(destroy_tick, ack_tick) > 0 && seq_diff(destroy_tick, current_tick) <= 0 {
                out.extend_from_slice(&entity_id.to_ne_bytes());
                out.push(RecordKind::Destroy as u8);
                out.push(self.version);
                return DiffResult::Done;
            }
            return DiffResult::NotChanged;
        }

        let current = match self.snapshot(current_tick).or(block) {
            Some(current) => current,
            None => return DiffResult::NotChanged,
        };

        let base = if seq_diff(self.created_tick, ack_tick) > 0 {
            None
        } else {
            self.snapshot(ack_tick)
        };
        let Some(base) = base else {
            // Player has never seen this generation (or its baseline left
            // the window): resend everything.
            self.write_full_record(entity_id, player, class, current, Some((ack_tick, current_tick)), out);
            return DiffResult::Done;
        };

        let is_owner = player == self.owner;
        let changed: Vec<usize> = class
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| is_owner || !f.flags.contains(SyncFlags::OWNER_ONLY))
            .filter(|(_, f)| {
                current[f.offset..f.offset + f.size] != base[f.offset..f.offset + f.size]
            })
            .map(|(index, _)| index)
            .collect();

        let rpcs = self.rpcs_in_window(player, ack_tick, current_tick);
        if changed.is_empty() && rpcs.is_empty() {
            return DiffResult::NotChanged;
        }

        out.extend_from_slice(&entity_id.to_ne_bytes());
        out.push(RecordKind::Delta as u8);
        out.push(self.version);
        out.push(changed.len() as u8);
        for index in changed {
            let field = &class.fields[index];
            out.push(index as u8);
            out.extend_from_slice(&current[field.offset..field.offset + field.size]);
        }
        Self::write_rpc_section(&rpcs, out);
        DiffResult::Done
    }

    fn write_full_record(
        &self,
        entity_id: EntityId,
        player: u8,
        class: &EntityClass,
        block: &[u8],
        rpc_window: Option<(Tick, Tick)>,
        out: &mut Vec<u8>,
    ) {
        out.extend_from_slice(&entity_id.to_ne_bytes());
        out.push(RecordKind::Full as u8);
        out.extend_from_slice(&self.class_id.to_ne_bytes());
        out.push(self.version);
        out.push(self.owner);

        let is_owner = player == self.owner;
        for field in &class.fields {
            if !is_owner && field.flags.contains(SyncFlags::OWNER_ONLY) {
                continue;
            }
            out.extend_from_slice(&block[field.offset..field.offset + field.size]);
        }

        match rpc_window {
            Some((ack_tick, current_tick)) => {
                let rpcs = self.rpcs_in_window(player, ack_tick, current_tick);
                Self::write_rpc_section(&rpcs, out);
            }
            // Baselines carry no calls; the ack window starts at the
            // baseline tick, past everything queued so far.
            None => out.push(0),
        }
    }

    fn rpcs_in_window(&self, player: u8, ack_tick: Tick, current_tick: Tick) -> Vec<&RemoteCall> {
        self.rpcs
            .iter()
            .filter(|call| {
                seq_diff(call.tick, ack_tick) > 0 && seq_diff(call.tick, current_tick) <= 0
            })
            .filter(|call| call.flags.audience_includes(self.owner, player))
            .collect()
    }

    fn write_rpc_section(rpcs: &[&RemoteCall], out: &mut Vec<u8>) {
        out.push(rpcs.len() as u8);
        for call in rpcs {
            put_pod(out, &call.header());
            out.extend_from_slice(&call.data[..call.payload_len()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EntityRole, FieldDescriptor};
    use crate::rpc::ExecuteFlags;

    fn probe_class() -> EntityClass {
        EntityClass::new(
            "probe",
            EntityRole::Entity,
            vec![FieldDescriptor::new(0, 4), FieldDescriptor::new(4, 2)],
        )
    }

    fn serializer_at(tick: Tick) -> StateSerializer {
        let mut ser = StateSerializer::default();
        ser.init(3, 0, 1, tick);
        ser
    }

    #[test]
    fn history_window_is_exact() {
        let mut ser = serializer_at(0);
        let mut pool = RpcPool::new();

        for tick in 0..6u16 {
            ser.write_history(tick, &[tick as u8; 6]);
        }
        ser.trim(3, &mut pool);

        assert!(ser.snapshot(2).is_none());
        assert!(ser.snapshot(3).is_some());
        assert!(ser.snapshot(5).is_some());
    }

    #[test]
    fn unchanged_entity_writes_nothing() {
        let class = probe_class();
        let mut ser = serializer_at(0);
        ser.write_history(0, &[1, 2, 3, 4, 5, 6]);
        ser.write_history(1, &[1, 2, 3, 4, 5, 6]);

        let mut out = Vec::new();
        let result = ser.make_diff(10, 1, &class, None, 1, 0, 0, &mut out);
        assert_eq!(result, DiffResult::NotChanged);
        assert!(out.is_empty());
    }

    #[test]
    fn changed_field_is_emitted_with_index() {
        let class = probe_class();
        let mut ser = serializer_at(0);
        ser.write_history(0, &[1, 2, 3, 4, 5, 6]);
        ser.write_history(1, &[1, 2, 3, 4, 9, 9]);

        let mut out = Vec::new();
        let result = ser.make_diff(10, 1, &class, None, 1, 0, 0, &mut out);
        assert_eq!(result, DiffResult::Done);

        // id(2) kind(1) version(1) count(1) index(1) value(2) rpc count(1)
        assert_eq!(out.len(), 9);
        assert_eq!(out[2], RecordKind::Delta as u8);
        assert_eq!(out[4], 1); // one changed field
        assert_eq!(out[5], 1); // field index 1
        assert_eq!(&out[6..8], &[9, 9]);
    }

    #[test]
    fn unseen_generation_gets_full_record() {
        let class = probe_class();
        let mut ser = serializer_at(5);
        ser.write_history(5, &[1, 2, 3, 4, 5, 6]);

        let mut out = Vec::new();
        let result = ser.make_diff(10, 1, &class, None, 5, 5, 3, &mut out);
        assert_eq!(result, DiffResult::Done);
        assert_eq!(out[2], RecordKind::Full as u8);
    }

    #[test]
    fn destroy_record_until_all_acked() {
        let class = probe_class();
        let mut pool = RpcPool::new();
        let mut ser = serializer_at(0);
        ser.write_history(0, &[0; 6]);
        ser.mark_destroyed(4, &mut pool);

        let mut out = Vec::new();
        // Player acked tick 2, minimal tick 2: destroy record goes out.
        let result = ser.make_diff(10, 1, &class, None, 5, 2, 2, &mut out);
        assert_eq!(result, DiffResult::Done);
        assert_eq!(out[2], RecordKind::Destroy as u8);

        // Every player past the destruction: recyclable, nothing written.
        out.clear();
        let result = ser.make_diff(10, 1, &class, None, 6, 5, 5, &mut out);
        assert_eq!(result, DiffResult::DoneAndDestroy);
        assert!(out.is_empty());
    }

    #[test]
    fn rpc_window_and_audience() {
        let class = probe_class();
        let mut ser = serializer_at(0);
        ser.set_owner(2);
        ser.write_history(0, &[0; 6]);
        ser.write_history(1, &[0; 6]);

        let mut call = RemoteCall::default();
        call.tick = 1;
        call.rpc_id = 7;
        call.flags = ExecuteFlags::OWNER_ONLY;
        call.element_size = 1;
        call.element_count = 2;
        call.data = vec![0xAA, 0xBB];
        ser.queue_rpc(call);

        // Non-owner sees nothing.
        let mut out = Vec::new();
        let result = ser.make_diff(10, 1, &class, None, 1, 0, 0, &mut out);
        assert_eq!(result, DiffResult::NotChanged);

        // Owner gets a delta record with zero fields and one call.
        let result = ser.make_diff(10, 2, &class, None, 1, 0, 0, &mut out);
        assert_eq!(result, DiffResult::Done);
        assert_eq!(out[4], 0); // no changed fields
        assert_eq!(out[5], 1); // one rpc
    }

    #[test]
    fn rpc_retention_follows_minimal_tick() {
        let mut pool = RpcPool::new();
        let mut ser = serializer_at(0);

        let mut call = pool.acquire();
        call.tick = 3;
        ser.queue_rpc(call);

        ser.trim(3, &mut pool);
        assert_eq!(ser.pending_rpcs(), 1);

        ser.trim(4, &mut pool);
        assert_eq!(ser.pending_rpcs(), 0);
        assert_eq!(pool.free_len(), 1);
    }
}

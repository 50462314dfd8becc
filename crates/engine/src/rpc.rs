//! Remote calls bound to entity state.
//!
//! A call is tick-tagged when queued and rides the diff stream of every
//! player whose acknowledged tick predates it. Packets come from a FIFO
//! free-list pool and go back with an explicit release.

use std::collections::VecDeque;

use bitflags::bitflags;

use crate::protocol::RpcHeader;
use crate::seq::Tick;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecuteFlags: u8 {
        /// Deliver on the reliable channel semantics (clients treat a
        /// missed unreliable call as droppable).
        const SEND_RELIABLE = 1 << 0;
        /// Only the owning player receives the call.
        const OWNER_ONLY = 1 << 1;
        /// Everyone but the owning player receives the call.
        const SKIP_OWNER = 1 << 2;
    }
}

impl ExecuteFlags {
    /// True if a player should receive a call carrying these flags.
    pub fn audience_includes(self, owner: u8, player: u8) -> bool {
        if self.contains(Self::OWNER_ONLY) {
            player == owner
        } else if self.contains(Self::SKIP_OWNER) {
            player != owner
        } else {
            true
        }
    }
}

#[derive(Debug, Default)]
pub struct RemoteCall {
    pub tick: Tick,
    pub rpc_id: u8,
    pub flags: ExecuteFlags,
    pub element_size: u16,
    pub element_count: u16,
    pub data: Vec<u8>,
}

impl RemoteCall {
    /// Payload length as declared by the element layout.
    pub fn payload_len(&self) -> usize {
        self.element_size as usize * self.element_count as usize
    }

    /// Bytes this call occupies in a diff stream.
    pub fn wire_size(&self) -> usize {
        RpcHeader::SIZE + self.payload_len()
    }

    pub fn header(&self) -> RpcHeader {
        RpcHeader {
            tick: self.tick,
            rpc_id: self.rpc_id,
            flags: self.flags.bits(),
            element_size: self.element_size,
            element_count: self.element_count,
        }
    }
}

/// FIFO free list of call packets, owned by the engine and touched only on
/// the engine thread.
#[derive(Debug, Default)]
pub struct RpcPool {
    free: VecDeque<RemoteCall>,
}

impl RpcPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuses a pooled packet before allocating a fresh one.
    pub fn acquire(&mut self) -> RemoteCall {
        let mut call = self.free.pop_front().unwrap_or_default();
        call.data.clear();
        call
    }

    pub fn release(&mut self, call: RemoteCall) {
        self.free.push_back(call);
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_filtering() {
        let all = ExecuteFlags::empty();
        assert!(all.audience_includes(1, 1));
        assert!(all.audience_includes(1, 2));

        let owner_only = ExecuteFlags::OWNER_ONLY;
        assert!(owner_only.audience_includes(1, 1));
        assert!(!owner_only.audience_includes(1, 2));

        let skip_owner = ExecuteFlags::SKIP_OWNER | ExecuteFlags::SEND_RELIABLE;
        assert!(!skip_owner.audience_includes(1, 1));
        assert!(skip_owner.audience_includes(1, 2));
    }

    #[test]
    fn pool_reuses_packets() {
        let mut pool = RpcPool::new();

        let mut call = pool.acquire();
        call.data.extend_from_slice(&[1, 2, 3]);
        pool.release(call);
        assert_eq!(pool.free_len(), 1);

        let reused = pool.acquire();
        assert!(reused.data.is_empty());
        assert_eq!(pool.free_len(), 0);
    }

    #[test]
    fn wire_size_counts_header_and_payload() {
        let call = RemoteCall {
            tick: 4,
            rpc_id: 9,
            flags: ExecuteFlags::SEND_RELIABLE,
            element_size: 4,
            element_count: 3,
            data: vec![0; 12],
        };
        assert_eq!(call.payload_len(), 12);
        assert_eq!(call.wire_size(), RpcHeader::SIZE + 12);
    }
}

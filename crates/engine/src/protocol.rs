//! Wire protocol layout.
//!
//! Every engine packet starts with the caller-chosen header byte followed by
//! a packet kind byte. Fixed headers are `#[repr(C, packed)]` and emitted in
//! host byte order; server and client must agree on architecture.
//!
//! ```text
//! BaselineSync  [user][kind][BaselineHeader tail][lz4 body]        reliable
//! DiffSync      [user][kind][part][tick][payload fragment]         unreliable
//! DiffSyncLast  [user][kind][part][tick][payload][LastPartData]    unreliable
//! ClientInput   [user][kind][first tick][InputHeader + block]...   ingress
//! ClientRequest [user][kind][opaque body]                          ingress
//! ```

use bytemuck::{Pod, Zeroable};

/// Engine packet kinds, one byte after the user header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    ClientInput = 1,
    ClientRequest = 2,
    BaselineSync = 3,
    DiffSync = 4,
    DiffSyncLast = 5,
}

impl PacketKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::ClientInput),
            2 => Some(Self::ClientRequest),
            3 => Some(Self::BaselineSync),
            4 => Some(Self::DiffSync),
            5 => Some(Self::DiffSyncLast),
            _ => None,
        }
    }
}

/// Header of a reliable baseline packet. The body that follows is the
/// LZ4-compressed concatenation of full entity records; `original_length`
/// is the body size before compression.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct BaselineHeader {
    pub user_header: u8,
    pub packet_type: u8,
    pub original_length: u32,
    pub tick: u16,
    pub player_id: u8,
    pub send_rate: u8,
}

impl BaselineHeader {
    pub const SIZE: usize = 10;
}

/// Header of one unreliable diff part. Parts of a tick share `tick` and are
/// ordered by `part`; the terminal part is flagged by the packet kind.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct DiffPartHeader {
    pub user_header: u8,
    pub packet_type: u8,
    pub part: u8,
    pub tick: u16,
}

impl DiffPartHeader {
    pub const SIZE: usize = 5;
}

/// Trailer of the terminal diff part, echoing the server's input cursors.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct LastPartData {
    pub last_processed_tick: u16,
    pub last_received_tick: u16,
    pub mtu: u16,
}

impl LastPartData {
    pub const SIZE: usize = 6;
}

/// Per-frame header inside a `ClientInput` packet.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct InputHeader {
    pub state_a: u16,
    pub state_b: u16,
    pub lerp: f32,
}

impl InputHeader {
    pub const SIZE: usize = 8;
}

/// Wire header of one remote call attached to an entity record.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct RpcHeader {
    pub tick: u16,
    pub rpc_id: u8,
    pub flags: u8,
    pub element_size: u16,
    pub element_count: u16,
}

impl RpcHeader {
    pub const SIZE: usize = 8;
}

/// Kind byte of one entity record inside a baseline or diff body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Full = 0,
    Delta = 1,
    Destroy = 2,
}

impl RecordKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Full),
            1 => Some(Self::Delta),
            2 => Some(Self::Destroy),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("packet truncated: wanted {wanted} more bytes, {left} left")]
    Truncated { wanted: usize, left: usize },
    #[error("unknown packet kind {0:#04x}")]
    UnknownKind(u8),
}

/// Appends a packed header to an outgoing buffer.
#[inline]
pub fn put_pod<T: Pod>(out: &mut Vec<u8>, value: &T) {
    out.extend_from_slice(bytemuck::bytes_of(value));
}

/// Forward-only reader over an ingress packet body.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Truncated {
                wanted: len,
                left: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.take(2)?;
        Ok(u16::from_ne_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_pod<T: Pod>(&mut self) -> Result<T, WireError> {
        let bytes = self.take(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sizes_are_packed() {
        assert_eq!(size_of::<BaselineHeader>(), BaselineHeader::SIZE);
        assert_eq!(size_of::<DiffPartHeader>(), DiffPartHeader::SIZE);
        assert_eq!(size_of::<LastPartData>(), LastPartData::SIZE);
        assert_eq!(size_of::<InputHeader>(), InputHeader::SIZE);
        assert_eq!(size_of::<RpcHeader>(), RpcHeader::SIZE);
    }

    #[test]
    fn pod_roundtrip_through_bytes() {
        let header = DiffPartHeader {
            user_header: 0xAB,
            packet_type: PacketKind::DiffSync as u8,
            part: 3,
            tick: 777,
        };

        let mut out = Vec::new();
        put_pod(&mut out, &header);
        assert_eq!(out.len(), DiffPartHeader::SIZE);

        let mut reader = ByteReader::new(&out);
        let back: DiffPartHeader = reader.read_pod().unwrap();
        assert_eq!({ back.tick }, 777);
        assert_eq!(back.part, 3);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn reader_rejects_truncation() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert_eq!(reader.read_u16().unwrap(), u16::from_ne_bytes([1, 2]));
        assert!(reader.read_u16().is_err());
    }

    #[test]
    fn packet_kind_bytes() {
        for kind in [
            PacketKind::ClientInput,
            PacketKind::ClientRequest,
            PacketKind::BaselineSync,
            PacketKind::DiffSync,
            PacketKind::DiffSyncLast,
        ] {
            assert_eq!(PacketKind::from_byte(kind as u8), Some(kind));
        }
        assert_eq!(PacketKind::from_byte(0), None);
        assert_eq!(PacketKind::from_byte(99), None);
    }
}

pub mod clock;
pub mod descriptor;
pub mod entity;
pub mod input;
pub mod player;
pub mod protocol;
pub mod rpc;
pub mod seq;
pub mod serializer;
pub mod server;
pub mod snapshot;
pub mod transport;

pub use clock::TickClock;
pub use descriptor::{
    ClassFlags, ClassId, ClassRegistry, EntityClass, EntityRole, FieldDescriptor, SyncFlags,
};
pub use entity::{
    AddEntityError, EntityId, EntityVersion, EntityWorld, FIRST_ENTITY_ID, INVALID_ENTITY_ID,
    MAX_SYNCED_ENTITIES, NoSuchEntity,
};
pub use input::{
    InputBuffer, InputError, InputFrame, MAX_STORED_INPUTS, decode_delta, encode_delta,
    min_delta_size,
};
pub use player::{MAX_PLAYERS, PlayerId, PlayerState, SERVER_PLAYER_ID};
pub use protocol::{
    BaselineHeader, ByteReader, DiffPartHeader, InputHeader, LastPartData, PacketKind, RecordKind,
    RpcHeader, WireError,
};
pub use rpc::{ExecuteFlags, RemoteCall};
pub use seq::{Tick, lerp_seq, seq_diff, seq_newer};
pub use serializer::{DiffResult, StateSerializer};
pub use server::{EngineConfig, GameHooks, ServerEngine};
pub use snapshot::MAX_PARTS;
pub use transport::{DeliveryMethod, MemoryOutbox, MemoryPeer, PeerTransport, SentPacket};

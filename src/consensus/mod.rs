//! The pluggable consensus core: a minimal single-threaded Raft
//! implementation that the node driver (`crate::driver`) owns exclusively
//! and drives through `tick`/`step`/`propose` and the `ready`/`advance`
//! handshake. See `core::RaftCore` for the algorithm and `types` for the
//! wire/log types shared with the WAL and transport layers.

mod core;
mod storage;
mod types;

pub use self::core::RaftCore;
pub use storage::MemoryStorage;
pub use types::{
    ConfChange, ConfChangeType, ConfState, Entry, EntryKind, HardState, Message, MessageType,
    Ready, Role, Snapshot, SnapshotMetadata, SnapshotStatus, SoftState,
};

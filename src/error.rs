// Crate-wide error type.
//
// One flat enum covering every fallible surface in the driver: WAL I/O,
// snapshot I/O, transport, and consensus wiring. Kept flat rather than
// nested per-module types so callers at the driver's readiness loop can
// match on a single `NodeError` to decide whether a failure is transient
// (log and continue) or fatal (emit on the error channel and shut down).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wal: {0}")]
    Wal(String),

    #[error("wal is fatally corrupted and cannot be repaired: {0}")]
    WalFatal(String),

    #[error("snapshot: {0}")]
    Snapshot(String),

    #[error("no snapshot available")]
    NoSnapshot,

    #[error("transport: {0}")]
    Transport(String),

    #[error("transport is fatally broken: {0}")]
    TransportFatal(String),

    #[error("this node has been removed from the cluster")]
    MemberRemoved,

    #[error("cluster id mismatch: local={local:#x} remote={remote:#x}")]
    ClusterIdMismatch { local: u64, remote: u64 },

    #[error("peer not found: {0:#x}")]
    UnknownPeer(u64),

    #[error("invalid cluster descriptor: {0}")]
    InvalidClusterDescriptor(String),

    #[error("crc mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("node is stopped")]
    Stopped,

    #[error("not leader (known leader: {0:#x})")]
    NotLeader(u64),

    #[error("proposal queue is full")]
    ProposalQueueFull,

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<bincode::error::EncodeError> for NodeError {
    fn from(e: bincode::error::EncodeError) -> Self {
        NodeError::Encode(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for NodeError {
    fn from(e: bincode::error::DecodeError) -> Self {
        NodeError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;

//! The node driver: wires the consensus core to durable storage and the
//! network. See `node::NodeDriver` for the readiness loop and
//! `handle::NodeHandle` for the propose/commit/error interface a state
//! machine consumes.

mod handle;
mod node;

pub use handle::{Commit, NodeHandle, Proposer};
pub use node::{NodeDriver, SnapshotSource};

//! Graph node model and evaluation.
//!
//! Nodes live in a [`NodeArena`] and refer to each other through
//! [`NodeId`]s. Parents are ordered (they are the arguments of the node's
//! step); children are back-edges kept for fan-out counting and rewiring.

mod arena;
mod node;
mod pull;

pub use arena::NodeArena;
pub use node::{GraphNode, NodeId};
pub use pull::DATASET_SCOPE_ID;

pub(crate) use pull::{PullError, Puller};

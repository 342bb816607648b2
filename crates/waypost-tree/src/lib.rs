//! Waypost behavior tree engine.
//!
//! Turns a mission's step sequence into an executable, resumable tree of
//! nodes. The crate provides:
//! - the closed set of node variants and their execution state machine
//!   ([`Node`], [`NodeKind`], [`NodeState`])
//! - the capability traits leaf actions invoke ([`ActionNode`], [`RobotApi`])
//! - builders translating steps into nodes ([`NodeFromStepBuilder`],
//!   [`TreeBuilder`], [`DefaultTreeBuilder`])
//! - the [`NodeTypeRegistry`] and [`NodeSnapshot`] used to reconstruct
//!   in-flight trees from persisted state

mod action;
mod builder;
mod error;
mod node;
mod registry;
mod snapshot;

pub use action::{ActionNode, BuildContext, EffectError, RobotApi};
pub use builder::{DefaultTreeBuilder, NodeFromStepBuilder, StepHandler, TreeBuilder};
pub use error::{BuildError, SnapshotError};
pub use node::{Node, NodeKind, NodeState, ParallelPolicy};
pub use registry::{ActionConstructor, NodeTypeRegistry};
pub use snapshot::NodeSnapshot;

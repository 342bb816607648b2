//! Catalog of action node constructors.
//!
//! The registry maps an action's type tag to a constructor so trees,
//! including custom node kinds, can be reconstructed from persisted
//! snapshots. It is an explicit object with an explicit lifecycle: created at
//! startup, populated by registration calls, read during deserialization.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::action::{
  ActionNode, BuildContext, NamedWaypointAction, PoseWaypointAction, RunActionAction,
  SetDataAction, WaitAction,
};
use crate::error::SnapshotError;

/// Builds an action node from its persisted parameters.
pub type ActionConstructor =
  Arc<dyn Fn(&BuildContext, &Value) -> Result<Box<dyn ActionNode>, SnapshotError> + Send + Sync>;

pub struct NodeTypeRegistry {
  constructors: HashMap<String, ActionConstructor>,
}

impl NodeTypeRegistry {
  /// An empty registry. Most callers want [`NodeTypeRegistry::with_builtin_types`].
  pub fn new() -> Self {
    Self {
      constructors: HashMap::new(),
    }
  }

  /// A registry pre-loaded with every built-in action type.
  pub fn with_builtin_types() -> Self {
    let mut registry = Self::new();
    registry.register("set_data", SetDataAction::from_params);
    registry.register("pose_waypoint", PoseWaypointAction::from_params);
    registry.register("named_waypoint", NamedWaypointAction::from_params);
    registry.register("run_action", RunActionAction::from_params);
    registry.register("wait", WaitAction::from_params);
    registry
  }

  /// Register a constructor for an action type tag, replacing any previous
  /// registration for the same tag.
  pub fn register<F>(&mut self, tag: impl Into<String>, constructor: F)
  where
    F: Fn(&BuildContext, &Value) -> Result<Box<dyn ActionNode>, SnapshotError>
      + Send
      + Sync
      + 'static,
  {
    self.constructors.insert(tag.into(), Arc::new(constructor));
  }

  pub fn contains(&self, tag: &str) -> bool {
    self.constructors.contains_key(tag)
  }

  pub(crate) fn construct(
    &self,
    tag: &str,
    ctx: &BuildContext,
    params: &Value,
  ) -> Result<Box<dyn ActionNode>, SnapshotError> {
    let constructor = self
      .constructors
      .get(tag)
      .ok_or_else(|| SnapshotError::UnknownNodeType {
        tag: tag.to_string(),
      })?;
    constructor(ctx, params)
  }
}

impl Default for NodeTypeRegistry {
  fn default() -> Self {
    Self::with_builtin_types()
  }
}

//! Serialized tree structure and state.
//!
//! A [`NodeSnapshot`] records one node as `{tag, state, params, children}`.
//! Composite tags (`sequence`, `parallel`, `retry`, `timeout`) are engine
//! built-ins; every other tag is an action type resolved through the
//! [`NodeTypeRegistry`] when the tree is reconstructed.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::action::BuildContext;
use crate::error::SnapshotError;
use crate::node::{Node, NodeKind, NodeState, ParallelPolicy};
use crate::registry::NodeTypeRegistry;

const TAG_SEQUENCE: &str = "sequence";
const TAG_PARALLEL: &str = "parallel";
const TAG_RETRY: &str = "retry";
const TAG_TIMEOUT: &str = "timeout";

/// A node and its execution state as persisted in a mission snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
  pub tag: String,
  pub state: NodeState,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub params: Value,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
  /// The deepest node recorded as Failed, if any. This identifies the
  /// step/effect that sank the mission.
  pub fn find_failed(&self) -> Option<&NodeSnapshot> {
    if self.state != NodeState::Failed {
      return None;
    }
    self
      .children
      .iter()
      .find_map(NodeSnapshot::find_failed)
      .or(Some(self))
  }

  /// Record nodes interrupted by a pause as still Running.
  ///
  /// A pause cancels the tree cooperatively, so interrupted nodes settle as
  /// Cancelled even though the mission is only paused. Rewriting them to
  /// Running keeps the snapshot honest about in-flight work; loading demotes
  /// Running to Idle so the work is re-invoked.
  pub fn mark_interrupted(&mut self) {
    match self.state {
      NodeState::Running | NodeState::Cancelled => {
        self.state = NodeState::Running;
        for child in &mut self.children {
          child.mark_interrupted();
        }
      }
      _ => {}
    }
  }

  /// Whether two snapshots describe the same tree shape (tags and arity),
  /// ignoring states and parameters.
  pub fn structure_matches(&self, other: &NodeSnapshot) -> bool {
    self.tag == other.tag
      && self.children.len() == other.children.len()
      && self
        .children
        .iter()
        .zip(&other.children)
        .all(|(a, b)| a.structure_matches(b))
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct ParallelParams {
  policy: ParallelPolicy,
  #[serde(default = "default_fail_fast")]
  fail_fast: bool,
}

fn default_fail_fast() -> bool {
  true
}

#[derive(Debug, Serialize, Deserialize)]
struct RetryParams {
  max_attempts: u32,
  #[serde(default)]
  used: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct TimeoutParams {
  timeout_ms: u64,
}

impl Node {
  /// Serialize this subtree, structure and state.
  pub fn snapshot(&self) -> NodeSnapshot {
    let (tag, params) = match &self.kind {
      NodeKind::Action(action) => (action.type_tag().to_string(), action.params()),
      NodeKind::Sequence(_) => (TAG_SEQUENCE.to_string(), Value::Null),
      NodeKind::Parallel {
        policy, fail_fast, ..
      } => (
        TAG_PARALLEL.to_string(),
        json!({ "policy": policy, "fail_fast": fail_fast }),
      ),
      NodeKind::Retry {
        max_attempts, used, ..
      } => (
        TAG_RETRY.to_string(),
        json!({ "max_attempts": max_attempts, "used": used }),
      ),
      NodeKind::Timeout { timeout_ms, .. } => {
        (TAG_TIMEOUT.to_string(), json!({ "timeout_ms": timeout_ms }))
      }
    };

    NodeSnapshot {
      tag,
      state: self.state,
      label: self.label.clone(),
      error: self.error.clone(),
      params,
      children: self.children().iter().map(Node::snapshot).collect(),
    }
  }

  /// Reconstruct a subtree from a snapshot.
  ///
  /// Running nodes are demoted to Idle so their effects are re-invoked when
  /// execution resumes; all other states are restored verbatim.
  pub fn from_snapshot(
    snapshot: &NodeSnapshot,
    registry: &NodeTypeRegistry,
    ctx: &BuildContext,
  ) -> Result<Node, SnapshotError> {
    let state = match snapshot.state {
      NodeState::Running => NodeState::Idle,
      state => state,
    };

    let kind = match snapshot.tag.as_str() {
      TAG_SEQUENCE => NodeKind::Sequence(restore_children(snapshot, registry, ctx)?),
      TAG_PARALLEL => {
        let params: ParallelParams = decode_params(&snapshot.tag, &snapshot.params)?;
        NodeKind::Parallel {
          policy: params.policy,
          fail_fast: params.fail_fast,
          children: restore_children(snapshot, registry, ctx)?,
        }
      }
      TAG_RETRY => {
        let params: RetryParams = decode_params(&snapshot.tag, &snapshot.params)?;
        NodeKind::Retry {
          max_attempts: params.max_attempts,
          used: params.used,
          child: Box::new(restore_only_child(snapshot, registry, ctx)?),
        }
      }
      TAG_TIMEOUT => {
        let params: TimeoutParams = decode_params(&snapshot.tag, &snapshot.params)?;
        NodeKind::Timeout {
          timeout_ms: params.timeout_ms,
          child: Box::new(restore_only_child(snapshot, registry, ctx)?),
        }
      }
      tag => NodeKind::Action(registry.construct(tag, ctx, &snapshot.params)?),
    };

    Ok(Node {
      label: snapshot.label.clone(),
      state,
      error: snapshot.error.clone(),
      kind,
    })
  }
}

fn restore_children(
  snapshot: &NodeSnapshot,
  registry: &NodeTypeRegistry,
  ctx: &BuildContext,
) -> Result<Vec<Node>, SnapshotError> {
  snapshot
    .children
    .iter()
    .map(|child| Node::from_snapshot(child, registry, ctx))
    .collect()
}

fn restore_only_child(
  snapshot: &NodeSnapshot,
  registry: &NodeTypeRegistry,
  ctx: &BuildContext,
) -> Result<Node, SnapshotError> {
  if snapshot.children.len() != 1 {
    return Err(SnapshotError::MalformedParams {
      tag: snapshot.tag.clone(),
      message: format!("expects exactly one child, found {}", snapshot.children.len()),
    });
  }
  Node::from_snapshot(&snapshot.children[0], registry, ctx)
}

fn decode_params<T: serde::de::DeserializeOwned>(
  tag: &str,
  params: &Value,
) -> Result<T, SnapshotError> {
  serde_json::from_value(params.clone()).map_err(|e| SnapshotError::MalformedParams {
    tag: tag.to_string(),
    message: e.to_string(),
  })
}

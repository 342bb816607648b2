//! Behavior tree nodes and their execution state machine.
//!
//! A tree is built once per mission and never restructured; only node states
//! mutate during execution. [`Node::execute`] drives a node to a terminal
//! state, suspending only inside action leaves. Terminal states are
//! absorbing: re-invoking `execute` on a settled node returns the stored
//! state without side effects, which is what makes resumption probing cheap.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::action::ActionNode;

/// Execution state of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
  Idle,
  Running,
  Succeeded,
  Failed,
  Cancelled,
}

impl NodeState {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      NodeState::Succeeded | NodeState::Failed | NodeState::Cancelled
    )
  }
}

/// Success policy for a parallel node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPolicy {
  /// Every child must succeed.
  All,
  /// One succeeding child succeeds the parallel.
  Any,
  /// At least this many children must succeed.
  Quorum(usize),
}

/// The closed set of node variants.
///
/// The execution algorithm handles every variant exhaustively; custom
/// behavior enters only through [`ActionNode`] implementations.
pub enum NodeKind {
  Action(Box<dyn ActionNode>),
  Sequence(Vec<Node>),
  Parallel {
    policy: ParallelPolicy,
    fail_fast: bool,
    children: Vec<Node>,
  },
  Retry {
    max_attempts: u32,
    used: u32,
    child: Box<Node>,
  },
  Timeout {
    timeout_ms: u64,
    child: Box<Node>,
  },
}

impl std::fmt::Debug for NodeKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      NodeKind::Action(action) => {
        f.debug_tuple("Action").field(&action.type_tag()).finish()
      }
      NodeKind::Sequence(children) => {
        f.debug_tuple("Sequence").field(children).finish()
      }
      NodeKind::Parallel {
        policy,
        fail_fast,
        children,
      } => f
        .debug_struct("Parallel")
        .field("policy", policy)
        .field("fail_fast", fail_fast)
        .field("children", children)
        .finish(),
      NodeKind::Retry {
        max_attempts,
        used,
        child,
      } => f
        .debug_struct("Retry")
        .field("max_attempts", max_attempts)
        .field("used", used)
        .field("child", child)
        .finish(),
      NodeKind::Timeout { timeout_ms, child } => f
        .debug_struct("Timeout")
        .field("timeout_ms", timeout_ms)
        .field("child", child)
        .finish(),
    }
  }
}

impl std::fmt::Debug for Node {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Node")
      .field("label", &self.label)
      .field("state", &self.state)
      .field("error", &self.error)
      .field("kind", &self.kind)
      .finish()
  }
}

/// One unit of the executable behavior tree.
pub struct Node {
  pub(crate) label: Option<String>,
  pub(crate) state: NodeState,
  pub(crate) error: Option<String>,
  pub(crate) kind: NodeKind,
}

impl Node {
  pub fn action(label: impl Into<String>, action: Box<dyn ActionNode>) -> Self {
    Self::idle(Some(label.into()), NodeKind::Action(action))
  }

  pub fn sequence(label: Option<String>, children: Vec<Node>) -> Self {
    Self::idle(label, NodeKind::Sequence(children))
  }

  pub fn parallel(policy: ParallelPolicy, fail_fast: bool, children: Vec<Node>) -> Self {
    Self::idle(
      None,
      NodeKind::Parallel {
        policy,
        fail_fast,
        children,
      },
    )
  }

  pub fn retry(max_attempts: u32, child: Node) -> Self {
    Self::idle(
      None,
      NodeKind::Retry {
        max_attempts,
        used: 0,
        child: Box::new(child),
      },
    )
  }

  pub fn timeout(timeout_ms: u64, child: Node) -> Self {
    Self::idle(
      None,
      NodeKind::Timeout {
        timeout_ms,
        child: Box::new(child),
      },
    )
  }

  pub(crate) fn idle(label: Option<String>, kind: NodeKind) -> Self {
    Self {
      label,
      state: NodeState::Idle,
      error: None,
      kind,
    }
  }

  pub fn state(&self) -> NodeState {
    self.state
  }

  pub fn label(&self) -> Option<&str> {
    self.label.as_deref()
  }

  /// Error recorded when this node settled as Failed.
  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  pub fn kind(&self) -> &NodeKind {
    &self.kind
  }

  pub fn children(&self) -> &[Node] {
    match &self.kind {
      NodeKind::Action(_) => &[],
      NodeKind::Sequence(children) | NodeKind::Parallel { children, .. } => children,
      NodeKind::Retry { child, .. } | NodeKind::Timeout { child, .. } => {
        std::slice::from_ref(child.as_ref())
      }
    }
  }

  /// Reset this subtree to Idle for a fresh attempt.
  pub(crate) fn reset(&mut self) {
    self.state = NodeState::Idle;
    self.error = None;
    match &mut self.kind {
      NodeKind::Action(_) => {}
      NodeKind::Sequence(children) | NodeKind::Parallel { children, .. } => {
        for child in children {
          child.reset();
        }
      }
      NodeKind::Retry { used, child, .. } => {
        *used = 0;
        child.reset();
      }
      NodeKind::Timeout { child, .. } => child.reset(),
    }
  }

  /// Drive this node to a terminal state.
  ///
  /// Re-invoking on an already-terminal node is a no-op returning the stored
  /// state. Suspension occurs only inside action leaves; composite
  /// bookkeeping never awaits anything but its children.
  pub fn execute(&mut self, cancel: CancellationToken) -> BoxFuture<'_, NodeState> {
    Box::pin(async move {
      if self.state.is_terminal() {
        return self.state;
      }
      self.state = NodeState::Running;

      let state = match &mut self.kind {
        NodeKind::Action(action) => {
          if cancel.is_cancelled() {
            NodeState::Cancelled
          } else {
            debug!(
              label = self.label.as_deref().unwrap_or(""),
              tag = action.type_tag(),
              "action_started"
            );
            tokio::select! {
              result = action.invoke() => match result {
                Ok(()) => NodeState::Succeeded,
                Err(e) => {
                  self.error = Some(e.to_string());
                  NodeState::Failed
                }
              },
              _ = cancel.cancelled() => NodeState::Cancelled,
            }
          }
        }
        NodeKind::Sequence(children) => execute_sequence(children, &cancel).await,
        NodeKind::Parallel {
          policy,
          fail_fast,
          children,
        } => execute_parallel(*policy, *fail_fast, children, &cancel).await,
        NodeKind::Retry {
          max_attempts,
          used,
          child,
        } => loop {
          match child.execute(cancel.clone()).await {
            NodeState::Failed if *used < *max_attempts => {
              *used += 1;
              debug!(attempt = *used, max_attempts = *max_attempts, "retrying after failure");
              child.reset();
            }
            state => break state,
          }
        },
        NodeKind::Timeout { timeout_ms, child } => {
          let child_cancel = cancel.child_token();
          let sleep = tokio::time::sleep(Duration::from_millis(*timeout_ms));
          tokio::pin!(sleep);
          let mut timed_out = false;

          let state = {
            let mut running = child.execute(child_cancel.clone());
            loop {
              tokio::select! {
                state = &mut running => break state,
                _ = &mut sleep, if !timed_out => {
                  timed_out = true;
                  child_cancel.cancel();
                }
              }
            }
          };

          if timed_out {
            self.error = Some(format!("timed out after {}ms", timeout_ms));
            NodeState::Failed
          } else {
            state
          }
        }
      };

      self.state = state;
      debug!(
        label = self.label.as_deref().unwrap_or(""),
        state = ?state,
        "node_settled"
      );
      state
    })
  }
}

/// Execute children strictly in order; the first child settling Failed or
/// Cancelled stops the sequence, and later children are never started.
async fn execute_sequence(children: &mut [Node], cancel: &CancellationToken) -> NodeState {
  for child in children.iter_mut() {
    match child.execute(cancel.clone()).await {
      NodeState::Succeeded => {}
      state => return state,
    }
  }
  NodeState::Succeeded
}

/// Run all non-terminal children concurrently under a shared child token and
/// aggregate their terminal states per the policy. Children that were already
/// terminal on entry count toward the tally.
async fn execute_parallel(
  policy: ParallelPolicy,
  fail_fast: bool,
  children: &mut [Node],
  cancel: &CancellationToken,
) -> NodeState {
  let total = children.len();
  if total == 0 {
    return NodeState::Succeeded;
  }

  let mut succeeded = 0usize;
  let mut failed = 0usize;
  let mut cancelled = 0usize;
  for child in children.iter() {
    match child.state() {
      NodeState::Succeeded => succeeded += 1,
      NodeState::Failed => failed += 1,
      NodeState::Cancelled => cancelled += 1,
      _ => {}
    }
  }

  let child_cancel = cancel.child_token();
  let mut decided: Option<NodeState> = None;

  {
    let mut pending: FuturesUnordered<_> = children
      .iter_mut()
      .filter(|child| !child.state().is_terminal())
      .map(|child| child.execute(child_cancel.clone()))
      .collect();

    // Resumption may hand us an already-decided tally.
    if !cancel.is_cancelled() {
      if let Some((state, stop_rest)) = decide(policy, fail_fast, succeeded, failed, cancelled, total)
      {
        decided = Some(state);
        if stop_rest {
          child_cancel.cancel();
        }
      }
    }

    while let Some(state) = pending.next().await {
      match state {
        NodeState::Succeeded => succeeded += 1,
        NodeState::Failed => failed += 1,
        NodeState::Cancelled => cancelled += 1,
        _ => {}
      }

      if decided.is_none() && !cancel.is_cancelled() {
        if let Some((state, stop_rest)) =
          decide(policy, fail_fast, succeeded, failed, cancelled, total)
        {
          decided = Some(state);
          // Remaining children keep draining until they observe the token.
          if stop_rest {
            child_cancel.cancel();
          }
        }
      }
    }
  }

  if let Some(state) = decided {
    return state;
  }
  if cancel.is_cancelled() {
    return NodeState::Cancelled;
  }
  settle(policy, succeeded, failed, cancelled, total)
}

/// Terminal outcome once it is determined regardless of still-running
/// children, plus whether those children should be cancelled.
fn decide(
  policy: ParallelPolicy,
  fail_fast: bool,
  succeeded: usize,
  failed: usize,
  cancelled: usize,
  total: usize,
) -> Option<(NodeState, bool)> {
  let finished = succeeded + failed + cancelled;
  match policy {
    ParallelPolicy::All => {
      if failed + cancelled > 0 {
        Some((NodeState::Failed, fail_fast))
      } else if succeeded == total {
        Some((NodeState::Succeeded, false))
      } else {
        None
      }
    }
    ParallelPolicy::Any => {
      if succeeded > 0 {
        Some((NodeState::Succeeded, true))
      } else if finished == total {
        Some((NodeState::Failed, false))
      } else {
        None
      }
    }
    ParallelPolicy::Quorum(quorum) => {
      if succeeded >= quorum {
        Some((NodeState::Succeeded, true))
      } else if succeeded + (total - finished) < quorum {
        // Success is unreachable.
        Some((NodeState::Failed, true))
      } else {
        None
      }
    }
  }
}

/// Fallback tally when every child finished without an early decision.
fn settle(
  policy: ParallelPolicy,
  succeeded: usize,
  failed: usize,
  cancelled: usize,
  total: usize,
) -> NodeState {
  match policy {
    ParallelPolicy::All => {
      if failed > 0 {
        NodeState::Failed
      } else if cancelled > 0 {
        NodeState::Cancelled
      } else {
        NodeState::Succeeded
      }
    }
    ParallelPolicy::Any | ParallelPolicy::Quorum(_) => {
      let quorum = match policy {
        ParallelPolicy::Quorum(quorum) => quorum,
        _ => 1,
      };
      if succeeded >= quorum {
        NodeState::Succeeded
      } else {
        NodeState::Failed
      }
    }
  }
}

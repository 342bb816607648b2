//! Builders translating mission steps into behavior tree nodes.

use std::collections::HashMap;
use std::sync::Arc;

use waypost_mission::{MissionDefinition, MissionRuntimeOptions, Step};

use crate::action::{
  BuildContext, NamedWaypointAction, PoseWaypointAction, RunActionAction, SetDataAction,
  WaitAction,
};
use crate::error::BuildError;
use crate::node::Node;

/// Builds one node for one step.
pub type StepHandler = Arc<dyn Fn(&BuildContext, &Step) -> Result<Node, BuildError> + Send + Sync>;

/// Dispatch table from step-type tag to node constructor.
///
/// The default table covers every built-in step type; deployments extend or
/// override entries with [`NodeFromStepBuilder::set_handler`] without
/// touching the base table.
pub struct NodeFromStepBuilder {
  handlers: HashMap<String, StepHandler>,
}

impl NodeFromStepBuilder {
  /// A builder with handlers for every built-in step type.
  pub fn new() -> Self {
    let mut builder = Self::empty();
    builder.set_handler("set_data", build_set_data);
    builder.set_handler("pose_waypoint", build_pose_waypoint);
    builder.set_handler("named_waypoint", build_named_waypoint);
    builder.set_handler("run_action", build_run_action);
    builder.set_handler("wait", build_wait);
    builder
  }

  /// A builder with no handlers at all.
  pub fn empty() -> Self {
    Self {
      handlers: HashMap::new(),
    }
  }

  /// Install or replace the handler for a step-type tag.
  pub fn set_handler<F>(&mut self, tag: impl Into<String>, handler: F)
  where
    F: Fn(&BuildContext, &Step) -> Result<Node, BuildError> + Send + Sync + 'static,
  {
    self.handlers.insert(tag.into(), Arc::new(handler));
  }

  /// Build the node for one step, dispatching on its type tag.
  pub fn build(&self, ctx: &BuildContext, step: &Step) -> Result<Node, BuildError> {
    let tag = step.type_tag();
    let handler = self
      .handlers
      .get(tag)
      .ok_or_else(|| BuildError::UnknownStepType {
        tag: tag.to_string(),
      })?;
    handler(ctx, step)
  }
}

impl Default for NodeFromStepBuilder {
  fn default() -> Self {
    Self::new()
  }
}

fn mismatched(step: &Step) -> BuildError {
  BuildError::InvalidStep {
    label: step.label().to_string(),
    message: format!("handler received unexpected step type '{}'", step.type_tag()),
  }
}

fn build_set_data(ctx: &BuildContext, step: &Step) -> Result<Node, BuildError> {
  let Step::SetData {
    label,
    data,
    complete_task,
  } = step
  else {
    return Err(mismatched(step));
  };
  Ok(Node::action(
    label.clone(),
    Box::new(SetDataAction::new(
      ctx.clone(),
      data.clone(),
      complete_task.clone(),
    )),
  ))
}

fn build_pose_waypoint(ctx: &BuildContext, step: &Step) -> Result<Node, BuildError> {
  let Step::PoseWaypoint {
    label,
    waypoint,
    complete_task,
  } = step
  else {
    return Err(mismatched(step));
  };
  Ok(Node::action(
    label.clone(),
    Box::new(PoseWaypointAction::new(
      ctx.clone(),
      waypoint.clone(),
      complete_task.clone(),
    )),
  ))
}

fn build_named_waypoint(ctx: &BuildContext, step: &Step) -> Result<Node, BuildError> {
  let Step::NamedWaypoint {
    label,
    waypoint_id,
    complete_task,
  } = step
  else {
    return Err(mismatched(step));
  };
  Ok(Node::action(
    label.clone(),
    Box::new(NamedWaypointAction::new(
      ctx.clone(),
      waypoint_id.clone(),
      complete_task.clone(),
    )),
  ))
}

fn build_run_action(ctx: &BuildContext, step: &Step) -> Result<Node, BuildError> {
  let Step::RunAction {
    label,
    action_id,
    arguments,
    complete_task,
  } = step
  else {
    return Err(mismatched(step));
  };
  Ok(Node::action(
    label.clone(),
    Box::new(RunActionAction::new(
      ctx.clone(),
      action_id.clone(),
      arguments.clone(),
      complete_task.clone(),
    )),
  ))
}

fn build_wait(_ctx: &BuildContext, step: &Step) -> Result<Node, BuildError> {
  let Step::Wait {
    label,
    duration_secs,
  } = step
  else {
    return Err(mismatched(step));
  };
  Ok(Node::action(
    label.clone(),
    Box::new(WaitAction::new(*duration_secs)),
  ))
}

/// Builds the executable tree for a mission definition.
///
/// Deployments substitute their own implementation (or a
/// [`DefaultTreeBuilder`] over a customized step builder) to change per-step
/// construction or the composition policy without the pool noticing.
pub trait TreeBuilder: Send + Sync {
  fn build(
    &self,
    ctx: &BuildContext,
    definition: &MissionDefinition,
    options: &MissionRuntimeOptions,
  ) -> Result<Node, BuildError>;
}

/// Default composition: one node per step, in step order, under a single
/// sequence. Runtime options wrap the root in retry/timeout decorators.
pub struct DefaultTreeBuilder {
  steps: NodeFromStepBuilder,
}

impl DefaultTreeBuilder {
  pub fn new() -> Self {
    Self::with_step_builder(NodeFromStepBuilder::new())
  }

  pub fn with_step_builder(steps: NodeFromStepBuilder) -> Self {
    Self { steps }
  }
}

impl Default for DefaultTreeBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl TreeBuilder for DefaultTreeBuilder {
  fn build(
    &self,
    ctx: &BuildContext,
    definition: &MissionDefinition,
    options: &MissionRuntimeOptions,
  ) -> Result<Node, BuildError> {
    let mut children = Vec::with_capacity(definition.steps.len());
    for step in &definition.steps {
      children.push(self.steps.build(ctx, step)?);
    }

    let mut root = Node::sequence(Some(definition.label.clone()), children);
    if let Some(retries) = options.retries {
      root = Node::retry(retries, root);
    }
    if let Some(timeout_secs) = options.timeout_secs {
      root = Node::timeout(timeout_secs * 1000, root);
    }
    Ok(root)
  }
}

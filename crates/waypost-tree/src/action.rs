//! Action leaves and the robot capability they invoke.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use waypost_mission::Pose;

use crate::error::SnapshotError;

/// Error reported by a robot effect.
#[derive(Debug, thiserror::Error)]
pub enum EffectError {
  /// The robot refused the command.
  #[error("robot rejected the command: {0}")]
  Rejected(String),

  /// The command was accepted but the effect did not complete.
  #[error("effect failed on the robot: {0}")]
  Failed(String),

  /// The robot could not be reached.
  #[error("lost contact with the robot: {0}")]
  Transport(String),
}

/// Commands the executor issues to a robot.
///
/// Each call resolves when the robot confirms completion, not when the
/// command is accepted. Implementations should make effects idempotent per
/// mission and step, since an interrupted effect is re-invoked on resume.
#[async_trait]
pub trait RobotApi: Send + Sync {
  /// Publish key/value data on the robot.
  async fn set_data(
    &self,
    robot_id: &str,
    data: &serde_json::Map<String, Value>,
  ) -> Result<(), EffectError>;

  /// Drive the robot to a pose; resolves on arrival.
  async fn navigate_to(&self, robot_id: &str, waypoint: &Pose) -> Result<(), EffectError>;

  /// Drive the robot to a waypoint it knows by id; resolves on arrival.
  async fn navigate_to_named(&self, robot_id: &str, waypoint_id: &str) -> Result<(), EffectError>;

  /// Dispatch a robot action; resolves when the action finishes.
  async fn run_action(
    &self,
    robot_id: &str,
    action_id: &str,
    arguments: &Value,
  ) -> Result<(), EffectError>;

  /// Report a mission-tracking task as completed.
  async fn mark_task_complete(&self, mission_id: &str, task_id: &str) -> Result<(), EffectError>;
}

/// Everything needed to construct the nodes of one mission's tree.
#[derive(Clone)]
pub struct BuildContext {
  pub mission_id: String,
  pub robot_id: String,
  pub arguments: HashMap<String, Value>,
  pub robot: Arc<dyn RobotApi>,
}

/// A leaf behavior wrapping one external effect.
///
/// `invoke` is raced against the mission's cancellation token by the engine;
/// a dropped invoke future is the cancellation signal. This is the only open
/// extension point of the tree: custom behaviors implement this trait and
/// register a constructor under their tag.
#[async_trait]
pub trait ActionNode: Send + Sync {
  /// Snapshot tag, resolved through the node type registry on reconstruction.
  fn type_tag(&self) -> &str;

  /// Run the effect to completion.
  async fn invoke(&self) -> Result<(), EffectError>;

  /// Parameters persisted with snapshots; must be enough for the registered
  /// constructor to rebuild an equivalent action.
  fn params(&self) -> Value;
}

/// Marks a mission-tracking task complete after a step's effect succeeds.
async fn finish_task(
  ctx: &BuildContext,
  complete_task: &Option<String>,
) -> Result<(), EffectError> {
  if let Some(task_id) = complete_task {
    debug!(mission_id = %ctx.mission_id, task_id = %task_id, "marking task complete");
    ctx.robot.mark_task_complete(&ctx.mission_id, task_id).await?;
  }
  Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct SetDataParams {
  data: serde_json::Map<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  complete_task: Option<String>,
}

pub(crate) struct SetDataAction {
  ctx: BuildContext,
  data: serde_json::Map<String, Value>,
  complete_task: Option<String>,
}

impl SetDataAction {
  pub(crate) fn new(
    ctx: BuildContext,
    data: serde_json::Map<String, Value>,
    complete_task: Option<String>,
  ) -> Self {
    Self {
      ctx,
      data,
      complete_task,
    }
  }

  pub(crate) fn from_params(
    ctx: &BuildContext,
    params: &Value,
  ) -> Result<Box<dyn ActionNode>, SnapshotError> {
    let params: SetDataParams = decode_params("set_data", params)?;
    Ok(Box::new(Self::new(
      ctx.clone(),
      params.data,
      params.complete_task,
    )))
  }
}

#[async_trait]
impl ActionNode for SetDataAction {
  fn type_tag(&self) -> &str {
    "set_data"
  }

  async fn invoke(&self) -> Result<(), EffectError> {
    self.ctx.robot.set_data(&self.ctx.robot_id, &self.data).await?;
    finish_task(&self.ctx, &self.complete_task).await
  }

  fn params(&self) -> Value {
    json!({ "data": self.data, "complete_task": self.complete_task })
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct PoseWaypointParams {
  waypoint: Pose,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  complete_task: Option<String>,
}

pub(crate) struct PoseWaypointAction {
  ctx: BuildContext,
  waypoint: Pose,
  complete_task: Option<String>,
}

impl PoseWaypointAction {
  pub(crate) fn new(ctx: BuildContext, waypoint: Pose, complete_task: Option<String>) -> Self {
    Self {
      ctx,
      waypoint,
      complete_task,
    }
  }

  pub(crate) fn from_params(
    ctx: &BuildContext,
    params: &Value,
  ) -> Result<Box<dyn ActionNode>, SnapshotError> {
    let params: PoseWaypointParams = decode_params("pose_waypoint", params)?;
    Ok(Box::new(Self::new(
      ctx.clone(),
      params.waypoint,
      params.complete_task,
    )))
  }
}

#[async_trait]
impl ActionNode for PoseWaypointAction {
  fn type_tag(&self) -> &str {
    "pose_waypoint"
  }

  async fn invoke(&self) -> Result<(), EffectError> {
    self
      .ctx
      .robot
      .navigate_to(&self.ctx.robot_id, &self.waypoint)
      .await?;
    finish_task(&self.ctx, &self.complete_task).await
  }

  fn params(&self) -> Value {
    json!({ "waypoint": self.waypoint, "complete_task": self.complete_task })
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct NamedWaypointParams {
  waypoint_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  complete_task: Option<String>,
}

pub(crate) struct NamedWaypointAction {
  ctx: BuildContext,
  waypoint_id: String,
  complete_task: Option<String>,
}

impl NamedWaypointAction {
  pub(crate) fn new(ctx: BuildContext, waypoint_id: String, complete_task: Option<String>) -> Self {
    Self {
      ctx,
      waypoint_id,
      complete_task,
    }
  }

  pub(crate) fn from_params(
    ctx: &BuildContext,
    params: &Value,
  ) -> Result<Box<dyn ActionNode>, SnapshotError> {
    let params: NamedWaypointParams = decode_params("named_waypoint", params)?;
    Ok(Box::new(Self::new(
      ctx.clone(),
      params.waypoint_id,
      params.complete_task,
    )))
  }
}

#[async_trait]
impl ActionNode for NamedWaypointAction {
  fn type_tag(&self) -> &str {
    "named_waypoint"
  }

  async fn invoke(&self) -> Result<(), EffectError> {
    self
      .ctx
      .robot
      .navigate_to_named(&self.ctx.robot_id, &self.waypoint_id)
      .await?;
    finish_task(&self.ctx, &self.complete_task).await
  }

  fn params(&self) -> Value {
    json!({ "waypoint_id": self.waypoint_id, "complete_task": self.complete_task })
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct RunActionParams {
  action_id: String,
  #[serde(default)]
  arguments: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  complete_task: Option<String>,
}

pub(crate) struct RunActionAction {
  ctx: BuildContext,
  action_id: String,
  arguments: Value,
  complete_task: Option<String>,
}

impl RunActionAction {
  pub(crate) fn new(
    ctx: BuildContext,
    action_id: String,
    arguments: Value,
    complete_task: Option<String>,
  ) -> Self {
    Self {
      ctx,
      action_id,
      arguments,
      complete_task,
    }
  }

  pub(crate) fn from_params(
    ctx: &BuildContext,
    params: &Value,
  ) -> Result<Box<dyn ActionNode>, SnapshotError> {
    let params: RunActionParams = decode_params("run_action", params)?;
    Ok(Box::new(Self::new(
      ctx.clone(),
      params.action_id,
      params.arguments,
      params.complete_task,
    )))
  }
}

#[async_trait]
impl ActionNode for RunActionAction {
  fn type_tag(&self) -> &str {
    "run_action"
  }

  async fn invoke(&self) -> Result<(), EffectError> {
    self
      .ctx
      .robot
      .run_action(&self.ctx.robot_id, &self.action_id, &self.arguments)
      .await?;
    finish_task(&self.ctx, &self.complete_task).await
  }

  fn params(&self) -> Value {
    json!({
      "action_id": self.action_id,
      "arguments": self.arguments,
      "complete_task": self.complete_task,
    })
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct WaitParams {
  duration_secs: f64,
}

pub(crate) struct WaitAction {
  duration_secs: f64,
}

impl WaitAction {
  pub(crate) fn new(duration_secs: f64) -> Self {
    Self { duration_secs }
  }

  pub(crate) fn from_params(
    _ctx: &BuildContext,
    params: &Value,
  ) -> Result<Box<dyn ActionNode>, SnapshotError> {
    let params: WaitParams = decode_params("wait", params)?;
    Ok(Box::new(Self::new(params.duration_secs)))
  }
}

#[async_trait]
impl ActionNode for WaitAction {
  fn type_tag(&self) -> &str {
    "wait"
  }

  async fn invoke(&self) -> Result<(), EffectError> {
    tokio::time::sleep(Duration::from_secs_f64(self.duration_secs.max(0.0))).await;
    Ok(())
  }

  fn params(&self) -> Value {
    json!({ "duration_secs": self.duration_secs })
  }
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

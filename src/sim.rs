//! A simulated robot for demos and manual testing.
//!
//! Every effect logs what a real robot connector would do and sleeps briefly
//! so mission progress is visible.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use waypost_mission::Pose;
use waypost_tree::{EffectError, RobotApi};

pub struct SimRobot {
  delay: Duration,
}

impl SimRobot {
  pub fn new(delay: Duration) -> Self {
    Self { delay }
  }

  async fn settle(&self) {
    tokio::time::sleep(self.delay).await;
  }
}

#[async_trait]
impl RobotApi for SimRobot {
  async fn set_data(
    &self,
    robot_id: &str,
    data: &serde_json::Map<String, Value>,
  ) -> Result<(), EffectError> {
    info!(robot_id, keys = data.len(), "publishing data");
    self.settle().await;
    Ok(())
  }

  async fn navigate_to(&self, robot_id: &str, waypoint: &Pose) -> Result<(), EffectError> {
    info!(
      robot_id,
      x = waypoint.x,
      y = waypoint.y,
      frame = %waypoint.frame_id,
      "driving to waypoint"
    );
    self.settle().await;
    info!(robot_id, "waypoint reached");
    Ok(())
  }

  async fn navigate_to_named(&self, robot_id: &str, waypoint_id: &str) -> Result<(), EffectError> {
    info!(robot_id, waypoint_id, "driving to named waypoint");
    self.settle().await;
    info!(robot_id, waypoint_id, "waypoint reached");
    Ok(())
  }

  async fn run_action(
    &self,
    robot_id: &str,
    action_id: &str,
    _arguments: &Value,
  ) -> Result<(), EffectError> {
    info!(robot_id, action_id, "running robot action");
    self.settle().await;
    Ok(())
  }

  async fn mark_task_complete(&self, mission_id: &str, task_id: &str) -> Result<(), EffectError> {
    info!(mission_id, task_id, "task complete");
    Ok(())
  }
}

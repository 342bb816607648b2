use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::step::Step;

/// Status of a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Cancelled,
  Paused,
}

impl MissionStatus {
  /// Terminal statuses are absorbing; paused and pending missions can resume.
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      MissionStatus::Succeeded | MissionStatus::Failed | MissionStatus::Cancelled
    )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      MissionStatus::Pending => "pending",
      MissionStatus::Running => "running",
      MissionStatus::Succeeded => "succeeded",
      MissionStatus::Failed => "failed",
      MissionStatus::Cancelled => "cancelled",
      MissionStatus::Paused => "paused",
    }
  }
}

impl fmt::Display for MissionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The ordered list of steps a mission executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionDefinition {
  pub label: String,
  pub steps: Vec<Step>,
}

/// One dispatched unit of work against one robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
  pub id: String,
  pub robot_id: String,
  pub definition: MissionDefinition,
  #[serde(default)]
  pub arguments: HashMap<String, serde_json::Value>,
  pub status: MissionStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Mission {
  pub fn new(
    id: impl Into<String>,
    robot_id: impl Into<String>,
    definition: MissionDefinition,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: id.into(),
      robot_id: robot_id.into(),
      definition,
      arguments: HashMap::new(),
      status: MissionStatus::Pending,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn with_arguments(mut self, arguments: HashMap<String, serde_json::Value>) -> Self {
    self.arguments = arguments;
    self
  }

  pub fn set_status(&mut self, status: MissionStatus) {
    self.status = status;
    self.updated_at = Utc::now();
  }
}

/// Per-submission execution options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionRuntimeOptions {
  /// Fail the mission if it has not finished within this many seconds.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_secs: Option<u64>,
  /// Extra attempts for the whole mission after a failure.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retries: Option<u32>,
}

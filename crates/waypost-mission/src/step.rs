use serde::{Deserialize, Serialize};

/// A pose in one of the robot's coordinate frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
  pub x: f64,
  pub y: f64,
  pub theta: f64,
  pub frame_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub waypoint_id: Option<String>,
}

/// A deployment-defined step, carried under the `custom` tag and dispatched
/// on its inner `tag` by the step builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomStep {
  pub tag: String,
  #[serde(default)]
  pub label: String,
  #[serde(default)]
  pub params: serde_json::Value,
}

/// One declarative instruction inside a mission definition.
///
/// Steps are immutable once the mission is defined. Each variant's tag is the
/// step-type tag the step builder dispatches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
  /// Publish key/value data on the robot.
  SetData {
    label: String,
    data: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    complete_task: Option<String>,
  },

  /// Drive the robot to a pose and wait for arrival.
  PoseWaypoint {
    label: String,
    waypoint: Pose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    complete_task: Option<String>,
  },

  /// Drive the robot to a waypoint it already knows by id.
  NamedWaypoint {
    label: String,
    waypoint_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    complete_task: Option<String>,
  },

  /// Dispatch a robot action and wait for it to finish.
  RunAction {
    label: String,
    action_id: String,
    #[serde(default)]
    arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    complete_task: Option<String>,
  },

  /// Hold execution for a fixed duration.
  Wait { label: String, duration_secs: f64 },

  /// Carrier for deployment-defined step types.
  Custom(CustomStep),
}

impl Step {
  /// The step-type tag used for builder dispatch. Custom steps report their
  /// inner tag, not `custom`.
  pub fn type_tag(&self) -> &str {
    match self {
      Step::SetData { .. } => "set_data",
      Step::PoseWaypoint { .. } => "pose_waypoint",
      Step::NamedWaypoint { .. } => "named_waypoint",
      Step::RunAction { .. } => "run_action",
      Step::Wait { .. } => "wait",
      Step::Custom(custom) => &custom.tag,
    }
  }

  /// Human-readable label for tracking and logs.
  pub fn label(&self) -> &str {
    match self {
      Step::SetData { label, .. }
      | Step::PoseWaypoint { label, .. }
      | Step::NamedWaypoint { label, .. }
      | Step::RunAction { label, .. }
      | Step::Wait { label, .. } => label,
      Step::Custom(custom) => &custom.label,
    }
  }

  /// Mission-tracking task to mark complete once the step's effect succeeds.
  pub fn complete_task(&self) -> Option<&str> {
    match self {
      Step::SetData { complete_task, .. }
      | Step::PoseWaypoint { complete_task, .. }
      | Step::NamedWaypoint { complete_task, .. }
      | Step::RunAction { complete_task, .. } => complete_task.as_deref(),
      Step::Wait { .. } | Step::Custom(_) => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn step_tags_round_trip() {
    let steps = json!([
      {"type": "set_data", "label": "set some data", "data": {"key": "value"}, "complete_task": "step 1"},
      {"type": "pose_waypoint", "label": "go to waypoint",
       "waypoint": {"x": 0.0, "y": 0.0, "theta": 0.0, "frame_id": "map", "waypoint_id": "wp1"}},
      {"type": "wait", "label": "settle", "duration_secs": 1.5}
    ]);

    let steps: Vec<Step> = serde_json::from_value(steps).unwrap();
    assert_eq!(steps[0].type_tag(), "set_data");
    assert_eq!(steps[0].complete_task(), Some("step 1"));
    assert_eq!(steps[1].type_tag(), "pose_waypoint");
    assert_eq!(steps[2].type_tag(), "wait");

    let encoded = serde_json::to_value(&steps).unwrap();
    let decoded: Vec<Step> = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, steps);
  }

  #[test]
  fn custom_step_reports_inner_tag() {
    let step: Step = serde_json::from_value(json!({
      "type": "custom",
      "tag": "dock_charger",
      "label": "dock",
      "params": {"charger_id": "c1"}
    }))
    .unwrap();

    assert_eq!(step.type_tag(), "dock_charger");
    assert_eq!(step.label(), "dock");
  }

  #[test]
  fn unknown_tag_is_rejected() {
    let result: Result<Step, _> =
      serde_json::from_value(json!({"type": "teleport", "label": "zap"}));
    assert!(result.is_err());
  }
}

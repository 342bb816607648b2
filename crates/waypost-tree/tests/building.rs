//! Building trees from steps, snapshotting them, and reconstructing them
//! through the node type registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use waypost_mission::{MissionDefinition, MissionRuntimeOptions, Pose, Step};
use waypost_tree::{
  ActionNode, BuildContext, BuildError, DefaultTreeBuilder, EffectError, Node,
  NodeFromStepBuilder, NodeState, NodeTypeRegistry, RobotApi, SnapshotError, TreeBuilder,
};

/// Robot capability stub that records every call and always succeeds.
#[derive(Default)]
struct StubRobot {
  calls: Mutex<Vec<String>>,
}

impl StubRobot {
  fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  fn record(&self, call: impl Into<String>) {
    self.calls.lock().unwrap().push(call.into());
  }
}

#[async_trait]
impl RobotApi for StubRobot {
  async fn set_data(
    &self,
    _robot_id: &str,
    data: &serde_json::Map<String, Value>,
  ) -> Result<(), EffectError> {
    let mut keys: Vec<&str> = data.keys().map(String::as_str).collect();
    keys.sort_unstable();
    self.record(format!("set_data:{}", keys.join(",")));
    Ok(())
  }

  async fn navigate_to(&self, _robot_id: &str, waypoint: &Pose) -> Result<(), EffectError> {
    self.record(format!(
      "navigate:{}",
      waypoint.waypoint_id.as_deref().unwrap_or("?")
    ));
    Ok(())
  }

  async fn navigate_to_named(
    &self,
    _robot_id: &str,
    waypoint_id: &str,
  ) -> Result<(), EffectError> {
    self.record(format!("navigate_named:{waypoint_id}"));
    Ok(())
  }

  async fn run_action(
    &self,
    _robot_id: &str,
    action_id: &str,
    _arguments: &Value,
  ) -> Result<(), EffectError> {
    self.record(format!("run_action:{action_id}"));
    Ok(())
  }

  async fn mark_task_complete(
    &self,
    _mission_id: &str,
    task_id: &str,
  ) -> Result<(), EffectError> {
    self.record(format!("task_complete:{task_id}"));
    Ok(())
  }
}

fn context(robot: Arc<StubRobot>) -> BuildContext {
  BuildContext {
    mission_id: "m-1".to_string(),
    robot_id: "robot-1".to_string(),
    arguments: HashMap::new(),
    robot,
  }
}

fn sample_definition() -> MissionDefinition {
  MissionDefinition {
    label: "survey run".to_string(),
    steps: vec![
      Step::SetData {
        label: "set some data".to_string(),
        data: json!({"key": "value"}).as_object().unwrap().clone(),
        complete_task: Some("step 1".to_string()),
      },
      Step::PoseWaypoint {
        label: "go to waypoint".to_string(),
        waypoint: Pose {
          x: 0.0,
          y: 0.0,
          theta: 0.0,
          frame_id: "map".to_string(),
          waypoint_id: Some("wp1".to_string()),
        },
        complete_task: Some("step 2".to_string()),
      },
      Step::Wait {
        label: "settle".to_string(),
        duration_secs: 0.0,
      },
    ],
  }
}

#[tokio::test]
async fn default_builder_produces_one_sequence_child_per_step() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let builder = DefaultTreeBuilder::new();

  let root = builder
    .build(&ctx, &sample_definition(), &MissionRuntimeOptions::default())
    .unwrap();

  let snapshot = root.snapshot();
  assert_eq!(snapshot.tag, "sequence");
  assert_eq!(snapshot.label.as_deref(), Some("survey run"));
  let tags: Vec<&str> = snapshot.children.iter().map(|c| c.tag.as_str()).collect();
  assert_eq!(tags, vec!["set_data", "pose_waypoint", "wait"]);
  let labels: Vec<&str> = snapshot
    .children
    .iter()
    .map(|c| c.label.as_deref().unwrap())
    .collect();
  assert_eq!(labels, vec!["set some data", "go to waypoint", "settle"]);
}

#[tokio::test]
async fn built_tree_drives_the_robot_in_step_order() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot.clone());
  let builder = DefaultTreeBuilder::new();

  let mut root = builder
    .build(&ctx, &sample_definition(), &MissionRuntimeOptions::default())
    .unwrap();
  let state = root.execute(CancellationToken::new()).await;

  assert_eq!(state, NodeState::Succeeded);
  assert_eq!(
    robot.calls(),
    vec![
      "set_data:key",
      "task_complete:step 1",
      "navigate:wp1",
      "task_complete:step 2",
    ]
  );
}

#[test]
fn unknown_step_tag_fails_the_build() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let builder = DefaultTreeBuilder::new();

  let definition = MissionDefinition {
    label: "bad".to_string(),
    steps: vec![Step::Custom(waypost_mission::CustomStep {
      tag: "dock_charger".to_string(),
      label: "dock".to_string(),
      params: Value::Null,
    })],
  };

  let err = builder
    .build(&ctx, &definition, &MissionRuntimeOptions::default())
    .unwrap_err();
  assert!(matches!(err, BuildError::UnknownStepType { tag } if tag == "dock_charger"));
}

#[test]
fn runtime_options_wrap_the_root_in_decorators() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let builder = DefaultTreeBuilder::new();

  let options = MissionRuntimeOptions {
    timeout_secs: Some(30),
    retries: Some(2),
  };
  let root = builder.build(&ctx, &sample_definition(), &options).unwrap();

  let snapshot = root.snapshot();
  assert_eq!(snapshot.tag, "timeout");
  assert_eq!(snapshot.children[0].tag, "retry");
  assert_eq!(snapshot.children[0].children[0].tag, "sequence");
}

/// Deployment-defined action used by the extension tests below.
struct DockAction {
  charger_id: String,
  log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ActionNode for DockAction {
  fn type_tag(&self) -> &str {
    "dock_charger"
  }

  async fn invoke(&self) -> Result<(), EffectError> {
    self.log.lock().unwrap().push(format!("dock:{}", self.charger_id));
    Ok(())
  }

  fn params(&self) -> Value {
    json!({ "charger_id": self.charger_id })
  }
}

fn dock_step() -> Step {
  Step::Custom(waypost_mission::CustomStep {
    tag: "dock_charger".to_string(),
    label: "dock at charger".to_string(),
    params: json!({ "charger_id": "c1" }),
  })
}

fn dock_step_builder(log: Arc<Mutex<Vec<String>>>) -> NodeFromStepBuilder {
  let mut steps = NodeFromStepBuilder::new();
  steps.set_handler("dock_charger", move |_ctx, step| {
    let Step::Custom(custom) = step else {
      return Err(BuildError::InvalidStep {
        label: step.label().to_string(),
        message: "expected a custom step".to_string(),
      });
    };
    let charger_id = custom.params["charger_id"]
      .as_str()
      .ok_or_else(|| BuildError::InvalidStep {
        label: custom.label.clone(),
        message: "missing charger_id".to_string(),
      })?
      .to_string();
    Ok(Node::action(
      custom.label.clone(),
      Box::new(DockAction {
        charger_id,
        log: log.clone(),
      }),
    ))
  });
  steps
}

#[tokio::test]
async fn custom_step_handler_extends_the_dispatch_table() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let log = Arc::new(Mutex::new(Vec::new()));
  let builder = DefaultTreeBuilder::with_step_builder(dock_step_builder(log.clone()));

  let definition = MissionDefinition {
    label: "dock run".to_string(),
    steps: vec![dock_step()],
  };
  let mut root = builder
    .build(&ctx, &definition, &MissionRuntimeOptions::default())
    .unwrap();
  let state = root.execute(CancellationToken::new()).await;

  assert_eq!(state, NodeState::Succeeded);
  assert_eq!(log.lock().unwrap().clone(), vec!["dock:c1"]);
}

#[test]
fn snapshot_round_trips_through_the_registry() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let builder = DefaultTreeBuilder::new();
  let registry = NodeTypeRegistry::with_builtin_types();

  let root = builder
    .build(&ctx, &sample_definition(), &MissionRuntimeOptions::default())
    .unwrap();
  let snapshot = root.snapshot();

  let restored = Node::from_snapshot(&snapshot, &registry, &ctx).unwrap();
  assert_eq!(restored.snapshot(), snapshot);
}

#[test]
fn loading_demotes_running_nodes_to_idle() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let builder = DefaultTreeBuilder::new();
  let registry = NodeTypeRegistry::with_builtin_types();

  let root = builder
    .build(&ctx, &sample_definition(), &MissionRuntimeOptions::default())
    .unwrap();
  let mut snapshot = root.snapshot();
  snapshot.state = NodeState::Running;
  snapshot.children[0].state = NodeState::Succeeded;
  snapshot.children[1].state = NodeState::Running;

  let restored = Node::from_snapshot(&snapshot, &registry, &ctx).unwrap();

  assert_eq!(restored.state(), NodeState::Idle);
  assert_eq!(restored.children()[0].state(), NodeState::Succeeded);
  assert_eq!(restored.children()[1].state(), NodeState::Idle);
  assert_eq!(restored.children()[2].state(), NodeState::Idle);
}

#[test]
fn unknown_node_tag_aborts_the_load() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let registry = NodeTypeRegistry::with_builtin_types();

  let snapshot = waypost_tree::NodeSnapshot {
    tag: "warp_drive".to_string(),
    state: NodeState::Idle,
    label: None,
    error: None,
    params: Value::Null,
    children: vec![],
  };

  let err = Node::from_snapshot(&snapshot, &registry, &ctx).unwrap_err();
  assert!(matches!(err, SnapshotError::UnknownNodeType { tag } if tag == "warp_drive"));
}

#[tokio::test]
async fn registered_custom_type_reconstructs_a_working_node() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let log = Arc::new(Mutex::new(Vec::new()));

  let mut registry = NodeTypeRegistry::with_builtin_types();
  let ctor_log = log.clone();
  registry.register("dock_charger", move |_ctx, params| {
    let charger_id = params["charger_id"]
      .as_str()
      .ok_or_else(|| SnapshotError::MalformedParams {
        tag: "dock_charger".to_string(),
        message: "missing charger_id".to_string(),
      })?
      .to_string();
    Ok(Box::new(DockAction {
      charger_id,
      log: ctor_log.clone(),
    }) as Box<dyn ActionNode>)
  });

  let builder = DefaultTreeBuilder::with_step_builder(dock_step_builder(log.clone()));
  let definition = MissionDefinition {
    label: "dock run".to_string(),
    steps: vec![dock_step()],
  };
  let root = builder
    .build(&ctx, &definition, &MissionRuntimeOptions::default())
    .unwrap();

  let mut restored = Node::from_snapshot(&root.snapshot(), &registry, &ctx).unwrap();
  let state = restored.execute(CancellationToken::new()).await;

  assert_eq!(state, NodeState::Succeeded);
  assert_eq!(log.lock().unwrap().clone(), vec!["dock:c1"]);
}

#[test]
fn structure_comparison_detects_a_reshaped_tree() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let builder = DefaultTreeBuilder::new();

  let full = builder
    .build(&ctx, &sample_definition(), &MissionRuntimeOptions::default())
    .unwrap()
    .snapshot();
  let mut pruned = full.clone();
  pruned.children.pop();

  assert!(full.structure_matches(&full));
  assert!(!full.structure_matches(&pruned));
}

#[test]
fn interrupted_nodes_are_recorded_as_running() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let builder = DefaultTreeBuilder::new();

  let root = builder
    .build(&ctx, &sample_definition(), &MissionRuntimeOptions::default())
    .unwrap();
  let mut snapshot = root.snapshot();
  snapshot.state = NodeState::Cancelled;
  snapshot.children[0].state = NodeState::Succeeded;
  snapshot.children[1].state = NodeState::Cancelled;

  snapshot.mark_interrupted();

  assert_eq!(snapshot.state, NodeState::Running);
  assert_eq!(snapshot.children[0].state, NodeState::Succeeded);
  assert_eq!(snapshot.children[1].state, NodeState::Running);
  assert_eq!(snapshot.children[2].state, NodeState::Idle);
}

#[test]
fn find_failed_reports_the_deepest_failed_node() {
  let robot = Arc::new(StubRobot::default());
  let ctx = context(robot);
  let builder = DefaultTreeBuilder::new();

  let root = builder
    .build(&ctx, &sample_definition(), &MissionRuntimeOptions::default())
    .unwrap();
  let mut snapshot = root.snapshot();
  snapshot.state = NodeState::Failed;
  snapshot.children[0].state = NodeState::Succeeded;
  snapshot.children[1].state = NodeState::Failed;
  snapshot.children[1].error = Some("no route to waypoint".to_string());

  let failed = snapshot.find_failed().unwrap();
  assert_eq!(failed.label.as_deref(), Some("go to waypoint"));
  assert_eq!(failed.error.as_deref(), Some("no route to waypoint"));
}

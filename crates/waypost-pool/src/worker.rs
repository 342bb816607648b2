//! One mission bound to its instantiated tree.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use waypost_mission::{Mission, MissionRuntimeOptions, MissionStatus};
use waypost_store::{Snapshot, SnapshotStore, StoreError};
use waypost_tree::{Node, NodeState};

/// How an externally requested stop should be recorded once the tree
/// settles: a pause keeps the mission resumable, a cancel ends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
  Pause,
  Cancel,
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Created,
  Running,
  Completed,
  Failed,
  Cancelled,
  Paused,
}

/// Stop plumbing shared between the pool and a running worker. The first
/// request wins; the token fans out into the tree.
#[derive(Clone)]
pub(crate) struct StopSignals {
  pub(crate) token: CancellationToken,
  pub(crate) request: Arc<OnceLock<StopRequest>>,
}

impl StopSignals {
  pub(crate) fn new() -> Self {
    Self {
      token: CancellationToken::new(),
      request: Arc::new(OnceLock::new()),
    }
  }

  pub(crate) fn request_stop(&self, request: StopRequest) {
    let _ = self.request.set(request);
    self.token.cancel();
  }
}

/// Binds one mission to its tree and drives it to a terminal state.
pub struct Worker {
  mission: Mission,
  options: MissionRuntimeOptions,
  tree: Node,
  state: WorkerState,
}

impl Worker {
  pub(crate) fn new(mission: Mission, options: MissionRuntimeOptions, tree: Node) -> Self {
    Self {
      mission,
      options,
      tree,
      state: WorkerState::Created,
    }
  }

  pub fn mission(&self) -> &Mission {
    &self.mission
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Current durable record for this worker's mission.
  pub(crate) fn snapshot(&self) -> Snapshot {
    Snapshot::new(
      self.mission.clone(),
      self.options.clone(),
      Some(self.tree.snapshot()),
    )
  }

  /// Record the mission as terminal without ever having run, used when a
  /// stop arrives while the worker is still queued.
  pub(crate) fn settle_unstarted(mut self, status: MissionStatus) -> Snapshot {
    self.mission.set_status(status);
    self.snapshot()
  }

  /// Drive the tree to a terminal state, persisting progress at the
  /// transitions that matter: start, pause, and terminal settlement.
  #[instrument(
    name = "mission_run",
    skip_all,
    fields(mission_id = %self.mission.id, robot_id = %self.mission.robot_id)
  )]
  pub(crate) async fn run(mut self, store: Arc<dyn SnapshotStore>, signals: StopSignals) -> Mission {
    self.state = WorkerState::Running;
    self.mission.set_status(MissionStatus::Running);
    info!("mission_started");
    if let Err(e) = self.persist(&store, false).await {
      warn!(error = %e, "failed to persist running snapshot");
    }

    let state = self.tree.execute(signals.token.clone()).await;

    match state {
      NodeState::Succeeded => {
        self.state = WorkerState::Completed;
        self.mission.set_status(MissionStatus::Succeeded);
        info!("mission_completed");
      }
      NodeState::Failed => {
        self.state = WorkerState::Failed;
        self.mission.set_status(MissionStatus::Failed);
        let snapshot = self.tree.snapshot();
        match snapshot.find_failed() {
          Some(failed) => error!(
            node = failed.label.as_deref().unwrap_or(&failed.tag),
            cause = failed.error.as_deref().unwrap_or("unknown"),
            "mission_failed"
          ),
          None => error!("mission_failed"),
        }
      }
      NodeState::Cancelled => match signals.request.get() {
        Some(StopRequest::Pause) => {
          self.state = WorkerState::Paused;
          self.mission.set_status(MissionStatus::Paused);
          info!("mission_paused");
        }
        _ => {
          self.state = WorkerState::Cancelled;
          self.mission.set_status(MissionStatus::Cancelled);
          info!("mission_cancelled");
        }
      },
      NodeState::Idle | NodeState::Running => {
        // execute() only returns terminal states; treat anything else as a
        // failure rather than leaving the mission dangling.
        self.state = WorkerState::Failed;
        self.mission.set_status(MissionStatus::Failed);
        error!(state = ?state, "tree stopped without reaching a terminal state");
      }
    }

    let interrupted = self.state == WorkerState::Paused;
    if let Err(e) = self.persist(&store, interrupted).await {
      warn!(error = %e, "failed to persist final snapshot");
    }

    self.mission
  }

  async fn persist(&self, store: &Arc<dyn SnapshotStore>, interrupted: bool) -> Result<(), StoreError> {
    let mut tree = self.tree.snapshot();
    if interrupted {
      tree.mark_interrupted();
    }
    store
      .put(&Snapshot::new(
        self.mission.clone(),
        self.options.clone(),
        Some(tree),
      ))
      .await
  }
}

//! The worker pool: submission, scheduling, shutdown, resumption.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use waypost_mission::{Mission, MissionRuntimeOptions, MissionStatus};
use waypost_store::{Snapshot, SnapshotStore};
use waypost_tree::{
  BuildContext, DefaultTreeBuilder, Node, NodeTypeRegistry, RobotApi, SnapshotError, TreeBuilder,
};

use crate::error::PoolError;
use crate::worker::{StopRequest, StopSignals, Worker};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
  /// Maximum missions executing at once; `None` is unbounded.
  pub max_concurrent: Option<usize>,
  /// How long `shutdown` waits for workers to vacate.
  pub shutdown_timeout: Duration,
  /// Scan the store and resume non-terminal missions on `start`.
  pub resume_on_start: bool,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      max_concurrent: None,
      shutdown_timeout: Duration::from_secs(30),
      resume_on_start: true,
    }
  }
}

struct PoolInner {
  store: Arc<dyn SnapshotStore>,
  robot: Arc<dyn RobotApi>,
  registry: Arc<NodeTypeRegistry>,
  tree_builder: Arc<dyn TreeBuilder>,
  config: PoolConfig,
  accepting: AtomicBool,
  workers: Mutex<HashMap<String, StopSignals>>,
  vacated: Notify,
  permits: Option<Arc<Semaphore>>,
}

impl PoolInner {
  fn workers(&self) -> MutexGuard<'_, HashMap<String, StopSignals>> {
    self.workers.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn remove_worker(&self, mission_id: &str) {
    self.workers().remove(mission_id);
    self.vacated.notify_waiters();
  }
}

/// Owns the set of active mission workers.
///
/// Missions are mutually independent: no ordering is guaranteed between
/// them, and within one mission node execution follows the tree's defined
/// order. At most one worker exists per mission id at any time.
pub struct WorkerPool {
  inner: Arc<PoolInner>,
}

impl WorkerPool {
  pub fn new(
    store: Arc<dyn SnapshotStore>,
    robot: Arc<dyn RobotApi>,
    registry: NodeTypeRegistry,
    tree_builder: Arc<dyn TreeBuilder>,
    config: PoolConfig,
  ) -> Self {
    let permits = config
      .max_concurrent
      .map(|limit| Arc::new(Semaphore::new(limit)));
    Self {
      inner: Arc::new(PoolInner {
        store,
        robot,
        registry: Arc::new(registry),
        tree_builder,
        config,
        accepting: AtomicBool::new(false),
        workers: Mutex::new(HashMap::new()),
        vacated: Notify::new(),
        permits,
      }),
    }
  }

  /// A pool with the built-in node types, the default tree builder, and the
  /// default configuration.
  pub fn with_defaults(store: Arc<dyn SnapshotStore>, robot: Arc<dyn RobotApi>) -> Self {
    Self::new(
      store,
      robot,
      NodeTypeRegistry::with_builtin_types(),
      Arc::new(DefaultTreeBuilder::new()),
      PoolConfig::default(),
    )
  }

  /// Start accepting submissions, resuming stored missions when configured.
  pub async fn start(&self) -> Result<(), PoolError> {
    self.inner.accepting.store(true, Ordering::SeqCst);
    info!("worker pool started");
    if self.inner.config.resume_on_start {
      self.resume_stored().await?;
    }
    Ok(())
  }

  /// Submit a new mission for execution. Returns as soon as the worker is
  /// registered and scheduled; execution proceeds concurrently.
  pub async fn submit_work(
    &self,
    mission: Mission,
    options: MissionRuntimeOptions,
  ) -> Result<(), PoolError> {
    self.ensure_accepting()?;

    let signals = self.reserve(&mission.id)?;
    let ctx = self.build_context(&mission);

    let tree = match self.inner.tree_builder.build(&ctx, &mission.definition, &options) {
      Ok(tree) => tree,
      Err(e) => {
        // The mission never starts running; record it as failed.
        self.inner.remove_worker(&mission.id);
        let mut mission = mission;
        mission.set_status(MissionStatus::Failed);
        if let Err(store_err) = self
          .inner
          .store
          .put(&Snapshot::new(mission, options, None))
          .await
        {
          warn!(error = %store_err, "failed to record build failure");
        }
        return Err(e.into());
      }
    };

    let worker = Worker::new(mission, options, tree);
    if let Err(e) = self.inner.store.put(&worker.snapshot()).await {
      self.inner.remove_worker(&worker.mission().id);
      return Err(e.into());
    }

    info!(mission_id = %worker.mission().id, "mission_submitted");
    self.spawn_worker(worker, signals);
    Ok(())
  }

  /// Resume one stored mission by id.
  pub async fn resume_mission(&self, mission_id: &str) -> Result<(), PoolError> {
    self.ensure_accepting()?;

    let snapshot = self
      .inner
      .store
      .get(mission_id)
      .await?
      .ok_or_else(|| PoolError::SnapshotNotFound {
        mission_id: mission_id.to_string(),
      })?;

    if !snapshot.is_resumable() {
      return Err(PoolError::NotResumable {
        mission_id: mission_id.to_string(),
        status: snapshot.mission.status,
      });
    }

    self.resume_snapshot(snapshot).await
  }

  /// Request cooperative cancellation of one active mission.
  pub fn cancel_mission(&self, mission_id: &str) -> Result<(), PoolError> {
    let workers = self.inner.workers();
    let signals = workers.get(mission_id).ok_or_else(|| PoolError::NotActive {
      mission_id: mission_id.to_string(),
    })?;
    info!(mission_id = %mission_id, "mission_cancel_requested");
    signals.request_stop(StopRequest::Cancel);
    Ok(())
  }

  /// Status of a mission: in-flight workers report through their latest
  /// persisted snapshot, finished missions through their final record.
  pub async fn mission_status(&self, mission_id: &str) -> Result<Option<MissionStatus>, PoolError> {
    Ok(
      self
        .inner
        .store
        .get(mission_id)
        .await?
        .map(|snapshot| snapshot.mission.status),
    )
  }

  /// Number of active workers.
  pub fn active_count(&self) -> usize {
    self.inner.workers().len()
  }

  /// Pause every active worker and wait for them to vacate.
  ///
  /// On timeout, stragglers stay registered so a subsequent call can retry.
  pub async fn shutdown(&self) -> Result<(), PoolError> {
    self.inner.accepting.store(false, Ordering::SeqCst);
    info!("worker pool shutting down");

    {
      let workers = self.inner.workers();
      for signals in workers.values() {
        signals.request_stop(StopRequest::Pause);
      }
    }

    let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_timeout;
    loop {
      let vacated = self.inner.vacated.notified();
      if self.inner.workers().is_empty() {
        info!("worker pool drained");
        return Ok(());
      }
      if tokio::time::timeout_at(deadline, vacated).await.is_err() {
        let pending: Vec<String> = self.inner.workers().keys().cloned().collect();
        warn!(pending = ?pending, "shutdown timed out");
        return Err(PoolError::ShutdownTimeout { pending });
      }
    }
  }

  fn ensure_accepting(&self) -> Result<(), PoolError> {
    if self.inner.accepting.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(PoolError::NotStarted)
    }
  }

  /// Atomically claim the mission id in the active-worker map.
  fn reserve(&self, mission_id: &str) -> Result<StopSignals, PoolError> {
    let mut workers = self.inner.workers();
    if workers.contains_key(mission_id) {
      return Err(PoolError::DuplicateMission {
        mission_id: mission_id.to_string(),
      });
    }
    let signals = StopSignals::new();
    workers.insert(mission_id.to_string(), signals.clone());
    Ok(signals)
  }

  fn build_context(&self, mission: &Mission) -> BuildContext {
    BuildContext {
      mission_id: mission.id.clone(),
      robot_id: mission.robot_id.clone(),
      arguments: mission.arguments.clone(),
      robot: self.inner.robot.clone(),
    }
  }

  /// Scan the store and resume everything non-terminal. Per-mission failures
  /// are recorded and logged; they never abort startup.
  async fn resume_stored(&self) -> Result<(), PoolError> {
    let snapshots = self.inner.store.list().await?;
    for snapshot in snapshots {
      if !snapshot.is_resumable() {
        continue;
      }
      let mission_id = snapshot.mission.id.clone();
      match self.resume_snapshot(snapshot).await {
        Ok(()) => {}
        Err(PoolError::DuplicateMission { .. }) => {}
        Err(e) => {
          error!(mission_id = %mission_id, error = %e, "failed to resume mission");
          self.record_resume_failure(&mission_id).await;
        }
      }
    }
    Ok(())
  }

  async fn record_resume_failure(&self, mission_id: &str) {
    let Ok(Some(mut snapshot)) = self.inner.store.get(mission_id).await else {
      return;
    };
    snapshot.mission.set_status(MissionStatus::Failed);
    if let Err(e) = self.inner.store.put(&snapshot).await {
      warn!(mission_id = %mission_id, error = %e, "failed to record resume failure");
    }
  }

  async fn resume_snapshot(&self, snapshot: Snapshot) -> Result<(), PoolError> {
    let Snapshot {
      mission,
      options,
      tree,
    } = snapshot;

    let signals = self.reserve(&mission.id)?;
    let ctx = self.build_context(&mission);

    let restored = match self.restore_tree(&ctx, &mission, &options, tree.as_ref()) {
      Ok(restored) => restored,
      Err(e) => {
        self.inner.remove_worker(&mission.id);
        return Err(e);
      }
    };

    info!(mission_id = %mission.id, "mission_resumed");
    self.spawn_worker(Worker::new(mission, options, restored), signals);
    Ok(())
  }

  /// Rebuild the mission's tree. With a stored tree, the reconstructed
  /// structure must match a fresh build of the same definition; without one
  /// (the mission never started), build from scratch.
  fn restore_tree(
    &self,
    ctx: &BuildContext,
    mission: &Mission,
    options: &MissionRuntimeOptions,
    stored: Option<&waypost_tree::NodeSnapshot>,
  ) -> Result<Node, PoolError> {
    let fresh = self
      .inner
      .tree_builder
      .build(ctx, &mission.definition, options)?;

    match stored {
      Some(stored) => {
        if !fresh.snapshot().structure_matches(stored) {
          return Err(
            SnapshotError::TreeIntegrity {
              message: format!(
                "stored tree for mission '{}' does not match its definition",
                mission.id
              ),
            }
            .into(),
          );
        }
        Ok(Node::from_snapshot(stored, &self.inner.registry, ctx)?)
      }
      None => Ok(fresh),
    }
  }

  fn spawn_worker(&self, worker: Worker, signals: StopSignals) {
    let inner = self.inner.clone();
    let mission_id = worker.mission().id.clone();

    tokio::spawn(async move {
      // Respect the concurrency bound before any execution starts.
      let _permit = match &inner.permits {
        Some(semaphore) => {
          // A stop request beats a freed permit.
          tokio::select! {
            biased;
            _ = signals.token.cancelled() => {
              // Stopped while still queued. A cancel ends the mission; a
              // pause leaves the pending snapshot for the next startup.
              if matches!(signals.request.get(), Some(StopRequest::Cancel)) {
                let snapshot = worker.settle_unstarted(MissionStatus::Cancelled);
                if let Err(e) = inner.store.put(&snapshot).await {
                  warn!(mission_id = %mission_id, error = %e, "failed to record cancelled mission");
                }
              }
              inner.remove_worker(&mission_id);
              return;
            }
            permit = semaphore.clone().acquire_owned() => permit.ok(),
          }
        }
        None => None,
      };

      let mission = worker.run(inner.store.clone(), signals).await;
      debug!(mission_id = %mission.id, status = %mission.status, "worker vacated");
      inner.remove_worker(&mission_id);
    });
  }
}

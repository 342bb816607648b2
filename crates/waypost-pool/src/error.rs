//! Pool errors.

use waypost_mission::MissionStatus;
use waypost_store::StoreError;
use waypost_tree::{BuildError, SnapshotError};

/// Errors surfaced by the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
  /// The mission id already maps to an active worker.
  #[error("mission '{mission_id}' already has an active worker")]
  DuplicateMission { mission_id: String },

  /// The pool is not accepting submissions.
  #[error("worker pool has not been started")]
  NotStarted,

  /// No snapshot exists for the mission.
  #[error("no snapshot found for mission '{mission_id}'")]
  SnapshotNotFound { mission_id: String },

  /// The mission has no active worker to act on.
  #[error("mission '{mission_id}' has no active worker")]
  NotActive { mission_id: String },

  /// The mission already reached a terminal state and cannot resume.
  #[error("mission '{mission_id}' already finished as {status}")]
  NotResumable {
    mission_id: String,
    status: MissionStatus,
  },

  /// Workers still registered when the shutdown timeout elapsed.
  #[error("shutdown timed out with {} workers still active", .pending.len())]
  ShutdownTimeout { pending: Vec<String> },

  /// The mission's tree could not be built.
  #[error("failed to build mission tree: {0}")]
  Build(#[from] BuildError),

  /// The mission's snapshot could not be reconstructed.
  #[error("failed to reconstruct mission tree: {0}")]
  Snapshot(#[from] SnapshotError),

  /// The snapshot store failed.
  #[error("snapshot store error: {0}")]
  Store(#[from] StoreError),
}

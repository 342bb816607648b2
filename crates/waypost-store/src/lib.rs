//! Waypost snapshot store.
//!
//! Durable get/put/delete of mission snapshots keyed by mission id. A
//! [`Snapshot`] is written whenever a worker pauses, fails, completes, or the
//! pool shuts down, and read back at pool startup to resume in-flight
//! missions.
//!
//! Two implementations ship with the crate:
//! - [`MemoryStore`] for tests and demos
//! - [`SqliteStore`] for real deployments

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use waypost_mission::{Mission, MissionRuntimeOptions};
use waypost_tree::NodeSnapshot;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// The snapshot payload could not be encoded or decoded.
  #[error("snapshot serialization failed: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// A durable, resumable record of one mission's execution progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub mission: Mission,
  #[serde(default)]
  pub options: MissionRuntimeOptions,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tree: Option<NodeSnapshot>,
}

impl Snapshot {
  pub fn new(mission: Mission, options: MissionRuntimeOptions, tree: Option<NodeSnapshot>) -> Self {
    Self {
      mission,
      options,
      tree,
    }
  }

  /// Whether a restarted pool should pick this mission back up.
  pub fn is_resumable(&self) -> bool {
    !self.mission.status.is_terminal()
  }
}

/// Storage trait for mission snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
  /// Get the snapshot for a mission, if one exists.
  async fn get(&self, mission_id: &str) -> Result<Option<Snapshot>, StoreError>;

  /// Insert or replace the snapshot for a mission.
  async fn put(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

  /// Delete the snapshot for a mission.
  async fn delete(&self, mission_id: &str) -> Result<(), StoreError>;

  /// List every stored snapshot.
  async fn list(&self) -> Result<Vec<Snapshot>, StoreError>;
}

use std::path::Path;

use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;

use crate::{Snapshot, SnapshotStore, StoreError};

use async_trait::async_trait;

/// SQLite-backed snapshot store.
///
/// Snapshots are stored as a JSON payload keyed by mission id, with robot id
/// and status denormalized for ad-hoc querying.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a store over an existing connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Create the snapshot schema if it does not exist.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS mission_snapshots (
                mission_id TEXT PRIMARY KEY,
                robot_id TEXT NOT NULL,
                status TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
    )
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
  async fn get(&self, mission_id: &str) -> Result<Option<Snapshot>, StoreError> {
    let row: Option<(String,)> = sqlx::query_as(
      r#"
            SELECT snapshot FROM mission_snapshots
            WHERE mission_id = ?
            "#,
    )
    .bind(mission_id)
    .fetch_optional(&self.pool)
    .await?;

    match row {
      Some((payload,)) => Ok(Some(serde_json::from_str(&payload)?)),
      None => Ok(None),
    }
  }

  async fn put(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
    let payload = serde_json::to_string(snapshot)?;

    sqlx::query(
      r#"
            INSERT INTO mission_snapshots (mission_id, robot_id, status, snapshot, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(mission_id) DO UPDATE SET
                robot_id = excluded.robot_id,
                status = excluded.status,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
            "#,
    )
    .bind(&snapshot.mission.id)
    .bind(&snapshot.mission.robot_id)
    .bind(snapshot.mission.status.as_str())
    .bind(&payload)
    .bind(snapshot.mission.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn delete(&self, mission_id: &str) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            DELETE FROM mission_snapshots
            WHERE mission_id = ?
            "#,
    )
    .bind(mission_id)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list(&self) -> Result<Vec<Snapshot>, StoreError> {
    let rows: Vec<(String,)> = sqlx::query_as(
      r#"
            SELECT snapshot FROM mission_snapshots
            ORDER BY updated_at ASC
            "#,
    )
    .fetch_all(&self.pool)
    .await?;

    rows
      .into_iter()
      .map(|(payload,)| serde_json::from_str(&payload).map_err(StoreError::from))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use waypost_mission::{Mission, MissionDefinition, MissionRuntimeOptions, MissionStatus};

  async fn in_memory_store() -> SqliteStore {
    // One connection only: every pooled connection to :memory: would
    // otherwise see its own empty database.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await
      .unwrap();
    let store = SqliteStore::new(pool);
    store.migrate().await.unwrap();
    store
  }

  fn sample(id: &str, status: MissionStatus) -> Snapshot {
    let mut mission = Mission::new(
      id,
      "robot-1",
      MissionDefinition {
        label: "test".to_string(),
        steps: vec![],
      },
    );
    mission.set_status(status);
    Snapshot::new(mission, MissionRuntimeOptions::default(), None)
  }

  #[tokio::test]
  async fn round_trips_a_snapshot() {
    let store = in_memory_store().await;
    let snapshot = sample("m-1", MissionStatus::Running);

    store.put(&snapshot).await.unwrap();
    assert_eq!(store.get("m-1").await.unwrap(), Some(snapshot));
    assert_eq!(store.get("missing").await.unwrap(), None);
  }

  #[tokio::test]
  async fn upserts_on_conflicting_mission_id() {
    let store = in_memory_store().await;
    store.put(&sample("m-1", MissionStatus::Running)).await.unwrap();
    store.put(&sample("m-1", MissionStatus::Paused)).await.unwrap();

    let snapshots = store.list().await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].mission.status, MissionStatus::Paused);
  }

  #[tokio::test]
  async fn delete_removes_the_row() {
    let store = in_memory_store().await;
    store.put(&sample("m-1", MissionStatus::Running)).await.unwrap();
    store.delete("m-1").await.unwrap();
    assert!(store.list().await.unwrap().is_empty());
  }
}

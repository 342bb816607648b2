use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::{Snapshot, SnapshotStore, StoreError};

/// In-memory snapshot store. Contents die with the process, so it only suits
/// tests, demos, and deployments that accept losing progress on restart.
#[derive(Default)]
pub struct MemoryStore {
  snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn snapshots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Snapshot>> {
    self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
  async fn get(&self, mission_id: &str) -> Result<Option<Snapshot>, StoreError> {
    Ok(self.snapshots().get(mission_id).cloned())
  }

  async fn put(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
    self
      .snapshots()
      .insert(snapshot.mission.id.clone(), snapshot.clone());
    Ok(())
  }

  async fn delete(&self, mission_id: &str) -> Result<(), StoreError> {
    self.snapshots().remove(mission_id);
    Ok(())
  }

  async fn list(&self) -> Result<Vec<Snapshot>, StoreError> {
    Ok(self.snapshots().values().cloned().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use waypost_mission::{Mission, MissionDefinition, MissionRuntimeOptions, MissionStatus};

  fn sample(id: &str) -> Snapshot {
    let mission = Mission::new(
      id,
      "robot-1",
      MissionDefinition {
        label: "test".to_string(),
        steps: vec![],
      },
    );
    Snapshot::new(mission, MissionRuntimeOptions::default(), None)
  }

  #[tokio::test]
  async fn put_get_delete_round_trip() {
    let store = MemoryStore::new();
    let snapshot = sample("m-1");

    store.put(&snapshot).await.unwrap();
    assert_eq!(store.get("m-1").await.unwrap(), Some(snapshot.clone()));

    store.delete("m-1").await.unwrap();
    assert_eq!(store.get("m-1").await.unwrap(), None);
  }

  #[tokio::test]
  async fn put_replaces_an_existing_snapshot() {
    let store = MemoryStore::new();
    let mut snapshot = sample("m-1");
    store.put(&snapshot).await.unwrap();

    snapshot.mission.set_status(MissionStatus::Succeeded);
    store.put(&snapshot).await.unwrap();

    let fetched = store.get("m-1").await.unwrap().unwrap();
    assert_eq!(fetched.mission.status, MissionStatus::Succeeded);
    assert_eq!(store.list().await.unwrap().len(), 1);
  }
}

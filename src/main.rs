use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use waypost_mission::{Mission, MissionDefinition, MissionRuntimeOptions};
use waypost_pool::WorkerPool;
use waypost_store::{MemoryStore, SnapshotStore, SqliteStore};

use crate::sim::SimRobot;

mod sim;

/// Waypost - a behavior-tree mission executor for robot fleets
#[derive(Parser)]
#[command(name = "waypost")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the snapshot database (default: ~/.waypost/missions.db)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Execute a mission file against the simulated robot
  Run {
    /// Path to the mission file (JSON)
    mission_file: PathBuf,

    /// Use an in-memory store instead of the snapshot database
    #[arg(long)]
    ephemeral: bool,

    /// Fail the mission if it runs longer than this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Extra attempts for the whole mission after a failure
    #[arg(long)]
    retries: Option<u32>,
  },

  /// Resume every non-terminal mission in the snapshot database
  Resume,
}

/// Mission input file: a mission definition plus routing metadata. The id is
/// generated when omitted.
#[derive(Deserialize)]
struct MissionFile {
  #[serde(default)]
  id: Option<String>,
  robot_id: String,
  definition: MissionDefinition,
  #[serde(default)]
  arguments: HashMap<String, serde_json::Value>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    )
    .init();

  let cli = Cli::parse();
  let db_path = cli.db.unwrap_or_else(default_db_path);

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Some(Commands::Run {
      mission_file,
      ephemeral,
      timeout_secs,
      retries,
    }) => {
      let options = MissionRuntimeOptions {
        timeout_secs,
        retries,
      };
      rt.block_on(run_mission(mission_file, db_path, ephemeral, options))
    }
    Some(Commands::Resume) => rt.block_on(resume_missions(db_path)),
    None => {
      println!("waypost - use --help to see available commands");
      Ok(())
    }
  }
}

fn default_db_path() -> PathBuf {
  dirs::home_dir()
    .expect("could not determine home directory")
    .join(".waypost")
    .join("missions.db")
}

async fn open_store(db_path: &Path) -> Result<Arc<dyn SnapshotStore>> {
  if let Some(parent) = db_path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = SqliteStore::open(db_path)
    .await
    .with_context(|| format!("failed to open snapshot database at {}", db_path.display()))?;
  Ok(Arc::new(store))
}

async fn run_mission(
  mission_file: PathBuf,
  db_path: PathBuf,
  ephemeral: bool,
  options: MissionRuntimeOptions,
) -> Result<()> {
  let content = tokio::fs::read_to_string(&mission_file)
    .await
    .with_context(|| format!("failed to read mission file: {}", mission_file.display()))?;
  let file: MissionFile = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse mission file: {}", mission_file.display()))?;

  let mission_id = file
    .id
    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
  let mission = Mission::new(mission_id.clone(), file.robot_id, file.definition)
    .with_arguments(file.arguments);
  eprintln!(
    "Submitting mission {} ({} steps)",
    mission_id,
    mission.definition.steps.len()
  );

  let store: Arc<dyn SnapshotStore> = if ephemeral {
    Arc::new(MemoryStore::new())
  } else {
    open_store(&db_path).await?
  };
  let robot = Arc::new(SimRobot::new(Duration::from_millis(500)));
  let pool = WorkerPool::with_defaults(store, robot);

  pool.start().await?;
  pool.submit_work(mission, options).await?;
  wait_for_drain(&pool).await;

  let status = pool
    .mission_status(&mission_id)
    .await?
    .context("mission left no record")?;
  pool.shutdown().await?;

  println!("{mission_id}: {status}");
  Ok(())
}

async fn resume_missions(db_path: PathBuf) -> Result<()> {
  let store = open_store(&db_path).await?;
  let resumable: Vec<String> = store
    .list()
    .await?
    .into_iter()
    .filter(|snapshot| snapshot.is_resumable())
    .map(|snapshot| snapshot.mission.id)
    .collect();

  if resumable.is_empty() {
    println!("nothing to resume");
    return Ok(());
  }
  eprintln!("Resuming {} mission(s)", resumable.len());

  let robot = Arc::new(SimRobot::new(Duration::from_millis(500)));
  let pool = WorkerPool::with_defaults(store, robot);
  pool.start().await?;
  wait_for_drain(&pool).await;

  for mission_id in resumable {
    if let Some(status) = pool.mission_status(&mission_id).await? {
      println!("{mission_id}: {status}");
    }
  }
  pool.shutdown().await?;
  Ok(())
}

async fn wait_for_drain(pool: &WorkerPool) {
  while pool.active_count() > 0 {
    tokio::time::sleep(Duration::from_millis(100)).await;
  }
}

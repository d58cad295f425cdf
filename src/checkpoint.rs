//! Pluggable persistence for `AgentState`, keyed by `run_id`: an
//! in-memory store for tests and short-lived runs, a one-file-per-run
//! store, and a SQLite store for durable multi-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::AgentState;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, state: &AgentState) -> Result<(), String>;
    async fn load(&self, run_id: &str) -> Result<Option<AgentState>, String>;
    async fn list_runs(&self) -> Result<Vec<String>, String>;
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: Mutex<HashMap<String, AgentState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &AgentState) -> Result<(), String> {
        self.states.lock().unwrap().insert(state.run_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<AgentState>, String> {
        Ok(self.states.lock().unwrap().get(run_id).cloned())
    }

    async fn list_runs(&self) -> Result<Vec<String>, String> {
        Ok(self.states.lock().unwrap().keys().cloned().collect())
    }
}

/// One JSON file per run, named `<run_id>.json`.
pub struct FileCheckpointStore {
    base_path: std::path::PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        let path = path.into();
        let _ = std::fs::create_dir_all(&path);
        Self { base_path: path }
    }

    fn run_path(&self, run_id: &str) -> std::path::PathBuf {
        self.base_path.join(format!("{run_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &AgentState) -> Result<(), String> {
        let path = self.run_path(&state.run_id);
        let data = serde_json::to_string_pretty(state).map_err(|e| e.to_string())?;
        std::fs::write(&path, data).map_err(|e| e.to_string())
    }

    async fn load(&self, run_id: &str) -> Result<Option<AgentState>, String> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
        let state = serde_json::from_str(&data).map_err(|e| e.to_string())?;
        Ok(Some(state))
    }

    async fn list_runs(&self) -> Result<Vec<String>, String> {
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.base_path).map_err(|e| e.to_string())? {
            let entry = entry.map_err(|e| e.to_string())?;
            if let Some(stem) = entry.path().file_stem() {
                runs.push(stem.to_string_lossy().to_string());
            }
        }
        Ok(runs)
    }
}

/// SQLite-backed store: one row per run, overwritten on every save
/// (checkpointing captures the latest state, not a history of states).
pub struct SqliteCheckpointStore {
    path: std::path::PathBuf,
}

impl SqliteCheckpointStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let conn = rusqlite::Connection::open(&path).map_err(|e| e.to_string())?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS agent_checkpoints (
                run_id     TEXT PRIMARY KEY,
                state      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| e.to_string())?;
        Ok(Self { path })
    }

    fn connect(&self) -> Result<rusqlite::Connection, String> {
        rusqlite::Connection::open(&self.path).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, state: &AgentState) -> Result<(), String> {
        let conn = self.connect()?;
        let state_json = serde_json::to_string(state).map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO agent_checkpoints (run_id, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(run_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            rusqlite::params![state.run_id, state_json, state.updated_at.to_rfc3339()],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<AgentState>, String> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT state FROM agent_checkpoints WHERE run_id = ?1")
            .map_err(|e| e.to_string())?;
        let mut rows = stmt.query(rusqlite::params![run_id]).map_err(|e| e.to_string())?;
        if let Some(row) = rows.next().map_err(|e| e.to_string())? {
            let state_json: String = row.get(0).map_err(|e| e.to_string())?;
            let state = serde_json::from_str(&state_json).map_err(|e| e.to_string())?;
            Ok(Some(state))
        } else {
            Ok(None)
        }
    }

    async fn list_runs(&self) -> Result<Vec<String>, String> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT run_id FROM agent_checkpoints").map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.map_err(|e| e.to_string())?);
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryCheckpointStore::new();
        let state = AgentState::new("run-1", "ws-1", "be helpful");
        store.save(&state).await.unwrap();
        let loaded = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.run_id, "run-1");
        assert_eq!(loaded.messages.len(), state.messages.len());
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let state = AgentState::new("run-2", "ws-1", "");
        store.save(&state).await.unwrap();
        let loaded = store.load("run-2").await.unwrap().unwrap();
        assert_eq!(loaded.run_id, "run-2");
        assert_eq!(store.list_runs().await.unwrap(), vec!["run-2".to_string()]);
    }

    #[tokio::test]
    async fn sqlite_store_overwrites_on_resave() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCheckpointStore::new(dir.path().join("checkpoints.db")).unwrap();
        let mut state = AgentState::new("run-3", "ws-1", "");
        store.save(&state).await.unwrap();
        state.iterations = 5;
        store.save(&state).await.unwrap();
        let loaded = store.load("run-3").await.unwrap().unwrap();
        assert_eq!(loaded.iterations, 5);
        assert_eq!(store.list_runs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_run_loads_as_none() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("nope").await.unwrap().is_none());
    }
}

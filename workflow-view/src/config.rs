use std::path::PathBuf;
use std::time::Duration;

use crate::error::StorageError;
use crate::layout::CanvasSize;
use crate::storage::{FileStore, KeyValueStore, MemoryStore, SqliteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    Memory,
    File,
    Sqlite,
}

impl StateBackend {
    fn from_env(value: &str) -> anyhow::Result<Self> {
        match value {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(anyhow::anyhow!(
                "Invalid WORKFLOW_STATE_BACKEND '{other}'. Expected 'memory', 'file' or 'sqlite'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Where session state survives a restart
    pub state_backend: StateBackend,
    /// Directory for the file backend, database path for SQLite
    pub state_path: PathBuf,
    /// Namespace prepended to every persisted key
    pub storage_prefix: String,
    pub canvas: CanvasSize,
    /// Narrow viewport with the detail pane open
    pub half_screen: bool,
    /// Quiet period before a resize triggers a re-layout
    pub relayout_debounce: Duration,
    /// Delay before panels are re-anchored after they change
    pub panel_settle: Duration,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_backend: StateBackend::File,
            state_path: PathBuf::from("./data/workflow-state"),
            storage_prefix: "workflow".to_string(),
            canvas: CanvasSize::default(),
            half_screen: false,
            relayout_debounce: Duration::from_millis(150),
            panel_settle: Duration::from_millis(100),
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            state_backend: StateBackend::from_env(&env_str("WORKFLOW_STATE_BACKEND", "file"))?,
            state_path: PathBuf::from(env_str(
                "WORKFLOW_STATE_PATH",
                &defaults.state_path.to_string_lossy(),
            )),
            storage_prefix: env_str("WORKFLOW_STORAGE_PREFIX", &defaults.storage_prefix),
            canvas: CanvasSize::new(
                env_parse("WORKFLOW_CANVAS_WIDTH", defaults.canvas.width)?,
                env_parse("WORKFLOW_CANVAS_HEIGHT", defaults.canvas.height)?,
            ),
            half_screen: env_flag("WORKFLOW_HALF_SCREEN", false)?,
            relayout_debounce: Duration::from_millis(env_parse(
                "WORKFLOW_RELAYOUT_DEBOUNCE_MS",
                150,
            )?),
            panel_settle: Duration::from_millis(env_parse("WORKFLOW_PANEL_SETTLE_MS", 100)?),
            log_json: env_flag("WORKFLOW_LOG_JSON", false)?,
        })
    }

    /// Open the configured durable store.
    pub fn open_store(&self) -> Result<Box<dyn KeyValueStore>, StorageError> {
        Ok(match self.state_backend {
            StateBackend::Memory => Box::new(MemoryStore::new()),
            StateBackend::File => Box::new(FileStore::open(&self.state_path)?),
            StateBackend::Sqlite => {
                Box::new(SqliteStore::open(&self.state_path.to_string_lossy())?)
            }
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Boolean switch accepting `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn env_flag(key: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            other => Err(anyhow::anyhow!("Failed to parse env var {key}={other}: expected a boolean")),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        assert_eq!(StateBackend::from_env("sqlite").unwrap(), StateBackend::Sqlite);
        assert!(StateBackend::from_env("redis").is_err());
    }

    #[test]
    fn test_open_store_per_backend() {
        let dir = tempfile::tempdir().unwrap();
        for (backend, path) in [
            (StateBackend::Memory, dir.path().join("unused")),
            (StateBackend::File, dir.path().join("files")),
            (StateBackend::Sqlite, dir.path().join("state.db")),
        ] {
            let config = Config {
                state_backend: backend,
                state_path: path,
                ..Config::default()
            };
            let mut store = config.open_store().unwrap();
            store.set("workflow:k", "v").unwrap();
            assert_eq!(store.get("workflow:k").unwrap().as_deref(), Some("v"));
        }
    }

    #[test]
    fn test_env_parse_reports_bad_values() {
        std::env::set_var("WORKFLOW_TEST_ONLY_NUMBER", "abc");
        assert!(env_parse::<u64>("WORKFLOW_TEST_ONLY_NUMBER", 1).is_err());
        std::env::remove_var("WORKFLOW_TEST_ONLY_NUMBER");
        assert_eq!(env_parse::<u64>("WORKFLOW_TEST_ONLY_NUMBER", 7).unwrap(), 7);
    }

    #[test]
    fn test_env_flag_accepts_numeric_switches() {
        std::env::set_var("WORKFLOW_TEST_ONLY_FLAG", "1");
        assert!(env_flag("WORKFLOW_TEST_ONLY_FLAG", false).unwrap());
        std::env::set_var("WORKFLOW_TEST_ONLY_FLAG", "Off");
        assert!(!env_flag("WORKFLOW_TEST_ONLY_FLAG", true).unwrap());
        std::env::set_var("WORKFLOW_TEST_ONLY_FLAG", "maybe");
        assert!(env_flag("WORKFLOW_TEST_ONLY_FLAG", false).is_err());
        std::env::remove_var("WORKFLOW_TEST_ONLY_FLAG");
        assert!(env_flag("WORKFLOW_TEST_ONLY_FLAG", true).unwrap());
    }
}

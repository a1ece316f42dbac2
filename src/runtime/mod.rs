//! Engine core: configuration and the subsystems the service is built from
//!
//! The service layer owns the socket and the command table; everything it
//! needs to track deferred responses, project state, and persist runs lives
//! here.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod journal;
pub mod scheduler;
pub mod snapshot;
pub mod storage;

use error::ConfigError;
use snapshot::{ExclusionSet, SnapshotPolicy};

/// Environment variable overriding [`RuntimeConfig::host`].
pub const ENV_HOST: &str = "DECKHAND_HOST";

/// Environment variable overriding [`RuntimeConfig::port`].
pub const ENV_PORT: &str = "DECKHAND_PORT";

/// Configuration for the deckhand engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Root directory for run logs, checkpoints and the config file (default: .deckhand/)
    pub root: PathBuf,

    /// Address the listener binds to
    pub host: String,

    /// Port the listener binds to
    pub port: u16,

    /// Depth budget for state snapshots
    pub snapshot_depth: usize,

    /// Table keys never included in snapshots
    pub excluded_fields: Vec<String>,

    /// Minimum time a completion condition must hold, in milliseconds
    pub settle_delay_ms: u64,

    /// Deadline for pending completions in milliseconds; `None` waits forever
    pub completion_timeout_ms: Option<u64>,

    /// Record completed commands to `<root>/runs/`
    pub log_runs: bool,

    /// Simulation ticks per second when serving the headless simulation
    pub ticks_per_second: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".deckhand"),
            host: "127.0.0.1".to_string(),
            port: 12346,
            snapshot_depth: snapshot::DEFAULT_MAX_DEPTH,
            excluded_fields: snapshot::DEFAULT_EXCLUDED
                .iter()
                .map(|key| key.to_string())
                .collect(),
            settle_delay_ms: 100,
            completion_timeout_ms: Some(30_000),
            log_runs: true,
            ticks_per_second: 60,
        }
    }
}

impl RuntimeConfig {
    /// Address to listen on.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let text = format!("{}:{}", self.host, self.port);
        text.parse().map_err(|_| ConfigError::InvalidValue {
            key: "host",
            value: text,
        })
    }

    /// Minimum settle duration for completions.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Completion deadline.
    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_ms.map(Duration::from_millis)
    }

    /// Interval between simulation ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.ticks_per_second.max(1)
    }

    /// Snapshot policy built from the depth and exclusion settings.
    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy {
            max_depth: self.snapshot_depth,
            excluded: self.excluded_fields.iter().cloned().collect::<ExclusionSet>(),
        }
    }

    /// Apply `DECKHAND_HOST` / `DECKHAND_PORT` from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "port",
                value: port,
            })?;
        }
        Ok(())
    }
}

// Re-export commonly used types
pub use error::{ApiError, ErrorCode, ErrorResponse, RuntimeError};
pub use journal::{FunctionCall, LogEntry, RunLog};
pub use scheduler::{Completion, Condition, Scheduler};
pub use snapshot::Snapshotter;
pub use storage::{CheckpointStore, Storage};

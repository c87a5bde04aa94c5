//! Client configuration.

use std::path::PathBuf;

use crate::error::{MegaError, Result};

pub const DEFAULT_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 16;

pub const SESSION_FILE: &str = "megashell_session.json";
pub const HISTORY_FILE: &str = "megashell_history.txt";

/// What [`WorkerPool::stop`](crate::session::WorkerPool::stop) does with
/// commands that are queued but not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// Run every queued command before `stop` returns.
    #[default]
    Drain,
    /// Fail every queued command with `PoolStopped`.
    Discard,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application key sent with the login handshake.
    pub app_key: String,
    /// Number of worker tasks (1..=16).
    pub workers: usize,
    pub drain_policy: DrainPolicy,
    /// Where the session record is persisted, if anywhere.
    pub session_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            workers: DEFAULT_WORKERS,
            drain_policy: DrainPolicy::Drain,
            session_file: None,
            history_file: None,
        }
    }

    /// Build from `MEGA_API_KEY` and `MEGA_WORKERS`, with the session and
    /// history files in the working directory.
    pub fn from_env() -> Result<Self> {
        let app_key = std::env::var("MEGA_API_KEY").map_err(|_| {
            MegaError::Custom("MEGA_API_KEY must be set to the application key".to_string())
        })?;
        let mut config = Self::new(app_key)
            .with_session_file(SESSION_FILE)
            .with_history_file(HISTORY_FILE);
        if let Ok(raw) = std::env::var("MEGA_WORKERS") {
            let workers = raw
                .trim()
                .parse::<usize>()
                .map_err(|_| MegaError::Custom(format!("MEGA_WORKERS: invalid count {:?}", raw)))?;
            config = config.with_workers(workers);
        }
        Ok(config)
    }

    /// Set the worker count, clamped to 1..=16.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain_policy = policy;
        self
    }

    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    pub fn with_history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = Some(path.into());
        self
    }
}

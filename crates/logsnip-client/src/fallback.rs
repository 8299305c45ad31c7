//! Append-only local log used when snippets cannot be delivered

use chrono::Utc;
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::client_state::ClientState;

pub const FALLBACK_LOG_ENV: &str = "LOGSNIP_FALLBACK_LOG";

#[derive(Debug, Clone)]
pub struct FallbackLog {
    path: Option<PathBuf>,
}

impl FallbackLog {
    /// `$LOGSNIP_FALLBACK_LOG`, else `error.log` in the state directory
    pub fn from_env() -> Self {
        let path = env::var_os(FALLBACK_LOG_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| ClientState::open().ok().map(|s| s.fallback_log_path()));
        Self { path }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one timestamped line. Failures are swallowed.
    pub fn write(&self, message: &str) {
        let Some(path) = &self.path else {
            return;
        };

        let line = format!(
            "[{}] {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            message.replace('\n', " ")
        );

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(line.as_bytes()));

        if let Err(e) = result {
            debug!(path = %path.display(), error = %e, "Fallback log not writable");
        }
    }
}

//! Persisted per-client state: the client UUID and the default project override
//!
//! Stored as small text files in the state directory
//! (`$LOGSNIP_STATE_DIR` or `~/.logsnip/state`), so one machine keeps a stable
//! identity across runs.

use anyhow::{Context, Result};
use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};
use uuid::Uuid;

pub const STATE_DIR_ENV: &str = "LOGSNIP_STATE_DIR";

const UUID_FILE: &str = "client_uuid";
const DEFAULT_PROJECT_FILE: &str = "default_project";
const FALLBACK_LOG_FILE: &str = "error.log";

/// Get the state directory, creating it when missing
pub fn get_state_dir() -> Result<PathBuf> {
    let state_dir = match env::var_os(STATE_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home_dir = dirs::home_dir().context("Could not determine home directory")?;
            home_dir.join(".logsnip").join("state")
        }
    };
    fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create state dir: {}", state_dir.display()))?;
    Ok(state_dir)
}

/// Whether `candidate` has the shape of an RFC-4122 version 4 UUID
pub fn is_v4_uuid(candidate: &str) -> bool {
    static UUID_V4: OnceLock<Option<Regex>> = OnceLock::new();
    UUID_V4
        .get_or_init(|| {
            Regex::new(
                r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$",
            )
            .ok()
        })
        .as_ref()
        .is_some_and(|re| re.is_match(candidate))
}

/// Handle on the client state directory
#[derive(Debug, Clone)]
pub struct ClientState {
    dir: PathBuf,
}

impl ClientState {
    /// Open the default state directory
    pub fn open() -> Result<Self> {
        Ok(Self {
            dir: get_state_dir()?,
        })
    }

    /// Use an explicit directory (does not create it)
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Previously persisted client UUID, if present and well-formed
    pub fn stored_uuid(&self) -> Option<String> {
        let stored = read_trimmed(&self.dir.join(UUID_FILE))?;
        if is_v4_uuid(&stored) {
            Some(stored)
        } else {
            warn!(path = %self.dir.join(UUID_FILE).display(), "Ignoring malformed client UUID");
            None
        }
    }

    pub fn store_uuid(&self, uuid: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(UUID_FILE), uuid).context("Failed to write client UUID")
    }

    /// Recover the persisted UUID or generate a fresh v4 one.
    ///
    /// A fresh UUID is only persisted when `persist` is true.
    pub fn resolve_uuid(&self, persist: bool) -> String {
        if let Some(uuid) = self.stored_uuid() {
            debug!("Existing client UUID found");
            return uuid;
        }

        warn!("Client UUID not found, generating a new one");
        let uuid = Uuid::new_v4().to_string();

        if persist {
            match self.store_uuid(&uuid) {
                Ok(()) => debug!("Client UUID persisted"),
                Err(e) => warn!(error = %e, "Could not persist client UUID"),
            }
        } else {
            warn!("Persisting client state is not allowed, client UUID was NOT stored");
        }

        uuid
    }

    /// Per-client default project override
    pub fn default_project_override(&self) -> Option<String> {
        read_trimmed(&self.dir.join(DEFAULT_PROJECT_FILE))
    }

    pub fn store_default_project(&self, project: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(DEFAULT_PROJECT_FILE), project)
            .context("Failed to write default project")
    }

    pub fn fallback_log_path(&self) -> PathBuf {
        self.dir.join(FALLBACK_LOG_FILE)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_uuid_shape() {
        assert!(is_v4_uuid("3f2504e0-4f89-41d3-9a0c-0305e82c3301"));
        assert!(is_v4_uuid("3F2504E0-4F89-41D3-9A0C-0305E82C3301"));
        // version nibble must be 4
        assert!(!is_v4_uuid("3f2504e0-4f89-11d3-9a0c-0305e82c3301"));
        // variant nibble must be 8, 9, a or b
        assert!(!is_v4_uuid("3f2504e0-4f89-41d3-1a0c-0305e82c3301"));
        assert!(!is_v4_uuid("00000000-0000-0000-0000-000000000000"));
        assert!(!is_v4_uuid("not-a-uuid"));
    }

    #[test]
    fn test_generated_uuid_is_persisted_and_reused() {
        let temp = TempDir::new().unwrap();
        let state = ClientState::at(temp.path());

        let first = state.resolve_uuid(true);
        assert!(is_v4_uuid(&first));

        let second = state.resolve_uuid(true);
        assert_eq!(first, second);
    }

    #[test]
    fn test_uuid_not_persisted_when_disallowed() {
        let temp = TempDir::new().unwrap();
        let state = ClientState::at(temp.path());

        let first = state.resolve_uuid(false);
        assert!(is_v4_uuid(&first));
        assert!(state.stored_uuid().is_none());
        assert_ne!(first, state.resolve_uuid(false));
    }

    #[test]
    fn test_malformed_stored_uuid_is_replaced() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(UUID_FILE), "garbage").unwrap();
        let state = ClientState::at(temp.path());

        assert!(state.stored_uuid().is_none());
        let uuid = state.resolve_uuid(true);
        assert!(is_v4_uuid(&uuid));
        assert_eq!(state.stored_uuid().as_deref(), Some(uuid.as_str()));
    }

    #[test]
    fn test_default_project_override() {
        let temp = TempDir::new().unwrap();
        let state = ClientState::at(temp.path());
        assert!(state.default_project_override().is_none());

        state.store_default_project("staging\n").unwrap();
        assert_eq!(state.default_project_override().as_deref(), Some("staging"));
    }

    #[test]
    #[serial]
    fn test_state_dir_from_env() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("nested").join("state");
        let original = env::var(STATE_DIR_ENV).ok();

        env::set_var(STATE_DIR_ENV, &target);
        let dir = get_state_dir().unwrap();
        assert_eq!(dir, target);
        assert!(dir.exists());

        env::remove_var(STATE_DIR_ENV);
        if let Some(val) = original {
            env::set_var(STATE_DIR_ENV, val);
        }
    }
}

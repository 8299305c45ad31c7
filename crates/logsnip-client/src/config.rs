//! Client configuration loading and resolution

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::client_state::ClientState;

/// Explicit config file location, checked before every other candidate
pub const CONFIG_LOCATION_ENV: &str = "LOGSNIP_CONFIG_LOCATION";
/// Inline JSON configuration
pub const INLINE_CONFIG_ENV: &str = "LOGSNIP_CONFIG";
/// Forces the default project for this process
pub const DEFAULT_PROJECT_ENV: &str = "LOGSNIP_DEFAULT_PROJECT";

const DEFAULT_API_ADDRESS: &str = "https://app.phpconsole.com/api/0.3/";
const UNRESOLVED_UUID: &str = "00000000-0000-0000-0000-000000000000";
const DEFAULT_PROJECT_FILE: &str = ".logsnip_default_project";
const CA_BUNDLE_FILE: &str = "cacert.pem";
/// Upper bound for `contextSize`, in lines on each side of the call site
pub const MAX_CONTEXT_SIZE: usize = 1000;

/// How payloads are rendered to text before shipping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMethod {
    /// Human readable structure dump, booleans and null spelled out
    #[default]
    #[serde(alias = "print_r")]
    Print,
    /// Typed dump (`string(3) "abc"`, `bool(true)`, ...)
    #[serde(alias = "var_dump")]
    Dump,
}

/// Per-project credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    pub api_key: Option<String>,
    pub encryption_password: Option<String>,
}

impl ProjectSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            encryption_password: None,
        }
    }

    pub fn with_encryption_password(mut self, password: impl Into<String>) -> Self {
        self.encryption_password = Some(password.into());
        self
    }
}

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub debug: bool,
    pub api_address: String,
    pub default_project: String,
    pub projects: BTreeMap<String, ProjectSettings>,
    pub backtrace_depth: usize,
    pub is_context_enabled: bool,
    pub context_size: usize,
    pub capture_method: CaptureMethod,
    pub client_uuid: String,
    pub cookies_allowed: bool,
    /// PEM bundle the endpoint certificate is verified against
    pub ca_bundle: Option<PathBuf>,
    pub timeout_ms: u64,
    /// Base directory for relative call-site file names
    pub source_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            api_address: DEFAULT_API_ADDRESS.to_string(),
            default_project: "none".to_string(),
            projects: BTreeMap::new(),
            backtrace_depth: 3,
            is_context_enabled: true,
            context_size: 10,
            capture_method: CaptureMethod::Print,
            client_uuid: UNRESOLVED_UUID.to_string(),
            cookies_allowed: true,
            ca_bundle: None,
            timeout_ms: 5000,
            source_root: None,
        }
    }
}

/// Configuration as found in a source: every key optional, unknown keys ignored
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialConfig {
    pub debug: Option<bool>,
    pub api_address: Option<String>,
    pub default_project: Option<String>,
    pub projects: Option<BTreeMap<String, ProjectSettings>>,
    pub backtrace_depth: Option<usize>,
    pub is_context_enabled: Option<bool>,
    pub context_size: Option<usize>,
    #[serde(alias = "captureWith")]
    pub capture_method: Option<CaptureMethod>,
    pub cookies_allowed: Option<bool>,
    pub ca_bundle: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub source_root: Option<PathBuf>,
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Inline,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Inline => write!(f, "${}", INLINE_CONFIG_ENV),
        }
    }
}

/// A configuration together with its origin
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: ConfigSource,
}

impl Config {
    /// Build a config from defaults overlaid with `partial`.
    ///
    /// Client identity is not resolved; see [`Config::resolve_client_identity`].
    pub fn from_partial(partial: PartialConfig) -> Self {
        let mut config = Config::default();
        config.apply(partial);
        config
    }

    /// Overwrite every field present in `partial`
    pub fn apply(&mut self, partial: PartialConfig) {
        if let Some(debug) = partial.debug {
            self.debug = debug;
        }
        if let Some(api_address) = partial.api_address {
            self.api_address = api_address;
        }
        if let Some(default_project) = partial.default_project {
            self.default_project = default_project;
        }
        if let Some(projects) = partial.projects {
            self.projects = projects;
        }
        if let Some(depth) = partial.backtrace_depth {
            self.backtrace_depth = depth;
        }
        if let Some(enabled) = partial.is_context_enabled {
            self.is_context_enabled = enabled;
        }
        if let Some(size) = partial.context_size {
            if size > MAX_CONTEXT_SIZE {
                warn!(size, max = MAX_CONTEXT_SIZE, "contextSize too large, clamping");
            }
            self.context_size = size.min(MAX_CONTEXT_SIZE);
        }
        if let Some(method) = partial.capture_method {
            self.capture_method = method;
        }
        if let Some(allowed) = partial.cookies_allowed {
            self.cookies_allowed = allowed;
        }
        if partial.ca_bundle.is_some() {
            self.ca_bundle = partial.ca_bundle;
        }
        if let Some(timeout) = partial.timeout_ms {
            self.timeout_ms = timeout;
        }
        if partial.source_root.is_some() {
            self.source_root = partial.source_root;
        }

        debug!("Config loaded into Config object");
    }

    /// Fill in the client UUID and the effective default project
    pub fn resolve_client_identity(&mut self, state: &ClientState) {
        self.client_uuid = state.resolve_uuid(self.cookies_allowed);
        self.determine_default_project(state);
    }

    fn determine_default_project(&mut self, state: &ClientState) {
        if let Some(project) = env::var(DEFAULT_PROJECT_ENV).ok().filter(|p| !p.is_empty()) {
            debug!("Default project loaded from ${}", DEFAULT_PROJECT_ENV);
            self.default_project = project;
        } else if let Some(project) = read_project_file(Path::new(DEFAULT_PROJECT_FILE)) {
            debug!("Default project loaded from {}", DEFAULT_PROJECT_FILE);
            self.default_project = project;
        } else if let Some(project) = state.default_project_override() {
            debug!("Default project loaded from client state");
            self.default_project = project;
        }

        debug!(project = %self.default_project, "Default project determined");
    }

    pub fn project(&self, project: &str) -> Option<&ProjectSettings> {
        self.projects.get(project)
    }

    pub fn api_key_for(&self, project: &str) -> Option<&str> {
        match self.project(project).and_then(|p| p.api_key.as_deref()) {
            Some(key) => {
                debug!(project, "API key found");
                Some(key)
            }
            None => {
                debug!(project, "API key not found");
                None
            }
        }
    }

    pub fn encryption_password_for(&self, project: &str) -> Option<&str> {
        match self
            .project(project)
            .and_then(|p| p.encryption_password.as_deref())
        {
            Some(password) => {
                debug!(project, "Encryption password found");
                Some(password)
            }
            None => {
                debug!(project, "Encryption password not found (not specified in config?)");
                None
            }
        }
    }
}

fn read_project_file(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Candidate config files, in probe order
pub fn candidate_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();

    if let Some(location) = env::var_os(CONFIG_LOCATION_ENV).filter(|l| !l.is_empty()) {
        debug!("Found ${} - checking it first", CONFIG_LOCATION_ENV);
        locations.push(PathBuf::from(location));
    }

    for relative in [
        "logsnip.toml",
        "config/logsnip.toml",
        ".logsnip/config.toml",
        "../logsnip.toml",
        "../config/logsnip.toml",
    ] {
        locations.push(PathBuf::from(relative));
    }

    if let Some(home_dir) = dirs::home_dir() {
        locations.push(home_dir.join(".logsnip/config.toml"));
    }

    if let Some(exe_dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        locations.push(exe_dir.join("logsnip.toml"));
    }

    locations
}

/// Resolve the configuration for this process.
///
/// Returns `Ok(None)` when no configuration exists or logging is opted out;
/// the caller runs in disabled mode.
pub fn load_config() -> Result<Option<LoadedConfig>> {
    if env::var_os("LOGSNIP_DISABLED").is_some() {
        debug!("$LOGSNIP_DISABLED set, logsnip disabled");
        return Ok(None);
    }

    let mut locations = candidate_locations().into_iter();

    // the explicit override, when given, is probed before the inline setting
    if env::var_os(CONFIG_LOCATION_ENV).is_some_and(|l| !l.is_empty()) {
        if let Some(location) = locations.next() {
            if location.exists() {
                return load_from_location(&location).map(Some);
            }
            warn!(location = %location.display(), "Configured location does not exist");
        }
    }

    if let Some(inline) = env::var(INLINE_CONFIG_ENV).ok().filter(|c| !c.trim().is_empty()) {
        debug!("Loading config from ${}", INLINE_CONFIG_ENV);
        return load_from_json(&inline).map(Some);
    }

    for location in locations {
        if location.exists() {
            debug!(location = %location.display(), "Config file found");
            return load_from_location(&location).map(Some);
        }
    }

    warn!("Config file not found - logsnip disabled");
    Ok(None)
}

/// Load a TOML config file and resolve client identity
pub fn load_from_location(path: &Path) -> Result<LoadedConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let partial: PartialConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;

    let config_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut config = Config::from_partial(partial);
    config.ca_bundle = Some(match config.ca_bundle.take() {
        Some(bundle) if bundle.is_relative() => config_dir.join(bundle),
        Some(bundle) => bundle,
        None => config_dir.join(CA_BUNDLE_FILE),
    });

    finish(config, ConfigSource::File(path.to_path_buf()))
}

/// Load an inline JSON config and resolve client identity
pub fn load_from_json(json: &str) -> Result<LoadedConfig> {
    let partial: PartialConfig =
        serde_json::from_str(json).context("Failed to parse inline JSON config")?;
    finish(Config::from_partial(partial), ConfigSource::Inline)
}

fn finish(mut config: Config, source: ConfigSource) -> Result<LoadedConfig> {
    apply_env_overrides(&mut config);

    match ClientState::open() {
        Ok(state) => config.resolve_client_identity(&state),
        Err(e) => {
            warn!(error = %e, "Client state unavailable, using a transient identity");
            config.client_uuid = uuid::Uuid::new_v4().to_string();
        }
    }

    Ok(LoadedConfig { config, source })
}

/// Apply environment variable overrides
fn apply_env_overrides(config: &mut Config) {
    // LOGSNIP_DEBUG=1 enables debug mode
    if env::var_os("LOGSNIP_DEBUG").is_some() {
        config.debug = true;
    }
}

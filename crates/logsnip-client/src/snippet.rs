//! Snippets: one enriched, optionally encrypted log event
//!
//! A snippet is built through a [`SnippetDraft`] bound to the active
//! configuration, in this order:
//!
//! ```text
//! Created -> PayloadSet -> OptionsSet -> MetadataSet -> Encrypted | PlaintextFinal
//! ```
//!
//! `Queued` and `Dispatched` are set by the queue and the dispatcher.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::crypto::{self, CryptoError, ENCRYPTION_VERSION};
use crate::metadata::{context_window, page_address, MetadataSource};
use crate::payload;

/// Severity of a snippet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnippetType {
    #[default]
    Normal,
    Success,
    Info,
    Error,
}

impl SnippetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnippetType::Normal => "normal",
            SnippetType::Success => "success",
            SnippetType::Info => "info",
            SnippetType::Error => "error",
        }
    }
}

impl fmt::Display for SnippetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnippetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(SnippetType::Normal),
            "success" => Ok(SnippetType::Success),
            "info" => Ok(SnippetType::Info),
            "error" => Ok(SnippetType::Error),
            other => Err(format!("unknown snippet type: {}", other)),
        }
    }
}

/// Per-send options. Unset fields fall back to `normal` and the default project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub project: Option<String>,
    pub kind: Option<SnippetType>,
}

impl SendOptions {
    pub fn project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: SnippetType) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// A bare project name is shorthand for `SendOptions::project(name)`
impl From<&str> for SendOptions {
    fn from(project: &str) -> Self {
        SendOptions::project(project)
    }
}

impl From<String> for SendOptions {
    fn from(project: String) -> Self {
        SendOptions::project(project)
    }
}

/// Caller-supplied metadata; every omitted field is captured automatically
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub file_name: Option<String>,
    pub line_number: Option<u32>,
    pub context: Option<String>,
    pub address: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetState {
    Created,
    PayloadSet,
    OptionsSet,
    MetadataSet,
    Encrypted,
    PlaintextFinal,
    Queued,
    Dispatched,
}

#[derive(Debug, Error)]
pub enum SnippetError {
    #[error("snippet cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: SnippetState, to: SnippetState },

    #[error("snippet field is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("snippet encryption failed: {0}")]
    Encryption(#[from] CryptoError),
}

/// A finished snippet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub payload: String,
    pub kind: SnippetType,
    pub project: String,
    pub project_api_key: Option<String>,
    pub encryption_version: Option<u8>,
    pub is_encrypted: bool,
    pub file_name: String,
    pub line_number: String,
    pub context: String,
    pub address: String,
    pub hostname: String,
    state: SnippetState,
}

impl Snippet {
    fn new() -> Self {
        Self {
            payload: String::new(),
            kind: SnippetType::Normal,
            project: String::new(),
            project_api_key: None,
            encryption_version: None,
            is_encrypted: false,
            file_name: String::new(),
            line_number: String::new(),
            context: String::new(),
            address: String::new(),
            hostname: String::new(),
            state: SnippetState::Created,
        }
    }

    pub fn state(&self) -> SnippetState {
        self.state
    }

    pub(crate) fn mark(&mut self, state: SnippetState) {
        self.state = state;
    }

    fn text_fields(&self) -> [&String; 6] {
        [
            &self.payload,
            &self.file_name,
            &self.line_number,
            &self.context,
            &self.address,
            &self.hostname,
        ]
    }

    fn text_fields_mut(&mut self) -> [&mut String; 6] {
        [
            &mut self.payload,
            &mut self.file_name,
            &mut self.line_number,
            &mut self.context,
            &mut self.address,
            &mut self.hostname,
        ]
    }
}

/// A snippet under construction, bound to the configuration that created it
pub struct SnippetDraft<'a> {
    config: &'a Config,
    metadata: &'a dyn MetadataSource,
    snippet: Snippet,
}

impl<'a> SnippetDraft<'a> {
    pub fn state(&self) -> SnippetState {
        self.snippet.state
    }

    fn advance(&mut self, from: SnippetState, to: SnippetState) -> Result<(), SnippetError> {
        if self.snippet.state != from {
            return Err(SnippetError::InvalidTransition {
                from: self.snippet.state,
                to,
            });
        }
        self.snippet.state = to;
        Ok(())
    }

    /// Render and base64-encode the payload
    pub fn set_payload<P: Serialize + ?Sized>(&mut self, payload: &P) -> Result<(), SnippetError> {
        self.advance(SnippetState::Created, SnippetState::PayloadSet)?;
        let rendered = payload::render(payload, self.config.capture_method);
        self.snippet.payload = STANDARD.encode(rendered);
        debug!("Payload set for snippet");
        Ok(())
    }

    /// Resolve type, project and the project's API key
    pub fn set_options(&mut self, options: SendOptions) -> Result<(), SnippetError> {
        self.advance(SnippetState::PayloadSet, SnippetState::OptionsSet)?;
        self.snippet.kind = options.kind.unwrap_or_default();
        self.snippet.project = options
            .project
            .unwrap_or_else(|| self.config.default_project.clone());
        self.snippet.project_api_key = self
            .config
            .api_key_for(&self.snippet.project)
            .map(str::to_string);
        debug!(project = %self.snippet.project, kind = %self.snippet.kind, "Options set for snippet");
        Ok(())
    }

    /// Fill missing metadata and base64-encode every field
    pub fn set_metadata(
        &mut self,
        metadata: Metadata,
        caller: &'static Location<'static>,
    ) -> Result<(), SnippetError> {
        self.advance(SnippetState::OptionsSet, SnippetState::MetadataSet)?;

        let frame = (metadata.file_name.is_none() || metadata.line_number.is_none())
            .then(|| self.metadata.call_site(self.config.backtrace_depth, caller));

        let file_name = metadata
            .file_name
            .or_else(|| frame.as_ref().map(|f| f.file.clone()))
            .unwrap_or_default();
        let line_number = metadata
            .line_number
            .or_else(|| frame.as_ref().map(|f| f.line))
            .unwrap_or_default();
        let context = metadata
            .context
            .unwrap_or_else(|| self.read_context(&file_name, line_number));
        let address = metadata
            .address
            .unwrap_or_else(|| page_address(self.metadata));
        let hostname = metadata
            .hostname
            .unwrap_or_else(|| self.metadata.hostname());

        self.snippet.file_name = STANDARD.encode(file_name);
        self.snippet.line_number = STANDARD.encode(line_number.to_string());
        self.snippet.context = STANDARD.encode(context);
        self.snippet.address = STANDARD.encode(address);
        self.snippet.hostname = STANDARD.encode(hostname);

        debug!("Metadata set for snippet");
        Ok(())
    }

    fn read_context(&self, file_name: &str, line_number: u32) -> String {
        if !self.config.is_context_enabled {
            return "[]".to_string();
        }
        let lines = self.metadata.read_lines(file_name);
        debug!("Context read for snippet");
        context_window(lines.as_deref(), line_number, self.config.context_size)
    }

    /// Encrypt all text fields when the project has a password, then seal the snippet.
    ///
    /// Either every field is encrypted or none is.
    pub fn encrypt(mut self) -> Result<Snippet, SnippetError> {
        let config = self.config;
        let Some(password) = config.encryption_password_for(&self.snippet.project) else {
            self.advance(SnippetState::MetadataSet, SnippetState::PlaintextFinal)?;
            debug!("Snippet data not encrypted");
            return Ok(self.snippet);
        };
        self.advance(SnippetState::MetadataSet, SnippetState::Encrypted)?;

        let mut encrypted = Vec::with_capacity(6);
        for field in self.snippet.text_fields() {
            let plaintext = STANDARD.decode(field)?;
            encrypted.push(crypto::encrypt(&plaintext, password)?);
        }
        for (field, value) in self.snippet.text_fields_mut().into_iter().zip(encrypted) {
            *field = value;
        }

        self.snippet.encryption_version = Some(ENCRYPTION_VERSION);
        self.snippet.is_encrypted = true;
        debug!("Snippet data encrypted");
        Ok(self.snippet)
    }
}

/// Creates snippet drafts bound to a configuration
#[derive(Clone)]
pub struct SnippetFactory {
    metadata: Arc<dyn MetadataSource>,
}

impl SnippetFactory {
    pub fn new(metadata: Arc<dyn MetadataSource>) -> Self {
        Self { metadata }
    }

    pub fn metadata_source(&self) -> &dyn MetadataSource {
        self.metadata.as_ref()
    }

    pub fn create<'a>(&'a self, config: &'a Config) -> SnippetDraft<'a> {
        debug!("Snippet created");
        SnippetDraft {
            config,
            metadata: self.metadata.as_ref(),
            snippet: Snippet::new(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{CaptureMethod, ProjectSettings};
    use crate::metadata::{Frame, RequestInfo};
    use std::sync::Mutex;

    /// Deterministic metadata source that records requested depths
    pub(crate) struct FixedMetadata {
        pub lines: Vec<String>,
        pub depths: Mutex<Vec<usize>>,
    }

    impl FixedMetadata {
        pub(crate) fn new() -> Self {
            Self {
                lines: (1..=80).map(|n| format!("source line {}\n", n)).collect(),
                depths: Mutex::new(Vec::new()),
            }
        }
    }

    impl MetadataSource for FixedMetadata {
        fn call_site(&self, depth: usize, _caller: &'static Location<'static>) -> Frame {
            self.depths.lock().unwrap().push(depth);
            Frame {
                file: "src/app.rs".to_string(),
                line: 50,
            }
        }

        fn read_lines(&self, _file: &str) -> Option<Vec<String>> {
            Some(self.lines.clone())
        }

        fn request(&self) -> Option<RequestInfo> {
            None
        }

        fn hostname(&self) -> String {
            "build-host".to_string()
        }

        fn is_cli(&self) -> bool {
            true
        }
    }

    pub(crate) fn test_config() -> Config {
        let mut config = Config {
            default_project: "default".to_string(),
            ..Config::default()
        };
        config
            .projects
            .insert("default".to_string(), ProjectSettings::new("default-key"));
        config.projects.insert(
            "secure".to_string(),
            ProjectSettings::new("secure-key").with_encryption_password("s3cr3t"),
        );
        config
    }

    fn decode(field: &str) -> String {
        String::from_utf8(STANDARD.decode(field).unwrap()).unwrap()
    }

    fn build(config: &Config, options: SendOptions, metadata: Metadata) -> Snippet {
        let factory = SnippetFactory::new(Arc::new(FixedMetadata::new()));
        let mut draft = factory.create(config);
        draft.set_payload("hello").unwrap();
        draft.set_options(options).unwrap();
        draft.set_metadata(metadata, Location::caller()).unwrap();
        draft.encrypt().unwrap()
    }

    #[test]
    fn test_plaintext_snippet_for_project_without_password() {
        let config = test_config();
        let snippet = build(&config, SendOptions::default(), Metadata::default());

        assert_eq!(snippet.state(), SnippetState::PlaintextFinal);
        assert!(!snippet.is_encrypted);
        assert_eq!(snippet.encryption_version, None);
        assert_eq!(snippet.project, "default");
        assert_eq!(snippet.kind, SnippetType::Normal);
        assert_eq!(snippet.project_api_key.as_deref(), Some("default-key"));

        assert_eq!(decode(&snippet.payload), "hello");
        assert_eq!(decode(&snippet.file_name), "src/app.rs");
        assert_eq!(decode(&snippet.line_number), "50");
        assert_eq!(decode(&snippet.address), "n/a");
        assert_eq!(decode(&snippet.hostname), "build-host");

        let context: Vec<String> = serde_json::from_str(&decode(&snippet.context)).unwrap();
        assert_eq!(context.len(), 20);
        assert_eq!(context[10], "source line 50\n");
    }

    #[test]
    fn test_encrypted_snippet_decrypts_to_plaintext_fields() {
        let config = test_config();
        let options = SendOptions::project("secure").with_kind(SnippetType::Error);
        let plain = build(&config, SendOptions::default(), Metadata::default());
        let snippet = build(&config, options, Metadata::default());

        assert_eq!(snippet.state(), SnippetState::Encrypted);
        assert!(snippet.is_encrypted);
        assert_eq!(snippet.encryption_version, Some(1));
        assert_eq!(snippet.kind, SnippetType::Error);
        assert_eq!(snippet.project_api_key.as_deref(), Some("secure-key"));

        let pairs = [
            (&snippet.payload, &plain.payload),
            (&snippet.file_name, &plain.file_name),
            (&snippet.line_number, &plain.line_number),
            (&snippet.context, &plain.context),
            (&snippet.address, &plain.address),
            (&snippet.hostname, &plain.hostname),
        ];
        for (encrypted, plaintext) in pairs {
            assert_eq!(
                crypto::decrypt_to_string(encrypted, "s3cr3t").unwrap(),
                decode(plaintext)
            );
        }
    }

    #[test]
    fn test_caller_metadata_is_not_recaptured() {
        let config = test_config();
        let source = Arc::new(FixedMetadata::new());
        let factory = SnippetFactory::new(source.clone());
        let mut draft = factory.create(&config);
        draft.set_payload(&1).unwrap();
        draft.set_options(SendOptions::default()).unwrap();
        draft
            .set_metadata(
                Metadata {
                    file_name: Some("core/model.rs".to_string()),
                    line_number: Some(7),
                    context: Some("[]".to_string()),
                    address: Some("http://x.test/".to_string()),
                    hostname: Some("web-1".to_string()),
                },
                Location::caller(),
            )
            .unwrap();
        let snippet = draft.encrypt().unwrap();

        assert!(source.depths.lock().unwrap().is_empty());
        assert_eq!(decode(&snippet.file_name), "core/model.rs");
        assert_eq!(decode(&snippet.line_number), "7");
        assert_eq!(decode(&snippet.context), "[]");
        assert_eq!(decode(&snippet.address), "http://x.test/");
        assert_eq!(decode(&snippet.hostname), "web-1");
    }

    #[test]
    fn test_call_site_uses_configured_depth() {
        let mut config = test_config();
        config.backtrace_depth = 5;
        let source = Arc::new(FixedMetadata::new());
        let factory = SnippetFactory::new(source.clone());
        let mut draft = factory.create(&config);
        draft.set_payload(&1).unwrap();
        draft.set_options(SendOptions::default()).unwrap();
        draft
            .set_metadata(Metadata::default(), Location::caller())
            .unwrap();

        assert_eq!(*source.depths.lock().unwrap(), vec![5]);
    }

    #[test]
    fn test_context_disabled() {
        let mut config = test_config();
        config.is_context_enabled = false;
        let snippet = build(&config, SendOptions::default(), Metadata::default());
        assert_eq!(decode(&snippet.context), "[]");
    }

    #[test]
    fn test_unknown_project_has_no_api_key() {
        let config = test_config();
        let snippet = build(&config, "elsewhere".into(), Metadata::default());
        assert_eq!(snippet.project, "elsewhere");
        assert!(snippet.project_api_key.is_none());
    }

    #[test]
    fn test_dump_capture_method() {
        let mut config = test_config();
        config.capture_method = CaptureMethod::Dump;
        let snippet = build(&config, SendOptions::default(), Metadata::default());
        assert_eq!(decode(&snippet.payload), "string(5) \"hello\"\n");
    }

    #[test]
    fn test_out_of_order_transition_is_rejected() {
        let config = test_config();
        let factory = SnippetFactory::new(Arc::new(FixedMetadata::new()));
        let mut draft = factory.create(&config);

        let err = draft.set_options(SendOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            SnippetError::InvalidTransition {
                from: SnippetState::Created,
                to: SnippetState::OptionsSet
            }
        ));
        assert_eq!(draft.state(), SnippetState::Created);

        draft.set_payload("x").unwrap();
        assert!(draft.set_payload("again").is_err());
        assert!(draft.encrypt().is_err());
    }

    #[test]
    fn test_snippet_type_parsing() {
        assert_eq!("ERROR".parse::<SnippetType>().unwrap(), SnippetType::Error);
        assert_eq!("info".parse::<SnippetType>().unwrap(), SnippetType::Info);
        assert!("fatal".parse::<SnippetType>().is_err());
        assert_eq!(SnippetType::Success.to_string(), "success");
    }
}

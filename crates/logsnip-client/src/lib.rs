//! # logsnip client
//!
//! Detached logging: capture a value where it is produced, ship it to a
//! remote console later.
//!
//! ## Pipeline
//!
//! ```text
//! send(payload) -> Snippet -> encrypt (per project) -> Queue -> Dispatcher -> HTTPS POST
//! ```
//!
//! - **Capture**: the payload is rendered as text and enriched with the call
//!   site, surrounding source lines, request address and hostname
//! - **Encrypt**: projects with an `encryptionPassword` get every text field
//!   AES-256-CBC encrypted (OpenSSL salted format)
//! - **Queue**: only snippets whose project has an API key are kept
//! - **Dispatch**: one form-encoded POST per flush, no retry
//!
//! Nothing in the pipeline returns an error to the caller: `send` always
//! hands the payload back, and failures go to the tracing log and a local
//! fallback file.
//!
//! ## Configuration
//!
//! Looked up in order: `$LOGSNIP_CONFIG_LOCATION`, inline JSON in
//! `$LOGSNIP_CONFIG`, then `logsnip.toml` files around the working directory,
//! the home directory and the executable.
//!
//! ```toml
//! defaultProject = "web"
//! captureMethod = "print"
//!
//! [projects.web]
//! apiKey = "..."
//! encryptionPassword = "..."
//! ```
//!
//! ## Opt-Out
//!
//! ```bash
//! export LOGSNIP_DISABLED=1
//! ```

pub mod client_state;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod facade;
pub mod fallback;
pub mod metadata;
pub mod payload;
pub mod pipeline;
pub mod queue;
pub mod snippet;
pub mod transport;

pub use config::{load_config, CaptureMethod, Config, LoadedConfig, ProjectSettings};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use fallback::FallbackLog;
pub use metadata::{MetadataSource, SystemMetadata};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use queue::Queue;
pub use snippet::{Metadata, SendOptions, Snippet, SnippetType};
pub use transport::{Transport, TransportError};

/// Client type reported with every batch
pub const CLIENT_TYPE: &str = "php-composer";

/// Client version reported with every batch
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

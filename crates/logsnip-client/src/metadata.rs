//! Execution metadata capture: call site, source context, request address,
//! hostname and CLI detection

use std::env;
use std::fs;
use std::panic::Location;
use std::path::PathBuf;

/// Address reported for non-web (CLI) executions
pub const CLI_ADDRESS: &str = "n/a";

/// Set to force CLI mode even when a request is present
pub const FORCE_CLI_ENV: &str = "LOGSNIP_FORCE_CLI";

/// A resolved call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file: String,
    pub line: u32,
}

impl From<&Location<'_>> for Frame {
    fn from(location: &Location<'_>) -> Self {
        Self {
            file: location.file().to_string(),
            line: location.line(),
        }
    }
}

/// The web request currently being served, if any
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub https: bool,
    pub host: Option<String>,
    pub port: Option<String>,
    pub request_uri: Option<String>,
}

impl RequestInfo {
    /// Read the request from CGI-style environment variables.
    ///
    /// Returns `None` when there is no `GATEWAY_INTERFACE`, i.e. no request driver.
    pub fn from_cgi_env() -> Option<Self> {
        env::var_os("GATEWAY_INTERFACE")?;
        Some(Self {
            https: env::var("HTTPS").is_ok_and(|v| v.eq_ignore_ascii_case("on")),
            host: env::var("HTTP_HOST").ok(),
            port: env::var("SERVER_PORT").ok(),
            request_uri: env::var("REQUEST_URI").ok(),
        })
    }

    /// `scheme://host[:port]path`, port omitted when 80 or already part of host
    pub fn address(&self) -> String {
        let mut address = String::from(if self.https { "https://" } else { "http://" });

        if let Some(host) = &self.host {
            address.push_str(host);
        }

        if let Some(port) = self.port.as_deref().filter(|p| *p != "80") {
            let suffix = format!(":{}", port);
            if !address.ends_with(&suffix) {
                address.push_str(&suffix);
            }
        }

        if let Some(uri) = &self.request_uri {
            address.push_str(uri);
        }

        address
    }
}

/// Environment probes used while building a snippet
pub trait MetadataSource: Send + Sync {
    /// Resolve the logging call site.
    ///
    /// `depth` is the configured number of frames between the public entry
    /// point and user code; `caller` is the location tracked by the entry point.
    fn call_site(&self, depth: usize, caller: &'static Location<'static>) -> Frame;

    /// Lines of `file`, terminators kept. `None` when unreadable.
    fn read_lines(&self, file: &str) -> Option<Vec<String>>;

    fn request(&self) -> Option<RequestInfo>;

    fn hostname(&self) -> String;

    fn is_cli(&self) -> bool {
        env::var_os(FORCE_CLI_ENV).is_some() || self.request().is_none()
    }
}

/// Metadata from the running process
#[derive(Debug, Clone, Default)]
pub struct SystemMetadata {
    source_root: Option<PathBuf>,
    request: Option<RequestInfo>,
}

impl SystemMetadata {
    pub fn new(source_root: Option<PathBuf>) -> Self {
        Self {
            source_root,
            request: None,
        }
    }

    /// Report `request` instead of probing the CGI environment
    pub fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let path = PathBuf::from(file);
        match &self.source_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

impl MetadataSource for SystemMetadata {
    // #[track_caller] already points past the library frames
    fn call_site(&self, _depth: usize, caller: &'static Location<'static>) -> Frame {
        Frame::from(caller)
    }

    fn read_lines(&self, file: &str) -> Option<Vec<String>> {
        let content = fs::read_to_string(self.resolve(file)).ok()?;
        Some(content.split_inclusive('\n').map(str::to_string).collect())
    }

    fn request(&self) -> Option<RequestInfo> {
        self.request.clone().or_else(RequestInfo::from_cgi_env)
    }

    fn hostname(&self) -> String {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default()
    }
}

/// Source lines around `line_number` as a JSON array of exactly `2 * size` strings.
///
/// Covers 1-based lines `line_number - size ..= line_number + size - 1`;
/// lines outside the file (or an unreadable file) become empty strings.
pub fn context_window(lines: Option<&[String]>, line_number: u32, size: usize) -> String {
    let lines = lines.unwrap_or(&[]);
    let size = i64::try_from(size).unwrap_or(i64::MAX);
    let first = i64::from(line_number).saturating_sub(size).saturating_sub(1);

    let window: Vec<&str> = (0..size.saturating_mul(2))
        .map(|offset| {
            usize::try_from(first.saturating_add(offset))
                .ok()
                .and_then(|index| lines.get(index))
                .map(String::as_str)
                .unwrap_or("")
        })
        .collect();

    serde_json::to_string(&window).unwrap_or_else(|_| "[]".to_string())
}

/// Address of the current request, or [`CLI_ADDRESS`]
pub fn page_address(source: &dyn MetadataSource) -> String {
    if source.is_cli() {
        return CLI_ADDRESS.to_string();
    }
    source
        .request()
        .map(|request| request.address())
        .unwrap_or_else(|| CLI_ADDRESS.to_string())
}

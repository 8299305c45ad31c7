//! HTTPS delivery of dispatch batches
//!
//! A batch is POSTed as a url-encoded form with bracketed keys
//! (`snippets[0][payload]=...`). Only a `200 OK` counts as delivered.

use reqwest::{Certificate, Client, StatusCode};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::snippet::{Snippet, SnippetType};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to read CA bundle {path}: {source}")]
    CaBundleUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid CA bundle {path}: {source}")]
    CaBundleInvalid {
        path: PathBuf,
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("endpoint answered {0}")]
    Status(StatusCode),
}

/// One snippet as sent on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSnippet {
    pub payload: String,
    pub kind: SnippetType,
    pub project_api_key: String,
    pub encryption_version: Option<u8>,
    pub is_encrypted: bool,
    pub file_name: String,
    pub line_number: String,
    pub context: String,
    pub address: String,
    pub hostname: String,
}

impl From<Snippet> for WireSnippet {
    fn from(snippet: Snippet) -> Self {
        Self {
            payload: snippet.payload,
            kind: snippet.kind,
            project_api_key: snippet.project_api_key.unwrap_or_default(),
            encryption_version: snippet.encryption_version,
            is_encrypted: snippet.is_encrypted,
            file_name: snippet.file_name,
            line_number: snippet.line_number,
            context: snippet.context,
            address: snippet.address,
            hostname: snippet.hostname,
        }
    }
}

/// Everything sent in one POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchBatch {
    pub client_type: &'static str,
    pub version: &'static str,
    pub client_uuid: String,
    pub snippets: Vec<WireSnippet>,
    pub is_cli_request: bool,
}

impl DispatchBatch {
    /// Flatten into form fields, in wire order
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("type".to_string(), self.client_type.to_string()),
            ("version".to_string(), self.version.to_string()),
            ("UUID".to_string(), self.client_uuid.clone()),
        ];

        for (i, snippet) in self.snippets.iter().enumerate() {
            let key = |name: &str| format!("snippets[{}][{}]", i, name);

            fields.push((key("payload"), snippet.payload.clone()));
            fields.push((key("type"), snippet.kind.to_string()));
            fields.push((key("projectApiKey"), snippet.project_api_key.clone()));
            if let Some(version) = snippet.encryption_version {
                fields.push((key("encryptionVersion"), version.to_string()));
            }
            fields.push((key("isEncrypted"), form_bool(snippet.is_encrypted)));
            fields.push((key("fileName"), snippet.file_name.clone()));
            fields.push((key("lineNumber"), snippet.line_number.clone()));
            fields.push((key("context"), snippet.context.clone()));
            fields.push((key("address"), snippet.address.clone()));
            fields.push((key("hostname"), snippet.hostname.clone()));
        }

        fields.push(("cli".to_string(), form_bool(self.is_cli_request)));
        fields
    }
}

fn form_bool(value: bool) -> String {
    let flag = if value { "1" } else { "0" };
    flag.to_string()
}

/// HTTPS client for the collection endpoint
#[derive(Debug, Clone)]
pub struct Transport {
    endpoint: String,
    ca_bundle: Option<PathBuf>,
    timeout: Duration,
}

impl Transport {
    pub fn new(endpoint: impl Into<String>, ca_bundle: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            ca_bundle,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.api_address.clone(),
            config.ca_bundle.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_client(&self) -> Result<Client, TransportError> {
        let builder = Client::builder().timeout(self.timeout);

        let builder = match self.ca_bundle.as_ref().filter(|path| path.exists()) {
            Some(path) => {
                debug!(path = %path.display(), "CA bundle found, verifying API endpoint");
                let pem = fs::read(path).map_err(|source| TransportError::CaBundleUnreadable {
                    path: path.clone(),
                    source,
                })?;
                let certificates = Certificate::from_pem_bundle(&pem).map_err(|source| {
                    TransportError::CaBundleInvalid {
                        path: path.clone(),
                        source,
                    }
                })?;
                certificates
                    .into_iter()
                    .fold(builder.tls_built_in_root_certs(false), |builder, cert| {
                        builder.add_root_certificate(cert)
                    })
            }
            None => {
                warn!("CA bundle not found, the API endpoint will not be verified");
                builder
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
            }
        };

        builder.build().map_err(TransportError::Client)
    }

    /// POST `batch` once
    pub async fn send(&self, batch: &DispatchBatch) -> Result<(), TransportError> {
        let client = self.build_client()?;

        let response = client
            .post(&self.endpoint)
            .form(&batch.form_fields())
            .send()
            .await
            .map_err(TransportError::Request)?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(TransportError::Status(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use tempfile::TempDir;
    use tracing_test::traced_test;

    const TEST_CA: &str = "-----BEGIN CERTIFICATE-----\nMIIBizCCATGgAwIBAgIUYJIyPRRzMY3L7uvdD1Rf9z29yQkwCgYIKoZIzj0EAwIw\nGjEYMBYGA1UEAwwPbG9nc25pcCB0ZXN0IENBMCAXDTI2MTAxNjExMDkwNloYDzIx\nMjYwOTIyMTEwOTA2WjAaMRgwFgYDVQQDDA9sb2dzbmlwIHRlc3QgQ0EwWTATBgcq\nhkjOPQIBBggqhkjOPQMBBwNCAAQPtfe3qpvYEHxpPUZ6Hl6bD6iWqXgzcO8JKn7r\nS8/GUGti4aKTg97RTvHUjAQwrywrMBRSsyPSFxf9N9MxWil8o1MwUTAdBgNVHQ4E\nFgQU470Lx8CiIQWFWBF8iNm+pjIfbS8wHwYDVR0jBBgwFoAU470Lx8CiIQWFWBF8\niNm+pjIfbS8wDwYDVR0TAQH/BAUwAwEB/zAKBggqhkjOPQQDAgNIADBFAiEArGus\nt9t3MdqJnfXnTnhRH12jce2cejWj2HM7IB87Xf4CIG+kRuut2zGBiYp2NZwuFpI+\nhvF6v0UXDCNc1FnPrVG8\n-----END CERTIFICATE-----\n";

    fn wire(api_key: &str, encrypted: bool) -> WireSnippet {
        WireSnippet {
            payload: "aGVsbG8=".to_string(),
            kind: SnippetType::Info,
            project_api_key: api_key.to_string(),
            encryption_version: encrypted.then_some(1),
            is_encrypted: encrypted,
            file_name: "c3JjL2FwcC5ycw==".to_string(),
            line_number: "NTA=".to_string(),
            context: "W10=".to_string(),
            address: "bi9h".to_string(),
            hostname: "aG9zdA==".to_string(),
        }
    }

    fn batch(snippets: Vec<WireSnippet>) -> DispatchBatch {
        DispatchBatch {
            client_type: "php-composer",
            version: "3.4.0",
            client_uuid: "3f2504e0-4f89-41d3-9a0c-0305e82c3301".to_string(),
            snippets,
            is_cli_request: true,
        }
    }

    #[test]
    fn test_form_fields_layout() {
        let fields = batch(vec![wire("k1", false), wire("k2", true)]).form_fields();
        let get = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(fields[0], ("type".to_string(), "php-composer".to_string()));
        assert_eq!(get("version"), Some("3.4.0"));
        assert_eq!(get("UUID"), Some("3f2504e0-4f89-41d3-9a0c-0305e82c3301"));
        assert_eq!(get("cli"), Some("1"));

        assert_eq!(get("snippets[0][projectApiKey]"), Some("k1"));
        assert_eq!(get("snippets[0][type]"), Some("info"));
        assert_eq!(get("snippets[0][isEncrypted]"), Some("0"));
        assert_eq!(get("snippets[0][encryptionVersion]"), None);

        assert_eq!(get("snippets[1][projectApiKey]"), Some("k2"));
        assert_eq!(get("snippets[1][isEncrypted]"), Some("1"));
        assert_eq!(get("snippets[1][encryptionVersion]"), Some("1"));
        assert_eq!(get("snippets[1][lineNumber]"), Some("NTA="));
    }

    #[tokio::test]
    async fn test_send_posts_form_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "php-composer".into()),
                Matcher::UrlEncoded("snippets[0][payload]".into(), "aGVsbG8=".into()),
                Matcher::UrlEncoded("snippets[0][projectApiKey]".into(), "k1".into()),
            ]))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let transport = Transport::new(server.url(), None, Duration::from_secs(2));
        transport.send(&batch(vec![wire("k1", false)])).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_200_is_an_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(201)
            .create_async()
            .await;

        let transport = Transport::new(server.url(), None, Duration::from_secs(2));
        let err = transport
            .send(&batch(vec![wire("k1", false)]))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Status(StatusCode::CREATED)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_failure_is_an_error() {
        let transport = Transport::new("http://127.0.0.1:1/", None, Duration::from_millis(500));
        let err = transport
            .send(&batch(vec![wire("k1", false)]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Request(_)));
    }

    #[tokio::test]
    async fn test_invalid_ca_bundle_is_reported() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("cacert.pem");
        fs::write(
            &bundle,
            "-----BEGIN CERTIFICATE-----\nnot base64 at all!\n-----END CERTIFICATE-----\n",
        )
        .unwrap();

        let transport = Transport::new("https://127.0.0.1:1/", Some(bundle), Duration::from_secs(1));
        let err = transport
            .send(&batch(vec![wire("k1", false)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::CaBundleInvalid { .. } | TransportError::Request(_)
        ));
    }

    #[test]
    #[traced_test]
    fn test_valid_ca_bundle_pins_the_client() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("cacert.pem");
        fs::write(&bundle, TEST_CA).unwrap();

        let transport = Transport::new("https://127.0.0.1:1/", Some(bundle), Duration::from_secs(1));
        assert!(transport.build_client().is_ok());
        assert!(logs_contain("CA bundle found, verifying API endpoint"));
        assert!(!logs_contain("CA bundle not found"));
    }

    #[test]
    #[traced_test]
    fn test_missing_ca_bundle_warns_and_skips_verification() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("absent.pem");

        for ca_bundle in [None, Some(missing)] {
            let transport = Transport::new("https://127.0.0.1:1/", ca_bundle, Duration::from_secs(1));
            assert!(transport.build_client().is_ok());
        }
        assert!(logs_contain(
            "CA bundle not found, the API endpoint will not be verified"
        ));
    }
}

//! Drains the queue and delivers its snippets in one batch

use tracing::{debug, warn};

use crate::config::Config;
use crate::fallback::FallbackLog;
use crate::queue::Queue;
use crate::snippet::{Snippet, SnippetState};
use crate::transport::{DispatchBatch, Transport, WireSnippet};
use crate::{CLIENT_TYPE, VERSION};

/// What happened to a drained queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was queued; no request was made
    Empty,
    Delivered(usize),
    /// The request failed and the batch was discarded
    Dropped(usize),
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    transport: Transport,
    client_uuid: String,
    fallback: FallbackLog,
}

impl Dispatcher {
    pub fn new(transport: Transport, client_uuid: impl Into<String>, fallback: FallbackLog) -> Self {
        Self {
            transport,
            client_uuid: client_uuid.into(),
            fallback,
        }
    }

    pub fn from_config(config: &Config, fallback: FallbackLog) -> Self {
        Self::new(
            Transport::from_config(config),
            config.client_uuid.clone(),
            fallback,
        )
    }

    pub fn prepare(&self, snippets: Vec<Snippet>, is_cli_request: bool) -> DispatchBatch {
        DispatchBatch {
            client_type: CLIENT_TYPE,
            version: VERSION,
            client_uuid: self.client_uuid.clone(),
            snippets: snippets
                .into_iter()
                .map(|mut snippet| {
                    snippet.mark(SnippetState::Dispatched);
                    WireSnippet::from(snippet)
                })
                .collect(),
            is_cli_request,
        }
    }

    /// Drain `queue` and send its contents. Never fails.
    pub async fn dispatch(&self, queue: &mut Queue, is_cli_request: bool) -> DispatchOutcome {
        self.dispatch_snippets(queue.flush(), is_cli_request).await
    }

    /// Send already-drained snippets in a single request, without retry
    pub async fn dispatch_snippets(
        &self,
        snippets: Vec<Snippet>,
        is_cli_request: bool,
    ) -> DispatchOutcome {
        if snippets.is_empty() {
            debug!("No snippets found in the queue, dispatcher exits");
            return DispatchOutcome::Empty;
        }

        let count = snippets.len();
        let batch = self.prepare(snippets, is_cli_request);
        debug!(count, endpoint = self.transport.endpoint(), "Sending snippets");

        match self.transport.send(&batch).await {
            Ok(()) => {
                debug!(count, "Request successfully sent to the API endpoint");
                DispatchOutcome::Delivered(count)
            }
            Err(e) => {
                warn!(error = %e, count, "Request failed, snippets dropped");
                self.fallback
                    .write(&format!("dispatch of {} snippet(s) failed: {}", count, e));
                DispatchOutcome::Dropped(count)
            }
        }
    }
}

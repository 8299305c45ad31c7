//! In-memory FIFO of snippets awaiting dispatch

use std::mem;
use tracing::debug;

use crate::snippet::{Snippet, SnippetState};

#[derive(Debug, Default)]
pub struct Queue {
    snippets: Vec<Snippet>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `snippet` when its project resolved an API key.
    ///
    /// Returns whether the snippet was queued; a rejection is not an error.
    pub fn add(&mut self, mut snippet: Snippet) -> bool {
        if snippet.project_api_key.is_none() {
            debug!(project = %snippet.project, "Snippet rejected: no API key for project");
            return false;
        }

        snippet.mark(SnippetState::Queued);
        self.snippets.push(snippet);
        debug!(queued = self.snippets.len(), "Snippet added to queue");
        true
    }

    /// Take every queued snippet in insertion order, leaving the queue empty
    pub fn flush(&mut self) -> Vec<Snippet> {
        debug!(count = self.snippets.len(), "Queue flushed");
        mem::take(&mut self.snippets)
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }
}

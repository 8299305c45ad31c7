//! The capture -> encrypt -> queue -> dispatch pipeline
//!
//! A [`Pipeline`] owns one configuration, queue and dispatcher. Snippets are
//! queued synchronously by [`Pipeline::send`]; they leave the process exactly
//! once, on [`Pipeline::flush`] or when the pipeline is dropped.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

use crate::config::{load_config, Config};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::fallback::FallbackLog;
use crate::metadata::{MetadataSource, SystemMetadata};
use crate::queue::Queue;
use crate::snippet::{Metadata, SendOptions, Snippet, SnippetError, SnippetFactory, SnippetType};

struct Active {
    config: Config,
    dispatcher: Dispatcher,
}

pub struct Pipeline {
    active: Option<Active>,
    queue: Queue,
    factory: SnippetFactory,
    fallback: FallbackLog,
}

/// Builder for [`Pipeline`]; without a config the pipeline is disabled
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<Config>,
    metadata: Option<Arc<dyn MetadataSource>>,
    fallback: Option<FallbackLog>,
    backtrace_depth: Option<usize>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn metadata_source(mut self, metadata: Arc<dyn MetadataSource>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn fallback_log(mut self, fallback: FallbackLog) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Override the configured backtrace depth
    pub fn backtrace_depth(mut self, depth: usize) -> Self {
        self.backtrace_depth = Some(depth);
        self
    }

    /// Load the process configuration and build; disabled when none is found
    pub fn build_from_env(self) -> Pipeline {
        match load_config() {
            Ok(Some(loaded)) => {
                debug!(source = %loaded.source, "Configuration loaded");
                self.config(loaded.config).build()
            }
            Ok(None) => self.build(),
            Err(e) => {
                warn!(error = %e, "Configuration could not be loaded, logsnip disabled");
                let pipeline = self.build();
                pipeline.fallback.write(&format!("[logsnip] {:#}", e));
                pipeline
            }
        }
    }

    pub fn build(self) -> Pipeline {
        let fallback = self.fallback.unwrap_or_else(FallbackLog::from_env);

        let mut config = self.config;
        if let (Some(config), Some(depth)) = (config.as_mut(), self.backtrace_depth) {
            config.backtrace_depth = depth;
        }

        let metadata = self.metadata.unwrap_or_else(|| {
            let source_root = config.as_ref().and_then(|c| c.source_root.clone());
            Arc::new(SystemMetadata::new(source_root))
        });

        let active = config.map(|config| Active {
            dispatcher: Dispatcher::from_config(&config, fallback.clone()),
            config,
        });

        if active.is_none() {
            debug!("Pipeline built without configuration, sends go to the fallback log");
        }

        Pipeline {
            active,
            queue: Queue::new(),
            factory: SnippetFactory::new(metadata),
            fallback,
        }
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Build from the discovered configuration, disabled when there is none
    pub fn from_env() -> Self {
        Self::builder().build_from_env()
    }

    pub fn with_config(config: Config) -> Self {
        Self::builder().config(config).build()
    }

    pub fn disabled() -> Self {
        Self::builder().build()
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    pub fn config(&self) -> Option<&Config> {
        self.active.as_ref().map(|active| &active.config)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn fallback_log(&self) -> &FallbackLog {
        &self.fallback
    }

    /// Capture `payload` and queue it for delivery. Always returns `payload`.
    #[track_caller]
    pub fn send<P: Serialize>(
        &mut self,
        payload: P,
        options: impl Into<SendOptions>,
        metadata: Metadata,
    ) -> P {
        self.send_at(&payload, options.into(), metadata, Location::caller());
        payload
    }

    #[track_caller]
    pub fn success<P: Serialize>(
        &mut self,
        payload: P,
        options: impl Into<SendOptions>,
        metadata: Metadata,
    ) -> P {
        let options = options.into().with_kind(SnippetType::Success);
        self.send_at(&payload, options, metadata, Location::caller());
        payload
    }

    #[track_caller]
    pub fn info<P: Serialize>(
        &mut self,
        payload: P,
        options: impl Into<SendOptions>,
        metadata: Metadata,
    ) -> P {
        let options = options.into().with_kind(SnippetType::Info);
        self.send_at(&payload, options, metadata, Location::caller());
        payload
    }

    #[track_caller]
    pub fn error<P: Serialize>(
        &mut self,
        payload: P,
        options: impl Into<SendOptions>,
        metadata: Metadata,
    ) -> P {
        let options = options.into().with_kind(SnippetType::Error);
        self.send_at(&payload, options, metadata, Location::caller());
        payload
    }

    /// Send `payload` to every configured project. Always returns `payload`.
    #[track_caller]
    pub fn send_to_all<P: Serialize>(
        &mut self,
        payload: P,
        options: impl Into<SendOptions>,
        metadata: Metadata,
    ) -> P {
        self.send_to_all_at(&payload, options.into(), metadata, Location::caller());
        payload
    }

    /// Send `payload` to every configured project, in name order.
    ///
    /// The backtrace depth is raised by one for the duration of the fan-out.
    pub(crate) fn send_to_all_at<P: Serialize + ?Sized>(
        &mut self,
        payload: &P,
        options: SendOptions,
        metadata: Metadata,
        caller: &'static Location<'static>,
    ) {
        let Some(active) = self.active.as_mut() else {
            self.write_disabled(payload);
            return;
        };

        let projects: Vec<String> = active.config.projects.keys().cloned().collect();
        let saved_depth = active.config.backtrace_depth;
        active.config.backtrace_depth = saved_depth + 1;

        for project in projects {
            let options = SendOptions {
                project: Some(project),
                kind: options.kind,
            };
            self.send_at(payload, options, metadata.clone(), caller);
        }

        if let Some(active) = self.active.as_mut() {
            active.config.backtrace_depth = saved_depth;
        }
    }

    /// Build and queue one snippet. Failures and panics end up in the fallback log.
    pub(crate) fn send_at<P: Serialize + ?Sized>(
        &mut self,
        payload: &P,
        options: SendOptions,
        metadata: Metadata,
        caller: &'static Location<'static>,
    ) -> bool {
        let Some(active) = &self.active else {
            self.write_disabled(payload);
            return false;
        };

        let built = panic::catch_unwind(AssertUnwindSafe(|| {
            build_snippet(&self.factory, &active.config, payload, options, metadata, caller)
        }));

        match built {
            Ok(Ok(snippet)) => self.queue.add(snippet),
            Ok(Err(e)) => {
                warn!(error = %e, "Snippet could not be built");
                self.fallback.write(&format!("[logsnip] {}", e));
                false
            }
            Err(_) => {
                warn!("Snippet capture panicked");
                self.fallback.write("[logsnip] snippet capture panicked");
                false
            }
        }
    }

    fn write_disabled<P: Serialize + ?Sized>(&self, payload: &P) {
        let line = serde_json::to_string(payload)
            .unwrap_or_else(|e| format!("[logsnip] payload could not be rendered: {}", e));
        self.fallback.write(&line);
    }

    fn is_cli(&self) -> bool {
        self.factory.metadata_source().is_cli()
    }

    /// Drain the queue and deliver it in one request
    pub async fn flush(&mut self) -> DispatchOutcome {
        let is_cli = self.is_cli();
        match &self.active {
            Some(active) => active.dispatcher.dispatch(&mut self.queue, is_cli).await,
            None => DispatchOutcome::Empty,
        }
    }

    /// Like [`Pipeline::flush`], for callers outside async code.
    ///
    /// Runs on a dedicated thread so it is safe to call from within a runtime.
    pub fn flush_blocking(&mut self) -> DispatchOutcome {
        let Some(active) = &self.active else {
            return DispatchOutcome::Empty;
        };
        let snippets = self.queue.flush();
        dispatch_on_thread(active.dispatcher.clone(), snippets, self.is_cli())
    }

    /// Queue an `error` snippet for a panic and deliver it immediately
    pub fn report_panic(&mut self, message: String, file: Option<String>, line: Option<u32>) {
        let metadata = Metadata {
            file_name: file,
            line_number: line,
            ..Metadata::default()
        };
        let options = SendOptions::default().with_kind(SnippetType::Error);
        self.send_at(&message, options, metadata, Location::caller());
        self.flush_blocking();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        if self.queue.is_empty() {
            return;
        }

        let snippets = self.queue.flush();
        let dispatcher = active.dispatcher.clone();
        let is_cli = self.is_cli();

        debug!("Dispatching queued snippets before release");
        dispatch_on_thread(dispatcher, snippets, is_cli);
    }
}

fn build_snippet<P: Serialize + ?Sized>(
    factory: &SnippetFactory,
    config: &Config,
    payload: &P,
    options: SendOptions,
    metadata: Metadata,
    caller: &'static Location<'static>,
) -> Result<Snippet, SnippetError> {
    let mut draft = factory.create(config);
    draft.set_payload(payload)?;
    draft.set_options(options)?;
    draft.set_metadata(metadata, caller)?;
    draft.encrypt()
}

fn dispatch_on_thread(
    dispatcher: Dispatcher,
    snippets: Vec<Snippet>,
    is_cli: bool,
) -> DispatchOutcome {
    if snippets.is_empty() {
        return DispatchOutcome::Empty;
    }
    let count = snippets.len();

    let worker = thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map(|runtime| runtime.block_on(dispatcher.dispatch_snippets(snippets, is_cli)))
    });

    match worker.join() {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(error = %e, "Could not start a runtime for dispatch");
            DispatchOutcome::Dropped(count)
        }
        Err(_) => {
            warn!("Dispatch thread panicked");
            DispatchOutcome::Dropped(count)
        }
    }
}

//! Process-wide default pipeline
//!
//! The free functions here lazily build one shared [`Pipeline`] from the
//! discovered configuration (backtrace depth 3) on first use.
//!
//! ```no_run
//! use logsnip_client::{facade, Metadata, SendOptions};
//!
//! let _flush = facade::flush_on_exit();
//! facade::install_panic_hook();
//!
//! let total = facade::info(42, "billing", Metadata::default());
//! facade::send(("checkout", total), SendOptions::default(), Metadata::default());
//! ```

use serde::Serialize;
use std::any::Any;
use std::panic::{self, Location};
use std::sync::{Mutex, OnceLock, PoisonError, TryLockError};
use tracing::debug;

use crate::dispatcher::DispatchOutcome;
use crate::pipeline::Pipeline;
use crate::snippet::{Metadata, SendOptions, SnippetType};

const DEFAULT_BACKTRACE_DEPTH: usize = 3;

static DEFAULT_PIPELINE: OnceLock<Mutex<Pipeline>> = OnceLock::new();

fn default_pipeline() -> &'static Mutex<Pipeline> {
    DEFAULT_PIPELINE.get_or_init(|| {
        debug!("Initialising default pipeline");
        Mutex::new(
            Pipeline::builder()
                .backtrace_depth(DEFAULT_BACKTRACE_DEPTH)
                .build_from_env(),
        )
    })
}

/// Run `f` against the default pipeline, creating it when needed
pub fn with_default_pipeline<R>(f: impl FnOnce(&mut Pipeline) -> R) -> R {
    let mut pipeline = default_pipeline()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    f(&mut pipeline)
}

#[track_caller]
pub fn send<P: Serialize>(payload: P, options: impl Into<SendOptions>, metadata: Metadata) -> P {
    let caller = Location::caller();
    let options = options.into();
    with_default_pipeline(|pipeline| pipeline.send_at(&payload, options, metadata, caller));
    payload
}

#[track_caller]
pub fn success<P: Serialize>(payload: P, options: impl Into<SendOptions>, metadata: Metadata) -> P {
    let caller = Location::caller();
    let options = options.into().with_kind(SnippetType::Success);
    with_default_pipeline(|pipeline| pipeline.send_at(&payload, options, metadata, caller));
    payload
}

#[track_caller]
pub fn info<P: Serialize>(payload: P, options: impl Into<SendOptions>, metadata: Metadata) -> P {
    let caller = Location::caller();
    let options = options.into().with_kind(SnippetType::Info);
    with_default_pipeline(|pipeline| pipeline.send_at(&payload, options, metadata, caller));
    payload
}

#[track_caller]
pub fn error<P: Serialize>(payload: P, options: impl Into<SendOptions>, metadata: Metadata) -> P {
    let caller = Location::caller();
    let options = options.into().with_kind(SnippetType::Error);
    with_default_pipeline(|pipeline| pipeline.send_at(&payload, options, metadata, caller));
    payload
}

#[track_caller]
pub fn send_to_all<P: Serialize>(
    payload: P,
    options: impl Into<SendOptions>,
    metadata: Metadata,
) -> P {
    let caller = Location::caller();
    let options = options.into();
    with_default_pipeline(|pipeline| pipeline.send_to_all_at(&payload, options, metadata, caller));
    payload
}

/// Deliver everything queued on the default pipeline.
///
/// Does nothing when the default pipeline was never used.
pub fn flush_default() -> DispatchOutcome {
    match DEFAULT_PIPELINE.get() {
        Some(pipeline) => pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush_blocking(),
        None => DispatchOutcome::Empty,
    }
}

/// Flushes the default pipeline when dropped
#[must_use = "the default pipeline is flushed when the guard is dropped"]
pub struct FlushGuard {
    _private: (),
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let outcome = flush_default();
        debug!(?outcome, "Default pipeline flushed on exit");
    }
}

/// Hold the returned guard for the lifetime of `main`
pub fn flush_on_exit() -> FlushGuard {
    FlushGuard { _private: () }
}

/// Report panics through the default pipeline, then run the previous hook.
///
/// The report is skipped when the default pipeline was never used or is
/// locked by the panicking thread.
pub fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        report_panic(info.payload(), info.location());
        previous(info);
    }));
}

fn report_panic(payload: &(dyn Any + Send), location: Option<&Location<'_>>) {
    let Some(lock) = DEFAULT_PIPELINE.get() else {
        return;
    };
    let mut pipeline = match lock.try_lock() {
        Ok(pipeline) => pipeline,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return,
    };

    let message = format!("panic: {}", panic_message(payload));
    pipeline.report_panic(
        message,
        location.map(|l| l.file().to_string()),
        location.map(|l| l.line()),
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "Box<dyn Any>"
    }
}

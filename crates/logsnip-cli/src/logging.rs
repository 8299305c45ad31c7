//! stderr diagnostics through tracing-subscriber
//!
//! `RUST_LOG` wins; otherwise `warn`, or `debug` with `-v` or `debug = true`
//! in the loaded configuration.

use logsnip_client::Config;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

pub struct Logging {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

pub fn init(verbose: bool) -> Logging {
    let from_env = EnvFilter::try_from_default_env().ok();
    let fixed = from_env.is_some() || verbose;
    let filter = from_env.unwrap_or_else(|| EnvFilter::new(if verbose { "debug" } else { "warn" }));

    let (filter, handle) = reload::Layer::new(filter);
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .is_ok();

    Logging {
        handle: (installed && !fixed).then_some(handle),
    }
}

impl Logging {
    pub fn apply_config(&self, config: &Config) {
        let Some(handle) = self.handle.as_ref().filter(|_| config.debug) else {
            return;
        };
        if handle.modify(|filter| *filter = EnvFilter::new("debug")).is_ok() {
            debug!("Debug logging enabled by configuration");
        }
    }
}

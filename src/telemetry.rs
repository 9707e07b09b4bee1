//! Tracing setup
//!
//! `RUST_LOG` controls filtering (default `info`); `LOG_FORMAT=json` switches
//! to one JSON object per line for log collectors.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogFormat;
use crate::error::Error;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,tower=warn,hyper=warn";

/// Install the global tracing subscriber
pub fn init_tracing(format: LogFormat) -> Result<(), Error> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let fmt_layer = match format {
        LogFormat::Text => tracing_subscriber::fmt::layer().with_target(false).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Telemetry(e.to_string()))
}

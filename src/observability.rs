//! Observability utilities.

use std::sync::OnceLock;
use tracing::Subscriber;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::ObservabilityConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing subscriber once for the process.
///
/// Log format defaults to plain text and can be switched to JSON via
/// `OOCRPC_LOG_FORMAT=json`. Filter defaults to `info` if `RUST_LOG` is unset.
pub fn init_tracing() {
    let format = std::env::var("OOCRPC_LOG_FORMAT").ok();
    init_tracing_with(&ObservabilityConfig {
        json_logs: is_json_format(format.as_deref()),
        ..ObservabilityConfig::default()
    });
}

/// Like [`init_tracing`], taking the level and format from config.
/// `RUST_LOG` still overrides `log_level` when set.
pub fn init_tracing_with(config: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        if let Err(err) = subscriber(config).try_init() {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

/// Registry with the env filter and the configured output layer.
fn subscriber(config: &ObservabilityConfig) -> Box<dyn Subscriber + Send + Sync> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_logs {
        Box::new(registry.with(fmt::layer().json()))
    } else {
        Box::new(registry.with(fmt::layer().compact()))
    }
}

fn is_json_format(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("json"))
}

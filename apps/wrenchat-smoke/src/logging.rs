//! Tracing/logging bootstrap for the smoke harness.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,wrenchat_smoke=debug,client_core=debug,client_gateway=debug";

/// Initialize the global tracing subscriber with severity gating from the
/// environment.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `WRENCHAT_SMOKE_LOG`
/// 3) `WRENCHAT_LOG`
/// 4) internal default filter
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    for key in ["WRENCHAT_SMOKE_LOG", "WRENCHAT_LOG"] {
        if let Some(value) = env::var(key).ok().filter(|v| !v.trim().is_empty())
            && let Ok(filter) = EnvFilter::try_new(value)
        {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}

//! feed-relay binary entrypoint.
//! Loads config, wires the runtime, starts the scheduler and serves the HTTP API.

use feed_relay::api::{create_router, AppState};
use feed_relay::bootstrap::Runtime;
use feed_relay::config::AppConfig;
use feed_relay::metrics::Metrics;
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logs filtered by `RUST_LOG`, defaulting to `feed_relay=info,warn`.
/// `LOG_FORMAT=json` switches from compact lines to JSON records.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feed_relay=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    // The deployment runtime may already have installed a subscriber.
    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::load_default()?;
    let scheduler_enabled = config.scheduler.enabled;
    let metrics = Metrics::init(
        config.translation.cache_ttl_secs,
        config.translation.max_concurrent,
    );

    let runtime = Runtime::from_config(config)?;
    if scheduler_enabled {
        runtime.scheduler.clone().spawn();
    } else {
        info!(target: "scheduler", "scheduler disabled by config");
    }

    let mut router = create_router(AppState::from_runtime(&runtime));
    match metrics {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => warn!(error = %format!("{e:#}"), "metrics endpoint disabled"),
    }

    Ok(router.into())
}

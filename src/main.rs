// SPDX-License-Identifier: MIT

//! PulseWing API Server
//!
//! Links pilots to their Fitbit accounts over OAuth2 with PKCE and ingests
//! the heart-rate series recorded during timed experiments.

use pulsewing::{
    config::Config,
    db::SqliteDb,
    services::{FitbitService, HeartRateIngestor, PendingStore},
    AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting PulseWing API");

    // Open SQLite and run migrations
    let db = SqliteDb::new(&config.database_url)
        .await
        .expect("Failed to open database");

    let pending = PendingStore::new(Duration::from_secs(config.pending_auth_ttl_secs));
    let fitbit =
        FitbitService::new(&config, db.clone()).expect("Failed to initialize Fitbit client");
    let ingestor = HeartRateIngestor::new(db.clone(), fitbit.clone());

    // Hygiene sweep for abandoned authorization attempts. Lookups already
    // treat expired entries as misses; the sweep only bounds memory.
    let sweeper = pending.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let removed = sweeper.sweep_expired();
            if removed > 0 {
                tracing::debug!(removed, "Swept expired authorization attempts");
            }
        }
    });

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        pending,
        fitbit,
        ingestor,
    });

    // Build router
    let app = pulsewing::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pulsewing=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}

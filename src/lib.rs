// SPDX-License-Identifier: MIT

//! PulseWing: heart-rate tracking for pilots in timed experiments.
//!
//! This crate provides the backend API that links pilots to their Fitbit
//! accounts over OAuth2 with PKCE and ingests intraday heart-rate series
//! recorded during experiment windows.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::SqliteDb;
use services::{FitbitService, HeartRateIngestor, PendingStore};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: SqliteDb,
    pub pending: PendingStore,
    pub fitbit: FitbitService,
    pub ingestor: HeartRateIngestor,
}

// SPDX-License-Identifier: MIT

//! Services module - business logic layer.

pub mod fitbit;
pub mod ingest;
pub mod pending;

pub use fitbit::{FitbitClient, FitbitService, LinkedAccount, StartedAuthorization};
pub use ingest::{HeartRateIngestor, IngestOutcome, ELEVATED_BPM_THRESHOLD};
pub use pending::{PendingAuthorization, PendingStore};

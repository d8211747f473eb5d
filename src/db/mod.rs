// SPDX-License-Identifier: MIT

//! Database layer (SQLite via sqlx).

pub mod sqlite;

pub use sqlite::SqliteDb;

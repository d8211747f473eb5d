// SPDX-License-Identifier: MIT

//! Data models for the application.

pub mod account;
pub mod experiment;
pub mod participation;
pub mod pilot;

pub use account::FitbitAccount;
pub use experiment::{DetailLevel, Experiment};
pub use participation::{HeartRateSample, Participation};
pub use pilot::{Pilot, Sex};

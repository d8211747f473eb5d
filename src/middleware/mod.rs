// SPDX-License-Identifier: MIT

//! Middleware module.

pub mod security;

pub use security::add_security_headers;

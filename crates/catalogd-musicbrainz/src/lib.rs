// SPDX-License-Identifier: GPL-3.0-or-later

//! Concrete `catalogd_external::ExternalCatalogClient` backed by the public
//! MusicBrainz API and the Cover Art Archive, with built-in rate limiting.

pub mod client;
#[cfg(test)]
mod client_tests;
pub mod error;
pub mod models;
pub mod rate_limiter;

pub use client::MusicBrainzClient;
pub use error::{MusicBrainzError, Result};

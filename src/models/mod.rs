//! Data models for the SiteScribe backend.
//!
//! Field names serialize in camelCase for the web client.

mod attendance;
mod datastore;
mod employee;

pub use attendance::*;
pub use datastore::*;
pub use employee::*;

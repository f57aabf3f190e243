//! nody-client library: configuration and the HTTP backend.
//!
//! The `nody` binary is a thin layer over these, and integration tests
//! drive them against a mock server.

pub mod config;
pub mod http;

pub use config::{Config, ConfigError};
pub use http::HttpBackend;

//! HTTP middleware components.

/// Session-token authentication and role resolution
pub mod auth;

//! HTTP request handlers.
//!
//! - [`dispatch`] - Hands every resource request to the [`Api`](crate::Api) pipeline
//! - [`health`] - Health, liveness and readiness probes

pub mod dispatch;
pub mod health;

// Re-export handlers for convenience
pub use dispatch::dispatch_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

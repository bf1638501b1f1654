//! Common test utilities for REST API testing.
//!
//! - [`fixtures`] - Schema, access rules and seed data
//! - [`harness`] - A seeded API behind an axum-test server

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;

//! Core abstractions shared by every backend.
//!
//! - [`Transaction`] / [`TransactionManager`] - reference-counted request scopes

mod transaction;

pub use transaction::{Transaction, TransactionManager};

//! Database module for pingwatch.
//!
//! SQLite storage for target definitions and the failure log.

mod models;
mod store;

pub use models::*;
pub use store::*;

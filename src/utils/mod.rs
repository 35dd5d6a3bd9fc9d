//! Utilities Module
//!
//! Logging and HTTP plumbing shared across the crate.

mod http;
pub mod logging;

pub use http::*;

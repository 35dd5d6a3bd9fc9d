//! Fee Estimation Module
//!
//! Virtual-byte formulas per script class and optional live fee-rate
//! suggestions.

mod estimator;
mod source;

pub use estimator::*;
pub use source::*;

//! Transaction Module
//!
//! UTXO sourcing and the single-address transaction builder.

mod builder;
mod utxo;

pub use builder::*;
pub use utxo::*;

//! Shared utilities.

pub mod decimal;

pub use decimal::*;

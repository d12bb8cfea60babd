//! Repository implementations for database operations

pub mod coins;
pub mod runs;

pub use coins::*;
pub use runs::*;

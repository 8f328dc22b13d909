//! Service Layer
//!
//! Background work built on top of the project store.

pub mod retention;

pub use retention::{RetentionSweeper, SweepReport};

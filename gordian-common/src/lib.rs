//! Gordian Common – shared utilities
//!
//! Currently this crate only carries the component-scoped logging layer
//! used across the Gordian crates and their tests.

pub mod logging;

pub use logging::{Component, Logger};

//! # quadb testkit
//!
//! Test utilities for the quadb transaction core.
//!
//! This crate provides:
//! - Mock transactional components ([`CellComponent`], [`FaultyComponent`])
//! - A listener that records lifecycle events
//! - Crash simulation for the journal backend
//! - Fixtures that start, crash and restart a coordinator
//! - Property-based transaction scripts using proptest
//! - Concurrency stress helpers
//!
//! ## Usage
//!
//! ```rust
//! use quadb_testkit::prelude::*;
//!
//! with_store(3, |store| {
//!     store.write(4);
//!     assert_eq!(store.read(), 4);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod components;
pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod listener;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::components::*;
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::listener::*;
    pub use crate::stress::*;
}

pub use components::*;
pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use listener::*;
pub use stress::*;

//! Common utilities for virtual-usbip
//!
//! This crate provides functionality shared by the server library, its
//! binary and the test suites: the top-level error type, logging setup and
//! test helpers (timeouts, sample device descriptors).

pub mod error;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;

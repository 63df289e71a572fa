//! Virtual USB subsystem
//!
//! Emulates USB devices in software. A [`Device`] is built from a
//! descriptor tree and answers standard control requests on its own; the
//! application implementing the device function exchanges data with the
//! host through the device's [`Endpoint`]s.

pub mod device;
pub mod endpoint;

pub use device::Device;
pub use endpoint::{Completion, Endpoint};

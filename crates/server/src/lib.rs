//! Virtual USB devices over USB/IP
//!
//! Devices are emulated in software from a USB descriptor tree and
//! exported with the USB/IP protocol, so a remote host (e.g. Linux with
//! `vhci_hcd` and the `usbip attach` tool) sees them as locally plugged
//! USB devices.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use server::network::Server;
//! use server::usb::Device;
//! # use common::test_utils::sample_printer_descriptor;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let dev = Arc::new(Device::new(sample_printer_descriptor())?);
//! let server = Arc::new(Server::new());
//! let location = server.add_device(dev.clone())?;
//! println!("attach with: usbip attach -r <host> -b {}", location.bus_id());
//!
//! server.run("0.0.0.0:3240".parse()?).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ippusb;
pub mod network;
pub mod printer;
pub mod stream;
pub mod usb;

pub use error::{DeviceError, EndpointError, ServerError};
pub use network::Server;
pub use stream::{EndpointConn, EndpointListener};
pub use usb::{Device, Endpoint};

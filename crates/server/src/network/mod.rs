//! Network subsystem
//!
//! Speaks USB/IP over TCP (or any byte stream) with remote clients such as
//! the Linux `vhci_hcd` driver.
//!
//! # Architecture
//!
//! ```text
//! Server
//!   ├─> accept connections
//!   └─> spawn one task per connection
//!         ├─> handshake: DEVLIST (reply, close) or IMPORT
//!         └─> I/O loop on the imported device
//!               ├─> endpoint 0: control dispatch, answered inline
//!               ├─> other endpoints: queued on the device's Endpoint
//!               └─> replies serialized by the connection's sender task
//! ```

pub mod connection;
pub mod control;
pub mod server;

pub use connection::{ConnId, ProtoConn, ReplySender};
pub use server::{Server, USBIP_PORT};

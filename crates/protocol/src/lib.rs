//! USB/IP protocol library
//!
//! This crate defines the USB/IP wire protocol spoken between a USB/IP
//! client (e.g. the Linux `vhci_hcd` driver) and the virtual device server,
//! and the USB descriptor model the server's devices are built from.
//! It is pure: it encodes and decodes bytes, the server crate does the I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{HandshakeRequest, OpHeader};
//!
//! let bytes = HandshakeRequest::DevList.encode();
//!
//! let mut raw = [0u8; OpHeader::SIZE];
//! raw.copy_from_slice(&bytes[..OpHeader::SIZE]);
//! let header = OpHeader::decode(&raw).unwrap();
//! let request = HandshakeRequest::decode(&header, &[]).unwrap();
//! assert_eq!(request, HandshakeRequest::DevList);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod version;

pub use codec::{Decoder, Encoder};
pub use error::{ECONNRESET, EPIPE, ProtocolError, Result, UsbError};
pub use messages::{
    BUSID_LEN, DeviceSummary, Direction, HandshakeRequest, HandshakeResponse, InterfaceClass,
    IoHeader, IoRequest, IoResponse, Location, MAX_TRANSFER_SIZE, OpHeader, SubmitRequest,
    SubmitResponse, TransferFlags, UnlinkRequest, UnlinkResponse, cmd, op,
};
pub use types::{
    ConfigurationDescriptor, DescriptorType, DeviceDescriptor, EndpointDescriptor, EndpointType,
    Interface, InterfaceDescriptor, SetupPacket, Speed,
};
pub use version::{CURRENT_VERSION, ProtocolVersion};

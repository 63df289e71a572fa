//! Protocol message definitions
//!
//! This module defines all message types of the USB/IP protocol, together
//! with their byte-exact wire encoding. Messages are organized into two
//! groups:
//! - Handshake (device list, device import), exchanged once per connection
//! - I/O (submit/unlink and their replies), exchanged after a successful import
//!
//! All multi-byte fields are big-endian. Every message starts with a fixed
//! size header; the reader pulls exactly the header size from the stream,
//! decodes it, and from there knows how many body bytes follow.

use std::fmt;

use bytes::Bytes;

use crate::codec::{Decoder, Encoder};
use crate::error::{ProtocolError, Result};
use crate::types::{SetupPacket, Speed};
use crate::version::CURRENT_VERSION;

/// Maximum payload of a single transfer. Larger OUT payloads are drained
/// from the stream and discarded; larger IN lengths are clamped.
pub const MAX_TRANSFER_SIZE: usize = 65536;

/// Length of the NUL-padded sysfs path field of a device record
pub const PATH_LEN: usize = 256;

/// Length of the NUL-padded bus-id field
pub const BUSID_LEN: usize = 32;

/// Handshake operation codes
pub mod op {
    pub const REQ_DEVLIST: u16 = 0x8005;
    pub const REP_DEVLIST: u16 = 0x0005;
    pub const REQ_IMPORT: u16 = 0x8003;
    pub const REP_IMPORT: u16 = 0x0003;

    pub const STATUS_OK: u32 = 0;
    pub const STATUS_ERROR: u32 = 1;
}

/// I/O command codes
pub mod cmd {
    pub const SUBMIT: u32 = 0x0001;
    pub const UNLINK: u32 = 0x0002;
    pub const RET_SUBMIT: u32 = 0x0003;
    pub const RET_UNLINK: u32 = 0x0004;
}

fn put_padded_str(enc: &mut Encoder, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len - 1);
    enc.put_bytes(&bytes[..n]);
    enc.put_zeros(len - n);
}

fn get_padded_str(dec: &mut Decoder<'_>, len: usize) -> String {
    let mut raw = vec![0u8; len];
    dec.get_bytes(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Device location on the virtual bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub bus: u16,
    pub dev: u16,
}

impl Location {
    pub fn new(bus: u16, dev: u16) -> Self {
        Self { bus, dev }
    }

    /// USB/IP bus-id string, as seen by clients
    pub fn bus_id(&self) -> String {
        self.to_string()
    }

    /// sysfs-like path reported in device records
    pub fn path(&self) -> String {
        format!("/sys/devices/virtual/usbip/{}", self)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.bus, self.dev)
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Common header of all handshake messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    pub version: u16,
    pub opcode: u16,
    pub status: u32,
}

impl OpHeader {
    pub const SIZE: usize = 8;

    pub fn new(opcode: u16, status: u32) -> Self {
        Self {
            version: CURRENT_VERSION.to_wire(),
            opcode,
            status,
        }
    }

    /// Decode and validate a header received from the peer
    pub fn decode(data: &[u8; Self::SIZE]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let header = Self {
            version: dec.get_be16(),
            opcode: dec.get_be16(),
            status: dec.get_be32(),
        };

        if header.version != CURRENT_VERSION.to_wire() {
            return Err(ProtocolError::BadVersion(header.version));
        }

        Ok(header)
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.put_be16(self.version);
        enc.put_be16(self.opcode);
        enc.put_be32(self.status);
    }
}

/// Class triple of one interface, as listed in a DEVLIST reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceClass {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// Descriptor summary of one device, as sent in DEVLIST and IMPORT replies
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceSummary {
    pub path: String,
    pub location: Location,
    pub speed: Speed,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub interfaces: Vec<InterfaceClass>,
}

impl DeviceSummary {
    /// Size of the fixed part of the record
    pub const SIZE: usize = PATH_LEN + BUSID_LEN + 12 + 6 + 6;

    /// Encode the fixed record; DEVLIST replies also carry the interface list
    pub fn encode(&self, enc: &mut Encoder, with_interfaces: bool) {
        put_padded_str(enc, &self.path, PATH_LEN);
        put_padded_str(enc, &self.location.bus_id(), BUSID_LEN);
        enc.put_be32(u32::from(self.location.bus));
        enc.put_be32(u32::from(self.location.dev));
        enc.put_be32(self.speed.code());
        enc.put_be16(self.vendor_id);
        enc.put_be16(self.product_id);
        enc.put_be16(self.bcd_device);
        enc.put_u8(self.class);
        enc.put_u8(self.subclass);
        enc.put_u8(self.protocol);
        enc.put_u8(self.configuration_value);
        enc.put_u8(self.num_configurations);
        enc.put_u8(self.interfaces.len() as u8);

        if with_interfaces {
            for iff in &self.interfaces {
                enc.put_u8(iff.class);
                enc.put_u8(iff.subclass);
                enc.put_u8(iff.protocol);
                enc.put_u8(0);
            }
        }
    }

    /// Decode a record; when `with_interfaces` is false, the interface
    /// list is filled with default entries, as IMPORT replies carry only
    /// the interface count
    pub fn decode(dec: &mut Decoder<'_>, with_interfaces: bool) -> Self {
        let path = get_padded_str(dec, PATH_LEN);
        let _bus_id = get_padded_str(dec, BUSID_LEN);
        let bus = dec.get_be32() as u16;
        let dev = dec.get_be32() as u16;
        let speed = match dec.get_be32() {
            1 => Speed::Low,
            2 => Speed::Full,
            3 => Speed::High,
            5 => Speed::Super,
            _ => Speed::Unknown,
        };

        let mut summary = Self {
            path,
            location: Location::new(bus, dev),
            speed,
            vendor_id: dec.get_be16(),
            product_id: dec.get_be16(),
            bcd_device: dec.get_be16(),
            class: dec.get_u8(),
            subclass: dec.get_u8(),
            protocol: dec.get_u8(),
            configuration_value: dec.get_u8(),
            num_configurations: dec.get_u8(),
            interfaces: Vec::new(),
        };

        let count = dec.get_u8() as usize;
        for _ in 0..count {
            if with_interfaces {
                let iff = InterfaceClass {
                    class: dec.get_u8(),
                    subclass: dec.get_u8(),
                    protocol: dec.get_u8(),
                };
                dec.skip(1);
                summary.interfaces.push(iff);
            } else {
                summary.interfaces.push(InterfaceClass::default());
            }
        }

        summary
    }
}

/// Handshake request received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeRequest {
    /// OP_REQ_DEVLIST: enumerate exported devices
    DevList,
    /// OP_REQ_IMPORT: attach to a device by bus-id
    Import { bus_id: String },
}

impl HandshakeRequest {
    /// Count of body bytes following a request header with this opcode
    pub fn body_len(header: &OpHeader) -> Result<usize> {
        match header.opcode {
            op::REQ_DEVLIST => Ok(0),
            op::REQ_IMPORT => Ok(BUSID_LEN),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }

    /// Decode a request from its validated header and body
    pub fn decode(header: &OpHeader, body: &[u8]) -> Result<Self> {
        match header.opcode {
            op::REQ_DEVLIST => Ok(HandshakeRequest::DevList),
            op::REQ_IMPORT => {
                let mut dec = Decoder::new(body);
                Ok(HandshakeRequest::Import {
                    bus_id: get_padded_str(&mut dec, BUSID_LEN),
                })
            }
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::with_capacity(OpHeader::SIZE + BUSID_LEN);
        match self {
            HandshakeRequest::DevList => {
                OpHeader::new(op::REQ_DEVLIST, op::STATUS_OK).encode(&mut enc);
            }
            HandshakeRequest::Import { bus_id } => {
                OpHeader::new(op::REQ_IMPORT, op::STATUS_OK).encode(&mut enc);
                put_padded_str(&mut enc, bus_id, BUSID_LEN);
            }
        }
        enc.freeze()
    }
}

impl fmt::Display for HandshakeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeRequest::DevList => write!(f, "OP_REQ_DEVLIST"),
            HandshakeRequest::Import { bus_id } => write!(f, "OP_REQ_IMPORT: {}", bus_id),
        }
    }
}

/// Handshake reply sent to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeResponse {
    /// OP_REP_DEVLIST: all devices available for import
    DevList(Vec<DeviceSummary>),
    /// OP_REP_IMPORT: the imported device, or `None` on failure
    Import(Option<DeviceSummary>),
}

impl HandshakeResponse {
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::with_capacity(OpHeader::SIZE + DeviceSummary::SIZE);
        match self {
            HandshakeResponse::DevList(devices) => {
                OpHeader::new(op::REP_DEVLIST, op::STATUS_OK).encode(&mut enc);
                enc.put_be32(devices.len() as u32);
                for dev in devices {
                    dev.encode(&mut enc, true);
                }
            }
            HandshakeResponse::Import(Some(dev)) => {
                OpHeader::new(op::REP_IMPORT, op::STATUS_OK).encode(&mut enc);
                dev.encode(&mut enc, false);
            }
            HandshakeResponse::Import(None) => {
                OpHeader::new(op::REP_IMPORT, op::STATUS_ERROR).encode(&mut enc);
            }
        }
        enc.freeze()
    }

    /// Decode a complete reply (client side)
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut raw = [0u8; OpHeader::SIZE];
        raw.copy_from_slice(&data[..OpHeader::SIZE]);
        let header = OpHeader::decode(&raw)?;
        let mut dec = Decoder::new(&data[OpHeader::SIZE..]);

        match header.opcode {
            op::REP_DEVLIST => {
                let count = dec.get_be32();
                let devices = (0..count)
                    .map(|_| DeviceSummary::decode(&mut dec, true))
                    .collect();
                Ok(HandshakeResponse::DevList(devices))
            }
            op::REP_IMPORT if header.status == op::STATUS_OK => Ok(HandshakeResponse::Import(
                Some(DeviceSummary::decode(&mut dec, false)),
            )),
            op::REP_IMPORT => Ok(HandshakeResponse::Import(None)),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

impl fmt::Display for HandshakeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeResponse::DevList(devices) => {
                write!(f, "OP_REP_DEVLIST: {} device(s)", devices.len())
            }
            HandshakeResponse::Import(Some(dev)) => write!(f, "OP_REP_IMPORT: {} OK", dev.location),
            HandshakeResponse::Import(None) => write!(f, "OP_REP_IMPORT: FAILED"),
        }
    }
}

// ---------------------------------------------------------------------------
// I/O
// ---------------------------------------------------------------------------

/// Transfer direction, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Host to device
    #[default]
    Out,
    /// Device to host
    In,
}

impl Direction {
    pub fn code(self) -> u32 {
        match self {
            Direction::Out => 0,
            Direction::In => 1,
        }
    }

    pub fn from_code(code: u32) -> Self {
        if code == 1 { Direction::In } else { Direction::Out }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "out"),
            Direction::In => write!(f, "in"),
        }
    }
}

/// Common header of all I/O messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoHeader {
    pub command: u32,
    pub seqnum: u32,
    pub location: Location,
    pub direction: Direction,
    pub endpoint: u32,
}

impl IoHeader {
    pub const SIZE: usize = 20;

    /// Size of every command-specific body (excluding payload)
    pub const BODY_SIZE: usize = 28;

    pub fn decode(data: &[u8; Self::SIZE]) -> Self {
        let mut dec = Decoder::new(data);
        Self {
            command: dec.get_be32(),
            seqnum: dec.get_be32(),
            location: Location::new(dec.get_be16(), dec.get_be16()),
            direction: Direction::from_code(dec.get_be32()),
            endpoint: dec.get_be32(),
        }
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.put_be32(self.command);
        enc.put_be32(self.seqnum);
        enc.put_be16(self.location.bus);
        enc.put_be16(self.location.dev);
        enc.put_be32(self.direction.code());
        enc.put_be32(self.endpoint);
    }

    /// Header of a reply to this request: the command is replaced, the
    /// sequence number and location are echoed, direction and endpoint
    /// are zeroed
    fn reply(&self, command: u32) -> Self {
        Self {
            command,
            seqnum: self.seqnum,
            location: self.location,
            direction: Direction::Out,
            endpoint: 0,
        }
    }
}

/// URB transfer flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferFlags(pub u32);

impl TransferFlags {
    pub const SHORT_NOT_OK: u32 = 0x0001;
    pub const ISO_ASAP: u32 = 0x0002;
    pub const ZERO_PACKET: u32 = 0x0040;
    pub const NO_INTERRUPT: u32 = 0x0080;
    pub const DIR_IN: u32 = 0x0200;

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

impl fmt::Display for TransferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::SHORT_NOT_OK, "SHORT_NOT_OK"),
            (Self::ISO_ASAP, "ISO_ASAP"),
            (Self::ZERO_PACKET, "ZERO_PACKET"),
            (Self::NO_INTERRUPT, "NO_INTERRUPT"),
            (Self::DIR_IN, "DIR_IN"),
        ];

        let mut first = true;
        let mut rest = self.0;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "{}", name)?;
                first = false;
                rest &= !bit;
            }
        }

        if rest != 0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "0x{:x}", rest)?;
        } else if first {
            write!(f, "0")?;
        }

        Ok(())
    }
}

/// USBIP_CMD_SUBMIT: a transfer request
///
/// The request doubles as the transfer state while it waits in an
/// endpoint queue: for OUT transfers `buffer` holds the payload received
/// from the host and `actual` counts bytes already consumed by the device;
/// for IN transfers `buffer` accumulates data produced by the device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmitRequest {
    pub header: IoHeader,
    pub flags: TransferFlags,
    /// Transfer length declared by the host
    pub length: u32,
    pub iso_start_frame: u32,
    pub iso_packets: u32,
    pub interval: u32,
    pub setup: SetupPacket,
    pub buffer: Vec<u8>,
    actual: usize,
}

impl SubmitRequest {
    /// Create a request with no flags, setup or payload
    pub fn new(header: IoHeader, length: u32) -> Self {
        Self {
            header: IoHeader {
                command: cmd::SUBMIT,
                ..header
            },
            length,
            ..Default::default()
        }
    }

    fn decode_body(header: IoHeader, body: &[u8; IoHeader::BODY_SIZE]) -> Self {
        let mut dec = Decoder::new(body);
        let flags = TransferFlags(dec.get_be32());
        let length = dec.get_be32();
        let iso_start_frame = dec.get_be32();
        let iso_packets = dec.get_be32();
        let interval = dec.get_be32();
        let mut setup = [0u8; 8];
        dec.get_bytes(&mut setup);

        Self {
            header,
            flags,
            length,
            iso_start_frame,
            iso_packets,
            interval,
            setup: SetupPacket::decode(&setup),
            buffer: Vec::new(),
            actual: 0,
        }
    }

    /// Encode the request with its OUT payload (client side)
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::with_capacity(IoHeader::SIZE + IoHeader::BODY_SIZE);
        IoHeader {
            command: cmd::SUBMIT,
            ..self.header
        }
        .encode(&mut enc);
        enc.put_be32(self.flags.0);
        enc.put_be32(self.length);
        enc.put_be32(self.iso_start_frame);
        enc.put_be32(self.iso_packets);
        enc.put_be32(self.interval);
        enc.put_bytes(&self.setup.encode());
        if !self.is_in() {
            enc.put_bytes(&self.buffer);
        }
        enc.freeze()
    }

    pub fn seqnum(&self) -> u32 {
        self.header.seqnum
    }

    pub fn endpoint(&self) -> u32 {
        self.header.endpoint
    }

    pub fn is_in(&self) -> bool {
        self.header.direction == Direction::In
    }

    /// Transfer length clamped to [`MAX_TRANSFER_SIZE`]
    pub fn transfer_length(&self) -> usize {
        (self.length as usize).min(MAX_TRANSFER_SIZE)
    }

    /// For OUT transfers: how many payload bytes to read into the
    /// request, and how many excess bytes to drain after them
    pub fn out_payload_split(&self) -> (usize, usize) {
        if self.is_in() {
            return (0, 0);
        }
        let keep = self.transfer_length();
        (keep, self.length as usize - keep)
    }

    /// Bytes transferred so far
    pub fn actual_length(&self) -> usize {
        if self.is_in() {
            self.buffer.len()
        } else {
            self.actual
        }
    }

    /// OUT payload not yet consumed
    pub fn pending_out(&self) -> &[u8] {
        &self.buffer[self.actual.min(self.buffer.len())..]
    }

    /// Copy up to `out.len()` bytes of pending OUT payload into `out`
    pub fn consume_out(&mut self, out: &mut [u8]) -> usize {
        let pending = self.pending_out();
        let n = pending.len().min(out.len());
        out[..n].copy_from_slice(&pending[..n]);
        self.actual += n;
        n
    }

    /// True once an OUT payload has been consumed entirely
    pub fn out_complete(&self) -> bool {
        self.actual >= self.buffer.len()
    }

    /// Append IN data, up to the transfer length; returns the count of
    /// bytes taken
    pub fn produce_in(&mut self, data: &[u8]) -> usize {
        let room = self.transfer_length().saturating_sub(self.buffer.len());
        let n = room.min(data.len());
        self.buffer.extend_from_slice(&data[..n]);
        n
    }

    /// Build the reply for this request. `status` is 0 on success or a
    /// negated errno.
    pub fn into_response(self, status: i32) -> SubmitResponse {
        let actual_length = self.actual_length() as u32;
        let data = if self.is_in() {
            let mut data = self.buffer;
            data.truncate(self.length as usize);
            data
        } else {
            Vec::new()
        };

        SubmitResponse {
            header: self.header.reply(cmd::RET_SUBMIT),
            status,
            actual_length: if status == 0 { actual_length } else { 0 },
            iso_start_frame: self.iso_start_frame,
            iso_packets: if status == 0 { self.iso_packets } else { 0 },
            error_count: 0,
            data: if status == 0 { data } else { Vec::new() },
        }
    }
}

impl fmt::Display for SubmitRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "USBIP_CMD_SUBMIT #{:08x}: {} {} bytes, ep: {}",
            self.header.seqnum, self.header.direction, self.length, self.header.endpoint
        )?;
        if self.flags.0 != 0 {
            write!(f, ", flags: {}", self.flags)?;
        }
        if self.header.endpoint == 0 {
            write!(f, ", setup: {}", self.setup)?;
        }
        Ok(())
    }
}

/// USBIP_RET_SUBMIT: a transfer reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmitResponse {
    pub header: IoHeader,
    pub status: i32,
    pub actual_length: u32,
    pub iso_start_frame: u32,
    pub iso_packets: u32,
    pub error_count: u32,
    /// IN payload
    pub data: Vec<u8>,
}

impl SubmitResponse {
    /// Decode a reply body (client side); `payload` is the IN data that
    /// followed it on the wire
    pub fn decode(header: IoHeader, body: &[u8; IoHeader::BODY_SIZE], payload: Vec<u8>) -> Self {
        let mut dec = Decoder::new(body);
        Self {
            header,
            status: dec.get_be32() as i32,
            actual_length: dec.get_be32(),
            iso_start_frame: dec.get_be32(),
            iso_packets: dec.get_be32(),
            error_count: dec.get_be32(),
            data: payload,
        }
    }

    /// Peek at the `actual_length` field of an encoded body
    pub fn body_actual_length(body: &[u8; IoHeader::BODY_SIZE]) -> u32 {
        let mut dec = Decoder::new(&body[4..8]);
        dec.get_be32()
    }
}

impl fmt::Display for SubmitResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "USBIP_RET_SUBMIT #{:08x}: status {}, {} bytes",
            self.header.seqnum, self.status, self.actual_length
        )
    }
}

/// USBIP_CMD_UNLINK: cancel a pending submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnlinkRequest {
    pub header: IoHeader,
    /// Sequence number of the submit to cancel
    pub unlink_seqnum: u32,
}

impl UnlinkRequest {
    fn decode_body(header: IoHeader, body: &[u8; IoHeader::BODY_SIZE]) -> Self {
        let mut dec = Decoder::new(body);
        Self {
            header,
            unlink_seqnum: dec.get_be32(),
        }
    }

    /// Encode the request (client side)
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::with_capacity(IoHeader::SIZE + IoHeader::BODY_SIZE);
        IoHeader {
            command: cmd::UNLINK,
            ..self.header
        }
        .encode(&mut enc);
        enc.put_be32(self.unlink_seqnum);
        enc.put_zeros(IoHeader::BODY_SIZE - 4);
        enc.freeze()
    }

    /// Build the reply; `status` is `-ECONNRESET` if the request was
    /// found and cancelled, 0 if it had already completed
    pub fn response(&self, status: i32) -> UnlinkResponse {
        UnlinkResponse {
            header: self.header.reply(cmd::RET_UNLINK),
            status,
        }
    }
}

impl fmt::Display for UnlinkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "USBIP_CMD_UNLINK #{:08x}: unlink #{:08x}",
            self.header.seqnum, self.unlink_seqnum
        )
    }
}

/// USBIP_RET_UNLINK: cancellation reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnlinkResponse {
    pub header: IoHeader,
    pub status: i32,
}

impl UnlinkResponse {
    pub fn decode(header: IoHeader, body: &[u8; IoHeader::BODY_SIZE]) -> Self {
        let mut dec = Decoder::new(body);
        Self {
            header,
            status: dec.get_be32() as i32,
        }
    }
}

impl fmt::Display for UnlinkResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "USBIP_RET_UNLINK #{:08x}: status {}",
            self.header.seqnum, self.status
        )
    }
}

/// I/O request received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoRequest {
    Submit(SubmitRequest),
    Unlink(UnlinkRequest),
}

impl IoRequest {
    /// Decode the fixed part of a request. OUT submit payloads follow on
    /// the wire and are read separately, see
    /// [`SubmitRequest::out_payload_split`].
    pub fn decode(header: IoHeader, body: &[u8; IoHeader::BODY_SIZE]) -> Result<Self> {
        match header.command {
            cmd::SUBMIT => Ok(IoRequest::Submit(SubmitRequest::decode_body(header, body))),
            cmd::UNLINK => Ok(IoRequest::Unlink(UnlinkRequest::decode_body(header, body))),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }

    pub fn header(&self) -> &IoHeader {
        match self {
            IoRequest::Submit(rq) => &rq.header,
            IoRequest::Unlink(rq) => &rq.header,
        }
    }
}

impl fmt::Display for IoRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoRequest::Submit(rq) => rq.fmt(f),
            IoRequest::Unlink(rq) => rq.fmt(f),
        }
    }
}

/// I/O reply sent to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoResponse {
    Submit(SubmitResponse),
    Unlink(UnlinkResponse),
}

impl IoResponse {
    pub fn header(&self) -> &IoHeader {
        match self {
            IoResponse::Submit(rsp) => &rsp.header,
            IoResponse::Unlink(rsp) => &rsp.header,
        }
    }

    pub fn encode_header(&self) -> Bytes {
        let mut enc = Encoder::with_capacity(IoHeader::SIZE);
        self.header().encode(&mut enc);
        enc.freeze()
    }

    /// Encode the body, including the IN payload of a submit reply
    pub fn encode_body(&self) -> Bytes {
        match self {
            IoResponse::Submit(rsp) => {
                let mut enc = Encoder::with_capacity(IoHeader::BODY_SIZE + rsp.data.len());
                enc.put_be32(rsp.status as u32);
                enc.put_be32(rsp.actual_length);
                enc.put_be32(rsp.iso_start_frame);
                enc.put_be32(rsp.iso_packets);
                enc.put_be32(rsp.error_count);
                enc.put_zeros(8);
                enc.put_bytes(&rsp.data);
                enc.freeze()
            }
            IoResponse::Unlink(rsp) => {
                let mut enc = Encoder::with_capacity(IoHeader::BODY_SIZE);
                enc.put_be32(rsp.status as u32);
                enc.put_zeros(IoHeader::BODY_SIZE - 4);
                enc.freeze()
            }
        }
    }
}

impl From<SubmitResponse> for IoResponse {
    fn from(rsp: SubmitResponse) -> Self {
        IoResponse::Submit(rsp)
    }
}

impl From<UnlinkResponse> for IoResponse {
    fn from(rsp: UnlinkResponse) -> Self {
        IoResponse::Unlink(rsp)
    }
}

impl fmt::Display for IoResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoResponse::Submit(rsp) => rsp.fmt(f),
            IoResponse::Unlink(rsp) => rsp.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UsbError;

    fn submit_header(direction: Direction, endpoint: u32) -> IoHeader {
        IoHeader {
            command: cmd::SUBMIT,
            seqnum: 0x2a,
            location: Location::new(1, 2),
            direction,
            endpoint,
        }
    }

    fn decode_submit(bytes: &[u8]) -> SubmitRequest {
        let mut header = [0u8; IoHeader::SIZE];
        header.copy_from_slice(&bytes[..IoHeader::SIZE]);
        let mut body = [0u8; IoHeader::BODY_SIZE];
        body.copy_from_slice(&bytes[IoHeader::SIZE..IoHeader::SIZE + IoHeader::BODY_SIZE]);

        match IoRequest::decode(IoHeader::decode(&header), &body).unwrap() {
            IoRequest::Submit(rq) => rq,
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_op_header_rejects_bad_version() {
        let raw = [0x01, 0x06, 0x80, 0x05, 0, 0, 0, 0];
        assert!(matches!(
            OpHeader::decode(&raw),
            Err(ProtocolError::BadVersion(0x0106))
        ));

        let raw = [0x01, 0x11, 0x80, 0x05, 0, 0, 0, 0];
        let header = OpHeader::decode(&raw).unwrap();
        assert_eq!(header.opcode, op::REQ_DEVLIST);
        assert_eq!(HandshakeRequest::body_len(&header).unwrap(), 0);
    }

    #[test]
    fn test_unknown_opcode() {
        let header = OpHeader::new(0x8006, 0);
        assert!(matches!(
            HandshakeRequest::body_len(&header),
            Err(ProtocolError::UnknownOpcode(0x8006))
        ));
    }

    #[test]
    fn test_import_request_bus_id() {
        let bytes = HandshakeRequest::Import {
            bus_id: "1-3".to_string(),
        }
        .encode();
        assert_eq!(bytes.len(), OpHeader::SIZE + BUSID_LEN);
        assert_eq!(&bytes[..4], &[0x01, 0x11, 0x80, 0x03]);

        let mut raw = [0u8; OpHeader::SIZE];
        raw.copy_from_slice(&bytes[..OpHeader::SIZE]);
        let header = OpHeader::decode(&raw).unwrap();
        let rq = HandshakeRequest::decode(&header, &bytes[OpHeader::SIZE..]).unwrap();
        assert_eq!(
            rq,
            HandshakeRequest::Import {
                bus_id: "1-3".to_string()
            }
        );
    }

    #[test]
    fn test_device_record_layout() {
        let summary = DeviceSummary {
            path: Location::new(1, 1).path(),
            location: Location::new(1, 1),
            speed: Speed::High,
            vendor_id: 0x1234,
            product_id: 0x5678,
            bcd_device: 0x0100,
            configuration_value: 1,
            num_configurations: 1,
            interfaces: vec![
                InterfaceClass {
                    class: 7,
                    subclass: 1,
                    protocol: 4,
                },
                InterfaceClass {
                    class: 7,
                    subclass: 1,
                    protocol: 2,
                },
            ],
            ..Default::default()
        };

        let bytes = HandshakeResponse::DevList(vec![summary.clone()]).encode();
        assert_eq!(bytes.len(), OpHeader::SIZE + 4 + DeviceSummary::SIZE + 2 * 4);

        let record = &bytes[OpHeader::SIZE + 4..];
        assert_eq!(&record[PATH_LEN..PATH_LEN + 4], b"1-1\0");
        // busnum, devnum, speed
        assert_eq!(&record[288..300], &[0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 3]);
        assert_eq!(&record[300..302], &[0x12, 0x34]);
        // interface count, then the first class triple with padding
        assert_eq!(record[311], 2);
        assert_eq!(&record[312..316], &[7, 1, 4, 0]);

        match HandshakeResponse::decode(&bytes).unwrap() {
            HandshakeResponse::DevList(devices) => assert_eq!(devices, vec![summary]),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_failed_import_has_no_record() {
        let bytes = HandshakeResponse::Import(None).encode();
        assert_eq!(&bytes[..], &[0x01, 0x11, 0x00, 0x03, 0, 0, 0, 1]);
    }

    #[test]
    fn test_out_submit_payload_split() {
        let mut rq = SubmitRequest {
            header: submit_header(Direction::Out, 2),
            length: (MAX_TRANSFER_SIZE + 100) as u32,
            ..Default::default()
        };
        assert_eq!(rq.out_payload_split(), (MAX_TRANSFER_SIZE, 100));

        rq.header.direction = Direction::In;
        assert_eq!(rq.out_payload_split(), (0, 0));
        assert_eq!(rq.transfer_length(), MAX_TRANSFER_SIZE);
    }

    #[test]
    fn test_submit_request_wire_layout() {
        let rq = SubmitRequest {
            header: submit_header(Direction::Out, 2),
            flags: TransferFlags(TransferFlags::ZERO_PACKET),
            length: 3,
            buffer: vec![1, 2, 3],
            ..Default::default()
        };

        let bytes = rq.encode();
        assert_eq!(bytes.len(), IoHeader::SIZE + IoHeader::BODY_SIZE + 3);
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[8..12], &[0, 1, 0, 2]);

        let decoded = decode_submit(&bytes);
        assert_eq!(decoded.length, 3);
        assert_eq!(decoded.flags, TransferFlags(TransferFlags::ZERO_PACKET));
        assert!(decoded.buffer.is_empty());
        assert_eq!(decoded.out_payload_split(), (3, 0));
    }

    #[test]
    fn test_out_consume_in_chunks() {
        let mut rq = SubmitRequest {
            header: submit_header(Direction::Out, 1),
            length: 5,
            buffer: vec![1, 2, 3, 4, 5],
            ..Default::default()
        };

        let mut out = [0u8; 2];
        assert_eq!(rq.consume_out(&mut out), 2);
        assert_eq!(out, [1, 2]);
        assert!(!rq.out_complete());
        assert_eq!(rq.consume_out(&mut out), 2);
        assert_eq!(rq.consume_out(&mut out), 1);
        assert_eq!(out[0], 5);
        assert!(rq.out_complete());
        assert_eq!(rq.actual_length(), 5);

        let rsp = rq.into_response(0);
        assert_eq!(rsp.actual_length, 5);
        assert!(rsp.data.is_empty());
    }

    #[test]
    fn test_in_response_encoding() {
        let mut rq = SubmitRequest {
            header: submit_header(Direction::In, 1),
            length: 4,
            ..Default::default()
        };
        assert_eq!(rq.produce_in(b"hello"), 4);

        let rsp = IoResponse::from(rq.into_response(0));
        let header = rsp.encode_header();
        assert_eq!(
            &header[..],
            &[0, 0, 0, 3, 0, 0, 0, 0x2a, 0, 1, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0]
        );

        let body = rsp.encode_body();
        assert_eq!(body.len(), IoHeader::BODY_SIZE + 4);
        assert_eq!(&body[4..8], &[0, 0, 0, 4]);
        assert_eq!(&body[IoHeader::BODY_SIZE..], b"hell");
    }

    #[test]
    fn test_error_response_carries_no_data() {
        let mut rq = SubmitRequest {
            header: submit_header(Direction::In, 1),
            length: 4,
            ..Default::default()
        };
        rq.produce_in(b"ab");

        let rsp = rq.into_response(UsbError::Pipe.status());
        assert_eq!(rsp.status, -32);
        assert_eq!(rsp.actual_length, 0);
        assert!(rsp.data.is_empty());

        let body = IoResponse::from(rsp).encode_body();
        assert_eq!(&body[..4], &[0xff, 0xff, 0xff, 0xe0]);
    }

    #[test]
    fn test_unlink_layout() {
        let rq = UnlinkRequest {
            header: IoHeader {
                command: cmd::UNLINK,
                seqnum: 7,
                location: Location::new(1, 2),
                ..Default::default()
            },
            unlink_seqnum: 5,
        };

        let bytes = rq.encode();
        assert_eq!(bytes.len(), IoHeader::SIZE + IoHeader::BODY_SIZE);
        assert_eq!(&bytes[20..24], &[0, 0, 0, 5]);

        let rsp = IoResponse::from(rq.response(UsbError::ConnectionReset.status()));
        assert_eq!(rsp.header().command, cmd::RET_UNLINK);
        assert_eq!(rsp.header().seqnum, 7);
        let body = rsp.encode_body();
        assert_eq!(body.len(), IoHeader::BODY_SIZE);
        assert_eq!(&body[..4], &(-104i32).to_be_bytes());
    }

    #[test]
    fn test_unknown_command() {
        let header = IoHeader {
            command: 9,
            ..Default::default()
        };
        assert!(matches!(
            IoRequest::decode(header, &[0u8; IoHeader::BODY_SIZE]),
            Err(ProtocolError::UnknownCommand(9))
        ));
    }

    #[test]
    fn test_display_for_logs() {
        let rq = SubmitRequest {
            header: submit_header(Direction::In, 1),
            length: 512,
            ..Default::default()
        };
        assert_eq!(rq.to_string(), "USBIP_CMD_SUBMIT #0000002a: in 512 bytes, ep: 1");

        let rsp = HandshakeResponse::Import(Some(DeviceSummary {
            location: Location::new(1, 1),
            ..Default::default()
        }));
        assert_eq!(rsp.to_string(), "OP_REP_IMPORT: 1-1 OK");

        assert_eq!(
            TransferFlags(TransferFlags::DIR_IN | TransferFlags::SHORT_NOT_OK | 0x1000).to_string(),
            "SHORT_NOT_OK,DIR_IN,0x1000"
        );
    }
}

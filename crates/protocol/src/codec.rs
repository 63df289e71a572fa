//! Fixed-endianness binary encoder and decoder
//!
//! Every USB/IP structure is built on these two types. USB/IP headers are
//! big-endian (network byte order), while USB descriptors and setup packets
//! embedded in them are little-endian, so both byte orders are exposed
//! side by side.
//!
//! The decoder has no error path: all protocol structures have a fixed size,
//! and callers read exactly that many bytes from the network before decoding.
//! Decoding past the end of the input is a programming error and panics.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

/// Appends binary fields to a growable buffer
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Create an encoder with a preallocated capacity hint
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    /// Append `count` zero bytes (padding)
    pub fn put_zeros(&mut self, count: usize) {
        self.buf.put_bytes(0, count);
    }

    pub fn put_le16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn put_be16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn put_le32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn put_be32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    /// Number of bytes encoded so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Overwrite a little-endian 16-bit field at `offset`
    ///
    /// Used for length fields that are only known once the whole
    /// structure has been encoded.
    pub fn patch_le16(&mut self, offset: usize, v: u16) {
        LittleEndian::write_u16(&mut self.buf[offset..offset + 2], v);
    }

    /// Encoded bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Consumes binary fields from a byte slice, advancing a cursor
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Count of bytes not consumed yet
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, count: usize) -> &'a [u8] {
        assert!(
            self.buf.len() >= count,
            "decoder overrun: need {} bytes, {} available",
            count,
            self.buf.len()
        );

        let (head, tail) = self.buf.split_at(count);
        self.buf = tail;
        head
    }

    pub fn get_u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    pub fn get_le16(&mut self) -> u16 {
        LittleEndian::read_u16(self.take(2))
    }

    pub fn get_be16(&mut self) -> u16 {
        BigEndian::read_u16(self.take(2))
    }

    pub fn get_le32(&mut self) -> u32 {
        LittleEndian::read_u32(self.take(4))
    }

    pub fn get_be32(&mut self) -> u32 {
        BigEndian::read_u32(self.take(4))
    }

    /// Fill `out` with the next `out.len()` bytes
    pub fn get_bytes(&mut self, out: &mut [u8]) {
        out.copy_from_slice(self.take(out.len()));
    }

    /// Skip `count` bytes (padding)
    pub fn skip(&mut self, count: usize) {
        self.take(count);
    }
}

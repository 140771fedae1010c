//! # Real-time Transport Protocol (RTP) Packet Buffer
//!
//! This module provides the generic RTP packet model (RFC 3550) used by the
//! H.265 payload format implementation:
//!
//! - A growable byte buffer with a logical length (`limit`) separate from its capacity
//! - Fixed-header field accessors and mutators read straight from the bytes
//! - Payload-region extraction that accounts for CSRC lists, header extensions and padding
//!
//! ## Example: Creating and Parsing RTP Packets
//!
//! ```rust
//! use rtp_hevc::format::rtp::RTPPacket;
//!
//! // Create a new RTP packet
//! let packet = RTPPacket::new(
//!     96,             // Payload type
//!     1000,           // Sequence number
//!     90000,          // Timestamp
//!     0x12345678,     // SSRC
//!     true,           // Marker bit
//!     &[1, 2, 3, 4],
//! );
//! assert_eq!(packet.header_length(), 12);
//!
//! // Parse raw RTP data received from the transport
//! let parsed = RTPPacket::parse(packet.raw_data()).unwrap();
//! assert_eq!(parsed.sequence_number(), 1000);
//! assert_eq!(parsed.payload(), &[1, 2, 3, 4]);
//! ```
//!
//! ## Growing a packet in place
//!
//! ```rust
//! use rtp_hevc::format::rtp::RTPPacket;
//!
//! let mut packet = RTPPacket::new(96, 1, 0, 7, false, &[0xAA]);
//! packet.append(&[0xBB, 0xCC], 2);
//! assert_eq!(packet.payload(), &[0xAA, 0xBB, 0xCC]);
//!
//! packet.shrink(2);
//! assert_eq!(packet.payload(), &[0xAA]);
//! ```

use bytes::{Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Largest datagram accepted from or handed to the transport
pub const RTP_PACKET_MAX_SIZE: usize = 8192;
/// Size of the RTP fixed header
pub const FIXED_HEADER_SIZE: usize = 12;
/// Size of the header extension preamble (profile id + length)
pub const EXT_HEADER_SIZE: usize = 4;
/// The only RTP version this crate speaks
pub const VERSION: u8 = 2;

/// Errors that can occur while validating an RTP datagram
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RTPError {
    /// The packet data is malformed
    #[error("Invalid RTP packet")]
    InvalidPacket,

    /// The version bits are not 2
    #[error("Unsupported RTP version {0}")]
    UnsupportedVersion(u8),

    /// The datagram ends before the header it announces
    #[error("Truncated RTP packet: need {needed} bytes, got {available}")]
    Truncated {
        /// Bytes required by the header fields
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// The datagram is larger than [`RTP_PACKET_MAX_SIZE`]
    #[error("RTP packet of {0} bytes exceeds the maximum packet size")]
    TooLarge(usize),
}

/// Specialized Result type for RTP operations
pub type Result<T> = std::result::Result<T, RTPError>;

/// An RTP packet backed by a growable byte region.
///
/// Header fields are never stored separately; every accessor decodes the
/// bytes at its fixed RFC 3550 offset:
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The buffer keeps a reserved region (`capacity`) and a logical length
/// (`limit`). [`grow`](Self::grow) extends the limit inside the reserved
/// region when it can and reallocates otherwise; [`shrink`](Self::shrink)
/// only ever moves the limit.
///
/// The header accessors require at least [`FIXED_HEADER_SIZE`] bytes and
/// panic on shorter buffers. Packets obtained from [`parse`](Self::parse) or
/// [`new`](Self::new) always satisfy this.
#[derive(Clone)]
pub struct RTPPacket {
    /// Reserved region, always zero-initialised up to its full length
    buffer: BytesMut,
    /// Logical end of the packet inside `buffer`
    limit: usize,
}

impl RTPPacket {
    /// Creates an empty packet with `capacity` reserved bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::zeroed(capacity),
            limit: 0,
        }
    }

    /// Creates a new version 2 RTP packet with the specified parameters
    ///
    /// # Arguments
    ///
    /// * `payload_type` - RTP payload type number
    /// * `sequence_number` - 16-bit sequence number
    /// * `timestamp` - 32-bit timestamp
    /// * `ssrc` - 32-bit synchronization source identifier
    /// * `marker` - Marker bit
    /// * `payload` - Media payload data
    pub fn new(
        payload_type: u8,
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        marker: bool,
        payload: &[u8],
    ) -> Self {
        let mut packet = Self::with_capacity(FIXED_HEADER_SIZE + payload.len());
        packet.grow(FIXED_HEADER_SIZE);
        packet.buffer[0] = VERSION << 6;
        packet.set_marker(marker);
        packet.set_payload_type(payload_type);
        packet.set_sequence_number(sequence_number);
        packet.set_timestamp(timestamp);
        packet.set_ssrc(ssrc);
        packet.extend_from_slice(payload);
        packet
    }

    /// Parses an RTP packet from a raw datagram
    ///
    /// # Errors
    ///
    /// Returns `RTPError` if:
    /// - The datagram is shorter than 12 bytes or larger than [`RTP_PACKET_MAX_SIZE`]
    /// - The version is not 2
    /// - The CSRC list or header extension runs past the end of the datagram
    /// - The padding count is zero or larger than the remaining payload
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FIXED_HEADER_SIZE {
            return Err(RTPError::Truncated {
                needed: FIXED_HEADER_SIZE,
                available: data.len(),
            });
        }
        if data.len() > RTP_PACKET_MAX_SIZE {
            return Err(RTPError::TooLarge(data.len()));
        }

        let version = data[0] >> 6;
        if version != VERSION {
            return Err(RTPError::UnsupportedVersion(version));
        }

        let csrc_count = (data[0] & 0x0F) as usize;
        let mut needed = FIXED_HEADER_SIZE + 4 * csrc_count;

        if data[0] & 0x10 != 0 {
            needed += EXT_HEADER_SIZE;
            if data.len() < needed {
                return Err(RTPError::Truncated {
                    needed,
                    available: data.len(),
                });
            }
            let ext_words = u16::from_be_bytes([data[needed - 2], data[needed - 1]]) as usize;
            needed += ext_words * 4;
        }

        if data.len() < needed {
            return Err(RTPError::Truncated {
                needed,
                available: data.len(),
            });
        }

        if data[0] & 0x20 != 0 {
            let padding_len = data[data.len() - 1] as usize;
            if padding_len == 0 || needed + padding_len > data.len() {
                return Err(RTPError::InvalidPacket);
            }
        }

        let mut packet = Self::with_capacity(data.len());
        packet.wrap(data);
        Ok(packet)
    }

    /// Replaces the packet content with `data`
    ///
    /// The reserved region is reused when it is large enough and replaced
    /// by a bigger one otherwise.
    pub fn wrap(&mut self, data: &[u8]) {
        if data.len() > self.buffer.len() {
            self.buffer = BytesMut::zeroed(data.len());
        }
        self.buffer[..data.len()].copy_from_slice(data);
        self.limit = data.len();
    }

    /// Extends the logical length by `delta` bytes.
    ///
    /// Stays inside the reserved region when possible; otherwise a region of
    /// exactly the new length is allocated and the current bytes are copied
    /// over. Any slice obtained before the call is invalidated, which the
    /// borrow checker enforces.
    pub fn grow(&mut self, delta: usize) {
        if delta == 0 {
            return;
        }

        let new_len = self.limit + delta;
        if new_len <= self.buffer.len() {
            self.limit = new_len;
            return;
        }

        let mut grown = BytesMut::zeroed(new_len);
        grown[..self.limit].copy_from_slice(&self.buffer[..self.limit]);
        self.buffer = grown;
        self.limit = new_len;
    }

    /// Reduces the logical length by `delta`, never below zero. Never reallocates.
    pub fn shrink(&mut self, delta: usize) {
        self.limit = self.limit.saturating_sub(delta);
    }

    /// Appends the first `len` bytes of `data` to the end of the packet
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or larger than `data.len()`.
    pub fn append(&mut self, data: &[u8], len: usize) {
        assert!(
            len > 0 && len <= data.len(),
            "invalid combination of data ({} bytes) and len ({}) passed to append()",
            data.len(),
            len
        );

        let old_limit = self.limit;
        self.grow(len);
        self.buffer[old_limit..old_limit + len].copy_from_slice(&data[..len]);
    }

    /// Appends all of `data`; an empty slice is a no-op
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.append(data, data.len());
        }
    }

    /// Copies `len` bytes starting at `offset` into `out`
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero, `out` is shorter than `len`, or the region
    /// extends past the logical end of the packet.
    pub fn read_region_to_buff(&self, offset: usize, len: usize, out: &mut [u8]) {
        assert!(len > 0, "read_region_to_buff() called with len 0");
        assert!(
            out.len() >= len,
            "output buffer of {} bytes cannot hold {} bytes",
            out.len(),
            len
        );
        assert!(
            offset + len <= self.limit,
            "region {}..{} is outside the packet (limit {})",
            offset,
            offset + len,
            self.limit
        );

        out[..len].copy_from_slice(&self.buffer[offset..offset + len]);
    }

    /// Logical length of the packet in bytes
    pub fn len(&self) -> usize {
        self.limit
    }

    /// Returns true if the packet holds no bytes
    pub fn is_empty(&self) -> bool {
        self.limit == 0
    }

    /// Size of the reserved region
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// The packet bytes up to the logical length
    pub fn raw_data(&self) -> &[u8] {
        &self.buffer[..self.limit]
    }

    /// Copies the packet bytes into an owned `Bytes`
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.raw_data())
    }

    /// Converts the packet into `Bytes` without copying
    pub fn into_bytes(self) -> Bytes {
        let mut buffer = self.buffer;
        buffer.truncate(self.limit);
        buffer.freeze()
    }

    /// Version field (V)
    pub fn version(&self) -> u8 {
        (self.raw_data()[0] & 0xC0) >> 6
    }

    /// Padding bit (P)
    pub fn has_padding(&self) -> bool {
        self.raw_data()[0] & 0x20 != 0
    }

    /// Extension bit (X)
    pub fn has_extension(&self) -> bool {
        self.raw_data()[0] & 0x10 != 0
    }

    /// CSRC count (CC)
    pub fn csrc_count(&self) -> u8 {
        self.raw_data()[0] & 0x0F
    }

    /// Marker bit (M)
    pub fn marker(&self) -> bool {
        self.raw_data()[1] & 0x80 != 0
    }

    /// Payload type (PT)
    pub fn payload_type(&self) -> u8 {
        self.raw_data()[1] & 0x7F
    }

    /// Sequence number
    pub fn sequence_number(&self) -> u16 {
        let data = self.raw_data();
        u16::from_be_bytes([data[2], data[3]])
    }

    /// Timestamp
    pub fn timestamp(&self) -> u32 {
        let data = self.raw_data();
        u32::from_be_bytes([data[4], data[5], data[6], data[7]])
    }

    /// Synchronization source identifier
    pub fn ssrc(&self) -> u32 {
        let data = self.raw_data();
        u32::from_be_bytes([data[8], data[9], data[10], data[11]])
    }

    /// Sets or clears the P bit
    pub fn set_padding(&mut self, padding: bool) {
        self.assert_header();
        if padding {
            self.buffer[0] |= 0x20;
        } else {
            self.buffer[0] &= !0x20;
        }
    }

    /// Sets or clears the M bit
    pub fn set_marker(&mut self, marker: bool) {
        self.assert_header();
        if marker {
            self.buffer[1] |= 0x80;
        } else {
            self.buffer[1] &= 0x7F;
        }
    }

    /// Writes the 7-bit payload type, keeping the marker bit
    pub fn set_payload_type(&mut self, payload_type: u8) {
        self.assert_header();
        self.buffer[1] = (self.buffer[1] & 0x80) | (payload_type & 0x7F);
    }

    /// Writes the sequence number
    pub fn set_sequence_number(&mut self, sequence_number: u16) {
        self.assert_header();
        self.buffer[2..4].copy_from_slice(&sequence_number.to_be_bytes());
    }

    /// Writes the timestamp
    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.assert_header();
        self.buffer[4..8].copy_from_slice(&timestamp.to_be_bytes());
    }

    /// Writes the SSRC
    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.assert_header();
        self.buffer[8..12].copy_from_slice(&ssrc.to_be_bytes());
    }

    /// Length of the header extension body in bytes (zero without the X bit)
    pub fn extension_length(&self) -> usize {
        if self.limit < FIXED_HEADER_SIZE || !self.has_extension() {
            return 0;
        }

        // the length word follows the CSRC list and the 16-bit profile id
        let index = FIXED_HEADER_SIZE + 4 * self.csrc_count() as usize + 2;
        match self.raw_data().get(index..index + 2) {
            Some(words) => u16::from_be_bytes([words[0], words[1]]) as usize * 4,
            None => 0,
        }
    }

    /// Fixed header plus CSRC list plus header extension
    pub fn header_length(&self) -> usize {
        if self.limit < FIXED_HEADER_SIZE {
            return FIXED_HEADER_SIZE;
        }

        let mut length = FIXED_HEADER_SIZE + 4 * self.csrc_count() as usize;
        if self.has_extension() {
            length += EXT_HEADER_SIZE + self.extension_length();
        }
        length
    }

    /// Bytes after the header, padding included
    pub fn payload_length(&self) -> usize {
        self.limit.saturating_sub(self.header_length())
    }

    /// Number of trailing padding bytes announced by the last byte (zero without the P bit)
    pub fn padding_size(&self) -> usize {
        if self.limit < FIXED_HEADER_SIZE || !self.has_padding() {
            return 0;
        }
        self.raw_data()[self.limit - 1] as usize
    }

    /// The header region (fixed header, CSRC list, extension)
    pub fn header(&self) -> &[u8] {
        &self.raw_data()[..self.header_length().min(self.limit)]
    }

    /// Everything after the header, padding included
    pub fn payload(&self) -> &[u8] {
        &self.raw_data()[self.header_length().min(self.limit)..]
    }

    /// The payload with trailing RTP padding removed
    pub fn media_payload(&self) -> &[u8] {
        let payload = self.payload();
        &payload[..payload.len().saturating_sub(self.padding_size())]
    }

    fn assert_header(&self) {
        assert!(
            self.limit >= FIXED_HEADER_SIZE,
            "RTP header access on a {} byte packet",
            self.limit
        );
    }
}

impl PartialEq for RTPPacket {
    fn eq(&self, other: &Self) -> bool {
        self.raw_data() == other.raw_data()
    }
}

impl Eq for RTPPacket {}

impl fmt::Debug for RTPPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.limit < FIXED_HEADER_SIZE {
            return f
                .debug_struct("RTPPacket")
                .field("len", &self.limit)
                .field("capacity", &self.capacity())
                .finish();
        }

        f.debug_struct("RTPPacket")
            .field("marker", &self.marker())
            .field("payload_type", &self.payload_type())
            .field("sequence_number", &self.sequence_number())
            .field("timestamp", &self.timestamp())
            .field("ssrc", &format_args!("{:#010x}", self.ssrc()))
            .field("header_length", &self.header_length())
            .field("payload_length", &self.payload_length())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl fmt::Display for RTPPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.limit < FIXED_HEADER_SIZE {
            return write!(f, "RTP Packet[truncated, len={}]", self.limit);
        }
        write!(
            f,
            "RTP Packet[marker={}, seq={}, timestamp={}, payload_size={}, payload={}]",
            self.marker(),
            self.sequence_number(),
            self.timestamp(),
            self.payload_length(),
            self.payload_type()
        )
    }
}

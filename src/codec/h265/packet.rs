use std::fmt;

use super::types::{NALHeader, NALUnitType};
use crate::format::rtp::{self, RTPPacket};

/// An RTP packet carrying an H.265 payload.
///
/// Wraps an [`RTPPacket`] together with the decoded PayloadHdr and the
/// DONL/DOND flags negotiated out of band. The header is decoded when the
/// packet is built; it is `None` when the payload is shorter than two bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct H265Packet {
    rtp: RTPPacket,
    header: Option<NALHeader>,
    donl_in_use: bool,
    dond_in_use: bool,
    don: Option<u16>,
}

impl H265Packet {
    /// Wraps an RTP packet and decodes its payload header
    pub fn new(rtp: RTPPacket) -> Self {
        let header = NALHeader::parse(rtp.media_payload());
        Self {
            rtp,
            header,
            donl_in_use: false,
            dond_in_use: false,
            don: None,
        }
    }

    /// Parses a datagram received from the transport
    ///
    /// # Errors
    ///
    /// Returns the [`rtp::RTPError`] raised by [`RTPPacket::parse`].
    pub fn parse(data: &[u8]) -> rtp::Result<Self> {
        RTPPacket::parse(data).map(Self::new)
    }

    /// Builds a packet with a fresh RTP header around one NAL unit
    ///
    /// # Arguments
    ///
    /// * `payload_type` - RTP payload type number
    /// * `sequence_number` - 16-bit sequence number
    /// * `timestamp` - 90 kHz RTP timestamp
    /// * `ssrc` - Synchronization source identifier
    /// * `marker` - Marker bit, set on the last packet of an access unit
    /// * `nal_unit` - NAL unit bytes, starting with the 2-byte NAL header
    pub fn from_nal_unit(
        payload_type: u8,
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        marker: bool,
        nal_unit: &[u8],
    ) -> Self {
        Self::new(RTPPacket::new(
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            marker,
            nal_unit,
        ))
    }

    /// Builds a packet from a copied RTP header followed by `pieces`.
    ///
    /// The P bit is cleared since trailing padding is never copied.
    pub(crate) fn synthesize(rtp_header: &[u8], pieces: &[&[u8]]) -> Self {
        let size = rtp_header.len() + pieces.iter().map(|piece| piece.len()).sum::<usize>();
        let mut rtp = RTPPacket::with_capacity(size);
        rtp.wrap(rtp_header);
        for piece in pieces {
            rtp.extend_from_slice(piece);
        }
        rtp.set_padding(false);
        Self::new(rtp)
    }

    /// Decodes the payload header again after the payload was changed
    /// through [`rtp_mut`](Self::rtp_mut)
    pub fn unpack_header(&mut self) {
        self.header = NALHeader::parse(self.rtp.media_payload());
    }

    /// Marks DONL fields as present (`sprop-max-don-diff` > 0)
    pub fn with_donl(mut self, in_use: bool) -> Self {
        self.donl_in_use = in_use;
        self
    }

    /// Marks DOND fields as present in aggregation packets
    pub fn with_dond(mut self, in_use: bool) -> Self {
        self.dond_in_use = in_use;
        self
    }

    /// Attaches a decoding order number
    pub fn with_don(mut self, don: u16) -> Self {
        self.don = Some(don);
        self
    }

    /// Marks whether the payload carries a DONL field
    pub fn set_donl_in_use(&mut self, in_use: bool) {
        self.donl_in_use = in_use;
    }

    /// Marks whether aggregation packets carry DOND fields
    pub fn set_dond_in_use(&mut self, in_use: bool) {
        self.dond_in_use = in_use;
    }

    /// Replaces the decoding order number
    pub fn set_don(&mut self, don: Option<u16>) {
        self.don = don;
    }

    /// Whether the payload carries a DONL field
    pub fn donl_in_use(&self) -> bool {
        self.donl_in_use
    }

    /// Whether aggregation packets carry DOND fields
    pub fn dond_in_use(&self) -> bool {
        self.dond_in_use
    }

    /// Decoding order number, when one was signalled or assigned
    pub fn don(&self) -> Option<u16> {
        self.don
    }

    /// The decoded PayloadHdr, `None` for an unparsed (empty) payload
    pub fn nal_header(&self) -> Option<NALHeader> {
        self.header
    }

    /// Raw 6-bit type of the PayloadHdr
    pub fn nal_type(&self) -> Option<u8> {
        self.header.map(|header| header.nal_type)
    }

    /// Named type of the PayloadHdr
    pub fn unit_type(&self) -> Option<NALUnitType> {
        self.header.map(|header| header.unit_type())
    }

    /// The F bit
    pub fn forbidden(&self) -> Option<bool> {
        self.header.map(|header| header.forbidden)
    }

    /// nuh_layer_id of the PayloadHdr
    pub fn layer_id(&self) -> Option<u8> {
        self.header.map(|header| header.layer_id)
    }

    /// nuh_temporal_id_plus1 of the PayloadHdr
    pub fn tid(&self) -> Option<u8> {
        self.header.map(|header| header.tid)
    }

    /// The underlying RTP packet
    pub fn rtp(&self) -> &RTPPacket {
        &self.rtp
    }

    /// Mutable access to the underlying RTP packet. Call
    /// [`unpack_header`](Self::unpack_header) after touching the payload.
    pub fn rtp_mut(&mut self) -> &mut RTPPacket {
        &mut self.rtp
    }

    /// Gives up the NAL view and returns the RTP packet
    pub fn into_rtp(self) -> RTPPacket {
        self.rtp
    }

    /// RTP payload without padding: PayloadHdr followed by the body
    pub fn payload(&self) -> &[u8] {
        self.rtp.media_payload()
    }

    /// RTP header bytes (fixed header, CSRC list, extension)
    pub fn rtp_header(&self) -> &[u8] {
        self.rtp.header()
    }

    /// The whole datagram, RTP header included
    pub fn raw_data(&self) -> &[u8] {
        self.rtp.raw_data()
    }
}

impl From<RTPPacket> for H265Packet {
    fn from(rtp: RTPPacket) -> Self {
        Self::new(rtp)
    }
}

impl fmt::Debug for H265Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H265Packet")
            .field("rtp", &self.rtp)
            .field("header", &self.header)
            .field("donl_in_use", &self.donl_in_use)
            .field("dond_in_use", &self.dond_in_use)
            .field("don", &self.don)
            .finish()
    }
}

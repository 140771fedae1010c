use bytes::{BufMut, BytesMut};
use log::{debug, trace};

use super::packet::H265Packet;
use super::types::{
    FUHeader, FuPosition, NALHeader, AP_NALU_LENGTH_FIELD_SIZE, AP_NAL_TYPE, DOND_FIELD_SIZE,
    DONL_FIELD_SIZE, FU_HEADER_SIZE, FU_NAL_TYPE, NAL_HEADER_SIZE,
};
use super::{H265Error, Result};
use crate::config::Config;
use crate::format::rtp::{FIXED_HEADER_SIZE, RTP_PACKET_MAX_SIZE};

/// Builds H.265 Aggregation Packets and Fragmentation Units.
///
/// The packetizer holds no per-stream state and never touches sequence
/// numbers: every output packet copies the RTP header of the unit it was
/// built from. The caller numbers packets before they hit the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packetizer {
    max_packet_size: usize,
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new(RTP_PACKET_MAX_SIZE)
    }
}

impl Packetizer {
    /// Creates a packetizer whose output never exceeds `max_packet_size`
    /// bytes, RTP header included
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    /// Creates a packetizer bounded by `config.max_packet_size`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_packet_size)
    }

    /// Largest packet this packetizer builds, RTP header included
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Aggregates several NAL units into one Aggregation Packet
    ///
    /// The AP takes the RTP header, DONL/DOND flags and DON of the first unit.
    /// Its PayloadHdr carries the OR of the F bits and the lowest LayerId and
    /// TID of the aggregated units.
    ///
    /// # Errors
    ///
    /// - [`H265Error::EmptyAggregation`] for an empty list
    /// - [`H265Error::UnitTooShort`] for a unit no longer than an RTP header
    /// - [`H265Error::EmptyPayload`] for a unit without a NAL header
    /// - [`H265Error::NestedAggregation`] / [`H265Error::NestedFragmentation`]
    ///   for a unit that is already an AP or FU
    /// - [`H265Error::DonDifferenceTooLarge`] when DOND is in use and two
    ///   consecutive units are more than 256 apart in decoding order
    /// - [`H265Error::Oversized`] when a unit does not fit its 16-bit size
    ///   field or the AP exceeds the maximum packet size
    pub fn pack_ap(&self, units: &[H265Packet]) -> Result<H265Packet> {
        let first = units.first().ok_or(H265Error::EmptyAggregation)?;
        let donl_in_use = first.donl_in_use();
        let dond_in_use = first.dond_in_use();

        let mut payload_header = NALHeader {
            forbidden: false,
            nal_type: AP_NAL_TYPE,
            layer_id: u8::MAX,
            tid: u8::MAX,
        };
        let mut size = first.rtp_header().len() + NAL_HEADER_SIZE;
        if donl_in_use {
            size += DONL_FIELD_SIZE;
        }

        for (index, unit) in units.iter().enumerate() {
            let header = check_unit(unit)?;
            if header.nal_type == AP_NAL_TYPE {
                return Err(H265Error::NestedAggregation);
            }

            let nalu_len = unit.payload().len();
            if nalu_len > u16::MAX as usize {
                return Err(H265Error::Oversized {
                    size: nalu_len,
                    max: u16::MAX as usize,
                });
            }

            payload_header.forbidden |= header.forbidden;
            payload_header.layer_id = payload_header.layer_id.min(header.layer_id);
            payload_header.tid = payload_header.tid.min(header.tid);

            size += AP_NALU_LENGTH_FIELD_SIZE + nalu_len;
            if index > 0 && dond_in_use {
                size += DOND_FIELD_SIZE;
            }
        }

        if size > self.max_packet_size {
            debug!(
                "Refusing to aggregate {} NAL units into {} bytes (max {})",
                units.len(),
                size,
                self.max_packet_size
            );
            return Err(H265Error::Oversized {
                size,
                max: self.max_packet_size,
            });
        }

        let mut body = BytesMut::with_capacity(size - first.rtp_header().len());
        body.put_slice(&payload_header.encode());

        let mut prev_don = first.don();
        for (index, unit) in units.iter().enumerate() {
            if index == 0 {
                if donl_in_use {
                    body.put_u16(first.don().unwrap_or(0));
                }
            } else if dond_in_use {
                let dond = dond_between(prev_don, unit.don())?;
                body.put_u8(dond);
                prev_don = unit.don().or_else(|| prev_don.map(|don| don.wrapping_add(1)));
            }

            let nalu = unit.payload();
            body.put_u16(nalu.len() as u16);
            body.put_slice(nalu);
        }

        trace!("Aggregated {} NAL units into {} bytes", units.len(), size);

        let mut ap = H265Packet::synthesize(first.rtp_header(), &[&body[..]])
            .with_donl(donl_in_use)
            .with_dond(dond_in_use);
        ap.set_don(first.don());
        Ok(ap)
    }

    /// Wraps one fragment of a NAL unit in a Fragmentation Unit
    ///
    /// `unit` carries the original 2-byte NAL header followed by the bytes of
    /// this fragment. The header provides F, LayerId and TID for the
    /// PayloadHdr and the type for the FU header. A DONL field is written for
    /// START fragments when DONL is in use.
    ///
    /// # Errors
    ///
    /// - [`H265Error::UnitTooShort`] for a unit no longer than an RTP header
    /// - [`H265Error::EmptyPayload`] when there is no NAL header or no fragment data
    /// - [`H265Error::NestedFragmentation`] / [`H265Error::NestedAggregation`]
    ///   for a unit that is already an FU or AP
    /// - [`H265Error::Oversized`] when the FU exceeds the maximum packet size
    pub fn pack_fu(&self, unit: &H265Packet, position: FuPosition) -> Result<H265Packet> {
        let header = check_fragmentable(unit)?;
        let data = &unit.payload()[NAL_HEADER_SIZE..];
        if data.is_empty() {
            return Err(H265Error::EmptyPayload);
        }
        self.build_fu(unit, header, position, data)
    }

    /// Splits a whole NAL unit into START, MIDDLE.. and END fragmentation
    /// units no larger than `mtu` bytes each (RTP header included).
    ///
    /// At least three fragments are produced and the bytes are spread
    /// evenly over them. Only the END fragment keeps the unit's marker bit.
    ///
    /// # Errors
    ///
    /// Same as [`pack_fu`](Self::pack_fu), plus [`H265Error::UnitTooShort`]
    /// when the unit body has fewer than three bytes and
    /// [`H265Error::MtuTooSmall`] when `mtu` cannot hold the FU headers.
    pub fn fragment(&self, unit: &H265Packet, mtu: usize) -> Result<Vec<H265Packet>> {
        let header = check_fragmentable(unit)?;
        let body = &unit.payload()[NAL_HEADER_SIZE..];
        if body.len() < 3 {
            return Err(H265Error::UnitTooShort(unit.raw_data().len()));
        }

        let mtu = mtu.min(self.max_packet_size);
        let mut overhead = unit.rtp_header().len() + NAL_HEADER_SIZE + FU_HEADER_SIZE;
        if unit.donl_in_use() {
            overhead += DONL_FIELD_SIZE;
        }
        if mtu <= overhead {
            return Err(H265Error::MtuTooSmall(mtu));
        }

        let max_chunk = mtu - overhead;
        let count = body.len().div_ceil(max_chunk).max(3);
        let marker = unit.rtp().marker();

        let mut fragments = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * body.len() / count;
            let end = (index + 1) * body.len() / count;
            let position = match index {
                0 => FuPosition::Start,
                i if i + 1 == count => FuPosition::End,
                _ => FuPosition::Middle,
            };

            let mut fragment = self.build_fu(unit, header, position, &body[start..end])?;
            fragment
                .rtp_mut()
                .set_marker(position == FuPosition::End && marker);
            fragments.push(fragment);
        }

        trace!(
            "Fragmented a {} NAL unit of {} bytes into {} FUs",
            header.unit_type(),
            body.len() + NAL_HEADER_SIZE,
            fragments.len()
        );
        Ok(fragments)
    }

    fn build_fu(
        &self,
        unit: &H265Packet,
        header: NALHeader,
        position: FuPosition,
        data: &[u8],
    ) -> Result<H265Packet> {
        let write_donl = position == FuPosition::Start && unit.donl_in_use();

        let mut size = unit.rtp_header().len() + NAL_HEADER_SIZE + FU_HEADER_SIZE + data.len();
        if write_donl {
            size += DONL_FIELD_SIZE;
        }
        if size > self.max_packet_size {
            return Err(H265Error::Oversized {
                size,
                max: self.max_packet_size,
            });
        }

        let mut prefix = BytesMut::with_capacity(NAL_HEADER_SIZE + FU_HEADER_SIZE + DONL_FIELD_SIZE);
        prefix.put_slice(&header.with_type(FU_NAL_TYPE).encode());
        prefix.put_u8(FUHeader::new(position, header.nal_type).0);
        if write_donl {
            prefix.put_u16(unit.don().unwrap_or(0));
        }

        let mut fu = H265Packet::synthesize(unit.rtp_header(), &[&prefix[..], data])
            .with_donl(unit.donl_in_use())
            .with_dond(unit.dond_in_use());
        fu.set_don(unit.don());
        Ok(fu)
    }
}

/// Checks the properties every packetizer input shares and returns its header
fn check_unit(unit: &H265Packet) -> Result<NALHeader> {
    if unit.raw_data().len() <= FIXED_HEADER_SIZE {
        return Err(H265Error::UnitTooShort(unit.raw_data().len()));
    }
    let header = unit.nal_header().ok_or(H265Error::EmptyPayload)?;
    if header.nal_type == FU_NAL_TYPE {
        return Err(H265Error::NestedFragmentation);
    }
    Ok(header)
}

fn check_fragmentable(unit: &H265Packet) -> Result<NALHeader> {
    let header = check_unit(unit)?;
    if header.nal_type == AP_NAL_TYPE {
        return Err(H265Error::NestedAggregation);
    }
    Ok(header)
}

/// DOND = DON(current) - DON(previous) - 1, modulo 2^16.
/// Units without a DON are taken to follow their predecessor directly.
fn dond_between(prev: Option<u16>, current: Option<u16>) -> Result<u8> {
    let (Some(prev), Some(current)) = (prev, current) else {
        return Ok(0);
    };
    let diff = current.wrapping_sub(prev).wrapping_sub(1);
    u8::try_from(diff).map_err(|_| H265Error::DonDifferenceTooLarge(diff as u32 + 1))
}

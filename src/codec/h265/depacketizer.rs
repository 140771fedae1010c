use log::{debug, trace, warn};

use super::packet::H265Packet;
use crate::format::rtp::FIXED_HEADER_SIZE;
use super::types::{
    FUHeader, FuPosition, NALHeader, AP_NALU_LENGTH_FIELD_SIZE, AP_NAL_TYPE, DOND_FIELD_SIZE,
    DONL_FIELD_SIZE, FU_HEADER_SIZE, FU_NAL_TYPE, NAL_HEADER_SIZE, PACI_NAL_TYPE,
};

/// FU reassembly state. Fragments only exist while a NAL unit is being collected.
#[derive(Debug, Default)]
enum Reassembly {
    #[default]
    Idle,
    Collecting {
        /// Position of the last accepted fragment
        position: FuPosition,
        /// NAL type announced by the START fragment
        nal_type: u8,
        /// Synthesized fragments in arrival order, the first one carrying
        /// the reconstructed NAL header
        fragments: Vec<H265Packet>,
    },
}

impl Reassembly {
    fn position(&self) -> Option<FuPosition> {
        match self {
            Reassembly::Idle => None,
            Reassembly::Collecting { position, .. } => Some(*position),
        }
    }

    fn buffered(&self) -> usize {
        match self {
            Reassembly::Idle => 0,
            Reassembly::Collecting { fragments, .. } => fragments.len(),
        }
    }
}

/// Stateful H.265 RTP depacketizer for a single RTP stream.
///
/// Each call to [`handle`](Self::handle) consumes one received packet and
/// returns the NAL units it completes:
///
/// - a single NAL unit packet yields itself
/// - an aggregation packet yields every unit it carries, in order
/// - a fragmentation unit yields nothing until its END fragment arrives
/// - PACI and unspecified payload types yield nothing
///
/// Packets must be fed in RTP sequence order and belong to one SSRC. A
/// fragment that breaks the `START, MIDDLE.., END` sequence drops the
/// partial NAL unit; reassembly resumes at the next START.
#[derive(Debug, Default)]
pub struct Depacketizer {
    state: Reassembly,
}

impl Depacketizer {
    /// Creates a depacketizer with no reassembly in progress
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one received packet
    ///
    /// # Arguments
    ///
    /// * `packet` - Packet received on this depacketizer's stream
    ///
    /// # Returns
    ///
    /// The completed NAL units, possibly none. Each unit keeps the RTP header
    /// of the packet it arrived in and starts with its 2-byte NAL header.
    pub fn handle(&mut self, packet: H265Packet) -> Vec<H265Packet> {
        if packet.rtp().len() < FIXED_HEADER_SIZE {
            debug!(
                "Dropping {} byte packet without a complete RTP header",
                packet.rtp().len()
            );
            return Vec::new();
        }

        let Some(header) = packet.nal_header() else {
            debug!(
                "Dropping packet seq={} with a {} byte payload",
                packet.rtp().sequence_number(),
                packet.payload().len()
            );
            return Vec::new();
        };

        trace!(
            "Handling {} packet seq={} len={}",
            header.unit_type(),
            packet.rtp().sequence_number(),
            packet.raw_data().len()
        );

        match header.nal_type {
            0..=47 => self.handle_single(packet),
            AP_NAL_TYPE => self.handle_aggregation(&packet),
            FU_NAL_TYPE => self.handle_fragment(&packet, header),
            PACI_NAL_TYPE => {
                debug!(
                    "Discarding unsupported PACI packet seq={}",
                    packet.rtp().sequence_number()
                );
                Vec::new()
            }
            nal_type => {
                debug!(
                    "Dropping packet seq={} with unspecified NAL type {}",
                    packet.rtp().sequence_number(),
                    nal_type
                );
                Vec::new()
            }
        }
    }

    /// Drops any partially reassembled NAL unit
    pub fn reset(&mut self) {
        if self.state.buffered() > 0 {
            debug!("Discarding {} buffered FU fragments", self.state.buffered());
        }
        self.state = Reassembly::Idle;
    }

    /// Position of the last accepted fragment, `None` when idle
    pub fn position(&self) -> Option<FuPosition> {
        self.state.position()
    }

    /// Number of fragments held for the NAL unit being reassembled
    pub fn buffered_fragments(&self) -> usize {
        self.state.buffered()
    }

    fn handle_single(&mut self, packet: H265Packet) -> Vec<H265Packet> {
        if !packet.donl_in_use() {
            return vec![packet];
        }

        // [PayloadHdr][DONL][NAL unit body]
        let payload = packet.payload();
        if payload.len() < NAL_HEADER_SIZE + DONL_FIELD_SIZE {
            debug!(
                "Single NAL unit packet seq={} too short for its DONL field",
                packet.rtp().sequence_number()
            );
            return Vec::new();
        }

        let don = u16::from_be_bytes([payload[2], payload[3]]);
        let unit = H265Packet::synthesize(
            packet.rtp_header(),
            &[
                &payload[..NAL_HEADER_SIZE],
                &payload[NAL_HEADER_SIZE + DONL_FIELD_SIZE..],
            ],
        );
        vec![inherit_flags(unit, &packet).with_don(don)]
    }

    fn handle_aggregation(&mut self, packet: &H265Packet) -> Vec<H265Packet> {
        let payload = packet.payload();
        let seq = packet.rtp().sequence_number();
        let mut units = Vec::new();
        let mut offset = NAL_HEADER_SIZE;
        let mut don: Option<u16> = None;

        while offset < payload.len() {
            let first = units.is_empty();

            if first && packet.donl_in_use() {
                let Some(field) = payload.get(offset..offset + DONL_FIELD_SIZE) else {
                    debug!("AP seq={} truncated in DONL field", seq);
                    break;
                };
                don = Some(u16::from_be_bytes([field[0], field[1]]));
                offset += DONL_FIELD_SIZE;
            } else if !first && packet.dond_in_use() {
                let Some(&dond) = payload.get(offset) else {
                    debug!("AP seq={} truncated in DOND field", seq);
                    break;
                };
                don = don.map(|prev| prev.wrapping_add(dond as u16 + 1));
                offset += DOND_FIELD_SIZE;
            }

            let Some(field) = payload.get(offset..offset + AP_NALU_LENGTH_FIELD_SIZE) else {
                debug!("AP seq={} truncated in NALU size field", seq);
                break;
            };
            let size = u16::from_be_bytes([field[0], field[1]]) as usize;
            offset += AP_NALU_LENGTH_FIELD_SIZE;

            if size == 0 {
                debug!("AP seq={} has a zero NALU size at offset {}", seq, offset);
                break;
            }

            let Some(nalu) = payload.get(offset..offset + size) else {
                warn!(
                    "AP seq={} announces a {} byte NALU but only {} bytes remain",
                    seq,
                    size,
                    payload.len() - offset
                );
                break;
            };
            offset += size;

            match NALHeader::parse(nalu) {
                None => {
                    debug!("AP seq={} carries a {} byte NALU", seq, size);
                    break;
                }
                Some(inner) if inner.nal_type == AP_NAL_TYPE || inner.nal_type == FU_NAL_TYPE => {
                    warn!("AP seq={} nests a {} packet", seq, inner.unit_type());
                    break;
                }
                Some(_) => {}
            }

            let mut unit = inherit_flags(H265Packet::synthesize(packet.rtp_header(), &[nalu]), packet);
            unit.set_don(don);
            units.push(unit);
        }

        if units.is_empty() {
            debug!("AP seq={} yielded no NAL units", seq);
        } else {
            trace!("AP seq={} yielded {} NAL units", seq, units.len());
        }
        units
    }

    fn handle_fragment(&mut self, packet: &H265Packet, header: NALHeader) -> Vec<H265Packet> {
        let payload = packet.payload();
        let seq = packet.rtp().sequence_number();

        if payload.len() <= NAL_HEADER_SIZE + FU_HEADER_SIZE {
            warn!("FU seq={} has no fragment data, dropping reassembly", seq);
            self.reset();
            return Vec::new();
        }

        let fu_header = FUHeader(payload[NAL_HEADER_SIZE]);
        let position = fu_header.position();
        let mut offset = NAL_HEADER_SIZE + FU_HEADER_SIZE;
        let mut don = None;

        if position == FuPosition::Start && packet.donl_in_use() {
            let Some(field) = payload.get(offset..offset + DONL_FIELD_SIZE) else {
                warn!("FU seq={} truncated in DONL field, dropping reassembly", seq);
                self.reset();
                return Vec::new();
            };
            don = Some(u16::from_be_bytes([field[0], field[1]]));
            offset += DONL_FIELD_SIZE;
        }

        let data = &payload[offset..];

        match (std::mem::take(&mut self.state), position) {
            (Reassembly::Idle, FuPosition::Start) => {
                let nal_header = header.with_type(fu_header.fu_type()).encode();
                let mut first = inherit_flags(
                    H265Packet::synthesize(packet.rtp_header(), &[&nal_header[..], data]),
                    packet,
                );
                first.set_don(don);

                trace!("FU seq={} starts a type {} NAL unit", seq, fu_header.fu_type());
                self.state = Reassembly::Collecting {
                    position: FuPosition::Start,
                    nal_type: fu_header.fu_type(),
                    fragments: vec![first],
                };
                Vec::new()
            }
            (
                Reassembly::Collecting {
                    position: FuPosition::Start | FuPosition::Middle,
                    nal_type,
                    mut fragments,
                },
                FuPosition::Middle,
            ) if nal_type == fu_header.fu_type() => {
                fragments.push(H265Packet::synthesize(packet.rtp_header(), &[data]));
                self.state = Reassembly::Collecting {
                    position: FuPosition::Middle,
                    nal_type,
                    fragments,
                };
                Vec::new()
            }
            (
                Reassembly::Collecting {
                    position: FuPosition::Middle,
                    nal_type,
                    fragments,
                },
                FuPosition::End,
            ) if nal_type == fu_header.fu_type() => {
                match assemble(&fragments, packet, data) {
                    Some(unit) => {
                        trace!(
                            "FU seq={} completes a {} byte NAL unit from {} fragments",
                            seq,
                            unit.payload().len(),
                            fragments.len() + 1
                        );
                        vec![unit]
                    }
                    None => Vec::new(),
                }
            }
            (state, position) => {
                warn!(
                    "FU seq={} out of sequence: {:?} fragment (type {}) after {:?}, dropping {} buffered fragments",
                    seq,
                    position,
                    fu_header.fu_type(),
                    state.position(),
                    state.buffered()
                );
                Vec::new()
            }
        }
    }
}

/// Concatenates the buffered fragments and the END data into one NAL unit.
///
/// The unit keeps the RTP header and DON of the first fragment and the marker
/// bit of the END fragment.
fn assemble(fragments: &[H265Packet], end: &H265Packet, data: &[u8]) -> Option<H265Packet> {
    let first = fragments.first()?;

    let mut pieces: Vec<&[u8]> = fragments.iter().map(|fragment| fragment.payload()).collect();
    pieces.push(data);

    let mut unit = inherit_flags(H265Packet::synthesize(first.rtp_header(), &pieces), end);
    unit.rtp_mut().set_marker(end.rtp().marker());
    unit.set_don(first.don());
    Some(unit)
}

fn inherit_flags(unit: H265Packet, from: &H265Packet) -> H265Packet {
    unit.with_donl(from.donl_in_use())
        .with_dond(from.dond_in_use())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::rtp::RTPPacket;
    use pretty_assertions::assert_eq;

    fn fu(seq: u16, marker: bool, fu_header: u8, data: &[u8]) -> H265Packet {
        let mut payload = vec![FU_NAL_TYPE << 1, 0x01, fu_header];
        payload.extend_from_slice(data);
        H265Packet::from_nal_unit(96, seq, 9000, 0xCAFE, marker, &payload)
    }

    #[test]
    fn test_single_nal_unit_passes_through() {
        let mut depacketizer = Depacketizer::new();
        let packet = H265Packet::from_nal_unit(96, 1, 0, 1, true, &[0x02, 0x01, 0xAA, 0xBB]);

        let units = depacketizer.handle(packet.clone());
        assert_eq!(units, vec![packet]);
    }

    #[test]
    fn test_single_nal_unit_with_donl() {
        let mut depacketizer = Depacketizer::new();
        let packet = H265Packet::from_nal_unit(96, 1, 0, 1, true, &[0x02, 0x01, 0x01, 0x02, 0xAA])
            .with_donl(true);

        let units = depacketizer.handle(packet);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].payload(), &[0x02, 0x01, 0xAA]);
        assert_eq!(units[0].don(), Some(0x0102));

        let truncated = H265Packet::from_nal_unit(96, 2, 0, 1, true, &[0x02, 0x01, 0x01])
            .with_donl(true);
        assert!(depacketizer.handle(truncated).is_empty());
    }

    #[test]
    fn test_empty_payload_yields_nothing() {
        let mut depacketizer = Depacketizer::new();
        assert!(depacketizer
            .handle(H265Packet::from_nal_unit(96, 1, 0, 1, false, &[]))
            .is_empty());
        assert!(depacketizer
            .handle(H265Packet::from_nal_unit(96, 1, 0, 1, false, &[0x02]))
            .is_empty());
    }

    #[test]
    fn test_truncated_rtp_header_yields_nothing() {
        let mut depacketizer = Depacketizer::new();
        for len in [0, 1, 5, 11] {
            let mut rtp = RTPPacket::with_capacity(16);
            rtp.wrap(&[0x80, 0x60, 0x00, 0x01, 0x00, 0x00, 0x0B, 0xB8, 0x00, 0x00, 0x00][..len]);
            assert!(depacketizer.handle(H265Packet::from(rtp)).is_empty());
        }
        assert_eq!(depacketizer.position(), None);
    }

    #[test]
    fn test_paci_and_unspecified_are_dropped() {
        let mut depacketizer = Depacketizer::new();
        depacketizer.handle(fu(1, false, 0x80 | 19, &[1, 2, 3]));

        let paci = H265Packet::from_nal_unit(96, 2, 0, 1, false, &[PACI_NAL_TYPE << 1, 0x01, 0x00]);
        let unspecified = H265Packet::from_nal_unit(96, 3, 0, 1, false, &[63 << 1, 0x01, 0x00]);
        assert!(depacketizer.handle(paci).is_empty());
        assert!(depacketizer.handle(unspecified).is_empty());

        // neither touched the reassembly in progress
        assert_eq!(depacketizer.position(), Some(FuPosition::Start));
        assert_eq!(depacketizer.buffered_fragments(), 1);
    }

    #[test]
    fn test_aggregation_packet_split_by_size() {
        let payload = [
            AP_NAL_TYPE << 1, 0x01,
            0x00, 0x03, 0x40, 0x01, 0x0C,
            0x00, 0x04, 0x42, 0x01, 0x01, 0x60,
        ];
        let packet = H265Packet::from_nal_unit(96, 5, 1234, 0xAA, true, &payload);

        let units = Depacketizer::new().handle(packet);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].payload(), &[0x40, 0x01, 0x0C]);
        assert_eq!(units[1].payload(), &[0x42, 0x01, 0x01, 0x60]);
        for unit in &units {
            assert_eq!(unit.rtp().sequence_number(), 5);
            assert_eq!(unit.rtp().timestamp(), 1234);
            assert!(unit.rtp().marker());
        }
    }

    #[test]
    fn test_aggregation_truncation_returns_prefix() {
        let payload = [
            AP_NAL_TYPE << 1, 0x01,
            0x00, 0x03, 0x40, 0x01, 0x0C,
            0x00, 0x09, 0x42, 0x01, 0x01,
        ];
        let packet = H265Packet::from_nal_unit(96, 5, 0, 0xAA, false, &payload);

        let units = Depacketizer::new().handle(packet);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].payload(), &[0x40, 0x01, 0x0C]);
    }

    #[test]
    fn test_aggregation_stops_at_zero_size_and_nesting() {
        let zero = [AP_NAL_TYPE << 1, 0x01, 0x00, 0x02, 0x02, 0x01, 0x00, 0x00, 0x02, 0x01];
        let units = Depacketizer::new().handle(H265Packet::from_nal_unit(96, 1, 0, 1, false, &zero));
        assert_eq!(units.len(), 1);

        let nested = [
            AP_NAL_TYPE << 1, 0x01,
            0x00, 0x02, 0x02, 0x01,
            0x00, 0x03, FU_NAL_TYPE << 1, 0x01, 0x80,
            0x00, 0x02, 0x02, 0x01,
        ];
        let units = Depacketizer::new().handle(H265Packet::from_nal_unit(96, 1, 0, 1, false, &nested));
        assert_eq!(units.len(), 1);

        let bare = [AP_NAL_TYPE << 1, 0x01];
        assert!(Depacketizer::new()
            .handle(H265Packet::from_nal_unit(96, 1, 0, 1, false, &bare))
            .is_empty());
    }

    #[test]
    fn test_aggregation_decoding_order_numbers() {
        let payload = [
            AP_NAL_TYPE << 1, 0x01,
            0xFF, 0xFE, // DONL
            0x00, 0x02, 0x02, 0x01,
            0x00, // DOND: next DON is DONL + 1
            0x00, 0x02, 0x02, 0x01,
            0x02, // DOND: skips two
            0x00, 0x02, 0x02, 0x01,
        ];
        let packet = H265Packet::from_nal_unit(96, 1, 0, 1, false, &payload)
            .with_donl(true)
            .with_dond(true);

        let dons: Vec<_> = Depacketizer::new()
            .handle(packet)
            .iter()
            .map(|unit| unit.don())
            .collect();
        assert_eq!(dons, vec![Some(0xFFFE), Some(0xFFFF), Some(2)]);
    }

    #[test]
    fn test_fragments_reassemble() {
        let mut depacketizer = Depacketizer::new();

        assert!(depacketizer.handle(fu(10, false, 0x80 | 19, &[1, 2, 3])).is_empty());
        assert_eq!(depacketizer.position(), Some(FuPosition::Start));
        assert!(depacketizer.handle(fu(11, false, 19, &[4, 5])).is_empty());
        assert!(depacketizer.handle(fu(12, false, 19, &[6])).is_empty());
        assert_eq!(depacketizer.position(), Some(FuPosition::Middle));
        assert_eq!(depacketizer.buffered_fragments(), 3);

        let units = depacketizer.handle(fu(13, true, 0x40 | 19, &[7, 8]));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].payload(), &[0x26, 0x01, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(units[0].nal_type(), Some(19));
        assert_eq!(units[0].rtp().sequence_number(), 10);
        assert!(units[0].rtp().marker());
        assert_eq!(depacketizer.position(), None);
        assert_eq!(depacketizer.buffered_fragments(), 0);
    }

    #[test]
    fn test_start_then_end_is_a_sequencing_error() {
        let mut depacketizer = Depacketizer::new();
        assert!(depacketizer.handle(fu(1, false, 0x80 | 1, &[1])).is_empty());
        assert!(depacketizer.handle(fu(3, true, 0x40 | 1, &[3])).is_empty());
        assert_eq!(depacketizer.position(), None);

        assert!(depacketizer.handle(fu(4, false, 0x80 | 1, &[4])).is_empty());
        assert!(depacketizer.handle(fu(5, false, 1, &[5])).is_empty());
        let units = depacketizer.handle(fu(6, true, 0x40 | 1, &[6]));
        assert_eq!(units[0].payload(), &[0x02, 0x01, 4, 5, 6]);
    }

    #[test]
    fn test_out_of_order_fragments_reset() {
        let mut depacketizer = Depacketizer::new();

        // MIDDLE and END without START
        assert!(depacketizer.handle(fu(1, false, 1, &[1])).is_empty());
        assert!(depacketizer.handle(fu(2, true, 0x40 | 1, &[1])).is_empty());
        assert_eq!(depacketizer.position(), None);

        // START after START
        depacketizer.handle(fu(3, false, 0x80 | 1, &[1]));
        assert!(depacketizer.handle(fu(4, false, 0x80 | 1, &[1])).is_empty());
        assert_eq!(depacketizer.position(), None);

        // type changes mid-unit
        depacketizer.handle(fu(5, false, 0x80 | 1, &[1]));
        assert!(depacketizer.handle(fu(6, false, 19, &[1])).is_empty());
        assert_eq!(depacketizer.buffered_fragments(), 0);

        // FU without any fragment data
        depacketizer.handle(fu(7, false, 0x80 | 1, &[1]));
        assert!(depacketizer.handle(fu(8, false, 1, &[])).is_empty());
        assert_eq!(depacketizer.position(), None);
    }

    #[test]
    fn test_fragment_donl_only_on_start() {
        let mut depacketizer = Depacketizer::new();
        let start = fu(1, false, 0x80 | 1, &[0x00, 0x2A, 0xAA]).with_donl(true);
        let middle = fu(2, false, 1, &[0xBB]).with_donl(true);
        let end = fu(3, true, 0x40 | 1, &[0xCC]).with_donl(true);

        depacketizer.handle(start);
        depacketizer.handle(middle);
        let units = depacketizer.handle(end);
        assert_eq!(units[0].payload(), &[0x02, 0x01, 0xAA, 0xBB, 0xCC]);
        assert_eq!(units[0].don(), Some(42));
    }

    #[test]
    fn test_reset_drops_partial_unit() {
        let mut depacketizer = Depacketizer::new();
        depacketizer.handle(fu(1, false, 0x80 | 1, &[1]));
        depacketizer.handle(fu(2, false, 1, &[2]));
        depacketizer.reset();
        assert_eq!(depacketizer.buffered_fragments(), 0);
        assert!(depacketizer.handle(fu(3, true, 0x40 | 1, &[3])).is_empty());
    }

    #[test]
    fn test_padding_is_not_reassembled() {
        let mut rtp = RTPPacket::new(96, 1, 0, 1, false, &[FU_NAL_TYPE << 1, 0x01, 0x80 | 1, 0xAA, 0x00, 0x02]);
        rtp.set_padding(true);
        let mut depacketizer = Depacketizer::new();
        depacketizer.handle(H265Packet::new(rtp));
        depacketizer.handle(fu(2, false, 1, &[0xBB]));
        let units = depacketizer.handle(fu(3, true, 0x40 | 1, &[0xCC]));

        assert_eq!(units[0].payload(), &[0x02, 0x01, 0xAA, 0xBB, 0xCC]);
        assert!(!units[0].rtp().has_padding());
    }
}

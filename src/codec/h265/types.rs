// rtp-hevc/src/codec/h265/types.rs

use std::fmt;

/// Size of the HEVC NAL unit header and of the RTP PayloadHdr
pub const NAL_HEADER_SIZE: usize = 2;
/// Size of the FU header that follows the PayloadHdr of a fragmentation unit
pub const FU_HEADER_SIZE: usize = 1;
/// Size of the decoding order number (DONL) field
pub const DONL_FIELD_SIZE: usize = 2;
/// Size of the decoding order number difference (DOND) field
pub const DOND_FIELD_SIZE: usize = 1;
/// Size of the length prefix of each NAL unit inside an aggregation packet
pub const AP_NALU_LENGTH_FIELD_SIZE: usize = 2;

/// Payload type of an Aggregation Packet (RFC 7798 §4.4.2)
pub const AP_NAL_TYPE: u8 = 48;
/// Payload type of a Fragmentation Unit (RFC 7798 §4.4.3)
pub const FU_NAL_TYPE: u8 = 49;
/// Payload type of a PACI packet (RFC 7798 §4.4.4), not supported
pub const PACI_NAL_TYPE: u8 = 50;

/// HEVC NAL unit types (ITU-T H.265 Table 7-1) plus the RTP payload
/// structures of RFC 7798 that share the same 6-bit type space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NALUnitType {
    /// TRAIL_N, non-reference trailing picture
    TrailN,
    /// TRAIL_R, reference trailing picture
    TrailR,
    /// TSA_N
    TsaN,
    /// TSA_R
    TsaR,
    /// STSA_N
    StsaN,
    /// STSA_R
    StsaR,
    /// RADL_N
    RadlN,
    /// RADL_R
    RadlR,
    /// RASL_N
    RaslN,
    /// RASL_R
    RaslR,
    /// RSV_VCL_N10..RSV_VCL_R15
    ReservedVcl(u8),
    /// BLA_W_LP
    BlaWLp,
    /// BLA_W_RADL
    BlaWRadl,
    /// BLA_N_LP
    BlaNLp,
    /// IDR_W_RADL
    IdrWRadl,
    /// IDR_N_LP
    IdrNLp,
    /// CRA_NUT
    CraNut,
    /// RSV_IRAP_VCL22, RSV_IRAP_VCL23
    ReservedIrap(u8),
    /// RSV_VCL24..RSV_VCL31
    ReservedVclHigh(u8),
    /// VPS_NUT, video parameter set
    Vps,
    /// SPS_NUT, sequence parameter set
    Sps,
    /// PPS_NUT, picture parameter set
    Pps,
    /// AUD_NUT, access unit delimiter
    Aud,
    /// EOS_NUT, end of sequence
    Eos,
    /// EOB_NUT, end of bitstream
    Eob,
    /// FD_NUT, filler data
    Fd,
    /// PREFIX_SEI_NUT
    PrefixSei,
    /// SUFFIX_SEI_NUT
    SuffixSei,
    /// RSV_NVCL41..RSV_NVCL47
    ReservedNonVcl(u8),
    /// Aggregation Packet (48)
    AggregationPacket,
    /// Fragmentation Unit (49)
    FragmentationUnit,
    /// PACI packet (50)
    Paci,
    /// UNSPEC51..UNSPEC63
    Unspecified(u8),
}

impl NALUnitType {
    /// Maps the low 6 bits of `value` to a NAL unit type
    pub fn from_u8(value: u8) -> Self {
        match value & 0x3F {
            0 => NALUnitType::TrailN,
            1 => NALUnitType::TrailR,
            2 => NALUnitType::TsaN,
            3 => NALUnitType::TsaR,
            4 => NALUnitType::StsaN,
            5 => NALUnitType::StsaR,
            6 => NALUnitType::RadlN,
            7 => NALUnitType::RadlR,
            8 => NALUnitType::RaslN,
            9 => NALUnitType::RaslR,
            v @ 10..=15 => NALUnitType::ReservedVcl(v),
            16 => NALUnitType::BlaWLp,
            17 => NALUnitType::BlaWRadl,
            18 => NALUnitType::BlaNLp,
            19 => NALUnitType::IdrWRadl,
            20 => NALUnitType::IdrNLp,
            21 => NALUnitType::CraNut,
            v @ 22..=23 => NALUnitType::ReservedIrap(v),
            v @ 24..=31 => NALUnitType::ReservedVclHigh(v),
            32 => NALUnitType::Vps,
            33 => NALUnitType::Sps,
            34 => NALUnitType::Pps,
            35 => NALUnitType::Aud,
            36 => NALUnitType::Eos,
            37 => NALUnitType::Eob,
            38 => NALUnitType::Fd,
            39 => NALUnitType::PrefixSei,
            40 => NALUnitType::SuffixSei,
            v @ 41..=47 => NALUnitType::ReservedNonVcl(v),
            AP_NAL_TYPE => NALUnitType::AggregationPacket,
            FU_NAL_TYPE => NALUnitType::FragmentationUnit,
            PACI_NAL_TYPE => NALUnitType::Paci,
            v => NALUnitType::Unspecified(v),
        }
    }

    /// The 6-bit type value
    pub fn as_u8(&self) -> u8 {
        match *self {
            NALUnitType::TrailN => 0,
            NALUnitType::TrailR => 1,
            NALUnitType::TsaN => 2,
            NALUnitType::TsaR => 3,
            NALUnitType::StsaN => 4,
            NALUnitType::StsaR => 5,
            NALUnitType::RadlN => 6,
            NALUnitType::RadlR => 7,
            NALUnitType::RaslN => 8,
            NALUnitType::RaslR => 9,
            NALUnitType::BlaWLp => 16,
            NALUnitType::BlaWRadl => 17,
            NALUnitType::BlaNLp => 18,
            NALUnitType::IdrWRadl => 19,
            NALUnitType::IdrNLp => 20,
            NALUnitType::CraNut => 21,
            NALUnitType::Vps => 32,
            NALUnitType::Sps => 33,
            NALUnitType::Pps => 34,
            NALUnitType::Aud => 35,
            NALUnitType::Eos => 36,
            NALUnitType::Eob => 37,
            NALUnitType::Fd => 38,
            NALUnitType::PrefixSei => 39,
            NALUnitType::SuffixSei => 40,
            NALUnitType::AggregationPacket => AP_NAL_TYPE,
            NALUnitType::FragmentationUnit => FU_NAL_TYPE,
            NALUnitType::Paci => PACI_NAL_TYPE,
            NALUnitType::ReservedVcl(v)
            | NALUnitType::ReservedIrap(v)
            | NALUnitType::ReservedVclHigh(v)
            | NALUnitType::ReservedNonVcl(v)
            | NALUnitType::Unspecified(v) => v,
        }
    }

    /// Types 0..=47 travel as ordinary single NAL unit packets
    pub fn is_single_nal_unit(&self) -> bool {
        self.as_u8() < AP_NAL_TYPE
    }

    /// Video coding layer NAL units (types 0..=31)
    pub fn is_vcl(&self) -> bool {
        self.as_u8() < 32
    }

    /// Intra random access point pictures (types 16..=23)
    pub fn is_irap(&self) -> bool {
        (16..=23).contains(&self.as_u8())
    }
}

impl fmt::Display for NALUnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NALUnitType::TrailN => write!(f, "TRAIL_N"),
            NALUnitType::TrailR => write!(f, "TRAIL_R"),
            NALUnitType::TsaN => write!(f, "TSA_N"),
            NALUnitType::TsaR => write!(f, "TSA_R"),
            NALUnitType::StsaN => write!(f, "STSA_N"),
            NALUnitType::StsaR => write!(f, "STSA_R"),
            NALUnitType::RadlN => write!(f, "RADL_N"),
            NALUnitType::RadlR => write!(f, "RADL_R"),
            NALUnitType::RaslN => write!(f, "RASL_N"),
            NALUnitType::RaslR => write!(f, "RASL_R"),
            NALUnitType::ReservedVcl(v) if v % 2 == 0 => write!(f, "RSV_VCL_N{}", v),
            NALUnitType::ReservedVcl(v) => write!(f, "RSV_VCL_R{}", v),
            NALUnitType::BlaWLp => write!(f, "BLA_W_LP"),
            NALUnitType::BlaWRadl => write!(f, "BLA_W_RADL"),
            NALUnitType::BlaNLp => write!(f, "BLA_N_LP"),
            NALUnitType::IdrWRadl => write!(f, "IDR_W_RADL"),
            NALUnitType::IdrNLp => write!(f, "IDR_N_LP"),
            NALUnitType::CraNut => write!(f, "CRA_NUT"),
            NALUnitType::ReservedIrap(v) => write!(f, "RSV_IRAP_VCL{}", v),
            NALUnitType::ReservedVclHigh(v) => write!(f, "RSV_VCL{}", v),
            NALUnitType::Vps => write!(f, "VPS_NUT"),
            NALUnitType::Sps => write!(f, "SPS_NUT"),
            NALUnitType::Pps => write!(f, "PPS_NUT"),
            NALUnitType::Aud => write!(f, "AUD_NUT"),
            NALUnitType::Eos => write!(f, "EOS_NUT"),
            NALUnitType::Eob => write!(f, "EOB_NUT"),
            NALUnitType::Fd => write!(f, "FD_NUT"),
            NALUnitType::PrefixSei => write!(f, "PREFIX_SEI_NUT"),
            NALUnitType::SuffixSei => write!(f, "SUFFIX_SEI_NUT"),
            NALUnitType::ReservedNonVcl(v) => write!(f, "RSV_NVCL{}", v),
            NALUnitType::AggregationPacket => write!(f, "AP"),
            NALUnitType::FragmentationUnit => write!(f, "FU"),
            NALUnitType::Paci => write!(f, "PACI"),
            NALUnitType::Unspecified(v) => write!(f, "UNSPEC{}", v),
        }
    }
}

/// The 2-byte HEVC NAL unit header, also used as the RTP PayloadHdr.
///
/// ```text
/// +---------------+---------------+
/// |0|1|2|3|4|5|6|7|0|1|2|3|4|5|6|7|
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |F|   Type    |  LayerId  | TID |
/// +-------------+-----------------+
/// ```
///
/// LayerId straddles the byte boundary: its top bit is the low bit of the
/// first byte and its low five bits are the high bits of the second byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NALHeader {
    /// forbidden_zero_bit, expected to be unset
    pub forbidden: bool,
    /// nal_unit_type, 0..=63
    pub nal_type: u8,
    /// nuh_layer_id, 6 bits
    pub layer_id: u8,
    /// nuh_temporal_id_plus1, 3 bits
    pub tid: u8,
}

impl NALHeader {
    /// Splits the two header bytes into their fields
    pub fn decode(b0: u8, b1: u8) -> Self {
        Self {
            forbidden: b0 & 0x80 != 0,
            nal_type: (b0 & 0x7E) >> 1,
            layer_id: ((b0 & 0x01) << 5) | ((b1 & 0xF8) >> 3),
            tid: b1 & 0x07,
        }
    }

    /// Decodes the first two bytes of `data`, `None` when fewer are present
    pub fn parse(data: &[u8]) -> Option<Self> {
        match data {
            [b0, b1, ..] => Some(Self::decode(*b0, *b1)),
            _ => None,
        }
    }

    /// Packs the fields back into two bytes
    pub fn encode(&self) -> [u8; 2] {
        let b0 = if self.forbidden { 0x80 } else { 0x00 }
            | ((self.nal_type & 0x3F) << 1)
            | ((self.layer_id >> 5) & 0x01);
        let b1 = ((self.layer_id & 0x1F) << 3) | (self.tid & 0x07);
        [b0, b1]
    }

    /// Same header with a different type, as used for PayloadHdr rewriting
    pub fn with_type(self, nal_type: u8) -> Self {
        Self {
            nal_type: nal_type & 0x3F,
            ..self
        }
    }

    /// Named NAL unit type
    pub fn unit_type(&self) -> NALUnitType {
        NALUnitType::from_u8(self.nal_type)
    }

    /// TemporalId (TID minus one), `None` for the invalid TID value 0
    pub fn temporal_id(&self) -> Option<u8> {
        self.tid.checked_sub(1)
    }
}

/// Position of a fragment within a fragmented NAL unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuPosition {
    /// S bit set
    Start,
    /// Neither S nor E set
    Middle,
    /// E bit set
    End,
}

/// The one-byte FU header that follows the PayloadHdr of a fragmentation unit.
///
/// ```text
/// +---------------+
/// |0|1|2|3|4|5|6|7|
/// +-+-+-+-+-+-+-+-+
/// |S|E|  FuType   |
/// +---------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FUHeader(pub u8);

impl FUHeader {
    /// Builds the header byte for a fragment of a `fu_type` NAL unit
    pub fn new(position: FuPosition, fu_type: u8) -> Self {
        let flags = match position {
            FuPosition::Start => 0x80,
            FuPosition::Middle => 0x00,
            FuPosition::End => 0x40,
        };
        FUHeader(flags | (fu_type & 0x3F))
    }

    /// Start bit
    pub fn s(&self) -> bool {
        self.0 & 0x80 != 0
    }

    /// End bit
    pub fn e(&self) -> bool {
        self.0 & 0x40 != 0
    }

    /// Type of the fragmented NAL unit
    pub fn fu_type(&self) -> u8 {
        self.0 & 0x3F
    }

    /// S wins over E; neither bit set means a middle fragment
    pub fn position(&self) -> FuPosition {
        if self.s() {
            FuPosition::Start
        } else if self.e() {
            FuPosition::End
        } else {
            FuPosition::Middle
        }
    }
}

pub mod h265;

// Re-export common types
pub use h265::{Depacketizer, H265Error, H265Packet, NALHeader, NALUnitType, Packetizer, SsrcRouter};

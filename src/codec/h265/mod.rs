//! # H.265/HEVC RTP Payload Format (RFC 7798)
//!
//! This module turns received RTP packets back into complete HEVC NAL units
//! and turns NAL units into RTP-sized packets. The payload structures it
//! handles are:
//!
//! - Single NAL unit packets (NAL types 0-47), passed through as they are
//! - Aggregation Packets (type 48) carrying several small NAL units
//! - Fragmentation Units (type 49) carrying one large NAL unit in pieces
//! - PACI packets (type 50), recognised and discarded
//!
//! ## Example: Aggregating and splitting parameter sets
//!
//! ```rust
//! use rtp_hevc::codec::h265::{Depacketizer, H265Packet, Packetizer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vps = H265Packet::from_nal_unit(96, 1, 3000, 0x1234, false, &[0x40, 0x01, 0x0C]);
//! let sps = H265Packet::from_nal_unit(96, 2, 3000, 0x1234, false, &[0x42, 0x01, 0x01]);
//!
//! let packetizer = Packetizer::default();
//! let ap = packetizer.pack_ap(&[vps, sps])?;
//!
//! let mut depacketizer = Depacketizer::new();
//! let units = depacketizer.handle(ap);
//! assert_eq!(units.len(), 2);
//! assert_eq!(units[0].payload(), &[0x40, 0x01, 0x0C]);
//! assert_eq!(units[1].payload(), &[0x42, 0x01, 0x01]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Example: Fragmenting a large slice
//!
//! ```rust
//! use rtp_hevc::codec::h265::{Depacketizer, H265Packet, Packetizer};
//!
//! let mut slice = vec![0x26, 0x01];
//! slice.extend(std::iter::repeat(0xAB).take(4000));
//! let unit = H265Packet::from_nal_unit(96, 10, 6000, 0x1234, true, &slice);
//!
//! let fragments = Packetizer::default().fragment(&unit, 1400).unwrap();
//! assert!(fragments.iter().all(|f| f.raw_data().len() <= 1400));
//!
//! let mut depacketizer = Depacketizer::new();
//! let mut completed = Vec::new();
//! for fragment in fragments {
//!     completed.extend(depacketizer.handle(fragment));
//! }
//! assert_eq!(completed.len(), 1);
//! assert_eq!(completed[0].payload(), &slice[..]);
//! ```
//!
//! Streams from different SSRCs must never share a [`Depacketizer`]; the
//! [`SsrcRouter`] keeps one per source.

use thiserror::Error;

/// Decoder for received H.265 RTP packets
pub mod depacketizer;

/// H.265 RTP packet wrapper
pub mod packet;

/// Builder for Aggregation Packets and Fragmentation Units
pub mod packetizer;

/// Per-SSRC depacketizer registry
pub mod router;

/// NAL unit header, NAL unit types and FU header
pub mod types;

pub use depacketizer::Depacketizer;
pub use packet::H265Packet;
pub use packetizer::Packetizer;
pub use router::SsrcRouter;
pub use types::{FUHeader, FuPosition, NALHeader, NALUnitType};

/// Reasons the packetizer refuses to build a packet
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum H265Error {
    /// No NAL units were given to aggregate
    #[error("aggregation packet needs at least one NAL unit")]
    EmptyAggregation,

    /// An aggregation packet cannot contain another aggregation packet
    #[error("aggregation packets cannot be nested")]
    NestedAggregation,

    /// A fragmentation unit cannot be aggregated or fragmented again
    #[error("fragmentation units cannot be aggregated or fragmented")]
    NestedFragmentation,

    /// The unit is not longer than a bare RTP header
    #[error("NAL unit packet of {0} bytes carries no payload")]
    UnitTooShort(usize),

    /// The unit has no NAL header
    #[error("NAL unit payload is empty")]
    EmptyPayload,

    /// The assembled packet does not fit the configured ceiling
    #[error("assembled packet of {size} bytes exceeds the maximum of {max} bytes")]
    Oversized {
        /// Size of the packet that would have been produced
        size: usize,
        /// Configured maximum packet size
        max: usize,
    },

    /// Two consecutive units are too far apart in decoding order for a DOND field
    #[error("decoding order difference {0} does not fit a DOND field")]
    DonDifferenceTooLarge(u32),

    /// The MTU cannot hold even the FU headers plus one payload byte
    #[error("MTU of {0} bytes is too small for fragmentation")]
    MtuTooSmall(usize),
}

/// Specialized Result type for H.265 packetization
pub type Result<T> = std::result::Result<T, H265Error>;

#[cfg(test)]
mod tests;

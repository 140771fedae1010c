use crate::codec::h265::H265Packet;
use crate::Result;

pub mod relay;
pub mod rtp;

/// Source of completed H.265 NAL units
#[async_trait::async_trait]
pub trait Demuxer: Send {
    /// Read the next completed NAL unit, `None` once the source is closed
    async fn read_nal_unit(&mut self) -> Result<Option<H265Packet>>;
}

/// Sink for H.265 NAL units that packetizes them for the wire
#[async_trait::async_trait]
pub trait Muxer: Send {
    /// Write one NAL unit; it may be held back for aggregation
    async fn write_nal_unit(&mut self, unit: H265Packet) -> Result<()>;

    /// Send any NAL units held back for aggregation
    async fn flush(&mut self) -> Result<()>;
}

pub use self::relay::{H265Demuxer, H265Muxer};
pub use self::rtp::{RTPError, RTPPacket};

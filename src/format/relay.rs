//! # H.265 relay adapters
//!
//! Glue between the packetization engine and a datagram transport. Raw
//! RTP datagrams travel as [`Bytes`] over `tokio` mpsc channels:
//!
//! - [`H265Demuxer`] receives datagrams and yields completed NAL units
//! - [`H265Muxer`] takes NAL units and sends RTP-ready datagrams,
//!   aggregating small units of one access unit and fragmenting large ones
//!
//! ## Example
//!
//! ```rust
//! use rtp_hevc::codec::h265::H265Packet;
//! use rtp_hevc::format::{Demuxer, H265Demuxer, H265Muxer, Muxer};
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (tx, rx) = mpsc::channel(100);
//! let mut muxer = H265Muxer::new(tx, 1000);
//! let mut demuxer = H265Demuxer::new(rx);
//!
//! let idr = H265Packet::from_nal_unit(96, 0, 3000, 0x1234, true, &[0x26, 0x01, 0xAF]);
//! muxer.write_nal_unit(idr).await?;
//! drop(muxer);
//!
//! let unit = demuxer.read_nal_unit().await?.expect("one NAL unit");
//! assert_eq!(unit.payload(), &[0x26, 0x01, 0xAF]);
//! assert_eq!(unit.rtp().sequence_number(), 1000);
//! assert!(demuxer.read_nal_unit().await?.is_none());
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, Stream};
use log::{debug, trace, warn};
use tokio::sync::mpsc;

use super::{Demuxer, Muxer};
use crate::codec::h265::types::{
    AP_NALU_LENGTH_FIELD_SIZE, AP_NAL_TYPE, DOND_FIELD_SIZE, DONL_FIELD_SIZE, NAL_HEADER_SIZE,
};
use crate::codec::h265::{H265Error, H265Packet, Packetizer, SsrcRouter};
use crate::config::{get_config, Config};
use crate::error::{Result, RtpHevcError};

/// Turns received RTP datagrams into completed NAL units.
///
/// Datagrams from several SSRCs may share the channel; each source gets
/// its own reassembly state through the [`SsrcRouter`]. Malformed datagrams
/// are logged and skipped.
#[derive(Debug)]
pub struct H265Demuxer {
    source: mpsc::Receiver<Bytes>,
    router: Arc<SsrcRouter>,
    ready: VecDeque<H265Packet>,
    donl_in_use: bool,
}

impl H265Demuxer {
    /// Creates a demuxer using the process-wide configuration
    pub fn new(source: mpsc::Receiver<Bytes>) -> Self {
        Self::with_config(source, &get_config())
    }

    /// Creates a demuxer using an explicit configuration
    pub fn with_config(source: mpsc::Receiver<Bytes>, config: &Config) -> Self {
        Self {
            source,
            router: Arc::new(SsrcRouter::new()),
            ready: VecDeque::new(),
            donl_in_use: config.donl_in_use(),
        }
    }

    /// Shares an existing router, e.g. one also fed by another transport
    pub fn with_router(mut self, router: Arc<SsrcRouter>) -> Self {
        self.router = router;
        self
    }

    /// Router holding the per-SSRC reassembly state
    pub fn router(&self) -> &Arc<SsrcRouter> {
        &self.router
    }

    /// Converts the demuxer into a stream of completed NAL units
    pub fn into_stream(self) -> impl Stream<Item = Result<H265Packet>> + Send {
        stream::unfold(self, |mut demuxer| async move {
            match demuxer.read_nal_unit().await {
                Ok(Some(unit)) => Some((Ok(unit), demuxer)),
                Ok(None) => None,
                Err(e) => Some((Err(e), demuxer)),
            }
        })
    }
}

#[async_trait::async_trait]
impl Demuxer for H265Demuxer {
    async fn read_nal_unit(&mut self) -> Result<Option<H265Packet>> {
        loop {
            if let Some(unit) = self.ready.pop_front() {
                return Ok(Some(unit));
            }

            let Some(datagram) = self.source.recv().await else {
                trace!("Datagram source closed");
                return Ok(None);
            };

            match H265Packet::parse(&datagram) {
                Ok(packet) => {
                    let packet = packet
                        .with_donl(self.donl_in_use)
                        .with_dond(self.donl_in_use);
                    self.ready.extend(self.router.handle(packet));
                }
                Err(e) => warn!("Dropping {} byte datagram: {}", datagram.len(), e),
            }
        }
    }
}

/// Turns NAL units into RTP-ready datagrams.
///
/// Units that fit the MTU are held back while they share one RTP timestamp
/// and sent together as an Aggregation Packet (or alone as a single NAL unit
/// packet) when the access unit ends: on the marker bit, on a timestamp
/// change, or on [`flush`](Muxer::flush). Units larger than the MTU are
/// fragmented. Every datagram gets the next sequence number.
#[derive(Debug)]
pub struct H265Muxer {
    sink: mpsc::Sender<Bytes>,
    packetizer: Packetizer,
    mtu: usize,
    donl_in_use: bool,
    next_sequence: u16,
    next_don: u16,
    pending: Vec<H265Packet>,
}

impl H265Muxer {
    /// Creates a muxer using the process-wide configuration
    ///
    /// # Arguments
    ///
    /// * `sink` - Channel the RTP datagrams are sent on
    /// * `initial_sequence` - Sequence number of the first datagram
    pub fn new(sink: mpsc::Sender<Bytes>, initial_sequence: u16) -> Self {
        Self::with_config(sink, initial_sequence, &get_config())
    }

    /// Creates a muxer using an explicit configuration
    pub fn with_config(sink: mpsc::Sender<Bytes>, initial_sequence: u16, config: &Config) -> Self {
        Self {
            sink,
            packetizer: Packetizer::from_config(config),
            mtu: config.mtu,
            donl_in_use: config.donl_in_use(),
            next_sequence: initial_sequence,
            next_don: 0,
            pending: Vec::new(),
        }
    }

    /// Sequence number the next datagram will carry
    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    /// Units held back for aggregation
    pub fn pending_units(&self) -> usize {
        self.pending.len()
    }

    /// Size of the AP that would carry the pending units plus `extra`
    fn aggregated_size(&self, extra: &H265Packet) -> usize {
        let units = self.pending.iter().chain(std::iter::once(extra));
        let mut size = self
            .pending
            .first()
            .unwrap_or(extra)
            .rtp_header()
            .len()
            + NAL_HEADER_SIZE;
        if self.donl_in_use {
            size += DONL_FIELD_SIZE;
        }
        for (index, unit) in units.enumerate() {
            size += AP_NALU_LENGTH_FIELD_SIZE + unit.payload().len();
            if index > 0 && self.donl_in_use {
                size += DOND_FIELD_SIZE;
            }
        }
        size
    }

    /// Size of `unit` as a single NAL unit packet
    fn single_size(&self, unit: &H265Packet) -> usize {
        let mut size = unit.raw_data().len();
        if self.donl_in_use {
            size += DONL_FIELD_SIZE;
        }
        size
    }

    async fn flush_pending(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        match pending.len() {
            0 => Ok(()),
            1 => {
                let packet = self.single(&pending[0]);
                self.send(packet).await
            }
            _ => match self.packetizer.pack_ap(&pending) {
                Ok(mut ap) => {
                    let marker = pending.last().is_some_and(|unit| unit.rtp().marker());
                    ap.rtp_mut().set_marker(marker);
                    debug!("Aggregated {} NAL units into one AP", pending.len());
                    self.send(ap).await
                }
                Err(e) => {
                    warn!("Sending {} NAL units unaggregated: {}", pending.len(), e);
                    for unit in &pending {
                        let packet = self.single(unit);
                        self.send(packet).await?;
                    }
                    Ok(())
                }
            },
        }
    }

    /// Single NAL unit packet, with a DONL field after the PayloadHdr when in use
    fn single(&self, unit: &H265Packet) -> H265Packet {
        if !self.donl_in_use {
            return unit.clone();
        }
        let payload = unit.payload();
        let don = unit.don().unwrap_or(0).to_be_bytes();
        let mut packet = H265Packet::synthesize(
            unit.rtp_header(),
            &[
                &payload[..NAL_HEADER_SIZE],
                &don[..],
                &payload[NAL_HEADER_SIZE..],
            ],
        )
        .with_donl(true)
        .with_dond(true);
        packet.set_don(unit.don());
        packet
    }

    async fn send(&mut self, mut packet: H265Packet) -> Result<()> {
        packet.rtp_mut().set_sequence_number(self.next_sequence);
        self.next_sequence = self.next_sequence.wrapping_add(1);

        trace!(
            "Sending {:?} packet seq={} len={}",
            packet.unit_type(),
            packet.rtp().sequence_number(),
            packet.raw_data().len()
        );
        self.sink
            .send(packet.into_rtp().into_bytes())
            .await
            .map_err(|_| RtpHevcError::ChannelClosed)
    }
}

#[async_trait::async_trait]
impl Muxer for H265Muxer {
    async fn write_nal_unit(&mut self, mut unit: H265Packet) -> Result<()> {
        let header = unit.nal_header().ok_or(H265Error::EmptyPayload)?;

        if self.donl_in_use {
            let don = unit.don().unwrap_or(self.next_don);
            self.next_don = don.wrapping_add(1);
            unit.set_don(Some(don));
        }
        unit.set_donl_in_use(self.donl_in_use);
        unit.set_dond_in_use(self.donl_in_use);

        let same_access_unit = self
            .pending
            .first()
            .map_or(true, |first| first.rtp().timestamp() == unit.rtp().timestamp());
        if !same_access_unit {
            self.flush_pending().await?;
        }

        // already packetized: AP, FU, PACI and the unspecified range
        if header.nal_type >= AP_NAL_TYPE {
            self.flush_pending().await?;
            return self.send(unit).await;
        }

        if self.single_size(&unit) > self.mtu {
            self.flush_pending().await?;
            let fragments = self.packetizer.fragment(&unit, self.mtu)?;
            trace!("Fragmented NAL unit into {} FUs", fragments.len());
            for fragment in fragments {
                self.send(fragment).await?;
            }
            return Ok(());
        }

        if !self.pending.is_empty() && self.aggregated_size(&unit) > self.mtu {
            self.flush_pending().await?;
        }

        let end_of_access_unit = unit.rtp().marker();
        self.pending.push(unit);
        if end_of_access_unit {
            self.flush_pending().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.flush_pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::rtp::RTPPacket;
    use tokio_test::assert_ok;

    fn unit(timestamp: u32, marker: bool, nalu: &[u8]) -> H265Packet {
        H265Packet::from_nal_unit(96, 0, timestamp, 0x4242, marker, nalu)
    }

    fn received(rx: &mut mpsc::Receiver<Bytes>) -> Vec<RTPPacket> {
        let mut packets = Vec::new();
        while let Ok(datagram) = rx.try_recv() {
            packets.push(RTPPacket::parse(&datagram).unwrap());
        }
        packets
    }

    #[tokio::test]
    async fn test_units_of_one_access_unit_are_aggregated() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut muxer = H265Muxer::with_config(tx, 10, &Config::default());

        assert_ok!(muxer.write_nal_unit(unit(3000, false, &[0x40, 0x01, 0x0C])).await);
        assert_ok!(muxer.write_nal_unit(unit(3000, false, &[0x42, 0x01, 0x01])).await);
        assert_eq!(muxer.pending_units(), 2);
        assert!(received(&mut rx).is_empty());

        assert_ok!(muxer.write_nal_unit(unit(3000, true, &[0x26, 0x01, 0xAF])).await);
        let packets = received(&mut rx);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload()[0] >> 1, AP_NAL_TYPE);
        assert!(packets[0].marker());
        assert_eq!(packets[0].sequence_number(), 10);
        assert_eq!(muxer.next_sequence(), 11);
    }

    #[tokio::test]
    async fn test_timestamp_change_flushes() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut muxer = H265Muxer::with_config(tx, u16::MAX, &Config::default());

        assert_ok!(muxer.write_nal_unit(unit(3000, false, &[0x02, 0x01, 0x01])).await);
        assert_ok!(muxer.write_nal_unit(unit(6000, false, &[0x02, 0x01, 0x02])).await);
        assert_ok!(muxer.flush().await);

        let packets = received(&mut rx);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].sequence_number(), u16::MAX);
        assert_eq!(packets[1].sequence_number(), 0);
        assert_eq!(packets[0].payload(), &[0x02, 0x01, 0x01]);
        assert_eq!(packets[1].timestamp(), 6000);
    }

    #[tokio::test]
    async fn test_large_unit_is_fragmented() {
        let (tx, mut rx) = mpsc::channel(64);
        let config = Config {
            mtu: 500,
            ..Config::default()
        };
        let mut muxer = H265Muxer::with_config(tx, 0, &config);

        let mut nalu = vec![0x26, 0x01];
        nalu.extend(std::iter::repeat(0x11).take(2000));
        assert_ok!(muxer.write_nal_unit(unit(3000, true, &nalu)).await);

        let packets = received(&mut rx);
        assert_eq!(packets.len(), 5);
        let seqs: Vec<_> = packets.iter().map(|p| p.sequence_number()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(packets.iter().all(|p| p.len() <= 500));
        assert!(packets[4].marker());
    }

    #[tokio::test]
    async fn test_units_too_far_apart_for_dond_are_sent_separately() {
        let (tx, rx) = mpsc::channel(16);
        let config = Config {
            sprop_max_don_diff: 8,
            ..Config::default()
        };
        let mut muxer = H265Muxer::with_config(tx, 0, &config);
        let mut demuxer = H265Demuxer::with_config(rx, &config);

        let mut first = unit(3000, false, &[0x40, 0x01, 0x0C]);
        first.set_don(Some(0));
        let mut second = unit(3000, true, &[0x26, 0x01, 0xAF]);
        second.set_don(Some(1000));

        assert_ok!(muxer.write_nal_unit(first).await);
        assert_ok!(muxer.write_nal_unit(second).await);
        assert_eq!(muxer.pending_units(), 0);
        assert_eq!(muxer.next_sequence(), 2);
        drop(muxer);

        let a = assert_ok!(demuxer.read_nal_unit().await).unwrap();
        let b = assert_ok!(demuxer.read_nal_unit().await).unwrap();
        assert_eq!(a.payload(), &[0x40, 0x01, 0x0C]);
        assert_eq!(a.don(), Some(0));
        assert!(!a.rtp().marker());
        assert_eq!(b.payload(), &[0x26, 0x01, 0xAF]);
        assert_eq!(b.don(), Some(1000));
        assert!(b.rtp().marker());
        assert!(assert_ok!(demuxer.read_nal_unit().await).is_none());
    }

    #[tokio::test]
    async fn test_oversized_aggregate_falls_back_to_single_packets() {
        let (tx, mut rx) = mpsc::channel(16);
        // built directly, bypassing validate()
        let config = Config {
            max_packet_size: 64,
            mtu: 1400,
            ..Config::default()
        };
        let mut muxer = H265Muxer::with_config(tx, 0, &config);

        let mut nalu = vec![0x02, 0x01];
        nalu.extend(std::iter::repeat(0x5A).take(40));
        assert_ok!(muxer.write_nal_unit(unit(3000, false, &nalu)).await);
        assert_ok!(muxer.write_nal_unit(unit(3000, true, &nalu)).await);

        let packets = received(&mut rx);
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p.payload() == &nalu[..]));
        assert!(packets[1].marker());
    }

    #[tokio::test]
    async fn test_closed_channel_reports_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut muxer = H265Muxer::with_config(tx, 0, &Config::default());

        let result = muxer.write_nal_unit(unit(0, true, &[0x02, 0x01, 0x00])).await;
        assert!(matches!(result, Err(RtpHevcError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_demuxer_skips_malformed_datagrams() {
        let (tx, rx) = mpsc::channel(16);
        let mut demuxer = H265Demuxer::with_config(rx, &Config::default());

        tx.send(Bytes::from_static(&[0x80, 0x60])).await.unwrap();
        let packet = RTPPacket::new(96, 1, 0, 1, true, &[0x02, 0x01, 0x33]);
        tx.send(packet.to_bytes()).await.unwrap();
        drop(tx);

        let unit = assert_ok!(demuxer.read_nal_unit().await).unwrap();
        assert_eq!(unit.payload(), &[0x02, 0x01, 0x33]);
        assert!(assert_ok!(demuxer.read_nal_unit().await).is_none());
    }
}

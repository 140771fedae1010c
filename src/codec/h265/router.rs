use std::collections::HashMap;

use log::debug;
use parking_lot::Mutex;

use super::depacketizer::Depacketizer;
use super::packet::H265Packet;

/// Keeps one [`Depacketizer`] per SSRC so interleaved streams never share
/// FU reassembly state.
///
/// The router can be shared between tasks behind an `Arc`; each call locks
/// the table only for the duration of one `handle`.
#[derive(Debug, Default)]
pub struct SsrcRouter {
    streams: Mutex<HashMap<u32, Depacketizer>>,
}

impl SsrcRouter {
    /// Creates a router with no known streams
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `packet` to the depacketizer of its SSRC, creating one on first sight
    pub fn handle(&self, packet: H265Packet) -> Vec<H265Packet> {
        let ssrc = packet.rtp().ssrc();
        let mut streams = self.streams.lock();
        let depacketizer = streams.entry(ssrc).or_insert_with(|| {
            debug!("New H.265 stream ssrc={:#010x}", ssrc);
            Depacketizer::new()
        });
        depacketizer.handle(packet)
    }

    /// Forgets a stream, dropping any partial NAL unit it was collecting
    pub fn remove(&self, ssrc: u32) -> bool {
        self.streams.lock().remove(&ssrc).is_some()
    }

    /// Drops the partial NAL unit of one stream, keeping the stream registered
    pub fn reset(&self, ssrc: u32) {
        if let Some(depacketizer) = self.streams.lock().get_mut(&ssrc) {
            depacketizer.reset();
        }
    }

    /// Number of SSRCs seen since creation or removal
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Fragments currently buffered for `ssrc`, zero for unknown streams
    pub fn buffered_fragments(&self, ssrc: u32) -> usize {
        self.streams
            .lock()
            .get(&ssrc)
            .map_or(0, Depacketizer::buffered_fragments)
    }
}

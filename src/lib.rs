#![doc(html_root_url = "https://docs.rs/rtp-hevc/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # rtp-hevc - RTP Payload Format for H.265/HEVC
//!
//! `rtp-hevc` implements RFC 7798 on top of a growable RFC 3550 packet
//! buffer. It is meant for relays and gateways that forward H.265 video
//! between RTP endpoints without decoding it.
//!
//! ## Features
//!
//! ### Packet handling
//! - RTP fixed header accessors and mutators backed by a growable buffer
//! - CSRC list, header extension and padding aware payload extraction
//!
//! ### H.265 payload format
//! - NAL unit header decoding and encoding, including the split LayerId
//! - Aggregation Packet (AP) building and splitting
//! - Fragmentation Unit (FU) building and reassembly with strict sequencing
//! - Optional DONL/DOND decoding order fields
//! - Per-SSRC depacketizer routing
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! rtp-hevc = "0.1.0"
//! ```
//!
//! ### Depacketizing received datagrams
//!
//! ```rust
//! use rtp_hevc::codec::h265::{H265Packet, SsrcRouter};
//! use rtp_hevc::format::rtp::RTPPacket;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let router = SsrcRouter::new();
//!
//! // a datagram as it would arrive from a UDP socket
//! let datagram = RTPPacket::new(96, 1, 3000, 0x1234, true, &[0x40, 0x01, 0x0C]).to_bytes();
//!
//! let packet = H265Packet::parse(&datagram)?;
//! for unit in router.handle(packet) {
//!     println!("NAL unit {:?}, {} bytes", unit.unit_type(), unit.payload().len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Relaying over channels
//!
//! ```rust,no_run
//! use rtp_hevc::format::{Demuxer, H265Demuxer, H265Muxer, Muxer};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (_ingress_tx, ingress_rx) = mpsc::channel(1024);
//!     let (egress_tx, _egress_rx) = mpsc::channel(1024);
//!
//!     let mut demuxer = H265Demuxer::new(ingress_rx);
//!     let mut muxer = H265Muxer::new(egress_tx, 0);
//!
//!     // forward every completed NAL unit, repacketized for the egress MTU
//!     while let Some(unit) = demuxer.read_nal_unit().await? {
//!         muxer.write_nal_unit(unit).await?;
//!     }
//!     muxer.flush().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `codec`: the H.265 payload format
//!   - NAL unit header and type table
//!   - Depacketizer with FU reassembly state machine
//!   - Packetizer for APs and FUs
//!   - Per-SSRC router
//!
//! - `format`: packet buffer and transport glue
//!   - RTP packet buffer
//!   - Channel-based demuxer and muxer
//!
//! - `config`: packet size, MTU and `sprop-max-don-diff` settings
//!
//! - `error`: crate error type and `Result` alias

/// H.265 RTP payload format
pub mod codec;

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// RTP packet buffer and relay adapters
pub mod format;

pub use error::{Result, RtpHevcError};

use std::num::ParseIntError;
use thiserror::Error;

use crate::codec::h265::H265Error;
use crate::format::rtp::RTPError;

/// Errors surfaced by the relay adapters and configuration loading
#[derive(Error, Debug)]
pub enum RtpHevcError {
    /// I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A datagram is not a valid RTP packet
    #[error("rtp error: {0}")]
    Rtp(#[from] RTPError),

    /// A NAL unit could not be packetized
    #[error("h265 packetization error: {0}")]
    H265(#[from] H265Error),

    /// A configuration value is out of range
    #[error("config error: {0}")]
    Config(String),

    /// A configuration document is not valid TOML for [`Config`](crate::config::Config)
    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The current configuration could not be represented as TOML
    #[error("config serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// An environment variable is not a number
    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    /// The other end of a relay channel was dropped
    #[error("channel closed")]
    ChannelClosed,
}

/// Result alias for [`RtpHevcError`]
pub type Result<T> = std::result::Result<T, RtpHevcError>;

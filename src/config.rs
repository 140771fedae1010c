use lazy_static::lazy_static;
use log::warn;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::codec::h265::types::{DONL_FIELD_SIZE, FU_HEADER_SIZE, NAL_HEADER_SIZE};
use crate::error::{Result, RtpHevcError};
use crate::format::rtp::{FIXED_HEADER_SIZE, RTP_PACKET_MAX_SIZE};

/// Default path MTU used when fragmenting NAL units
pub const DEFAULT_MTU: usize = 1400;

/// Largest `sprop-max-don-diff` allowed by RFC 7798
pub const MAX_DON_DIFF: u16 = 32767;

const CONFIG_PATHS: [&str; 2] = ["./config.toml", "./rtp_hevc.toml"];

const ENV_KEYS: [(&str, &str); 3] = [
    ("max_packet_size", "RTP_HEVC_MAX_PACKET_SIZE"),
    ("mtu", "RTP_HEVC_MTU"),
    ("sprop_max_don_diff", "RTP_HEVC_SPROP_MAX_DON_DIFF"),
];

// smallest packet that can carry an FU with a DONL field and one byte of data
const MIN_PACKET_SIZE: usize = FIXED_HEADER_SIZE + NAL_HEADER_SIZE + FU_HEADER_SIZE + DONL_FIELD_SIZE + 1;

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::load());
}

/// Packetization settings shared by the packetizer and the relay adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ceiling for any packet the packetizer builds, RTP header included
    pub max_packet_size: usize,
    /// Size above which the muxer fragments a NAL unit
    pub mtu: usize,
    /// `sprop-max-don-diff` from signalling; DONL/DOND fields are present when non-zero
    pub sprop_max_don_diff: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_packet_size: RTP_PACKET_MAX_SIZE,
            mtu: DEFAULT_MTU,
            sprop_max_don_diff: 0,
        }
    }
}

impl Config {
    /// Builds the configuration from defaults, then environment variables,
    /// then each readable TOML config file in turn. A layer that fails to
    /// parse or validate is logged and skipped.
    pub fn load() -> Self {
        let mut config = Config::default();

        if let Err(e) = config.apply_env() {
            warn!("Ignoring environment configuration: {}", e);
            config = Config::default();
        }

        for path in &CONFIG_PATHS {
            if let Ok(content) = fs::read_to_string(path) {
                if let Err(e) = config.apply_str(&content) {
                    warn!("Ignoring config file {}: {}", path, e);
                }
            }
        }

        config
    }

    /// Applies the `RTP_HEVC_*` environment variables that are set
    pub fn apply_env(&mut self) -> Result<()> {
        for (key, var) in &ENV_KEYS {
            if let Ok(value) = env::var(var) {
                self.set(key, &value)?;
            }
        }
        self.validate()
    }

    /// Applies the settings of a TOML document on top of the current values.
    /// Keys missing from the document keep their value; unknown keys are
    /// logged and ignored.
    pub fn apply_str(&mut self, content: &str) -> Result<()> {
        let overrides: toml::Table = content.parse()?;
        for key in overrides.keys() {
            if !ENV_KEYS.iter().any(|(known, _)| *known == key.as_str()) {
                warn!("Unknown configuration key {}", key);
            }
        }

        let mut merged = toml::Value::try_from(&*self)?;
        if let toml::Value::Table(table) = &mut merged {
            table.extend(overrides);
        }
        let candidate: Config = merged.try_into()?;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Checks the values against what the packetizer can work with
    pub fn validate(&self) -> Result<()> {
        if !(MIN_PACKET_SIZE..=RTP_PACKET_MAX_SIZE).contains(&self.max_packet_size) {
            return Err(RtpHevcError::Config(format!(
                "max_packet_size {} outside {}..={}",
                self.max_packet_size, MIN_PACKET_SIZE, RTP_PACKET_MAX_SIZE
            )));
        }
        if !(MIN_PACKET_SIZE..=self.max_packet_size).contains(&self.mtu) {
            return Err(RtpHevcError::Config(format!(
                "mtu {} outside {}..={}",
                self.mtu, MIN_PACKET_SIZE, self.max_packet_size
            )));
        }
        if self.sprop_max_don_diff > MAX_DON_DIFF {
            return Err(RtpHevcError::Config(format!(
                "sprop_max_don_diff {} exceeds {}",
                self.sprop_max_don_diff, MAX_DON_DIFF
            )));
        }
        Ok(())
    }

    /// DONL and DOND fields are carried when `sprop-max-don-diff` is non-zero
    pub fn donl_in_use(&self) -> bool {
        self.sprop_max_don_diff > 0
    }

    /// Reloads the process-wide configuration from the environment and files
    pub fn reload() {
        let new_config = Config::load();
        *CONFIG.write() = new_config;
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "max_packet_size" => self.max_packet_size = value.parse()?,
            "mtu" => self.mtu = value.parse()?,
            "sprop_max_don_diff" => self.sprop_max_don_diff = value.parse()?,
            other => warn!("Unknown configuration key {}", other),
        }
        Ok(())
    }
}

/// Returns a copy of the process-wide configuration
pub fn get_config() -> Config {
    CONFIG.read().clone()
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# rtp-hevc configuration
# Values here override the RTP_HEVC_* environment variables.

# Largest packet the packetizer may build, RTP header included
max_packet_size = 8192

# NAL units larger than this are sent as fragmentation units
mtu = 1400

# sprop-max-don-diff negotiated in SDP; DONL/DOND fields are used when > 0
sprop_max_don_diff = 0
"#;
        fs::write(path, template)?;
    }
    Ok(())
}

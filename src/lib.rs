//! # WiFi Station Scanning & Regulatory Subsystem
//!
//! This crate implements the scanning and spectrum-regulatory core of a
//! WiFi station management daemon: it decides which radio channels may be
//! probed and in what mode, drives the scan request/indication protocol
//! against the radio firmware, and maintains a ranked, expiring cache of
//! discovered networks.
//!
//! ## Architecture
//!
//! The implementation is organized into several modules:
//! - `wire`: bounds-checked byte cursor for information-element codecs
//! - `channel`: per-channel state, channel table and frequency mapping
//! - `regdomain`: compiled-in regulatory domain profiles and country table
//! - `country_ie`: 802.11 Country Information Element codec
//! - `regulatory`: regulatory-compliance engine (locations, expiry, power)
//! - `cache`: ranked scan-result cache with eviction and derived views
//! - `mlme`: firmware-facing scan primitives and transport trait
//! - `scan`: scan-scheduling state machine
//! - `config`: configuration surface and file loading
//! - `station`: single-task event loop tying the components together

pub mod cache;
pub mod channel;
pub mod config;
pub mod country_ie;
pub mod mlme;
pub mod regdomain;
pub mod regulatory;
pub mod scan;
pub mod station;
pub mod wire;

// Re-export commonly used types
pub use crate::{
    cache::*,
    channel::*,
    country_ie::*,
    mlme::*,
    regdomain::*,
    regulatory::*,
    scan::*,
    wire::*,
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid element: {0}")]
    InvalidElement(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("No scannable channels")]
    NoChannels,

    #[error("Buffer is full")]
    BufferFull,

    #[error("Buffer is empty")]
    BufferEmpty,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, StaError>;

// Constants
/// Information element id of the Country IE (IEEE 802.11-2007 7.3.2.9).
pub const COUNTRY_IE_ID: u8 = 7;
/// Minimum Country IE body length: 3-byte country string + one triplet.
pub const COUNTRY_IE_MIN_LEN: usize = 6;
/// Highest valid channel number; triplet first-bytes above this are
/// regulatory extension triplets.
pub const MAX_VALID_CHANNEL: u8 = 200;
/// Number of 2.4 GHz channels tracked by the regulatory engine.
pub const NUM_24GHZ_CHANNELS: usize = 14;
/// Sentinel for "no valid transmit power known".
pub const INVALID_POWER_DBM: i8 = i8::MIN;
/// Validity window granted to a channel promoted to active by a received
/// sub-band triplet (30 minutes).
pub const CHANNEL_GRANT_VALIDITY_SECS: i64 = 30 * 60;

/// MAC address type used for BSSIDs throughout the crate.
pub type Bssid = [u8; 6];

// Utility functions
pub fn init_logging() {
    env_logger::init();
}

/// Format a BSSID for log output.
pub fn format_bssid(bssid: &Bssid) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bssid[0], bssid[1], bssid[2], bssid[3], bssid[4], bssid[5]
    )
}

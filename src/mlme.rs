//! MLME scan primitives
//!
//! This module contains the narrow message surface between the scan core
//! and the radio/firmware transport: downward scan requests and upward
//! indications. The transport itself is an external collaborator reached
//! through the [`MlmeTransport`] trait; every interaction is
//! request/indication (issue-then-return, the indication arrives as a
//! later message).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::channel::{Band, ScanMode};
use crate::{Bssid, Result};

/// Broadcast destination used for undirected probe requests.
pub const BROADCAST_ADDR: Bssid = [0xff; 6];

/// BSS type filter for scan requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BssType {
    /// Infrastructure networks only
    Infrastructure = 0,
    /// Independent (ad-hoc) networks only
    Independent = 1,
    /// Any BSS type
    Any = 2,
}

/// Scan completion result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultCode {
    /// Scan ran to completion
    Success = 0,
    /// Scan was refused by the firmware
    Refused = 1,
    /// Scan was cancelled by the host
    Cancelled = 2,
    /// No scannable channels after filtering
    NoChannels = 3,
    /// Firmware timed out
    Timeout = 4,
}

impl ResultCode {
    /// Whether the result represents a completed scan.
    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Success)
    }
}

/// Per-request dwell timings, in 802.11 time units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTimings {
    /// Delay before the first probe on each channel, microseconds
    pub probe_delay_us: u32,
    /// Minimum per-channel dwell, TU
    pub min_dwell_tu: u16,
    /// Maximum per-channel dwell, TU
    pub max_dwell_tu: u16,
}

impl Default for ScanTimings {
    fn default() -> Self {
        Self {
            probe_delay_us: 0,
            min_dwell_tu: 20,
            max_dwell_tu: 40,
        }
    }
}

/// A single scan issuance toward the firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIssue {
    /// Channels to visit, in issuance order
    pub channels: Vec<u8>,
    /// Information elements appended to probe requests
    pub ie_bytes: Bytes,
    /// Band the channel list belongs to
    pub band: Band,
    /// BSS type filter
    pub bss_type: BssType,
    /// Probe destination address
    pub dest_addr: Bssid,
    /// Active or passive operation
    pub mode: ScanMode,
    /// Dwell timings
    pub timings: ScanTimings,
}

/// A firmware-resident background scan installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutonomousScanSpec {
    /// Installation id, chosen by the host
    pub id: u8,
    /// Channels to visit each cycle
    pub channels: Vec<u8>,
    /// Information elements appended to probe requests
    pub ie_bytes: Bytes,
    /// Band the channel list belongs to
    pub band: Band,
    /// BSS type filter
    pub bss_type: BssType,
    /// Active or passive operation
    pub mode: ScanMode,
    /// Cycle interval, TU
    pub interval_tu: u32,
    /// Dwell timings
    pub timings: ScanTimings,
}

/// Upward indication for one discovered or updated network
#[derive(Debug, Clone)]
pub struct ScanIndication {
    /// Network BSSID
    pub bssid: Bssid,
    /// BSS type of the network
    pub bss_type: BssType,
    /// Channel the frame was received on
    pub channel: u8,
    /// Center frequency, MHz
    pub frequency: u16,
    /// Beacon period, TU
    pub beacon_period: u16,
    /// TSF timestamp from the frame
    pub timestamp: u64,
    /// Local receive time, microseconds
    pub local_time: u64,
    /// Capability information field
    pub capability_info: u16,
    /// Raw information elements, owned
    pub ies: Bytes,
    /// Received signal strength, dBm
    pub rssi: i8,
    /// Signal-to-noise ratio, dB
    pub snr: i8,
}

/// Upward indication from a firmware-resident autonomous scan.
/// A beacon period of zero signals deletion of a firmware-held record.
#[derive(Debug, Clone)]
pub struct AutonomousScanIndication {
    /// The embedded sighting
    pub scan: ScanIndication,
    /// Which installation produced it
    pub autonomous_scan_id: u8,
}

impl AutonomousScanIndication {
    /// Whether this indication deletes a firmware-held record.
    pub fn is_deletion(&self) -> bool {
        self.scan.beacon_period == 0
    }
}

/// Scan completion indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCompleteIndication {
    /// Outcome of the completed scan
    pub result: ResultCode,
}

/// Downward interface to the radio/firmware transport.
///
/// Calls never block on radio work: they enqueue the request and return;
/// completions arrive later as indications on the station event queue.
#[async_trait::async_trait]
pub trait MlmeTransport: Send + Sync {
    /// Issue a foreground scan.
    async fn issue_scan(&self, issue: ScanIssue) -> Result<()>;

    /// Install a firmware-resident autonomous scan.
    async fn add_autonomous_scan(&self, spec: AutonomousScanSpec) -> Result<()>;

    /// Remove a firmware-resident autonomous scan.
    async fn delete_autonomous_scan(&self, id: u8) -> Result<()>;

    /// Cancel the in-flight foreground scan.
    async fn cancel_scan(&self) -> Result<()>;
}

/// Transport that only logs requests; used for bring-up without a radio.
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait::async_trait]
impl MlmeTransport for NullTransport {
    async fn issue_scan(&self, issue: ScanIssue) -> Result<()> {
        log::info!(
            "issue_scan: {} {} channels {:?}",
            issue.band.name(),
            issue.mode.name(),
            issue.channels
        );
        Ok(())
    }

    async fn add_autonomous_scan(&self, spec: AutonomousScanSpec) -> Result<()> {
        log::info!(
            "add_autonomous_scan id {} {} channels {:?}",
            spec.id,
            spec.mode.name(),
            spec.channels
        );
        Ok(())
    }

    async fn delete_autonomous_scan(&self, id: u8) -> Result<()> {
        log::info!("delete_autonomous_scan id {}", id);
        Ok(())
    }

    async fn cancel_scan(&self) -> Result<()> {
        log::info!("cancel_scan");
        Ok(())
    }
}

//! Channel state management
//!
//! This module contains the per-channel regulatory state for the 2.4 GHz
//! band, the fixed channel table the regulatory engine mutates, and
//! channel/frequency helpers shared with the scan scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{INVALID_POWER_DBM, NUM_24GHZ_CHANNELS};

/// Scan mode allowed on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScanMode {
    /// Channel may be probed actively (probe requests allowed)
    Active = 0,
    /// Channel may only be listened on
    Passive = 1,
    /// Channel must not be scanned at all
    None = 2,
}

impl ScanMode {
    /// Get mode name
    pub fn name(&self) -> &'static str {
        match self {
            ScanMode::Active => "active",
            ScanMode::Passive => "passive",
            ScanMode::None => "none",
        }
    }
}

/// Power measurement regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PowerRegime {
    /// Effective Isotropic Radiated Power
    Eirp = 0,
    /// Transmit Power Output
    Tpo = 1,
    /// Regime not yet known
    Unknown = 2,
}

impl PowerRegime {
    /// Get regime name
    pub fn name(&self) -> &'static str {
        match self {
            PowerRegime::Eirp => "EIRP",
            PowerRegime::Tpo => "TPO",
            PowerRegime::Unknown => "unknown",
        }
    }
}

/// Frequency band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Band {
    /// 2.4 GHz band (channels 1..=14)
    Band24 = 0,
    /// 5 GHz band
    Band5 = 1,
}

impl Band {
    /// Get band of a channel number, if the channel is known.
    pub fn of_channel(channel: u8) -> Option<Band> {
        match channel {
            1..=14 => Some(Band::Band24),
            36..=165 => Some(Band::Band5),
            _ => None,
        }
    }

    /// Get band name
    pub fn name(&self) -> &'static str {
        match self {
            Band::Band24 => "2.4GHz",
            Band::Band5 => "5GHz",
        }
    }
}

/// Convert channel number to center frequency in MHz.
pub fn channel_to_frequency(channel: u8) -> u16 {
    match channel {
        1..=13 => 2407 + channel as u16 * 5,
        14 => 2484,
        36..=165 => 5000 + channel as u16 * 5,
        _ => 0,
    }
}

/// Convert center frequency in MHz to channel number.
pub fn frequency_to_channel(freq: u16) -> u8 {
    match freq {
        2412..=2472 => ((freq - 2407) / 5) as u8,
        2484 => 14,
        5180..=5825 => ((freq - 5000) / 5) as u8,
        _ => 0,
    }
}

/// Fixed issuance priority for 2.4 GHz scanning. The three mutually
/// non-interfering channels go first.
pub const SCAN_PRIORITY_ORDER: [u8; NUM_24GHZ_CHANNELS] =
    [1, 6, 11, 2, 3, 4, 5, 7, 8, 9, 10, 12, 13, 14];

/// Reorder a 2.4 GHz channel list into scan-issuance priority order.
/// Channels outside 1..=14 keep their relative order at the tail.
pub fn priority_order(channels: &[u8]) -> Vec<u8> {
    let mut ordered = Vec::with_capacity(channels.len());
    for &pri in SCAN_PRIORITY_ORDER.iter() {
        if channels.contains(&pri) {
            ordered.push(pri);
        }
    }
    for &ch in channels {
        if !ordered.contains(&ch) {
            ordered.push(ch);
        }
    }
    ordered
}

/// Per-channel regulatory state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    /// Channel number (1..=14)
    pub channel: u8,
    /// Allowed scan mode
    pub mode: ScanMode,
    /// Power measurement regime for `power_dbm`
    pub regime: PowerRegime,
    /// Maximum transmit power in dBm; `INVALID_POWER_DBM` when unknown
    pub power_dbm: i8,
    /// Deadline after which an active grant lapses
    pub active_deadline: DateTime<Utc>,
    /// Whether the active grant deadline is armed
    pub active_expiry_enabled: bool,
    /// Deadline after which the power value goes stale
    pub power_deadline: DateTime<Utc>,
    /// Whether the power value has gone stale
    pub power_stale: bool,
}

impl ChannelState {
    /// Create a disabled channel entry.
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            mode: ScanMode::None,
            regime: PowerRegime::Unknown,
            power_dbm: INVALID_POWER_DBM,
            active_deadline: Utc::now(),
            active_expiry_enabled: false,
            power_deadline: Utc::now(),
            power_stale: false,
        }
    }

    /// Check whether active probing is currently allowed.
    pub fn is_active(&self) -> bool {
        self.mode == ScanMode::Active
    }

    /// Grant active status with a validity window and a fresh power value.
    pub fn grant_active(
        &mut self,
        power_dbm: i8,
        regime: PowerRegime,
        deadline: DateTime<Utc>,
    ) {
        self.mode = ScanMode::Active;
        self.regime = regime;
        self.power_dbm = power_dbm;
        self.active_deadline = deadline;
        self.active_expiry_enabled = true;
        self.power_deadline = deadline;
        self.power_stale = false;
    }

    /// Refresh the power value and its staleness window on an already
    /// active channel.
    pub fn refresh_power(&mut self, power_dbm: i8, regime: PowerRegime, deadline: DateTime<Utc>) {
        self.regime = regime;
        self.power_dbm = power_dbm;
        self.power_deadline = deadline;
        self.power_stale = false;
    }

    /// Revert the channel to passive with the given default power data,
    /// clearing all timers.
    pub fn revert_to_passive(&mut self, power_dbm: i8, regime: PowerRegime) {
        self.mode = ScanMode::Passive;
        self.regime = regime;
        self.power_dbm = power_dbm;
        self.active_expiry_enabled = false;
        self.power_stale = false;
    }

    /// Disable the channel entirely.
    pub fn disable(&mut self) {
        self.mode = ScanMode::None;
        self.regime = PowerRegime::Unknown;
        self.power_dbm = INVALID_POWER_DBM;
        self.active_expiry_enabled = false;
        self.power_stale = false;
    }
}

/// Fixed table of 2.4 GHz channel states (channels 1..=14)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTable {
    states: Vec<ChannelState>,
}

impl ChannelTable {
    /// Create a table with every channel disabled.
    pub fn new() -> Self {
        let states = (1..=NUM_24GHZ_CHANNELS as u8).map(ChannelState::new).collect();
        Self { states }
    }

    /// Get channel state by channel number.
    pub fn get(&self, channel: u8) -> Option<&ChannelState> {
        if (1..=NUM_24GHZ_CHANNELS as u8).contains(&channel) {
            self.states.get(channel as usize - 1)
        } else {
            None
        }
    }

    /// Get mutable channel state by channel number.
    pub fn get_mut(&mut self, channel: u8) -> Option<&mut ChannelState> {
        if (1..=NUM_24GHZ_CHANNELS as u8).contains(&channel) {
            self.states.get_mut(channel as usize - 1)
        } else {
            None
        }
    }

    /// Iterate channel states in numeric order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelState> {
        self.states.iter()
    }

    /// Iterate mutable channel states in numeric order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChannelState> {
        self.states.iter_mut()
    }

    /// Channel numbers currently in the given mode, numeric order.
    pub fn channels_with_mode(&self, mode: ScanMode) -> Vec<u8> {
        self.states
            .iter()
            .filter(|s| s.mode == mode)
            .map(|s| s.channel)
            .collect()
    }

    /// Channel numbers currently allowing active probing.
    pub fn active_channels(&self) -> Vec<u8> {
        self.channels_with_mode(ScanMode::Active)
    }

    /// Channel numbers restricted to passive listening.
    pub fn passive_channels(&self) -> Vec<u8> {
        self.channels_with_mode(ScanMode::Passive)
    }

    /// Count of channels allowing active probing.
    pub fn active_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_active()).count()
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

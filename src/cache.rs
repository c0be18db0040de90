//! Ranked scan-result cache
//!
//! This module contains the ranked, expiring collection of discovered
//! networks. Entries are keyed by BSSID and kept in strict descending
//! rank order; ranking is a function of signal strength and
//! signal-to-noise ratio. The cache applies eviction and expiry policy
//! and derives the secondary views the rest of the station consumes:
//! pre-authentication candidate lists, roaming channel sets, and the
//! pending list of cloaked-SSID networks awaiting a directed probe.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::mlme::ScanIndication;
use crate::{format_bssid, Bssid};

/// SSID information element id
const SSID_IE_ID: u8 = 0;
/// QBSS Load information element id
const QBSS_LOAD_IE_ID: u8 = 11;
/// RSN (WPA2) information element id
const RSN_IE_ID: u8 = 48;
/// WAPI information element id
const WAPI_IE_ID: u8 = 68;

/// Who currently holds a cache record's sightings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Ownership {
    /// Record is maintained by host-issued scans
    Station = 0,
    /// Record is refreshed by a firmware-resident autonomous scan
    Firmware = 1,
}

/// Security capabilities advertised in a network's IEs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFlags {
    /// RSN (WPA2) element present
    pub wpa2: bool,
    /// WAPI element present
    pub wapi: bool,
}

impl SecurityFlags {
    /// Whether the network qualifies for pre-authentication.
    pub fn preauth_capable(&self) -> bool {
        self.wpa2 || self.wapi
    }
}

/// One cached network
#[derive(Debug, Clone)]
pub struct ScanResultEntry {
    /// Network BSSID, the cache key
    pub bssid: Bssid,
    /// Learned SSID bytes; never cloaked once stored
    pub ssid: Vec<u8>,
    /// Channel the network was last seen on
    pub channel: u8,
    /// Center frequency, MHz
    pub frequency: u16,
    /// Beacon period, TU
    pub beacon_period: u16,
    /// Capability information field
    pub capability_info: u16,
    /// Last observed signal strength, dBm
    pub rssi: i8,
    /// Last observed signal-to-noise ratio, dB
    pub snr: i8,
    /// Security capabilities from the IEs
    pub security: SecurityFlags,
    /// Current rank value
    pub rank: u16,
    /// Who refreshes this record
    pub ownership: Ownership,
    /// Time of the last sighting
    pub last_update: DateTime<Utc>,
    /// Raw information elements from the last sighting
    pub ies: Bytes,
}

/// A cloaked network awaiting a directed probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloakedAddressRecord {
    /// BSSID broadcasting the cloaked SSID
    pub bssid: Bssid,
    /// Channel it was heard on
    pub channel: u8,
    /// Which scan path produced the sighting
    pub ownership: Ownership,
    /// Time of the last sighting
    pub last_seen: DateTime<Utc>,
}

/// Externally visible cache change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// An externally visible entry was removed. Only the BSSID is
    /// meaningful; consumers treat every other field as zero.
    Deleted(Bssid),
    /// A cloaked BSSID was added to the pending list
    CloakedPending(Bssid),
    /// The pre-authentication candidate list changed
    PreauthCandidates(Vec<Bssid>),
}

/// Cache policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Maximum number of cached entries
    pub max_entries: usize,
    /// Validity window for ordinary entries, seconds
    pub entry_validity_secs: i64,
    /// Validity window for entries sharing the associated SSID, seconds
    pub roaming_validity_secs: i64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_entries: 32,
            entry_validity_secs: 60,
            roaming_validity_secs: 300,
        }
    }
}

/// Ranked scan-result cache
pub struct ScanResultCache {
    policy: CachePolicy,
    // Descending rank order at all times
    entries: Vec<ScanResultEntry>,
    cloaked: Vec<CloakedAddressRecord>,
    roaming_channels: HashMap<Vec<u8>, BTreeSet<u8>>,
    connected_bssid: Option<Bssid>,
    associated_ssid: Option<Vec<u8>>,
    prejoin_ssid: Option<Vec<u8>>,
    last_preauth: Vec<Bssid>,
}

impl ScanResultCache {
    /// Create an empty cache with the given policy.
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
            cloaked: Vec::new(),
            roaming_channels: HashMap::new(),
            connected_bssid: None,
            associated_ssid: None,
            prejoin_ssid: None,
            last_preauth: Vec::new(),
        }
    }

    /// Record the currently-connected network. The connected entry is
    /// exempt from eviction and expiry.
    pub fn set_connected(&mut self, bssid: Option<Bssid>, ssid: Option<Vec<u8>>) {
        self.connected_bssid = bssid;
        self.associated_ssid = ssid;
    }

    /// Record the SSID of a join in progress; entries sharing it are
    /// retained regardless of rank.
    pub fn set_prejoin_ssid(&mut self, ssid: Option<Vec<u8>>) {
        self.prejoin_ssid = ssid;
    }

    /// Override the ordinary validity window. The scheduler tightens this
    /// as link usability degrades so stale results age out faster.
    pub fn set_entry_validity(&mut self, secs: i64) {
        self.policy.entry_validity_secs = secs;
    }

    /// The policy in force.
    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in descending rank order.
    pub fn entries(&self) -> &[ScanResultEntry] {
        &self.entries
    }

    /// Look up an entry by BSSID.
    pub fn get(&self, bssid: &Bssid) -> Option<&ScanResultEntry> {
        self.entries.iter().find(|e| &e.bssid == bssid)
    }

    /// The pending cloaked-network list, deduplicated by BSSID.
    pub fn cloaked_pending(&self) -> &[CloakedAddressRecord] {
        &self.cloaked
    }

    /// Drain the pending cloaked list, for queuing directed probes.
    pub fn take_cloaked_pending(&mut self) -> Vec<CloakedAddressRecord> {
        std::mem::take(&mut self.cloaked)
    }

    /// Insert or refresh an entry from a scan indication.
    ///
    /// A cloaked sighting (zero-length or all-zero SSID) of an unknown
    /// BSSID is not stored as an anonymous entry; the BSSID lands in the
    /// pending-cloaked list instead. A cloaked sighting of a known BSSID
    /// keeps the previously-learned SSID.
    pub fn upsert(&mut self, ind: &ScanIndication, ownership: Ownership) -> Vec<CacheEvent> {
        let mut events = Vec::new();
        let now = Utc::now();

        let raw_ssid = find_ie(&ind.ies, SSID_IE_ID).unwrap_or(&[]);
        let cloaked = is_cloaked(raw_ssid);

        let existing = self.entries.iter().position(|e| e.bssid == ind.bssid);
        let ssid: Vec<u8> = match (cloaked, existing) {
            (true, None) => {
                if !self.cloaked.iter().any(|c| c.bssid == ind.bssid) {
                    self.cloaked.push(CloakedAddressRecord {
                        bssid: ind.bssid,
                        channel: ind.channel,
                        ownership,
                        last_seen: now,
                    });
                    events.push(CacheEvent::CloakedPending(ind.bssid));
                }
                return events;
            }
            (true, Some(idx)) => self.entries[idx].ssid.clone(),
            (false, _) => raw_ssid.to_vec(),
        };

        // A resolved sighting settles any pending cloaked record.
        if !cloaked {
            self.cloaked.retain(|c| c.bssid != ind.bssid);
        }

        self.roaming_channels
            .entry(ssid.clone())
            .or_default()
            .insert(ind.channel);

        let security = parse_security(&ind.ies);
        let rank = compute_rank(ind.rssi, ind.snr, admission_bonus(&ind.ies));

        match existing {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                entry.ssid = ssid;
                entry.channel = ind.channel;
                entry.frequency = ind.frequency;
                entry.beacon_period = ind.beacon_period;
                entry.capability_info = ind.capability_info;
                entry.rssi = ind.rssi;
                entry.snr = ind.snr;
                entry.security = security;
                entry.rank = rank;
                entry.ownership = ownership;
                entry.last_update = now;
                entry.ies = ind.ies.clone();
                self.rerank(idx);
            }
            None => {
                let entry = ScanResultEntry {
                    bssid: ind.bssid,
                    ssid,
                    channel: ind.channel,
                    frequency: ind.frequency,
                    beacon_period: ind.beacon_period,
                    capability_info: ind.capability_info,
                    rssi: ind.rssi,
                    snr: ind.snr,
                    security,
                    rank,
                    ownership,
                    last_update: now,
                    ies: ind.ies.clone(),
                };
                let pos = self
                    .entries
                    .iter()
                    .position(|e| e.rank < rank)
                    .unwrap_or(self.entries.len());
                self.entries.insert(pos, entry);
                log::debug!(
                    "Cached new network {} rank {}",
                    format_bssid(&ind.bssid),
                    rank
                );
                events.extend(self.evict(now));
            }
        }

        events
    }

    /// Remove a firmware-held record in response to an autonomous
    /// deletion indication.
    pub fn delete_firmware_record(&mut self, bssid: &Bssid) -> Vec<CacheEvent> {
        if Some(*bssid) == self.connected_bssid {
            return Vec::new();
        }
        match self
            .entries
            .iter()
            .position(|e| &e.bssid == bssid && e.ownership == Ownership::Firmware)
        {
            Some(idx) => {
                self.entries.remove(idx);
                vec![CacheEvent::Deleted(*bssid)]
            }
            None => Vec::new(),
        }
    }

    /// Remove an entry explicitly.
    pub fn remove(&mut self, bssid: &Bssid) -> Vec<CacheEvent> {
        match self.entries.iter().position(|e| &e.bssid == bssid) {
            Some(idx) => {
                self.entries.remove(idx);
                vec![CacheEvent::Deleted(*bssid)]
            }
            None => Vec::new(),
        }
    }

    /// Drop entries whose validity window has passed.
    ///
    /// Entries sharing the associated SSID use the longer roaming
    /// window; firmware-owned entries and the connected entry never
    /// expire here.
    pub fn process_expired(&mut self, now: DateTime<Utc>) -> Vec<CacheEvent> {
        let mut events = Vec::new();
        let connected = self.connected_bssid;
        let associated = self.associated_ssid.clone();
        let policy = self.policy.clone();
        self.entries.retain(|e| {
            if e.ownership == Ownership::Firmware || Some(e.bssid) == connected {
                return true;
            }
            let window = if associated.as_deref() == Some(e.ssid.as_slice()) {
                Duration::seconds(policy.roaming_validity_secs)
            } else {
                Duration::seconds(policy.entry_validity_secs)
            };
            if now - e.last_update > window {
                log::debug!("Expiring cached network {}", format_bssid(&e.bssid));
                events.push(CacheEvent::Deleted(e.bssid));
                false
            } else {
                true
            }
        });
        events
    }

    /// Transfer every entry held by `from` to the other owner, shifting
    /// sighting times by `gap` so the hand-off does not count against the
    /// validity window.
    pub fn transfer_ownership(&mut self, from: Ownership, gap: Duration) {
        let to = match from {
            Ownership::Firmware => Ownership::Station,
            Ownership::Station => Ownership::Firmware,
        };
        for entry in self.entries.iter_mut().filter(|e| e.ownership == from) {
            entry.ownership = to;
            entry.last_update += gap;
        }
    }

    /// Recompute the pre-authentication candidate list and emit an event
    /// only when it differs from the last one reported.
    pub fn update_preauth_candidates(&mut self) -> Option<CacheEvent> {
        let associated = self.associated_ssid.as_deref()?;
        let connected = self.connected_bssid?;
        let candidates: Vec<Bssid> = self
            .entries
            .iter()
            .filter(|e| {
                e.ssid == associated && e.bssid != connected && e.security.preauth_capable()
            })
            .map(|e| e.bssid)
            .collect();
        if candidates == self.last_preauth {
            return None;
        }
        self.last_preauth = candidates.clone();
        Some(CacheEvent::PreauthCandidates(candidates))
    }

    /// Channels an SSID has been observed on, numeric order.
    pub fn roaming_channels(&self, ssid: &[u8]) -> Vec<u8> {
        self.roaming_channels
            .get(ssid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget all observed roaming channels.
    pub fn flush_roaming_channels(&mut self) {
        self.roaming_channels.clear();
    }

    // Restore descending order after the entry at `idx` changed rank.
    // A single swap against an out-of-order neighbor suffices almost
    // always; the full sort is the fallback when both neighbors violate.
    fn rerank(&mut self, idx: usize) {
        let above_ok = idx == 0 || self.entries[idx - 1].rank >= self.entries[idx].rank;
        let below_ok =
            idx + 1 >= self.entries.len() || self.entries[idx].rank >= self.entries[idx + 1].rank;
        match (above_ok, below_ok) {
            (true, true) => {}
            (false, true) => {
                self.entries.swap(idx - 1, idx);
                if !self.is_sorted() {
                    self.full_sort();
                }
            }
            (true, false) => {
                self.entries.swap(idx, idx + 1);
                if !self.is_sorted() {
                    self.full_sort();
                }
            }
            (false, false) => self.full_sort(),
        }
    }

    fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].rank >= w[1].rank)
    }

    fn full_sort(&mut self) {
        self.entries.sort_by(|a, b| b.rank.cmp(&a.rank));
    }

    // Bring the cache back under the size limit: expire stale entries
    // first, then drop lowest-ranked unprotected entries.
    fn evict(&mut self, now: DateTime<Utc>) -> Vec<CacheEvent> {
        if self.entries.len() <= self.policy.max_entries {
            return Vec::new();
        }
        let mut events = self.process_expired(now);
        while self.entries.len() > self.policy.max_entries {
            let victim = self
                .entries
                .iter()
                .enumerate()
                .rev()
                .find(|(_, e)| !self.is_protected(e))
                .map(|(i, _)| i);
            match victim {
                Some(idx) => {
                    let entry = self.entries.remove(idx);
                    log::debug!(
                        "Evicting cached network {} rank {}",
                        format_bssid(&entry.bssid),
                        entry.rank
                    );
                    events.push(CacheEvent::Deleted(entry.bssid));
                }
                None => break,
            }
        }
        events
    }

    fn is_protected(&self, entry: &ScanResultEntry) -> bool {
        Some(entry.bssid) == self.connected_bssid
            || self.prejoin_ssid.as_deref() == Some(entry.ssid.as_slice())
    }
}

/// Rank metric: RSSI and SNR each offset into a non-negative range, then
/// averaged; channel-admission headroom adds a bonus when advertised.
pub fn compute_rank(rssi: i8, snr: i8, admission_bonus: u16) -> u16 {
    let rssi_part = (rssi as i16 + 128) as u16;
    let snr_part = (snr as i16 + 128) as u16;
    (rssi_part + snr_part) / 2 + admission_bonus
}

/// Whether an SSID is cloaked: zero length or all-zero bytes.
pub fn is_cloaked(ssid: &[u8]) -> bool {
    ssid.is_empty() || ssid.iter().all(|&b| b == 0)
}

/// Find the first IE with the given id in a raw element buffer, returning
/// its body. Truncated trailing elements are ignored.
pub fn find_ie(ies: &[u8], id: u8) -> Option<&[u8]> {
    let mut rest = ies;
    while rest.len() >= 2 {
        let (ie_id, len) = (rest[0], rest[1] as usize);
        if rest.len() < 2 + len {
            return None;
        }
        if ie_id == id {
            return Some(&rest[2..2 + len]);
        }
        rest = &rest[2 + len..];
    }
    None
}

fn parse_security(ies: &[u8]) -> SecurityFlags {
    SecurityFlags {
        wpa2: find_ie(ies, RSN_IE_ID).is_some(),
        wapi: find_ie(ies, WAPI_IE_ID).is_some(),
    }
}

// QBSS Load: station count (2), utilization (1), admission capacity (2).
// The bonus scales remaining admission capacity into a small rank nudge.
fn admission_bonus(ies: &[u8]) -> u16 {
    match find_ie(ies, QBSS_LOAD_IE_ID) {
        Some(body) if body.len() >= 5 => {
            let capacity = u16::from_le_bytes([body[3], body[4]]);
            (capacity / 4096).min(8)
        }
        _ => 0,
    }
}

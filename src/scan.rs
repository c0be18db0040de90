//! Scan scheduling state machine
//!
//! This module contains the scheduler that turns regulatory channel data
//! into firmware scan requests. It is a finite-state machine over
//! {Stopped, Monitoring, Scanning}: events come in, a new state and a
//! list of side effects come out. Effects are executed by the station
//! task, which keeps the machine itself synchronous and directly
//! testable.
//!
//! The scheduler also owns the regulatory engine and the result cache,
//! routing every indication through both, and reconciles the
//! firmware-resident autonomous scan with foreground scanning: on every
//! channel-table change, link-quality change, or pause/unpause, the
//! autonomous installation is torn down and re-issued with fresh channel
//! lists and timings.

use std::collections::VecDeque;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

use crate::cache::{CacheEvent, Ownership, ScanResultCache};
use crate::channel::{priority_order, Band, ScanMode};
use crate::config::{LinkUsability, RecentNetwork, ScanTimingProfile, StationConfig};
use crate::mlme::{
    AutonomousScanIndication, AutonomousScanSpec, BssType, ResultCode, ScanIndication, ScanIssue,
    ScanTimings, BROADCAST_ADDR,
};
use crate::regulatory::RegulatoryEngine;
use crate::{Bssid, Result, StaError};

/// Installation id of the general background scan
pub const AUTONOMOUS_SCAN_ID: u8 = 1;
/// Installation id of the roaming-specific background scan
pub const ROAMING_SCAN_ID: u8 = 2;
/// Weakest RSSI accepted as a satisfactory roam candidate, dBm
pub const SATISFACTORY_RSSI_DBM: i8 = -70;

/// Why a scan was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanReason {
    /// External request from the user surface
    Manual,
    /// Probe ahead of a join attempt
    Join,
    /// Roam candidate search
    Roam,
    /// Fast single-channel reconnect probe at startup
    StartupProbe,
    /// Full scan concluding startup
    StartupFull,
    /// Directed probe resolving a cloaked SSID
    CloakedProbe,
}

impl ScanReason {
    /// Internal scans never notify an external requester.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ScanReason::StartupProbe | ScanReason::StartupFull | ScanReason::CloakedProbe
        )
    }
}

/// Early-stop policy applied while a scan runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStop {
    /// Run the scan to completion
    None,
    /// Cancel as soon as any network is stored
    FirstResult,
    /// Cancel once a satisfactory roam candidate is stored
    FirstRoamCandidate,
}

/// A scan request entering the scheduler
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Why the scan was requested
    pub reason: ScanReason,
    /// Restrict to one band
    pub band: Option<Band>,
    /// User channel restriction
    pub channels: Option<Vec<u8>>,
    /// SSIDs for directed probes; empty means broadcast probing
    pub ssids: Vec<Vec<u8>>,
    /// Early-stop policy
    pub early_stop: EarlyStop,
    /// When the request was made
    pub request_time: DateTime<Utc>,
}

impl ScanRequest {
    /// A broadcast manual scan.
    pub fn manual() -> Self {
        Self {
            reason: ScanReason::Manual,
            band: None,
            channels: None,
            ssids: Vec::new(),
            early_stop: EarlyStop::None,
            request_time: Utc::now(),
        }
    }

    /// A roam candidate search over the given channels.
    pub fn roam(channels: Option<Vec<u8>>) -> Self {
        Self {
            reason: ScanReason::Roam,
            band: Some(Band::Band24),
            channels,
            ssids: Vec::new(),
            early_stop: EarlyStop::FirstRoamCandidate,
            request_time: Utc::now(),
        }
    }

    /// A single-channel directed probe ahead of a join.
    pub fn join(ssid: Vec<u8>, channel: u8) -> Self {
        Self {
            reason: ScanReason::Join,
            band: Band::of_channel(channel),
            channels: Some(vec![channel]),
            ssids: vec![ssid],
            early_stop: EarlyStop::FirstResult,
            request_time: Utc::now(),
        }
    }
}

/// One per-band/per-mode scan configuration, built fresh for each scan
/// cycle and consumed by a single issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Band the channels belong to
    pub band: Band,
    /// Active or passive operation
    pub mode: ScanMode,
    /// Channels in issuance order
    pub channels: Vec<u8>,
    /// Directed SSID, when probing for one network
    pub ssid: Option<Vec<u8>>,
    /// Dwell timings
    pub timings: ScanTimings,
}

/// An in-flight scan
#[derive(Debug, Clone)]
pub struct ScanJob {
    /// The request being served
    pub request: ScanRequest,
    /// Configurations not yet issued
    remaining: VecDeque<ScanConfig>,
    /// Set when an early-stop policy cancelled the rest of the scan
    early_stopped: bool,
}

/// Scheduler state
#[derive(Debug, Clone)]
pub enum SchedulerState {
    /// Not started
    Stopped,
    /// Started, no foreground scan in flight
    Monitoring,
    /// A foreground scan is in flight
    Scanning(ScanJob),
}

impl SchedulerState {
    /// Get state name
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Monitoring => "monitoring",
            SchedulerState::Scanning(_) => "scanning",
        }
    }
}

/// Cooperative timers the station task maintains for the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Periodic regulatory channel-expiry check
    ChannelExpiry,
    /// Periodic cache-expiry check
    CacheExpiry,
    /// Relaxes the unusable scan profile back to poor
    UnusableFallback,
}

/// Scheduler input event
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// Start the scheduler
    Start,
    /// Stop the scheduler
    Stop,
    /// A scan request from the station
    Request(ScanRequest),
    /// A foreground scan indication
    Indication(ScanIndication),
    /// An autonomous scan indication
    AutonomousIndication(AutonomousScanIndication),
    /// The in-flight scan completed
    ScanComplete(ResultCode),
    /// Cancel the in-flight scan and stale queued requests
    Cancel,
    /// Suspend autonomous scanning (reference-counted)
    Pause,
    /// Resume autonomous scanning (reference-counted)
    Unpause,
    /// Link quality tier changed
    UsabilityChanged(LinkUsability),
    /// Association state changed
    LinkStateChanged {
        /// The connected network, when associated
        connected: Option<(Bssid, Vec<u8>)>,
    },
    /// A cooperative timer fired
    TimerFired(TimerKind),
}

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Issue a foreground scan
    IssueScan(ScanIssue),
    /// Install an autonomous scan
    AddAutonomousScan(AutonomousScanSpec),
    /// Remove an autonomous scan
    DeleteAutonomousScan(u8),
    /// Cancel the in-flight foreground scan
    CancelScan,
    /// Report a finished request to its requester
    ScanDone {
        /// The request's reason
        reason: ScanReason,
        /// Outcome
        result: ResultCode,
    },
    /// Surface a cache change to the rest of the station
    CacheChanged(CacheEvent),
    /// Arm a cooperative timer
    ArmTimer(TimerKind),
    /// Cancel a cooperative timer
    CancelTimer(TimerKind),
}

/// Scan scheduling state machine
pub struct ScanScheduler {
    config: StationConfig,
    engine: RegulatoryEngine,
    cache: ScanResultCache,
    state: SchedulerState,
    pause_depth: u32,
    cancelling: bool,
    cancel_time: DateTime<Utc>,
    usability: LinkUsability,
    startup_probes: VecDeque<RecentNetwork>,
    startup_done: bool,
    deferred: VecDeque<ScanRequest>,
    autonomous_installed: bool,
    roaming_installed: bool,
    autonomous_install_time: DateTime<Utc>,
    connected: Option<(Bssid, Vec<u8>)>,
}

impl ScanScheduler {
    /// Create a stopped scheduler.
    pub fn new(config: StationConfig, engine: RegulatoryEngine, cache: ScanResultCache) -> Self {
        Self {
            config,
            engine,
            cache,
            state: SchedulerState::Stopped,
            pause_depth: 0,
            cancelling: false,
            cancel_time: Utc::now(),
            usability: LinkUsability::Good,
            startup_probes: VecDeque::new(),
            startup_done: false,
            deferred: VecDeque::new(),
            autonomous_installed: false,
            roaming_installed: false,
            autonomous_install_time: Utc::now(),
            connected: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// The regulatory engine, read-only.
    pub fn engine(&self) -> &RegulatoryEngine {
        &self.engine
    }

    /// The result cache, read-only.
    pub fn cache(&self) -> &ScanResultCache {
        &self.cache
    }

    /// Current pause nesting depth.
    pub fn pause_depth(&self) -> u32 {
        self.pause_depth
    }

    /// Apply one event, returning the effects to execute.
    pub fn handle(&mut self, event: SchedulerEvent) -> Result<Vec<Effect>> {
        match event {
            SchedulerEvent::Start => self.on_start(),
            SchedulerEvent::Stop => Ok(self.on_stop()),
            SchedulerEvent::Request(req) => self.on_request(req),
            SchedulerEvent::Indication(ind) => Ok(self.on_indication(&ind, Ownership::Station)),
            SchedulerEvent::AutonomousIndication(ind) => Ok(self.on_autonomous(&ind)),
            SchedulerEvent::ScanComplete(result) => self.on_scan_complete(result),
            SchedulerEvent::Cancel => Ok(self.on_cancel()),
            SchedulerEvent::Pause => Ok(self.on_pause()),
            SchedulerEvent::Unpause => Ok(self.on_unpause()),
            SchedulerEvent::UsabilityChanged(tier) => Ok(self.on_usability(tier)),
            SchedulerEvent::LinkStateChanged { connected } => Ok(self.on_link_state(connected)),
            SchedulerEvent::TimerFired(kind) => Ok(self.on_timer(kind)),
        }
    }

    fn on_start(&mut self) -> Result<Vec<Effect>> {
        if !matches!(self.state, SchedulerState::Stopped) {
            log::warn!("Start ignored in state {}", self.state.name());
            return Ok(Vec::new());
        }
        self.engine.init();
        self.cache.set_entry_validity(
            self.config
                .scan
                .timing
                .profile_for(self.usability)
                .validity_secs,
        );
        self.startup_done = false;
        self.startup_probes = self
            .config
            .scan
            .recent_networks
            .iter()
            .take(self.config.scan.startup_probe_limit)
            .cloned()
            .collect();
        self.state = SchedulerState::Monitoring;

        let mut effects = Vec::new();
        if self.engine.updates_enabled() {
            effects.push(Effect::ArmTimer(TimerKind::ChannelExpiry));
        }
        effects.push(Effect::ArmTimer(TimerKind::CacheExpiry));
        effects.extend(self.advance_startup()?);
        Ok(effects)
    }

    fn on_stop(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if matches!(self.state, SchedulerState::Scanning(_)) {
            effects.push(Effect::CancelScan);
        }
        effects.extend(self.uninstall_autonomous());
        effects.push(Effect::CancelTimer(TimerKind::ChannelExpiry));
        effects.push(Effect::CancelTimer(TimerKind::CacheExpiry));
        effects.push(Effect::CancelTimer(TimerKind::UnusableFallback));
        self.state = SchedulerState::Stopped;
        self.deferred.clear();
        self.cancelling = false;
        effects
    }

    fn on_request(&mut self, request: ScanRequest) -> Result<Vec<Effect>> {
        match self.state {
            SchedulerState::Stopped => {
                log::warn!("Scan request dropped: scheduler stopped");
                Ok(vec![Effect::ScanDone {
                    reason: request.reason,
                    result: ResultCode::Refused,
                }])
            }
            SchedulerState::Scanning(_) => {
                // Deferred until the in-flight scan finishes.
                self.deferred.push_back(request);
                Ok(Vec::new())
            }
            SchedulerState::Monitoring => {
                if self.cancelling {
                    self.deferred.push_back(request);
                    return Ok(Vec::new());
                }
                self.start_scan(request)
            }
        }
    }

    /// Build the request's configurations and issue the first one.
    ///
    /// A request whose filtered channel lists are all empty fails
    /// synchronously with `NoChannels`.
    fn start_scan(&mut self, request: ScanRequest) -> Result<Vec<Effect>> {
        let mut configs: VecDeque<ScanConfig> = self.build_configs(&request).into();
        let first = match configs.pop_front() {
            Some(c) => c,
            None => {
                log::info!(
                    "Scan request ({:?}) has no usable channels",
                    request.reason
                );
                if request.reason.is_internal() {
                    return self.after_scan_finished(request.reason);
                }
                return Err(StaError::NoChannels);
            }
        };

        let effects = vec![Effect::IssueScan(self.issue_for(&first))];
        self.state = SchedulerState::Scanning(ScanJob {
            request,
            remaining: configs,
            early_stopped: false,
        });
        Ok(effects)
    }

    /// Build up to one configuration per band/mode pair, filtering the
    /// regulatory channel list through the request's band and channel
    /// restrictions. Directed probes get one configuration per SSID.
    fn build_configs(&self, request: &ScanRequest) -> Vec<ScanConfig> {
        let profile = self.config.scan.timing.profile_for(self.usability);
        let restrict = |channels: Vec<u8>| -> Vec<u8> {
            match &request.channels {
                Some(allowed) => channels
                    .into_iter()
                    .filter(|c| allowed.contains(c))
                    .collect(),
                None => channels,
            }
        };
        let band_allowed = |band: Band| request.band.is_none() || request.band == Some(band);

        let mut lists = Vec::new();
        if band_allowed(Band::Band24) {
            lists.push((
                Band::Band24,
                ScanMode::Active,
                priority_order(&restrict(self.engine.channels().active_channels())),
            ));
        }
        if band_allowed(Band::Band5) {
            lists.push((
                Band::Band5,
                ScanMode::Active,
                restrict(self.config.scan.band5_channels.clone()),
            ));
        }
        if band_allowed(Band::Band24) {
            lists.push((
                Band::Band24,
                ScanMode::Passive,
                priority_order(&restrict(self.engine.channels().passive_channels())),
            ));
        }
        if band_allowed(Band::Band5) {
            lists.push((
                Band::Band5,
                ScanMode::Passive,
                restrict(self.config.scan.band5_passive_channels.clone()),
            ));
        }

        let directed = !request.ssids.is_empty();
        let mut configs = Vec::new();
        for (band, mode, channels) in lists {
            if channels.is_empty() {
                continue;
            }
            // Directed probes are active by definition; a passive listen
            // cannot solicit the hidden network.
            if directed && mode != ScanMode::Active {
                continue;
            }
            let ssids: Vec<Option<Vec<u8>>> = if directed {
                request.ssids.iter().cloned().map(Some).collect()
            } else {
                vec![None]
            };
            for ssid in ssids {
                configs.push(ScanConfig {
                    band,
                    mode,
                    channels: channels.clone(),
                    ssid,
                    timings: timings_for(profile, mode),
                });
            }
        }
        configs
    }

    fn issue_for(&self, config: &ScanConfig) -> ScanIssue {
        ScanIssue {
            channels: config.channels.clone(),
            ie_bytes: probe_ies(config.ssid.as_deref()),
            band: config.band,
            bss_type: BssType::Any,
            dest_addr: BROADCAST_ADDR,
            mode: config.mode,
            timings: config.timings,
        }
    }

    fn on_indication(&mut self, ind: &ScanIndication, ownership: Ownership) -> Vec<Effect> {
        let mut effects = Vec::new();

        // Regulatory extraction happens before the cache sees the frame.
        if crate::cache::find_ie(&ind.ies, crate::COUNTRY_IE_ID).is_some() {
            if let Some(element) = extract_element(&ind.ies, crate::COUNTRY_IE_ID) {
                let changed =
                    self.engine
                        .handle_country_element(&element, Some(ind.channel), Utc::now());
                if changed && self.autonomous_installed {
                    effects.extend(self.reinstall_autonomous());
                }
            }
        }

        let cache_events = self.cache.upsert(ind, ownership);
        for event in cache_events {
            if let CacheEvent::CloakedPending(_) = event {
                self.queue_cloaked_probe(ind.channel);
            }
            effects.push(Effect::CacheChanged(event));
        }
        let stored = self.cache.get(&ind.bssid).is_some();
        if let Some(event) = self.cache.update_preauth_candidates() {
            effects.push(Effect::CacheChanged(event));
        }

        if stored {
            effects.extend(self.maybe_early_stop(ind));
        }
        effects
    }

    fn on_autonomous(&mut self, ind: &AutonomousScanIndication) -> Vec<Effect> {
        if ind.is_deletion() {
            return self
                .cache
                .delete_firmware_record(&ind.scan.bssid)
                .into_iter()
                .map(Effect::CacheChanged)
                .collect();
        }
        self.on_indication(&ind.scan, Ownership::Firmware)
    }

    // Early-stop policy: cancel the remainder of the scan once the
    // request's stop condition is met.
    fn maybe_early_stop(&mut self, ind: &ScanIndication) -> Vec<Effect> {
        let job = match &mut self.state {
            SchedulerState::Scanning(job) if !job.early_stopped => job,
            _ => return Vec::new(),
        };
        let satisfied = match job.request.early_stop {
            EarlyStop::None => false,
            EarlyStop::FirstResult => true,
            EarlyStop::FirstRoamCandidate => {
                let ssid = crate::cache::find_ie(&ind.ies, 0).unwrap_or(&[]);
                let target = self.connected.as_ref();
                target.is_some_and(|(bssid, assoc)| {
                    ssid == assoc.as_slice()
                        && &ind.bssid != bssid
                        && ind.rssi >= SATISFACTORY_RSSI_DBM
                })
            }
        };
        if !satisfied {
            return Vec::new();
        }
        job.early_stopped = true;
        job.remaining.clear();
        self.cancelling = true;
        self.cancel_time = Utc::now();
        vec![Effect::CancelScan]
    }

    fn on_scan_complete(&mut self, result: ResultCode) -> Result<Vec<Effect>> {
        let mut job = match std::mem::replace(&mut self.state, SchedulerState::Monitoring) {
            SchedulerState::Scanning(job) => job,
            other => {
                log::debug!("Scan complete ignored in state {}", other.name());
                self.state = other;
                return Ok(Vec::new());
            }
        };

        if self.cancelling {
            self.cancelling = false;
            let reported = if job.early_stopped {
                ResultCode::Success
            } else {
                ResultCode::Cancelled
            };
            let mut effects = Vec::new();
            if !job.request.reason.is_internal() {
                effects.push(Effect::ScanDone {
                    reason: job.request.reason,
                    result: reported,
                });
            }
            self.drop_stale_deferred();
            effects.extend(self.after_scan_finished(job.request.reason)?);
            return Ok(effects);
        }

        if let Some(next) = job.remaining.pop_front() {
            let effects = vec![Effect::IssueScan(self.issue_for(&next))];
            self.state = SchedulerState::Scanning(job);
            return Ok(effects);
        }

        let mut effects = Vec::new();
        if !job.request.reason.is_internal() {
            effects.push(Effect::ScanDone {
                reason: job.request.reason,
                result,
            });
        }
        effects.extend(self.after_scan_finished(job.request.reason)?);
        Ok(effects)
    }

    // Progression after a scan finishes: remaining startup work first,
    // then the deferred autonomous installation, then queued requests.
    fn after_scan_finished(&mut self, reason: ScanReason) -> Result<Vec<Effect>> {
        let mut effects = Vec::new();

        if !self.startup_done {
            match reason {
                ScanReason::StartupProbe | ScanReason::StartupFull => {
                    if reason == ScanReason::StartupFull {
                        self.startup_done = true;
                        effects.extend(self.install_autonomous());
                    } else {
                        effects.extend(self.advance_startup()?);
                        return Ok(effects);
                    }
                }
                _ => {}
            }
        }

        if matches!(self.state, SchedulerState::Monitoring) && !self.cancelling {
            if let Some(request) = self.deferred.pop_front() {
                let reason = request.reason;
                match self.on_request(request) {
                    Ok(more) => effects.extend(more),
                    Err(StaError::NoChannels) => effects.push(Effect::ScanDone {
                        reason,
                        result: ResultCode::NoChannels,
                    }),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(effects)
    }

    // Issue the next startup reconnect probe, or the concluding full
    // scan once the probe queue is drained.
    fn advance_startup(&mut self) -> Result<Vec<Effect>> {
        while let Some(recent) = self.startup_probes.pop_front() {
            let request = ScanRequest {
                reason: ScanReason::StartupProbe,
                band: Band::of_channel(recent.channel),
                channels: Some(vec![recent.channel]),
                ssids: vec![recent.ssid.into_bytes()],
                early_stop: EarlyStop::FirstResult,
                request_time: Utc::now(),
            };
            let effects = self.start_scan(request)?;
            if !effects.is_empty() {
                return Ok(effects);
            }
        }
        let full = ScanRequest {
            reason: ScanReason::StartupFull,
            band: None,
            channels: None,
            ssids: Vec::new(),
            early_stop: EarlyStop::None,
            request_time: Utc::now(),
        };
        self.start_scan(full)
    }

    fn on_cancel(&mut self) -> Vec<Effect> {
        self.cancelling = true;
        self.cancel_time = Utc::now();
        self.drop_stale_deferred();
        match self.state {
            SchedulerState::Scanning(_) => vec![Effect::CancelScan],
            _ => {
                // Nothing in flight to acknowledge the cancellation.
                self.cancelling = false;
                Vec::new()
            }
        }
    }

    fn drop_stale_deferred(&mut self) {
        let cutoff = self.cancel_time;
        self.deferred.retain(|r| r.request_time > cutoff);
    }

    fn on_pause(&mut self) -> Vec<Effect> {
        self.pause_depth += 1;
        if self.pause_depth == 1 {
            return self.uninstall_autonomous();
        }
        Vec::new()
    }

    fn on_unpause(&mut self) -> Vec<Effect> {
        if self.pause_depth == 0 {
            log::warn!("Unpause without matching pause");
            return Vec::new();
        }
        self.pause_depth -= 1;
        if self.pause_depth == 0 && self.startup_done {
            return self.install_autonomous();
        }
        Vec::new()
    }

    fn on_usability(&mut self, tier: LinkUsability) -> Vec<Effect> {
        if tier == self.usability {
            return Vec::new();
        }
        log::info!(
            "Link usability {} -> {}",
            self.usability.name(),
            tier.name()
        );
        self.usability = tier;
        self.cache
            .set_entry_validity(self.config.scan.timing.profile_for(tier).validity_secs);
        let mut effects = self.reinstall_autonomous();
        match tier {
            LinkUsability::Unusable => effects.push(Effect::ArmTimer(TimerKind::UnusableFallback)),
            _ => effects.push(Effect::CancelTimer(TimerKind::UnusableFallback)),
        }
        effects
    }

    fn on_link_state(&mut self, connected: Option<(Bssid, Vec<u8>)>) -> Vec<Effect> {
        if connected.is_some() && self.connected != connected {
            self.cache.flush_roaming_channels();
        }
        self.connected = connected.clone();
        match connected {
            Some((bssid, ssid)) => self.cache.set_connected(Some(bssid), Some(ssid)),
            None => self.cache.set_connected(None, None),
        }
        self.reinstall_autonomous()
    }

    fn on_timer(&mut self, kind: TimerKind) -> Vec<Effect> {
        match kind {
            TimerKind::ChannelExpiry => {
                let changed = self.engine.process_expired_channels(Utc::now());
                let mut effects = Vec::new();
                if changed && self.autonomous_installed {
                    effects.extend(self.reinstall_autonomous());
                }
                effects.push(Effect::ArmTimer(TimerKind::ChannelExpiry));
                effects
            }
            TimerKind::CacheExpiry => {
                let mut effects: Vec<Effect> = self
                    .cache
                    .process_expired(Utc::now())
                    .into_iter()
                    .map(Effect::CacheChanged)
                    .collect();
                effects.push(Effect::ArmTimer(TimerKind::CacheExpiry));
                effects
            }
            TimerKind::UnusableFallback => self.on_usability(LinkUsability::Poor),
        }
    }

    fn install_autonomous(&mut self) -> Vec<Effect> {
        if self.pause_depth > 0 || matches!(self.state, SchedulerState::Stopped) {
            return Vec::new();
        }
        let profile = self.config.scan.timing.profile_for(self.usability);
        let channels = priority_order(&self.engine.channels().active_channels());
        let mut effects = Vec::new();
        if !channels.is_empty() {
            effects.push(Effect::AddAutonomousScan(AutonomousScanSpec {
                id: AUTONOMOUS_SCAN_ID,
                channels,
                ie_bytes: probe_ies(None),
                band: Band::Band24,
                bss_type: BssType::Any,
                mode: ScanMode::Active,
                interval_tu: profile.autonomous_interval_tu,
                timings: timings_for(profile, ScanMode::Active),
            }));
            self.autonomous_installed = true;
            self.autonomous_install_time = Utc::now();
            // Records the firmware scan now covers follow firmware
            // ownership; the hand-off is instantaneous so no gap applies.
            self.cache
                .transfer_ownership(Ownership::Station, Duration::zero());
        }

        if self.config.scan.roaming_scan_enabled {
            if let Some((_, ssid)) = &self.connected {
                let roam_channels = self.cache.roaming_channels(ssid);
                if !roam_channels.is_empty() {
                    effects.push(Effect::AddAutonomousScan(AutonomousScanSpec {
                        id: ROAMING_SCAN_ID,
                        channels: priority_order(&roam_channels),
                        ie_bytes: probe_ies(Some(ssid)),
                        band: Band::Band24,
                        bss_type: BssType::Infrastructure,
                        mode: ScanMode::Active,
                        interval_tu: profile.autonomous_interval_tu,
                        timings: timings_for(profile, ScanMode::Active),
                    }));
                    self.roaming_installed = true;
                }
            }
        }
        effects
    }

    fn uninstall_autonomous(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.autonomous_installed {
            effects.push(Effect::DeleteAutonomousScan(AUTONOMOUS_SCAN_ID));
            self.autonomous_installed = false;
        }
        if self.roaming_installed {
            effects.push(Effect::DeleteAutonomousScan(ROAMING_SCAN_ID));
            self.roaming_installed = false;
        }
        if !effects.is_empty() {
            // Firmware held these records since installation; shift their
            // sighting times so the hand-off gap does not expire them.
            let gap = Utc::now() - self.autonomous_install_time;
            self.cache.transfer_ownership(Ownership::Firmware, gap);
        }
        effects
    }

    fn reinstall_autonomous(&mut self) -> Vec<Effect> {
        let mut effects = self.uninstall_autonomous();
        if self.startup_done {
            effects.extend(self.install_autonomous());
        }
        effects
    }

    // Queue a directed probe to resolve pending cloaked networks, once
    // startup is over and candidate SSIDs are configured.
    fn queue_cloaked_probe(&mut self, channel: u8) {
        if !self.startup_done || self.config.scan.cloaked_candidates.is_empty() {
            return;
        }
        if self
            .deferred
            .iter()
            .any(|r| r.reason == ScanReason::CloakedProbe)
        {
            return;
        }
        self.deferred.push_back(ScanRequest {
            reason: ScanReason::CloakedProbe,
            band: Band::of_channel(channel),
            channels: Some(vec![channel]),
            ssids: self
                .config
                .scan
                .cloaked_candidates
                .iter()
                .map(|s| s.clone().into_bytes())
                .collect(),
            early_stop: EarlyStop::None,
            request_time: Utc::now(),
        });
    }
}

fn timings_for(profile: &ScanTimingProfile, mode: ScanMode) -> ScanTimings {
    match mode {
        ScanMode::Active => ScanTimings {
            probe_delay_us: 0,
            min_dwell_tu: profile.min_active_dwell_tu,
            max_dwell_tu: profile.max_active_dwell_tu,
        },
        _ => ScanTimings {
            probe_delay_us: 0,
            min_dwell_tu: profile.min_passive_dwell_tu,
            max_dwell_tu: profile.max_passive_dwell_tu,
        },
    }
}

/// Probe request IE payload: a single SSID element, broadcast (empty)
/// when no SSID is given.
fn probe_ies(ssid: Option<&[u8]>) -> Bytes {
    let ssid = ssid.unwrap_or(&[]);
    let mut out = Vec::with_capacity(2 + ssid.len());
    out.push(0);
    out.push(ssid.len() as u8);
    out.extend_from_slice(ssid);
    Bytes::from(out)
}

/// Extract a full `[id][len][body]` element from a raw IE buffer.
fn extract_element(ies: &[u8], id: u8) -> Option<Vec<u8>> {
    let body = crate::cache::find_ie(ies, id)?;
    let mut element = Vec::with_capacity(2 + body.len());
    element.push(id);
    element.push(body.len() as u8);
    element.extend_from_slice(body);
    Some(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachePolicy, ScanResultCache};
    use crate::regulatory::{RegulatoryConfig, RegulatoryEngine};

    fn scheduler() -> ScanScheduler {
        let mut config = StationConfig::default();
        config.scan.recent_networks.clear();
        let engine = RegulatoryEngine::new(RegulatoryConfig::default());
        let cache = ScanResultCache::new(CachePolicy::default());
        ScanScheduler::new(config, engine, cache)
    }

    fn started_scheduler() -> ScanScheduler {
        let mut s = scheduler();
        let effects = s.handle(SchedulerEvent::Start).unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::IssueScan(_))));
        // Drive the startup full scan through its configurations.
        loop {
            let effects = s
                .handle(SchedulerEvent::ScanComplete(ResultCode::Success))
                .unwrap();
            if !effects.iter().any(|e| matches!(e, Effect::IssueScan(_))) {
                break;
            }
        }
        assert!(matches!(s.state(), SchedulerState::Monitoring));
        s
    }

    fn indication(bssid: Bssid, ssid: &[u8], channel: u8, rssi: i8) -> ScanIndication {
        let mut ies = vec![0u8, ssid.len() as u8];
        ies.extend_from_slice(ssid);
        ScanIndication {
            bssid,
            bss_type: BssType::Infrastructure,
            channel,
            frequency: crate::channel::channel_to_frequency(channel),
            beacon_period: 100,
            timestamp: 0,
            local_time: 0,
            capability_info: 0x0011,
            ies: Bytes::from(ies),
            rssi,
            snr: 25,
        }
    }

    #[test]
    fn test_start_arms_timers_and_scans() {
        let mut s = scheduler();
        let effects = s.handle(SchedulerEvent::Start).unwrap();

        assert!(effects.contains(&Effect::ArmTimer(TimerKind::ChannelExpiry)));
        assert!(effects.contains(&Effect::ArmTimer(TimerKind::CacheExpiry)));
        let issue = effects.iter().find_map(|e| match e {
            Effect::IssueScan(issue) => Some(issue),
            _ => None,
        });
        // FCC default: active 2.4 GHz channels in priority order first.
        let issue = issue.unwrap();
        assert_eq!(&issue.channels[..3], &[1, 6, 11]);
        assert!(matches!(s.state(), SchedulerState::Scanning(_)));
    }

    #[test]
    fn test_startup_probes_run_before_full_scan() {
        let mut s = scheduler();
        s.config.scan.recent_networks = vec![RecentNetwork {
            ssid: "home".to_string(),
            channel: 6,
        }];
        let effects = s.handle(SchedulerEvent::Start).unwrap();

        let issue = effects
            .iter()
            .find_map(|e| match e {
                Effect::IssueScan(issue) => Some(issue),
                _ => None,
            })
            .unwrap();
        assert_eq!(issue.channels, vec![6]);
        // Directed SSID element in the probe payload.
        assert_eq!(&issue.ie_bytes[..], &[0, 4, b'h', b'o', b'm', b'e']);
    }

    #[test]
    fn test_autonomous_installed_after_startup() {
        let mut s = scheduler();
        s.handle(SchedulerEvent::Start).unwrap();
        let mut installed = false;
        for _ in 0..8 {
            let effects = s
                .handle(SchedulerEvent::ScanComplete(ResultCode::Success))
                .unwrap();
            if effects
                .iter()
                .any(|e| matches!(e, Effect::AddAutonomousScan(spec) if spec.id == AUTONOMOUS_SCAN_ID))
            {
                installed = true;
                break;
            }
        }
        assert!(installed);
        assert!(matches!(s.state(), SchedulerState::Monitoring));
    }

    #[test]
    fn test_manual_scan_and_completion() {
        let mut s = started_scheduler();
        let effects = s
            .handle(SchedulerEvent::Request(ScanRequest::manual()))
            .unwrap();
        assert!(matches!(s.state(), SchedulerState::Scanning(_)));
        assert!(effects.iter().any(|e| matches!(e, Effect::IssueScan(_))));

        // Advance through every remaining configuration.
        let mut done = None;
        for _ in 0..8 {
            let effects = s
                .handle(SchedulerEvent::ScanComplete(ResultCode::Success))
                .unwrap();
            if let Some(effect) = effects
                .iter()
                .find(|e| matches!(e, Effect::ScanDone { .. }))
            {
                done = Some(effect.clone());
                break;
            }
        }
        assert_eq!(
            done,
            Some(Effect::ScanDone {
                reason: ScanReason::Manual,
                result: ResultCode::Success,
            })
        );
        assert!(matches!(s.state(), SchedulerState::Monitoring));
    }

    #[test]
    fn test_manual_scan_covers_band_mode_matrix() {
        let mut s = started_scheduler();
        let mut issues = Vec::new();
        let effects = s
            .handle(SchedulerEvent::Request(ScanRequest::manual()))
            .unwrap();
        issues.extend(effects.iter().filter_map(|e| match e {
            Effect::IssueScan(i) => Some(i.clone()),
            _ => None,
        }));
        for _ in 0..8 {
            let effects = s
                .handle(SchedulerEvent::ScanComplete(ResultCode::Success))
                .unwrap();
            let more: Vec<ScanIssue> = effects
                .iter()
                .filter_map(|e| match e {
                    Effect::IssueScan(i) => Some(i.clone()),
                    _ => None,
                })
                .collect();
            if more.is_empty() {
                break;
            }
            issues.extend(more);
        }

        let pairs: Vec<(Band, ScanMode)> = issues.iter().map(|i| (i.band, i.mode)).collect();
        assert_eq!(
            pairs,
            vec![
                (Band::Band24, ScanMode::Active),
                (Band::Band5, ScanMode::Active),
                (Band::Band24, ScanMode::Passive),
                (Band::Band5, ScanMode::Passive),
            ]
        );
        // The passive 5 GHz leg walks the configured DFS channels.
        assert_eq!(issues[3].channels, s.config.scan.band5_passive_channels);
    }

    #[test]
    fn test_zero_channel_request_fails_synchronously() {
        let mut s = started_scheduler();
        let mut request = ScanRequest::manual();
        request.band = Some(Band::Band24);
        request.channels = Some(vec![99]);
        let result = s.handle(SchedulerEvent::Request(request));
        assert!(matches!(result, Err(StaError::NoChannels)));
        assert!(matches!(s.state(), SchedulerState::Monitoring));
    }

    #[test]
    fn test_join_on_illegal_channel_fails() {
        let mut s = started_scheduler();
        // Channel 13 allows passive listening only under FCC; a join
        // probe needs active scanning, so nothing can be issued.
        let request = ScanRequest::join(b"net".to_vec(), 13);
        let result = s.handle(SchedulerEvent::Request(request));
        assert!(matches!(result, Err(StaError::NoChannels)));
        assert!(matches!(s.state(), SchedulerState::Monitoring));
    }

    #[test]
    fn test_early_stop_first_result() {
        let mut s = started_scheduler();
        let mut request = ScanRequest::manual();
        request.early_stop = EarlyStop::FirstResult;
        s.handle(SchedulerEvent::Request(request)).unwrap();

        let effects = s
            .handle(SchedulerEvent::Indication(indication(
                [1; 6], b"net", 6, -50,
            )))
            .unwrap();
        assert!(effects.contains(&Effect::CancelScan));

        // The suppressed completion reports success to the requester.
        let effects = s
            .handle(SchedulerEvent::ScanComplete(ResultCode::Cancelled))
            .unwrap();
        assert!(effects.contains(&Effect::ScanDone {
            reason: ScanReason::Manual,
            result: ResultCode::Success,
        }));
    }

    #[test]
    fn test_roam_early_stop_needs_satisfactory_candidate() {
        let mut s = started_scheduler();
        s.handle(SchedulerEvent::LinkStateChanged {
            connected: Some(([9; 6], b"work".to_vec())),
        })
        .unwrap();
        s.handle(SchedulerEvent::Request(ScanRequest::roam(None)))
            .unwrap();

        // Wrong SSID: no stop.
        let effects = s
            .handle(SchedulerEvent::Indication(indication(
                [1; 6], b"other", 6, -40,
            )))
            .unwrap();
        assert!(!effects.contains(&Effect::CancelScan));

        // Right SSID but too weak: no stop.
        let effects = s
            .handle(SchedulerEvent::Indication(indication(
                [2; 6], b"work", 6, -80,
            )))
            .unwrap();
        assert!(!effects.contains(&Effect::CancelScan));

        // Satisfactory candidate stops the scan.
        let effects = s
            .handle(SchedulerEvent::Indication(indication(
                [3; 6], b"work", 6, -55,
            )))
            .unwrap();
        assert!(effects.contains(&Effect::CancelScan));
    }

    #[test]
    fn test_cancel_suppresses_stale_deferred_requests() {
        let mut s = started_scheduler();
        s.handle(SchedulerEvent::Request(ScanRequest::manual()))
            .unwrap();
        // Queued behind the in-flight scan, then cancelled.
        s.handle(SchedulerEvent::Request(ScanRequest::manual()))
            .unwrap();
        let effects = s.handle(SchedulerEvent::Cancel).unwrap();
        assert!(effects.contains(&Effect::CancelScan));

        let effects = s
            .handle(SchedulerEvent::ScanComplete(ResultCode::Cancelled))
            .unwrap();
        assert!(effects.contains(&Effect::ScanDone {
            reason: ScanReason::Manual,
            result: ResultCode::Cancelled,
        }));
        // The stale queued request was dropped, nothing new issued.
        assert!(matches!(s.state(), SchedulerState::Monitoring));
        assert!(!effects.iter().any(|e| matches!(e, Effect::IssueScan(_))));
    }

    #[test]
    fn test_pause_refcounting() {
        let mut s = started_scheduler();
        assert!(s.autonomous_installed);

        let effects = s.handle(SchedulerEvent::Pause).unwrap();
        assert!(effects.contains(&Effect::DeleteAutonomousScan(AUTONOMOUS_SCAN_ID)));
        // Nested pause has no further effect.
        assert!(s.handle(SchedulerEvent::Pause).unwrap().is_empty());
        assert_eq!(s.pause_depth(), 2);

        assert!(s.handle(SchedulerEvent::Unpause).unwrap().is_empty());
        let effects = s.handle(SchedulerEvent::Unpause).unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::AddAutonomousScan(_))));
        assert_eq!(s.pause_depth(), 0);
    }

    #[test]
    fn test_usability_change_reinstalls_autonomous() {
        let mut s = started_scheduler();
        let effects = s
            .handle(SchedulerEvent::UsabilityChanged(LinkUsability::Unusable))
            .unwrap();
        assert!(effects.contains(&Effect::DeleteAutonomousScan(AUTONOMOUS_SCAN_ID)));
        let spec = effects
            .iter()
            .find_map(|e| match e {
                Effect::AddAutonomousScan(spec) => Some(spec),
                _ => None,
            })
            .unwrap();
        let unusable_interval = s.config.scan.timing.unusable.autonomous_interval_tu;
        assert_eq!(spec.interval_tu, unusable_interval);
        assert!(effects.contains(&Effect::ArmTimer(TimerKind::UnusableFallback)));

        // The fallback timer relaxes the profile to poor.
        let effects = s
            .handle(SchedulerEvent::TimerFired(TimerKind::UnusableFallback))
            .unwrap();
        let spec = effects
            .iter()
            .find_map(|e| match e {
                Effect::AddAutonomousScan(spec) => Some(spec),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            spec.interval_tu,
            s.config.scan.timing.poor.autonomous_interval_tu
        );
    }

    #[test]
    fn test_usability_tightens_cache_validity() {
        let mut s = started_scheduler();
        assert_eq!(
            s.cache().policy().entry_validity_secs,
            s.config.scan.timing.good.validity_secs
        );

        s.handle(SchedulerEvent::UsabilityChanged(LinkUsability::Unusable))
            .unwrap();
        assert_eq!(
            s.cache().policy().entry_validity_secs,
            s.config.scan.timing.unusable.validity_secs
        );
    }

    #[test]
    fn test_install_transfers_station_records_to_firmware() {
        let mut s = started_scheduler();
        s.handle(SchedulerEvent::Pause).unwrap();
        s.handle(SchedulerEvent::Indication(indication([8; 6], b"net", 6, -50)))
            .unwrap();
        assert_eq!(
            s.cache().get(&[8; 6]).unwrap().ownership,
            Ownership::Station
        );

        // Reinstalling the autonomous scan hands the record to firmware.
        let effects = s.handle(SchedulerEvent::Unpause).unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::AddAutonomousScan(_))));
        assert_eq!(
            s.cache().get(&[8; 6]).unwrap().ownership,
            Ownership::Firmware
        );

        // Firmware can now retire the record it holds.
        let deletion = AutonomousScanIndication {
            scan: ScanIndication {
                beacon_period: 0,
                ..indication([8; 6], b"net", 6, -50)
            },
            autonomous_scan_id: AUTONOMOUS_SCAN_ID,
        };
        let effects = s
            .handle(SchedulerEvent::AutonomousIndication(deletion))
            .unwrap();
        assert!(effects.contains(&Effect::CacheChanged(CacheEvent::Deleted([8; 6]))));
        assert!(s.cache().get(&[8; 6]).is_none());
    }

    #[test]
    fn test_roaming_scan_follows_observed_channels() {
        let mut s = started_scheduler();
        s.handle(SchedulerEvent::LinkStateChanged {
            connected: Some(([9; 6], b"work".to_vec())),
        })
        .unwrap();
        s.handle(SchedulerEvent::Indication(indication([1; 6], b"work", 11, -50)))
            .unwrap();
        s.handle(SchedulerEvent::Indication(indication([2; 6], b"work", 1, -60)))
            .unwrap();

        let effects = s
            .handle(SchedulerEvent::UsabilityChanged(LinkUsability::Poor))
            .unwrap();
        let roam_spec = effects
            .iter()
            .find_map(|e| match e {
                Effect::AddAutonomousScan(spec) if spec.id == ROAMING_SCAN_ID => Some(spec),
                _ => None,
            })
            .unwrap();
        assert_eq!(roam_spec.channels, vec![1, 11]);
        assert_eq!(&roam_spec.ie_bytes[..2], &[0, 4]);
    }

    #[test]
    fn test_country_ie_in_indication_updates_regulatory() {
        let mut s = started_scheduler();
        // Beacon carrying a Japan Country IE granting channels 1-13.
        let mut ies = vec![0u8, 3, b'n', b'e', b't'];
        ies.extend_from_slice(&[crate::COUNTRY_IE_ID, 6, b'J', b'P', b' ', 1, 13, 20]);
        let ind = ScanIndication {
            ies: Bytes::from(ies),
            ..indication([1; 6], b"net", 6, -50)
        };

        let effects = s.handle(SchedulerEvent::Indication(ind)).unwrap();
        // Channel 12 was passive under FCC, now active: reinstall.
        assert!(s.engine().channels().get(12).unwrap().is_active());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::AddAutonomousScan(_))));
    }

    #[test]
    fn test_autonomous_deletion_indication() {
        let mut s = started_scheduler();
        let ind = indication([5; 6], b"net", 6, -50);
        s.handle(SchedulerEvent::AutonomousIndication(
            AutonomousScanIndication {
                scan: ind,
                autonomous_scan_id: AUTONOMOUS_SCAN_ID,
            },
        ))
        .unwrap();
        assert!(s.cache().get(&[5; 6]).is_some());

        let deletion = AutonomousScanIndication {
            scan: ScanIndication {
                beacon_period: 0,
                ..indication([5; 6], b"net", 6, -50)
            },
            autonomous_scan_id: AUTONOMOUS_SCAN_ID,
        };
        let effects = s
            .handle(SchedulerEvent::AutonomousIndication(deletion))
            .unwrap();
        assert!(effects.contains(&Effect::CacheChanged(CacheEvent::Deleted([5; 6]))));
        assert!(s.cache().get(&[5; 6]).is_none());
    }

    #[test]
    fn test_cloaked_sighting_queues_directed_probe() {
        let mut s = started_scheduler();
        s.config.scan.cloaked_candidates = vec!["guest".to_string()];

        let cloaked = indication([7; 6], b"", 6, -50);
        s.handle(SchedulerEvent::Indication(cloaked)).unwrap();
        assert_eq!(s.deferred.len(), 1);
        assert_eq!(s.deferred[0].reason, ScanReason::CloakedProbe);

        // Recurrence does not queue a second probe.
        let cloaked = indication([7; 6], b"", 6, -50);
        s.handle(SchedulerEvent::Indication(cloaked)).unwrap();
        assert_eq!(s.deferred.len(), 1);
    }

    #[test]
    fn test_stop_tears_everything_down() {
        let mut s = started_scheduler();
        s.handle(SchedulerEvent::Request(ScanRequest::manual()))
            .unwrap();
        let effects = s.handle(SchedulerEvent::Stop).unwrap();

        assert!(effects.contains(&Effect::CancelScan));
        assert!(effects.contains(&Effect::DeleteAutonomousScan(AUTONOMOUS_SCAN_ID)));
        assert!(effects.contains(&Effect::CancelTimer(TimerKind::ChannelExpiry)));
        assert!(matches!(s.state(), SchedulerState::Stopped));
    }

    #[test]
    fn test_request_while_stopped_is_refused() {
        let mut s = scheduler();
        let effects = s
            .handle(SchedulerEvent::Request(ScanRequest::manual()))
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::ScanDone {
                reason: ScanReason::Manual,
                result: ResultCode::Refused,
            }]
        );
    }

    #[test]
    fn test_channel_expiry_timer_rearms() {
        let mut s = started_scheduler();
        let effects = s
            .handle(SchedulerEvent::TimerFired(TimerKind::ChannelExpiry))
            .unwrap();
        assert!(effects.contains(&Effect::ArmTimer(TimerKind::ChannelExpiry)));
    }
}

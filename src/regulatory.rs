//! Regulatory-compliance engine
//!
//! This module owns the per-channel legality/power state for the 2.4 GHz
//! band, the default and current geographical locations, and the logic
//! that folds received Country IEs into that state: classification,
//! sub-band triplet application with power hysteresis, channel-grant
//! expiry, and canonical Country IE generation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::{ChannelTable, PowerRegime, ScanMode};
use crate::country_ie::{self, CountryIe};
use crate::regdomain::{lookup_country, CountryLookup, RegDomain, TrustLevel};
use crate::{Result, CHANNEL_GRANT_VALIDITY_SECS, INVALID_POWER_DBM};

/// A geographical location: country string plus governing domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographicalLocation {
    /// Whether this location holds usable data
    pub valid: bool,
    /// 3-character country string (2-letter code + environment marker)
    pub country: String,
    /// Governing regulatory domain
    pub domain: RegDomain,
    /// Power regime the domain's limits are expressed in
    pub regime: PowerRegime,
    /// 802.11h regulatory class, when advertised
    pub regulatory_class: Option<u8>,
    /// 802.11h coverage class, when advertised
    pub coverage_class: Option<u8>,
}

impl GeographicalLocation {
    /// Create a valid location for a country/domain pair.
    pub fn new(country: &str, domain: RegDomain) -> Self {
        let mut padded = country.to_string();
        while padded.len() < 3 {
            padded.push(' ');
        }
        Self {
            valid: true,
            country: padded,
            domain,
            regime: domain.profile().regime,
            regulatory_class: None,
            coverage_class: None,
        }
    }

    /// Create an invalid ("unknown") location.
    pub fn unknown() -> Self {
        Self {
            valid: false,
            country: "   ".to_string(),
            domain: RegDomain::Fcc,
            regime: PowerRegime::Unknown,
            regulatory_class: None,
            coverage_class: None,
        }
    }

    /// The two-letter country code portion.
    pub fn country_code(&self) -> &str {
        self.country.get(..2).unwrap_or(&self.country)
    }
}

/// Outcome of classifying a received Country IE against current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// Country and domain match current state; only refresh timers/power
    NoUpdate,
    /// Same domain under a different country string; update the string only
    CountryOnly,
    /// New or changed location; update everything
    UpdateAll,
    /// Element carries nothing usable; leave state untouched
    Ignore,
    /// Element was malformed
    Error,
}

/// Configuration slice consumed by the regulatory engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryConfig {
    /// Default country string from configuration
    pub default_country: String,
    /// Default regulatory domain
    pub default_domain: RegDomain,
    /// Trust level for received regulatory information
    pub trust: TrustLevel,
    /// Power adjustment applied to EIRP figures, dB
    pub eirp_adjust_db: i8,
    /// Power adjustment applied to TPO figures, dB
    pub tpo_adjust_db: i8,
}

impl Default for RegulatoryConfig {
    fn default() -> Self {
        Self {
            default_country: "US ".to_string(),
            default_domain: RegDomain::Fcc,
            trust: TrustLevel::Bss,
            eirp_adjust_db: 6,
            tpo_adjust_db: 0,
        }
    }
}

/// Regulatory-compliance engine
#[derive(Debug, Clone)]
pub struct RegulatoryEngine {
    config: RegulatoryConfig,
    /// Fixed EIRP-to-TPO offset, derived once from the two configured
    /// power adjustments
    antenna_gain_db: i8,
    channels: ChannelTable,
    default_location: GeographicalLocation,
    current_location: GeographicalLocation,
}

impl RegulatoryEngine {
    /// Create an engine and seed the channel table from the default
    /// domain under the configured trust level.
    pub fn new(config: RegulatoryConfig) -> Self {
        let antenna_gain_db = config.eirp_adjust_db - config.tpo_adjust_db;
        let default_location =
            GeographicalLocation::new(&config.default_country, config.default_domain);
        let mut engine = Self {
            config,
            antenna_gain_db,
            channels: ChannelTable::new(),
            default_location,
            current_location: GeographicalLocation::unknown(),
        };
        engine.init();
        engine
    }

    /// Seed every channel from the default domain's legality and power
    /// tables. Legal channels start active with the default power; illegal
    /// channels are passive, or disabled outright when trust is disabled.
    pub fn init(&mut self) {
        let profile = self.config.default_domain.profile();
        let trust = self.config.trust;
        for state in self.channels.iter_mut() {
            let channel = state.channel;
            if profile.is_legal(channel) {
                state.mode = ScanMode::Active;
                state.regime = profile.regime;
                state.power_dbm = profile.power_for(channel);
                state.active_expiry_enabled = false;
                state.power_deadline = DateTime::<Utc>::MAX_UTC;
                state.power_stale = false;
            } else {
                match trust.illegal_channel_mode() {
                    ScanMode::None => state.disable(),
                    _ => state.revert_to_passive(INVALID_POWER_DBM, PowerRegime::Unknown),
                }
            }
        }
        self.current_location = GeographicalLocation::unknown();
        log::info!(
            "Regulatory engine seeded: domain {} trust {:?}, {} active channels",
            profile.domain.name(),
            trust,
            self.channels.active_count()
        );
    }

    /// The channel table, read-only.
    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    /// The current (beacon-derived) location.
    pub fn current_location(&self) -> &GeographicalLocation {
        &self.current_location
    }

    /// The default (configured) location.
    pub fn default_location(&self) -> &GeographicalLocation {
        &self.default_location
    }

    /// Whether regulatory updates from received IEs are honored.
    pub fn updates_enabled(&self) -> bool {
        self.config.trust.accepts_updates()
    }

    /// Convert an EIRP figure to TPO.
    pub fn eirp_to_tpo(&self, eirp_dbm: i8) -> i8 {
        eirp_dbm.saturating_sub(self.antenna_gain_db)
    }

    /// Convert a TPO figure to EIRP.
    pub fn tpo_to_eirp(&self, tpo_dbm: i8) -> i8 {
        tpo_dbm.saturating_add(self.antenna_gain_db)
    }

    /// Decode and fold a raw Country IE element into the channel state.
    ///
    /// Returns true when the channel configuration changed in a way that
    /// requires autonomous scans to be reinstalled. Malformed elements are
    /// logged and ignored; the beacon is otherwise unaffected.
    pub fn handle_country_element(
        &mut self,
        element: &[u8],
        rx_channel: Option<u8>,
        now: DateTime<Utc>,
    ) -> bool {
        let ie = match country_ie::decode(element) {
            Ok(ie) => ie,
            Err(e) => {
                log::debug!("Ignoring malformed country IE: {}", e);
                return false;
            }
        };
        let (_, changed) = self.apply(&ie, rx_channel, now);
        changed
    }

    /// Classify a decoded Country IE against the current location.
    pub fn classify(&self, ie: &CountryIe, rx_channel: Option<u8>) -> Classification {
        if !self.updates_enabled() {
            return Classification::Ignore;
        }

        let domain = match lookup_country(ie.country_code()) {
            CountryLookup::Null => return Classification::Ignore,
            CountryLookup::NonCountry => {
                return if self.current_location.valid {
                    Classification::Ignore
                } else {
                    Classification::CountryOnly
                };
            }
            CountryLookup::NotFound => RegDomain::Etsi,
            CountryLookup::Found(d) => self.disambiguate_japan(d, rx_channel),
        };

        if !self.current_location.valid {
            return Classification::UpdateAll;
        }
        let same_country = self.current_location.country_code() == ie.country_code();
        let same_domain = self.current_location.domain == domain;
        match (same_country, same_domain) {
            (true, true) => Classification::NoUpdate,
            (false, true) => Classification::CountryOnly,
            // Covers both country and domain changes, including the
            // Japan/JapanBis flip under the shared "JP" code.
            (_, false) => Classification::UpdateAll,
        }
    }

    /// Japan and JapanBis share the "JP" country code; the receive channel
    /// separates them (channel 14 is only legal in the Japan domain).
    fn disambiguate_japan(&self, domain: RegDomain, rx_channel: Option<u8>) -> RegDomain {
        if domain != RegDomain::Japan && domain != RegDomain::JapanBis {
            return domain;
        }
        match rx_channel {
            Some(14) => RegDomain::Japan,
            Some(1..=13) => RegDomain::JapanBis,
            _ => {
                // No receive channel: infer from whether channel 14 is
                // already active.
                match self.channels.get(14) {
                    Some(state) if state.is_active() => RegDomain::Japan,
                    _ => RegDomain::JapanBis,
                }
            }
        }
    }

    /// Apply a decoded Country IE. Returns the classification and whether
    /// the channel configuration changed.
    pub fn apply(
        &mut self,
        ie: &CountryIe,
        rx_channel: Option<u8>,
        now: DateTime<Utc>,
    ) -> (Classification, bool) {
        let classification = self.classify(ie, rx_channel);
        let changed = match classification {
            Classification::Ignore | Classification::Error => false,
            Classification::CountryOnly => {
                self.current_location.country = ie.country.clone();
                self.current_location.valid = true;
                self.apply_sub_bands(ie, now)
            }
            Classification::NoUpdate => self.apply_sub_bands(ie, now),
            Classification::UpdateAll => {
                let domain = match lookup_country(ie.country_code()) {
                    CountryLookup::Found(d) => self.disambiguate_japan(d, rx_channel),
                    _ => RegDomain::Etsi,
                };
                self.current_location = GeographicalLocation::new(&ie.country, domain);
                if let Some(reg) = ie.regulatory() {
                    self.current_location.regulatory_class = Some(reg.regulatory_class);
                    self.current_location.coverage_class = Some(reg.coverage_class);
                }
                log::info!(
                    "Current location updated: {} ({})",
                    ie.country.trim_end(),
                    domain.name()
                );
                self.apply_sub_bands(ie, now);
                true
            }
        };
        (classification, changed)
    }

    /// Apply the sub-band triplets of an IE to the channel table.
    ///
    /// Active channels only lower their power (or replace a stale value);
    /// passive channels are promoted to active under a 30-minute validity
    /// window. Disabled channels are never promoted.
    fn apply_sub_bands(&mut self, ie: &CountryIe, now: DateTime<Utc>) -> bool {
        let incoming_regime = self.current_location.domain.profile().regime;
        let deadline = now + Duration::seconds(CHANNEL_GRANT_VALIDITY_SECS);
        let gain = self.antenna_gain_db;
        let mut changed = false;

        for sb in ie.sub_bands() {
            let last = sb.first_channel.saturating_add(sb.num_channels - 1);
            for channel in sb.first_channel..=last {
                let Some(state) = self.channels.get_mut(channel) else {
                    continue;
                };
                match state.mode {
                    ScanMode::Active => {
                        let power = convert_power(
                            sb.max_power_dbm,
                            incoming_regime,
                            state.regime,
                            gain,
                        );
                        if power < state.power_dbm
                            || state.power_stale
                            || state.power_dbm == INVALID_POWER_DBM
                        {
                            state.refresh_power(power, state.regime, deadline);
                        } else {
                            // Same or higher power: only refresh staleness.
                            state.power_deadline = deadline;
                        }
                        if state.active_expiry_enabled {
                            state.active_deadline = deadline;
                        }
                    }
                    ScanMode::Passive => {
                        state.grant_active(sb.max_power_dbm, incoming_regime, deadline);
                        changed = true;
                    }
                    ScanMode::None => {}
                }
            }
        }
        changed
    }

    /// Expire lapsed channel grants and stale power values.
    ///
    /// Active channels whose grant deadline passed revert to passive under
    /// the default domain. Channels whose power window alone lapsed are
    /// marked stale but stay active. When afterwards no active channel
    /// remains, or every remaining active channel is legal under the
    /// default domain, the current location is invalidated and legal
    /// channels fall back to the default power regime.
    ///
    /// Returns true when the channel configuration changed.
    pub fn process_expired_channels(&mut self, now: DateTime<Utc>) -> bool {
        let profile = self.config.default_domain.profile();
        let mut changed = false;

        for state in self.channels.iter_mut() {
            if !state.is_active() {
                continue;
            }
            if state.active_expiry_enabled && now >= state.active_deadline {
                let channel = state.channel;
                state.revert_to_passive(profile.power_for(channel), profile.regime);
                log::debug!("Channel {} grant expired, reverting to passive", channel);
                changed = true;
            } else if !state.power_stale && now >= state.power_deadline {
                state.power_stale = true;
            }
        }

        if changed && self.current_location.valid {
            let active = self.channels.active_channels();
            if active.is_empty() || profile.all_legal(&active) {
                log::info!(
                    "Current location evidence expired, falling back to {}",
                    profile.domain.name()
                );
                self.current_location = GeographicalLocation::unknown();
                for state in self.channels.iter_mut() {
                    if profile.is_legal(state.channel) {
                        state.regime = profile.regime;
                    }
                }
            }
        }
        changed
    }

    /// Encode the canonical Country IE for the current active channel set.
    ///
    /// The advertised country string is the governing location's string
    /// when every active channel is legal there, otherwise "XXX" — except
    /// that a Japan/JapanBis flip keeps the "JP" string when the sibling
    /// domain covers the active set.
    pub fn encode_country_ie(&self) -> Result<Vec<u8>> {
        let mut channels = Vec::new();
        for state in self.channels.iter() {
            if state.is_active() {
                channels.push((state.channel, state.power_dbm));
            }
        }

        let location = if self.current_location.valid {
            &self.current_location
        } else {
            &self.default_location
        };
        let active_numbers: Vec<u8> = channels.iter().map(|(c, _)| *c).collect();

        let country = if location.domain.profile().all_legal(&active_numbers) {
            location.country.clone()
        } else if location
            .domain
            .japan_sibling()
            .map(|s| s.profile().all_legal(&active_numbers))
            .unwrap_or(false)
        {
            location.country.clone()
        } else {
            "XXX".to_string()
        };

        country_ie::encode(&country, &channels)
    }
}

/// Convert a power figure between regimes using the fixed antenna gain.
fn convert_power(power: i8, from: PowerRegime, to: PowerRegime, gain_db: i8) -> i8 {
    match (from, to) {
        (PowerRegime::Eirp, PowerRegime::Tpo) => power.saturating_sub(gain_db),
        (PowerRegime::Tpo, PowerRegime::Eirp) => power.saturating_add(gain_db),
        _ => power,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::country_ie::decode;

    fn engine_with(domain: RegDomain, trust: TrustLevel) -> RegulatoryEngine {
        RegulatoryEngine::new(RegulatoryConfig {
            default_country: match domain {
                RegDomain::Fcc => "US ".to_string(),
                RegDomain::Etsi => "GB ".to_string(),
                RegDomain::Japan | RegDomain::JapanBis => "JP ".to_string(),
                _ => "US ".to_string(),
            },
            default_domain: domain,
            trust,
            eirp_adjust_db: 6,
            tpo_adjust_db: 0,
        })
    }

    fn raw_ie(country: &[u8; 3], triplets: &[[u8; 3]]) -> Vec<u8> {
        let mut body = country.to_vec();
        for t in triplets {
            body.extend_from_slice(t);
        }
        if body.len() % 2 != 0 {
            body.push(0);
        }
        let mut out = vec![crate::COUNTRY_IE_ID, body.len() as u8];
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn test_init_seeds_default_domain() {
        let engine = engine_with(RegDomain::Fcc, TrustLevel::Bss);
        assert_eq!(engine.channels().active_channels(), (1..=11).collect::<Vec<u8>>());
        assert_eq!(engine.channels().passive_channels(), vec![12, 13, 14]);
        assert!(!engine.current_location().valid);
    }

    #[test]
    fn test_init_disabled_trust_disables_illegal() {
        let engine = engine_with(RegDomain::Fcc, TrustLevel::Disabled);
        assert_eq!(engine.channels().passive_channels(), Vec::<u8>::new());
        assert_eq!(engine.channels().get(14).unwrap().mode, ScanMode::None);
    }

    #[test]
    fn test_non_ascii_country_element_ignored() {
        let mut engine = engine_with(RegDomain::Fcc, TrustLevel::Bss);
        let before = engine.channels().active_channels();

        // Country string "A\xE9 " is not ASCII; the element is dropped
        // without touching channel state.
        let element = [crate::COUNTRY_IE_ID, 6, 0x41, 0xE9, 0x20, 1, 11, 36];
        let changed = engine.handle_country_element(&element, Some(6), Utc::now());
        assert!(!changed);
        assert!(!engine.current_location().valid);
        assert_eq!(engine.channels().active_channels(), before);
    }

    // Scenario A: "US ", (1,11,36) => channels 1-11 active at 36 dBm
    // EIRP, domain FCC; channels 12-14 stay at their prior mode.
    #[test]
    fn test_scenario_a_us_sub_band() {
        // Japan default: channel 14 active, 1-13 passive.
        let mut engine = engine_with(RegDomain::Japan, TrustLevel::Bss);
        let now = Utc::now();
        let ie = decode(&raw_ie(b"US ", &[[1, 11, 36]])).unwrap();

        let (class, changed) = engine.apply(&ie, Some(6), now);
        assert_eq!(class, Classification::UpdateAll);
        assert!(changed);
        assert_eq!(engine.current_location().domain, RegDomain::Fcc);

        for ch in 1..=11u8 {
            let state = engine.channels().get(ch).unwrap();
            assert!(state.is_active(), "channel {} should be active", ch);
            assert_eq!(state.power_dbm, 36);
            assert_eq!(state.regime, PowerRegime::Eirp);
        }
        // 12 and 13 stay passive; 14 stays at its prior (active) mode.
        assert_eq!(engine.channels().get(12).unwrap().mode, ScanMode::Passive);
        assert_eq!(engine.channels().get(13).unwrap().mode, ScanMode::Passive);
        assert!(engine.channels().get(14).unwrap().is_active());
    }

    #[test]
    fn test_passive_promotion_and_power() {
        let mut engine = engine_with(RegDomain::Fcc, TrustLevel::Bss);
        let now = Utc::now();
        // FCC default: 12-14 passive. ETSI-coded IE grants 12 and 13.
        let ie = decode(&raw_ie(b"GB ", &[[12, 2, 20]])).unwrap();
        let (class, changed) = engine.apply(&ie, Some(1), now);

        assert_eq!(class, Classification::UpdateAll);
        assert!(changed);
        let state = engine.channels().get(12).unwrap();
        assert!(state.is_active());
        assert!(state.active_expiry_enabled);
        assert_eq!(state.power_dbm, 20);
        assert_eq!(state.regime, PowerRegime::Eirp);
    }

    #[test]
    fn test_power_hysteresis_lower_wins() {
        let mut engine = engine_with(RegDomain::Etsi, TrustLevel::Bss);
        let now = Utc::now();
        // ETSI seeded channel 1 at 20 EIRP. Same-domain IE at 17 lowers it.
        let ie = decode(&raw_ie(b"GB ", &[[1, 1, 17]])).unwrap();
        engine.apply(&ie, Some(1), now);
        assert_eq!(engine.channels().get(1).unwrap().power_dbm, 17);

        // A higher figure does not raise it back.
        let ie = decode(&raw_ie(b"GB ", &[[1, 1, 30]])).unwrap();
        engine.apply(&ie, Some(1), now);
        assert_eq!(engine.channels().get(1).unwrap().power_dbm, 17);
    }

    #[test]
    fn test_classification_lattice() {
        let mut engine = engine_with(RegDomain::Etsi, TrustLevel::Bss);
        let now = Utc::now();
        let gb = decode(&raw_ie(b"GB ", &[[1, 13, 20]])).unwrap();

        assert_eq!(engine.classify(&gb, Some(1)), Classification::UpdateAll);
        engine.apply(&gb, Some(1), now);

        assert_eq!(engine.classify(&gb, Some(1)), Classification::NoUpdate);

        // Different country, same ETSI domain.
        let de = decode(&raw_ie(b"DE ", &[[1, 13, 20]])).unwrap();
        assert_eq!(engine.classify(&de, Some(1)), Classification::CountryOnly);

        // Different domain.
        let us = decode(&raw_ie(b"US ", &[[1, 11, 30]])).unwrap();
        assert_eq!(engine.classify(&us, Some(1)), Classification::UpdateAll);

        // Null and non-country markers.
        let null = decode(&raw_ie(b"00 ", &[[1, 11, 30]])).unwrap();
        assert_eq!(engine.classify(&null, Some(1)), Classification::Ignore);
        let xx = decode(&raw_ie(b"XX ", &[[1, 11, 30]])).unwrap();
        assert_eq!(engine.classify(&xx, Some(1)), Classification::Ignore);
    }

    #[test]
    fn test_unknown_country_treated_as_etsi() {
        let mut engine = engine_with(RegDomain::Fcc, TrustLevel::Bss);
        let ie = decode(&raw_ie(b"ZZ ", &[[1, 13, 20]])).unwrap();
        engine.apply(&ie, Some(1), Utc::now());
        assert_eq!(engine.current_location().domain, RegDomain::Etsi);
    }

    #[test]
    fn test_japan_disambiguation() {
        let engine = engine_with(RegDomain::Etsi, TrustLevel::Bss);
        let jp = decode(&raw_ie(b"JP ", &[[14, 1, 20]])).unwrap();

        assert_eq!(engine.classify(&jp, Some(14)), Classification::UpdateAll);
        let mut e = engine.clone();
        e.apply(&jp, Some(14), Utc::now());
        assert_eq!(e.current_location().domain, RegDomain::Japan);

        let mut e = engine.clone();
        let jp13 = decode(&raw_ie(b"JP ", &[[1, 13, 20]])).unwrap();
        e.apply(&jp13, Some(3), Utc::now());
        assert_eq!(e.current_location().domain, RegDomain::JapanBis);
    }

    #[test]
    fn test_japan_inference_without_rx_channel() {
        let mut engine = engine_with(RegDomain::Etsi, TrustLevel::Bss);
        // Channel 14 not active => JapanBis.
        let jp = decode(&raw_ie(b"JP ", &[[1, 13, 20]])).unwrap();
        engine.apply(&jp, None, Utc::now());
        assert_eq!(engine.current_location().domain, RegDomain::JapanBis);
    }

    #[test]
    fn test_trust_disabled_ignores_updates() {
        let mut engine = engine_with(RegDomain::Fcc, TrustLevel::Disabled);
        let ie = decode(&raw_ie(b"GB ", &[[12, 2, 20]])).unwrap();
        let (class, changed) = engine.apply(&ie, Some(1), Utc::now());
        assert_eq!(class, Classification::Ignore);
        assert!(!changed);
    }

    #[test]
    fn test_malformed_element_is_ignored() {
        let mut engine = engine_with(RegDomain::Fcc, TrustLevel::Bss);
        let changed = engine.handle_country_element(&[7, 3, b'U', b'S', b' '], Some(1), Utc::now());
        assert!(!changed);
        assert!(!engine.current_location().valid);
    }

    // Scenario D: all granted channels expire with none remaining active
    // beyond the default-legal set => current location invalidated and
    // legal channels back on the default regime.
    #[test]
    fn test_scenario_d_expiry_invalidates_location() {
        let mut engine = engine_with(RegDomain::Fcc, TrustLevel::Bss);
        let now = Utc::now();
        let ie = decode(&raw_ie(b"GB ", &[[12, 2, 20]])).unwrap();
        engine.apply(&ie, Some(1), now);
        assert!(engine.current_location().valid);
        assert!(engine.channels().get(12).unwrap().is_active());

        let later = now + Duration::seconds(CHANNEL_GRANT_VALIDITY_SECS + 1);
        let changed = engine.process_expired_channels(later);

        assert!(changed);
        assert!(!engine.current_location().valid);
        assert_eq!(engine.channels().get(12).unwrap().mode, ScanMode::Passive);
        // Remaining active channels are the FCC-legal ones on the FCC
        // regime.
        for ch in 1..=11u8 {
            let state = engine.channels().get(ch).unwrap();
            assert!(state.is_active());
            assert_eq!(state.regime, PowerRegime::Eirp);
        }
    }

    #[test]
    fn test_power_stale_keeps_channel_active() {
        let mut engine = engine_with(RegDomain::Etsi, TrustLevel::Bss);
        let now = Utc::now();
        let ie = decode(&raw_ie(b"GB ", &[[1, 1, 17]])).unwrap();
        engine.apply(&ie, Some(1), now);

        // Channel 1 was default-seeded: no active expiry, but its power
        // window was armed by the refresh.
        let later = now + Duration::seconds(CHANNEL_GRANT_VALIDITY_SECS + 1);
        engine.process_expired_channels(later);
        let state = engine.channels().get(1).unwrap();
        assert!(state.is_active());
        assert!(state.power_stale);
    }

    #[test]
    fn test_encode_uses_current_country() {
        let mut engine = engine_with(RegDomain::Etsi, TrustLevel::Bss);
        let ie = decode(&raw_ie(b"GB ", &[[1, 13, 20]])).unwrap();
        engine.apply(&ie, Some(1), Utc::now());

        let raw = engine.encode_country_ie().unwrap();
        assert_eq!(&raw[2..5], b"GB ");
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded.sub_bands().count() >= 1, true);
    }

    #[test]
    fn test_encode_xxx_when_not_all_legal() {
        let mut engine = engine_with(RegDomain::Fcc, TrustLevel::Bss);
        // Grant 12-13 from an ETSI IE but keep the current location US by
        // applying a US IE afterwards (12-13 stay active meanwhile).
        let gb = decode(&raw_ie(b"GB ", &[[12, 2, 20]])).unwrap();
        engine.apply(&gb, Some(1), Utc::now());
        let us = decode(&raw_ie(b"US ", &[[1, 11, 27]])).unwrap();
        engine.apply(&us, Some(1), Utc::now());
        assert_eq!(engine.current_location().country_code(), "US");

        // Active set now includes 12-13, illegal under FCC.
        let raw = engine.encode_country_ie().unwrap();
        assert_eq!(&raw[2..5], b"XXX");
    }

    #[test]
    fn test_encode_japan_sibling_exception() {
        let mut engine = engine_with(RegDomain::Fcc, TrustLevel::Bss);
        let t0 = Utc::now();
        // Channel 14 grant puts the current location in the Japan domain.
        let jp14 = decode(&raw_ie(b"JP ", &[[14, 1, 20]])).unwrap();
        engine.apply(&jp14, Some(14), t0);
        assert_eq!(engine.current_location().domain, RegDomain::Japan);

        // A later beacon grants 12-13 with a fresher deadline.
        let t1 = t0 + Duration::minutes(10);
        let jp12 = decode(&raw_ie(b"JP ", &[[12, 2, 20]])).unwrap();
        engine.apply(&jp12, Some(14), t1);

        // Only the channel 14 grant lapses: active set becomes 1-13,
        // covered by the JapanBis sibling, so the JP string survives.
        let later = t0 + Duration::seconds(CHANNEL_GRANT_VALIDITY_SECS + 1);
        engine.process_expired_channels(later);
        assert!(engine.current_location().valid);
        assert!(!engine.channels().get(14).unwrap().is_active());

        let raw = engine.encode_country_ie().unwrap();
        assert_eq!(&raw[2..5], b"JP ");
    }

    #[test]
    fn test_power_conversion() {
        let engine = engine_with(RegDomain::Fcc, TrustLevel::Bss);
        assert_eq!(engine.eirp_to_tpo(20), 14);
        assert_eq!(engine.tpo_to_eirp(14), 20);
        assert_eq!(convert_power(20, PowerRegime::Eirp, PowerRegime::Eirp, 6), 20);
    }
}

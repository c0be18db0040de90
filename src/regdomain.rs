//! Regulatory domain profiles
//!
//! This module contains the compiled-in regulatory domain data: per-domain
//! channel legality and default power tables, the country-code lookup
//! table, and the trust-level policy applied at initialization.

use serde::{Deserialize, Serialize};

use crate::channel::{PowerRegime, ScanMode};
use crate::NUM_24GHZ_CHANNELS;

/// Known regulatory domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RegDomain {
    /// United States (FCC)
    Fcc = 0,
    /// Canada (Industry Canada)
    Ic = 1,
    /// Europe (ETSI)
    Etsi = 2,
    /// Spain legacy allocation
    Spain = 3,
    /// France legacy allocation
    France = 4,
    /// Japan, channel 14 (802.11b)
    Japan = 5,
    /// Japan, channels 1-13
    JapanBis = 6,
}

impl RegDomain {
    /// Parse a domain id, falling back to FCC for unknown values.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => RegDomain::Fcc,
            1 => RegDomain::Ic,
            2 => RegDomain::Etsi,
            3 => RegDomain::Spain,
            4 => RegDomain::France,
            5 => RegDomain::Japan,
            6 => RegDomain::JapanBis,
            other => {
                log::warn!("Unknown regulatory domain id {}, falling back to FCC", other);
                RegDomain::Fcc
            }
        }
    }

    /// Get domain name
    pub fn name(&self) -> &'static str {
        match self {
            RegDomain::Fcc => "FCC",
            RegDomain::Ic => "IC",
            RegDomain::Etsi => "ETSI",
            RegDomain::Spain => "Spain",
            RegDomain::France => "France",
            RegDomain::Japan => "Japan",
            RegDomain::JapanBis => "JapanBis",
        }
    }

    /// The profile for this domain.
    pub fn profile(&self) -> &'static RegDomainProfile {
        &DOMAIN_PROFILES[*self as usize]
    }

    /// The sibling Japan domain, for the shared "JP" country code.
    pub fn japan_sibling(&self) -> Option<RegDomain> {
        match self {
            RegDomain::Japan => Some(RegDomain::JapanBis),
            RegDomain::JapanBis => Some(RegDomain::Japan),
            _ => None,
        }
    }
}

/// Static, immutable per-domain data
#[derive(Debug, Clone)]
pub struct RegDomainProfile {
    /// Domain this profile describes
    pub domain: RegDomain,
    /// Power regime the power table is expressed in
    pub regime: PowerRegime,
    /// Channel legality bitmask, bit 0 = channel 1
    pub legal_mask: u16,
    /// Default maximum power per channel, dBm
    pub default_power: [i8; NUM_24GHZ_CHANNELS],
}

impl RegDomainProfile {
    /// Check whether a channel is legal in this domain.
    pub fn is_legal(&self, channel: u8) -> bool {
        if !(1..=NUM_24GHZ_CHANNELS as u8).contains(&channel) {
            return false;
        }
        self.legal_mask & (1 << (channel - 1)) != 0
    }

    /// Default power for a channel, dBm.
    pub fn power_for(&self, channel: u8) -> i8 {
        if (1..=NUM_24GHZ_CHANNELS as u8).contains(&channel) {
            self.default_power[channel as usize - 1]
        } else {
            crate::INVALID_POWER_DBM
        }
    }

    /// Check whether every channel in the list is legal here.
    pub fn all_legal(&self, channels: &[u8]) -> bool {
        channels.iter().all(|&c| self.is_legal(c))
    }
}

/// Compiled-in domain profiles, indexed by `RegDomain as usize`.
pub static DOMAIN_PROFILES: [RegDomainProfile; 7] = [
    RegDomainProfile {
        domain: RegDomain::Fcc,
        regime: PowerRegime::Eirp,
        legal_mask: 0x07ff, // 1-11
        default_power: [36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, -128, -128, -128],
    },
    RegDomainProfile {
        domain: RegDomain::Ic,
        regime: PowerRegime::Eirp,
        legal_mask: 0x07ff, // 1-11
        default_power: [36, 36, 36, 36, 36, 36, 36, 36, 36, 36, 36, -128, -128, -128],
    },
    RegDomainProfile {
        domain: RegDomain::Etsi,
        regime: PowerRegime::Eirp,
        legal_mask: 0x1fff, // 1-13
        default_power: [20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, -128],
    },
    RegDomainProfile {
        domain: RegDomain::Spain,
        regime: PowerRegime::Eirp,
        legal_mask: 0x0600, // 10-11
        default_power: [-128, -128, -128, -128, -128, -128, -128, -128, -128, 20, 20, -128, -128, -128],
    },
    RegDomainProfile {
        domain: RegDomain::France,
        regime: PowerRegime::Eirp,
        legal_mask: 0x1e00, // 10-13
        default_power: [-128, -128, -128, -128, -128, -128, -128, -128, -128, 20, 20, 20, 20, -128],
    },
    RegDomainProfile {
        domain: RegDomain::Japan,
        regime: PowerRegime::Tpo,
        legal_mask: 0x2000, // 14 only
        default_power: [-128, -128, -128, -128, -128, -128, -128, -128, -128, -128, -128, -128, -128, 20],
    },
    RegDomainProfile {
        domain: RegDomain::JapanBis,
        regime: PowerRegime::Tpo,
        legal_mask: 0x1fff, // 1-13
        default_power: [20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, -128],
    },
];

/// Outcome of a country-code lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountryLookup {
    /// Country is in the table
    Found(RegDomain),
    /// Country code is syntactically valid but unknown; treated as ETSI
    NotFound,
    /// The "XX" non-country marker
    NonCountry,
    /// The "00" null marker; the element carries no usable country
    Null,
}

/// Static country-code to domain table. Codes are upper-case two-letter
/// ISO 3166 identifiers; the third IE byte (indoor/outdoor marker) is not
/// part of the key.
static COUNTRY_TABLE: &[(&str, RegDomain)] = &[
    ("AT", RegDomain::Etsi),
    ("AU", RegDomain::Etsi),
    ("BE", RegDomain::Etsi),
    ("BR", RegDomain::Etsi),
    ("CA", RegDomain::Ic),
    ("CH", RegDomain::Etsi),
    ("CN", RegDomain::Etsi),
    ("DE", RegDomain::Etsi),
    ("DK", RegDomain::Etsi),
    ("ES", RegDomain::Spain),
    ("FI", RegDomain::Etsi),
    ("FR", RegDomain::France),
    ("GB", RegDomain::Etsi),
    ("GR", RegDomain::Etsi),
    ("IE", RegDomain::Etsi),
    ("IL", RegDomain::Etsi),
    ("IN", RegDomain::Etsi),
    ("IT", RegDomain::Etsi),
    ("JP", RegDomain::Japan),
    ("KR", RegDomain::Etsi),
    ("MX", RegDomain::Fcc),
    ("NL", RegDomain::Etsi),
    ("NO", RegDomain::Etsi),
    ("NZ", RegDomain::Etsi),
    ("PL", RegDomain::Etsi),
    ("PT", RegDomain::Etsi),
    ("SE", RegDomain::Etsi),
    ("SG", RegDomain::Etsi),
    ("TW", RegDomain::Fcc),
    ("US", RegDomain::Fcc),
];

/// Look up the domain governing a two-letter country code.
///
/// Returns `Null` for "00", `NonCountry` for "XX", `NotFound` (ETSI
/// equivalent) for codes absent from the table. The "JP" entry resolves to
/// `Japan`; callers disambiguate Japan vs JapanBis from the receive
/// channel.
pub fn lookup_country(code: &str) -> CountryLookup {
    let code = code.to_ascii_uppercase();
    match code.as_str() {
        "00" => CountryLookup::Null,
        "XX" => CountryLookup::NonCountry,
        _ => COUNTRY_TABLE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, d)| CountryLookup::Found(*d))
            .unwrap_or(CountryLookup::NotFound),
    }
}

/// How far received regulatory information is trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TrustLevel {
    /// Regulatory operation disabled; only default-legal channels usable
    Disabled = 0,
    /// Adjunct information only
    Adjunct = 1,
    /// Trust IEs received in IBSS beacons
    Ibss = 2,
    /// Trust IEs received from infrastructure APs
    Bss = 3,
    /// Trust the configured MIB only
    Mib = 4,
}

impl TrustLevel {
    /// Scan mode assigned at init to channels illegal under the default
    /// domain.
    pub fn illegal_channel_mode(&self) -> ScanMode {
        match self {
            TrustLevel::Disabled => ScanMode::None,
            _ => ScanMode::Passive,
        }
    }

    /// Whether regulatory updates from received IEs are honored at all.
    pub fn accepts_updates(&self) -> bool {
        !matches!(self, TrustLevel::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_legality() {
        let fcc = RegDomain::Fcc.profile();
        assert!(fcc.is_legal(1));
        assert!(fcc.is_legal(11));
        assert!(!fcc.is_legal(12));
        assert!(!fcc.is_legal(14));
        assert!(!fcc.is_legal(0));

        let etsi = RegDomain::Etsi.profile();
        assert!(etsi.is_legal(13));
        assert!(!etsi.is_legal(14));

        let japan = RegDomain::Japan.profile();
        assert!(japan.is_legal(14));
        assert!(!japan.is_legal(13));

        let japan_bis = RegDomain::JapanBis.profile();
        assert!(japan_bis.is_legal(13));
        assert!(!japan_bis.is_legal(14));
    }

    #[test]
    fn test_profile_power() {
        let fcc = RegDomain::Fcc.profile();
        assert_eq!(fcc.power_for(1), 36);
        assert_eq!(fcc.power_for(12), crate::INVALID_POWER_DBM);
        assert_eq!(fcc.regime, PowerRegime::Eirp);
        assert_eq!(RegDomain::Japan.profile().regime, PowerRegime::Tpo);
    }

    #[test]
    fn test_country_lookup() {
        assert_eq!(lookup_country("US"), CountryLookup::Found(RegDomain::Fcc));
        assert_eq!(lookup_country("us"), CountryLookup::Found(RegDomain::Fcc));
        assert_eq!(lookup_country("JP"), CountryLookup::Found(RegDomain::Japan));
        assert_eq!(lookup_country("ZZ"), CountryLookup::NotFound);
        assert_eq!(lookup_country("XX"), CountryLookup::NonCountry);
        assert_eq!(lookup_country("00"), CountryLookup::Null);
    }

    #[test]
    fn test_unknown_domain_id_falls_back_to_fcc() {
        assert_eq!(RegDomain::from_u8(200), RegDomain::Fcc);
    }

    #[test]
    fn test_trust_policy() {
        assert_eq!(TrustLevel::Disabled.illegal_channel_mode(), ScanMode::None);
        assert_eq!(TrustLevel::Bss.illegal_channel_mode(), ScanMode::Passive);
        assert!(!TrustLevel::Disabled.accepts_updates());
        assert!(TrustLevel::Mib.accepts_updates());
    }

    #[test]
    fn test_japan_sibling() {
        assert_eq!(RegDomain::Japan.japan_sibling(), Some(RegDomain::JapanBis));
        assert_eq!(RegDomain::JapanBis.japan_sibling(), Some(RegDomain::Japan));
        assert_eq!(RegDomain::Fcc.japan_sibling(), None);
    }
}

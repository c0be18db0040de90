//! Country Information Element codec
//!
//! Bit-exact encode/decode of the 802.11 Country IE (IEEE 802.11-2007
//! 7.3.2.9): `[id][length][3-byte country string][triplet]*[pad]`.
//! Each triplet is 3 bytes; a first byte above the highest valid channel
//! number marks a regulatory-extension triplet, anything else a sub-band
//! triplet. The total element body must be even, padded with a trailing
//! zero byte when needed.
//!
//! Decoding is lenient: a malformed element is rejected as a whole (the
//! caller ignores it and continues with the rest of the beacon), and
//! unknown triplet content is skipped without failing the element.

use serde::{Deserialize, Serialize};

use crate::wire::{IeReader, IeWriter};
use crate::{Result, StaError, COUNTRY_IE_ID, COUNTRY_IE_MIN_LEN, MAX_VALID_CHANNEL};

/// Sub-band triplet: a run of channels sharing one power limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBandTriplet {
    /// First channel of the run
    pub first_channel: u8,
    /// Number of channels in the run
    pub num_channels: u8,
    /// Maximum transmit power, dBm
    pub max_power_dbm: i8,
}

/// Regulatory-extension triplet (802.11h)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulatoryTriplet {
    /// Regulatory extension identifier (> 200)
    pub extension_id: u8,
    /// Regulatory class
    pub regulatory_class: u8,
    /// Coverage class
    pub coverage_class: u8,
}

/// One decoded Country IE triplet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Triplet {
    SubBand(SubBandTriplet),
    Regulatory(RegulatoryTriplet),
}

/// Decoded Country Information Element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryIe {
    /// Case-normalized 3-character country string (code + environment
    /// marker)
    pub country: String,
    /// Triplets in element order
    pub triplets: Vec<Triplet>,
}

impl CountryIe {
    /// The two-letter country code portion of the string.
    pub fn country_code(&self) -> &str {
        self.country.get(..2).unwrap_or(&self.country)
    }

    /// Iterate only the sub-band triplets.
    pub fn sub_bands(&self) -> impl Iterator<Item = &SubBandTriplet> {
        self.triplets.iter().filter_map(|t| match t {
            Triplet::SubBand(sb) => Some(sb),
            Triplet::Regulatory(_) => None,
        })
    }

    /// The regulatory triplet, when the element leads with one.
    pub fn regulatory(&self) -> Option<&RegulatoryTriplet> {
        match self.triplets.first() {
            Some(Triplet::Regulatory(r)) => Some(r),
            _ => None,
        }
    }
}

/// Decode a Country IE from a full element buffer `[id][len][body..]`.
///
/// The two length checks are ordered: a body shorter than the minimum is
/// rejected as "too short" before the triplet remainder is examined. A
/// remainder of one byte beyond whole triplets is accepted as the
/// even-length pad; a remainder of two is rejected.
pub fn decode(element: &[u8]) -> Result<CountryIe> {
    let mut reader = IeReader::new(element);

    let id = reader.read_u8()?;
    if id != COUNTRY_IE_ID {
        return Err(StaError::InvalidElement(format!(
            "not a country IE (id {})",
            id
        )));
    }

    let len = reader.read_u8()? as usize;
    if reader.remaining() < len {
        return Err(StaError::InvalidElement(format!(
            "country IE truncated: length {} but {} bytes remain",
            len,
            reader.remaining()
        )));
    }

    if len < COUNTRY_IE_MIN_LEN {
        return Err(StaError::InvalidElement(format!(
            "country IE too short: {} bytes",
            len
        )));
    }
    let triplet_bytes = len - 3;
    if triplet_bytes % 3 == 2 {
        return Err(StaError::InvalidElement(format!(
            "country IE triplet remainder invalid: body length {}",
            len
        )));
    }

    let raw_country = reader.read_bytes(3)?;
    if !raw_country.iter().all(|b| b.is_ascii()) {
        return Err(StaError::InvalidElement(
            "country string is not ASCII".to_string(),
        ));
    }
    let country: String = raw_country
        .iter()
        .map(|b| b.to_ascii_uppercase() as char)
        .collect();

    let triplet_count = triplet_bytes / 3;
    let mut triplets = Vec::with_capacity(triplet_count);
    for index in 0..triplet_count {
        let b0 = reader.read_u8()?;
        let b1 = reader.read_u8()?;
        let b2 = reader.read_u8()?;

        if b0 > MAX_VALID_CHANNEL {
            // Regulatory triplets are only meaningful in the leading
            // position; later ones are skipped.
            if index == 0 {
                triplets.push(Triplet::Regulatory(RegulatoryTriplet {
                    extension_id: b0,
                    regulatory_class: b1,
                    coverage_class: b2,
                }));
            } else {
                log::debug!("Skipping non-leading regulatory triplet (ext id {})", b0);
            }
        } else if b0 == 0 || b1 == 0 {
            log::debug!("Skipping empty sub-band triplet ({}, {})", b0, b1);
        } else {
            triplets.push(Triplet::SubBand(SubBandTriplet {
                first_channel: b0,
                num_channels: b1,
                max_power_dbm: b2 as i8,
            }));
        }
    }
    // A one-byte remainder is the even-length pad.
    if triplet_bytes % 3 == 1 {
        reader.skip(1)?;
    }

    Ok(CountryIe { country, triplets })
}

/// Encode a Country IE from an active channel list.
///
/// `channels` holds `(channel, power_dbm)` pairs and must be in numeric
/// channel order; contiguous channels with identical power are run-length
/// merged into one sub-band triplet. The element is padded with a zero
/// byte to an even body length when needed.
pub fn encode(country: &str, channels: &[(u8, i8)]) -> Result<Vec<u8>> {
    if channels.is_empty() {
        return Err(StaError::InvalidParameter(
            "cannot encode country IE with no active channels".to_string(),
        ));
    }

    let mut writer = IeWriter::new(2 + 3 + channels.len() * 3 + 1);
    writer.write_u8(COUNTRY_IE_ID)?;
    writer.write_u8(0)?; // length, patched below

    let mut country_bytes = [b' '; 3];
    for (i, b) in country.bytes().take(3).enumerate() {
        country_bytes[i] = b.to_ascii_uppercase();
    }
    writer.write_bytes(&country_bytes)?;

    let mut run_first = channels[0].0;
    let mut run_len = 1u8;
    let mut run_power = channels[0].1;
    for &(channel, power) in &channels[1..] {
        if run_first.checked_add(run_len) == Some(channel) && power == run_power {
            run_len = run_len.saturating_add(1);
        } else {
            write_sub_band(&mut writer, run_first, run_len, run_power)?;
            run_first = channel;
            run_len = 1;
            run_power = power;
        }
    }
    write_sub_band(&mut writer, run_first, run_len, run_power)?;

    let mut body_len = writer.len() - 2;
    if body_len % 2 != 0 {
        writer.write_u8(0)?;
        body_len += 1;
    }
    writer.patch_u8(1, body_len as u8)?;

    Ok(writer.into_bytes())
}

fn write_sub_band(writer: &mut IeWriter, first: u8, count: u8, power: i8) -> Result<()> {
    writer.write_u8(first)?;
    writer.write_u8(count)?;
    writer.write_i8(power)?;
    Ok(())
}

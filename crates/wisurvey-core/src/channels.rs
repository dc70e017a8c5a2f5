//! # Channel Model
//!
//! Static tables for the three Wi-Fi bands the survey scores:
//!
//! | Band    | Channels                        | Count |
//! |---------|---------------------------------|-------|
//! | 2.4 GHz | 1–13                            | 13    |
//! | 5 GHz   | 36–64, 100–144, 149–177 (step 4)| 28    |
//! | 6 GHz   | 1–233 (step 4)                  | 59    |
//!
//! Two lookups are provided. [`channel_for_frequency`] maps the exact centre
//! frequency a driver reports (scan list, survey dump) to a [`ChannelKey`].
//! [`channel_range`] gives the frequency window a channel owns when bucketing
//! spectrum-analyser readings. The two tables are kept as the reference
//! hardware reports them; they are not derived from each other.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ─── Bands ──────────────────────────────────────────────────────────────────

/// Upper bound (exclusive) of the 2.4 GHz classification, in MHz.
const BAND_24_CEILING_MHZ: f64 = 3000.0;
/// Lower bound (exclusive) of the 6 GHz classification, in MHz.
const BAND_6_FLOOR_MHZ: f64 = 5920.0;

/// Wi-Fi frequency band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Band {
    Ghz24,
    Ghz5,
    Ghz6,
}

impl Band {
    pub const ALL: [Band; 3] = [Band::Ghz24, Band::Ghz5, Band::Ghz6];

    /// Classify a raw frequency. This rule is authoritative over any band
    /// label printed by the tool itself.
    pub fn classify(freq_mhz: f64) -> Band {
        if freq_mhz < BAND_24_CEILING_MHZ {
            Band::Ghz24
        } else if freq_mhz > BAND_6_FLOOR_MHZ {
            Band::Ghz6
        } else {
            Band::Ghz5
        }
    }

    /// Label used in channel keys (`2.4`, `5`, `6`).
    pub fn label(self) -> &'static str {
        match self {
            Band::Ghz24 => "2.4",
            Band::Ghz5 => "5",
            Band::Ghz6 => "6",
        }
    }

    /// Tag used in spectrum artifact file names and config keys.
    pub fn artifact_tag(self) -> &'static str {
        match self {
            Band::Ghz24 => "2ghz",
            Band::Ghz5 => "5ghz",
            Band::Ghz6 => "6ghz",
        }
    }

    /// Every channel number defined for this band, ascending.
    pub fn channels(self) -> &'static [u16] {
        match self {
            Band::Ghz24 => &CHANNELS_24,
            Band::Ghz5 => &CHANNELS_5,
            Band::Ghz6 => &CHANNELS_6,
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Band {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2.4" => Ok(Band::Ghz24),
            "5" => Ok(Band::Ghz5),
            "6" => Ok(Band::Ghz6),
            other => Err(format!("unknown band: {other}")),
        }
    }
}

// ─── Channel Catalog ────────────────────────────────────────────────────────

const CHANNELS_24: [u16; 13] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13];

const CHANNELS_5: [u16; 28] = [
    36, 40, 44, 48, 52, 56, 60, 64, 100, 104, 108, 112, 116, 120, 124, 128, 132, 136, 140, 144,
    149, 153, 157, 161, 165, 169, 173, 177,
];

const CHANNELS_6: [u16; 59] = [
    1, 5, 9, 13, 17, 21, 25, 29, 33, 37, 41, 45, 49, 53, 57, 61, 65, 69, 73, 77, 81, 85, 89, 93,
    97, 101, 105, 109, 113, 117, 121, 125, 129, 133, 137, 141, 145, 149, 153, 157, 161, 165, 169,
    173, 177, 181, 185, 189, 193, 197, 201, 205, 209, 213, 217, 221, 225, 229, 233,
];

/// The only 2.4 GHz channels the reference radio reports survey data for.
pub const SURVEY_CHANNELS_24: [u16; 3] = [1, 6, 11];

/// Composite `<band>_<channel>` identifier of one metrics row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub band: Band,
    pub channel: u16,
}

impl ChannelKey {
    pub fn new(band: Band, channel: u16) -> Self {
        Self { band, channel }
    }

    /// Whether the key is part of the fixed universe.
    pub fn is_known(&self) -> bool {
        self.band.channels().contains(&self.channel)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.band, self.channel)
    }
}

impl FromStr for ChannelKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (band, channel) = s
            .split_once('_')
            .ok_or_else(|| format!("malformed channel key: {s}"))?;
        let band: Band = band.parse()?;
        let channel: u16 = channel
            .parse()
            .map_err(|_| format!("malformed channel number in key: {s}"))?;
        Ok(ChannelKey { band, channel })
    }
}

impl Serialize for ChannelKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChannelKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Every key in the fixed universe, ordered by band then channel.
pub fn all_channel_keys() -> impl Iterator<Item = ChannelKey> {
    Band::ALL.into_iter().flat_map(|band| {
        band.channels()
            .iter()
            .map(move |&channel| ChannelKey::new(band, channel))
    })
}

// ─── Frequency → Channel ────────────────────────────────────────────────────

/// Map a reported centre frequency to its channel.
///
/// Only exact table frequencies resolve; anything else is `None`.
pub fn channel_for_frequency(freq_mhz: u32) -> Option<ChannelKey> {
    let band = Band::classify(f64::from(freq_mhz));
    let channel = match band {
        // 2412 + 5·(n−1)
        Band::Ghz24 => {
            let offset = freq_mhz.checked_sub(2407)?;
            (offset % 5 == 0).then_some(offset / 5)?
        }
        // 5000 + 5·n
        Band::Ghz5 => {
            let offset = freq_mhz.checked_sub(5000)?;
            (offset % 5 == 0).then_some(offset / 5)?
        }
        // 5950 + 5·n
        Band::Ghz6 => {
            let offset = freq_mhz.checked_sub(5950)?;
            (offset % 5 == 0).then_some(offset / 5)?
        }
    };
    let key = ChannelKey::new(band, u16::try_from(channel).ok()?);
    key.is_known().then_some(key)
}

// ─── Channel → Frequency Range ──────────────────────────────────────────────

/// Frequency window a channel owns for spectrum bucketing (inclusive bounds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyRange {
    pub center_mhz: f64,
    pub low_mhz: f64,
    pub high_mhz: f64,
}

impl FrequencyRange {
    pub fn contains(&self, freq_mhz: f64) -> bool {
        freq_mhz >= self.low_mhz && freq_mhz <= self.high_mhz
    }
}

/// Range assigned to a channel, or `None` for keys outside the universe.
pub fn channel_range(key: ChannelKey) -> Option<FrequencyRange> {
    if !key.is_known() {
        return None;
    }
    let n = f64::from(key.channel);
    let range = match key.band {
        // 22 MHz masks, slightly asymmetric around the centre.
        Band::Ghz24 => {
            let center = 2407.0 + 5.0 * n;
            FrequencyRange {
                center_mhz: center,
                low_mhz: center - 10.83,
                high_mhz: center + 10.66,
            }
        }
        Band::Ghz5 => {
            let center = 5000.0 + 5.0 * n;
            FrequencyRange {
                center_mhz: center,
                low_mhz: center - 10.0,
                high_mhz: center + 10.0,
            }
        }
        Band::Ghz6 => {
            let center = 5940.0 + 5.0 * n;
            FrequencyRange {
                center_mhz: center,
                low_mhz: center - 10.0,
                high_mhz: center + 10.0,
            }
        }
    };
    Some(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universe_has_expected_size_per_band() {
        let keys: Vec<_> = all_channel_keys().collect();
        assert_eq!(keys.len(), 100);
        assert_eq!(keys.iter().filter(|k| k.band == Band::Ghz24).count(), 13);
        assert_eq!(keys.iter().filter(|k| k.band == Band::Ghz5).count(), 28);
        assert_eq!(keys.iter().filter(|k| k.band == Band::Ghz6).count(), 59);
    }

    #[test]
    fn universe_is_sorted() {
        let keys: Vec<_> = all_channel_keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn classify_band_boundaries() {
        assert_eq!(Band::classify(2412.0), Band::Ghz24);
        assert_eq!(Band::classify(2999.9), Band::Ghz24);
        assert_eq!(Band::classify(3000.0), Band::Ghz5);
        assert_eq!(Band::classify(5920.0), Band::Ghz5);
        assert_eq!(Band::classify(5920.5), Band::Ghz6);
        assert_eq!(Band::classify(7115.0), Band::Ghz6);
    }

    #[test]
    fn reference_frequencies_resolve() {
        assert_eq!(
            channel_for_frequency(2412),
            Some(ChannelKey::new(Band::Ghz24, 1))
        );
        assert_eq!(
            channel_for_frequency(2472),
            Some(ChannelKey::new(Band::Ghz24, 13))
        );
        assert_eq!(
            channel_for_frequency(5955),
            Some(ChannelKey::new(Band::Ghz6, 1))
        );
        assert_eq!(
            channel_for_frequency(5180),
            Some(ChannelKey::new(Band::Ghz5, 36))
        );
        assert_eq!(
            channel_for_frequency(5885),
            Some(ChannelKey::new(Band::Ghz5, 177))
        );
        assert_eq!(
            channel_for_frequency(7115),
            Some(ChannelKey::new(Band::Ghz6, 233))
        );
    }

    #[test]
    fn off_table_frequencies_do_not_resolve() {
        assert_eq!(channel_for_frequency(2484), None); // Japan ch 14
        assert_eq!(channel_for_frequency(2413), None);
        assert_eq!(channel_for_frequency(5170), None); // ch 34
        assert_eq!(channel_for_frequency(5960), None);
        assert_eq!(channel_for_frequency(0), None);
    }

    #[test]
    fn ranges_match_reference_windows() {
        let r = channel_range(ChannelKey::new(Band::Ghz24, 1)).unwrap();
        assert_eq!(r.center_mhz, 2412.0);
        assert!((r.low_mhz - 2401.17).abs() < 1e-9);
        assert!((r.high_mhz - 2422.66).abs() < 1e-9);

        let r = channel_range(ChannelKey::new(Band::Ghz5, 149)).unwrap();
        assert_eq!((r.center_mhz, r.low_mhz, r.high_mhz), (5745.0, 5735.0, 5755.0));

        let r = channel_range(ChannelKey::new(Band::Ghz6, 233)).unwrap();
        assert_eq!((r.center_mhz, r.low_mhz, r.high_mhz), (7105.0, 7095.0, 7115.0));

        assert!(channel_range(ChannelKey::new(Band::Ghz5, 37)).is_none());
    }

    #[test]
    fn key_display_and_parse() {
        let key = ChannelKey::new(Band::Ghz24, 11);
        assert_eq!(key.to_string(), "2.4_11");
        assert_eq!("2.4_11".parse::<ChannelKey>().unwrap(), key);
        assert_eq!(
            "6_233".parse::<ChannelKey>().unwrap(),
            ChannelKey::new(Band::Ghz6, 233)
        );
        assert!("7_1".parse::<ChannelKey>().is_err());
        assert!("5-36".parse::<ChannelKey>().is_err());
        assert!("5_x".parse::<ChannelKey>().is_err());
    }

    #[test]
    fn key_serializes_as_string() {
        let json = serde_json::to_string(&ChannelKey::new(Band::Ghz5, 36)).unwrap();
        assert_eq!(json, "\"5_36\"");
        let back: ChannelKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChannelKey::new(Band::Ghz5, 36));
    }
}

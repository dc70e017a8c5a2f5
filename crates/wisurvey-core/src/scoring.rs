//! # Channel Scoring
//!
//! Reduces the parsed scan, survey and spectrum tables into one metrics row
//! per channel key, for every key in the channel universe.
//!
//! ```text
//! score = max(0, 100 − ap_count − 5·strong_ap_count − 2·max(busy_rate, usage_rate))
//! ```
//!
//! The reduction is pure: no clock, no randomness, ordered maps only. The
//! same artifact set always serializes to the same bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactKind};
use crate::channels::{self, Band, ChannelKey, SURVEY_CHANNELS_24};
use crate::parse::{AccessPointTable, SpectrumTable, SurveyTable};

/// Scan-list signal at or above which an access point counts as strong.
pub const STRONG_AP_SIGNAL_DBM: f64 = -80.0;

/// Spectrum power at or above which a reading counts as channel activity.
///
/// Independent of [`STRONG_AP_SIGNAL_DBM`]: the two come from
/// different measurement paths.
pub const ACTIVE_SPECTRUM_POWER_DBM: f64 = -85.0;

const MAX_SCORE: f64 = 100.0;
const AP_PENALTY: f64 = 1.0;
const STRONG_AP_PENALTY: f64 = 5.0;
const RATE_PENALTY: f64 = 2.0;

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Metrics for one channel key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetrics {
    pub ap_count: u32,
    pub strong_ap_count: u32,
    pub channel_busy_rate: f64,
    pub channel_usage_rate: f64,
    pub score: f64,
}

impl Default for ChannelMetrics {
    fn default() -> Self {
        Self {
            ap_count: 0,
            strong_ap_count: 0,
            channel_busy_rate: 0.0,
            channel_usage_rate: 0.0,
            score: MAX_SCORE,
        }
    }
}

/// Congestion score for one channel. Never negative, never above 100.
pub fn score(ap_count: u32, strong_ap_count: u32, busy_rate: f64, usage_rate: f64) -> f64 {
    let rate = busy_rate.max(usage_rate).max(0.0);
    let raw = MAX_SCORE
        - AP_PENALTY * f64::from(ap_count)
        - STRONG_AP_PENALTY * f64::from(strong_ap_count)
        - RATE_PENALTY * rate;
    if raw <= 0.0 { 0.0 } else { round2(raw) }
}

/// The persisted per-point results: every channel key with its metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsRecord {
    pub channels: BTreeMap<ChannelKey, ChannelMetrics>,
}

impl ResultsRecord {
    /// Every key of the universe at its neutral metrics.
    pub fn neutral() -> Self {
        Self {
            channels: channels::all_channel_keys()
                .map(|key| (key, ChannelMetrics::default()))
                .collect(),
        }
    }

    pub fn get(&self, key: ChannelKey) -> Option<&ChannelMetrics> {
        self.channels.get(&key)
    }

    /// Serialized form used for `results.json`.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Parsed tables for one point, ready to score.
#[derive(Debug, Clone, Default)]
pub struct Observations {
    pub access_points: AccessPointTable,
    pub survey: SurveyTable,
    pub spectrum: SpectrumTable,
}

impl Observations {
    /// Parse a point's artifacts.
    ///
    /// Artifacts are ingested in `(kind, ordinal)` order regardless of the
    /// order given, so later scan rounds always win the BSSID merge.
    pub fn from_artifacts(artifacts: &[Artifact], sample_marker: &str) -> Self {
        let mut ordered: Vec<&Artifact> = artifacts.iter().collect();
        ordered.sort_by_key(|a| (a.kind, a.ordinal));

        let mut obs = Observations::default();
        for artifact in ordered {
            match artifact.kind {
                ArtifactKind::ChannelScan => obs.access_points.ingest(&artifact.text),
                ArtifactKind::SurveyDump => obs.survey.ingest(&artifact.text),
                ArtifactKind::Spectrum(_) => obs.spectrum.ingest(&artifact.text, sample_marker),
            }
        }
        obs
    }
}

/// Compute the results record for a set of observations.
pub fn score_channels(obs: &Observations) -> ResultsRecord {
    let mut results = ResultsRecord::neutral();

    // Access points
    for ap in obs.access_points.iter() {
        let (Some(channel), Some(freq)) = (ap.channel, ap.freq_mhz) else {
            continue;
        };
        let key = ChannelKey::new(Band::classify(freq), channel);
        if let Some(row) = results.channels.get_mut(&key) {
            row.ap_count += 1;
            if ap.signal_dbm.is_some_and(|s| s >= STRONG_AP_SIGNAL_DBM) {
                row.strong_ap_count += 1;
            }
        }
    }

    // Survey busy rate
    for (freq, rate) in obs.survey.busy_rates() {
        let Some(key) = channels::channel_for_frequency(freq) else {
            tracing::trace!(freq, "survey frequency has no channel, skipping");
            continue;
        };
        if key.band == Band::Ghz24 && !SURVEY_CHANNELS_24.contains(&key.channel) {
            continue;
        }
        if let Some(row) = results.channels.get_mut(&key) {
            row.channel_busy_rate = rate;
        }
    }

    // Spectrum usage rate
    for (key, row) in results.channels.iter_mut() {
        let Some(range) = channels::channel_range(*key) else {
            continue;
        };
        let mut total = 0usize;
        let mut active = 0usize;
        for (freq, powers) in obs.spectrum.iter() {
            if Band::classify(freq) != key.band || !range.contains(freq) {
                continue;
            }
            total += powers.len();
            active += powers
                .iter()
                .filter(|&&p| p >= ACTIVE_SPECTRUM_POWER_DBM)
                .count();
        }
        if total > 0 {
            row.channel_usage_rate = round2(active as f64 / total as f64 * 100.0);
        }
    }

    for row in results.channels.values_mut() {
        row.score = score(
            row.ap_count,
            row.strong_ap_count,
            row.channel_busy_rate,
            row.channel_usage_rate,
        );
    }

    results
}

/// Parse and score in one step.
pub fn score_artifacts(artifacts: &[Artifact], sample_marker: &str) -> ResultsRecord {
    score_channels(&Observations::from_artifacts(artifacts, sample_marker))
}

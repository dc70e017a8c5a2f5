//! Spectrum-analyser sample decoder.
//!
//! The analyser emits one line per sample in a line-protocol shape:
//!
//! ```text
//! wipry,serial=A1B2 2401.0=-91.5,2401.5=-90.0,2402.0=-84.2 1718000000000
//! ```
//!
//! Only lines containing the sample marker are considered. The second
//! whitespace-separated field carries `frequency=power` pairs.

use std::collections::BTreeMap;

/// Default marker identifying a sample line.
pub const DEFAULT_SAMPLE_MARKER: &str = "wipry,serial=";

/// Frequencies are keyed at kHz resolution so the table stays ordered and
/// deterministic without keying on floats.
fn freq_key(freq_mhz: f64) -> i64 {
    (freq_mhz * 1000.0).round() as i64
}

/// Whether `line` is a sample record under `marker`.
pub fn is_sample_line(line: &str, marker: &str) -> bool {
    line.contains(marker)
}

/// Extract the `(frequency_mhz, power_dbm)` pairs of one sample line.
pub fn parse_sample(line: &str) -> Vec<(f64, f64)> {
    let Some(field) = line.split_whitespace().nth(1) else {
        return Vec::new();
    };
    field
        .split(',')
        .filter_map(|item| {
            let (freq, power) = item.split_once('=')?;
            let freq: f64 = freq.trim().parse().ok()?;
            let power: f64 = power.trim().parse().ok()?;
            (freq.is_finite() && power.is_finite() && freq > 0.0).then_some((freq, power))
        })
        .collect()
}

/// Power readings per exact frequency, accumulated over every sample file.
#[derive(Debug, Clone, Default)]
pub struct SpectrumTable {
    readings: BTreeMap<i64, Vec<f64>>,
    samples: usize,
}

impl SpectrumTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one artifact and append its readings.
    pub fn ingest(&mut self, text: &str, marker: &str) {
        for line in text.lines().filter(|l| is_sample_line(l, marker)) {
            self.samples += 1;
            for (freq, power) in parse_sample(line) {
                self.readings.entry(freq_key(freq)).or_default().push(power);
            }
        }
    }

    /// Number of sample lines seen.
    pub fn sample_count(&self) -> usize {
        self.samples
    }

    /// `(frequency_mhz, readings)` in ascending frequency order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &[f64])> {
        self.readings
            .iter()
            .map(|(&khz, powers)| (khz as f64 / 1000.0, powers.as_slice()))
    }

    pub fn readings_at(&self, freq_mhz: f64) -> &[f64] {
        self.readings
            .get(&freq_key(freq_mhz))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

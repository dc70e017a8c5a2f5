//! `iw <dev> survey dump` decoder.
//!
//! ```text
//! Survey data from wlan1
//! 	frequency:			2412 MHz [in use]
//! 	noise:				-95 dBm
//! 	channel active time:		1000 ms
//! 	channel busy time:		250 ms
//! ```
//!
//! Active and busy times are summed per frequency over every round; the busy
//! rate is derived from the totals, not averaged per round.

use std::collections::BTreeMap;

use super::{duration_ms, leading_f64};
use crate::scoring::round2;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SurveyTotals {
    pub active_ms: f64,
    pub busy_ms: f64,
}

impl SurveyTotals {
    /// `100 × busy / active` clamped to 0..=100, or `None` when no active
    /// time was recorded.
    pub fn busy_rate(&self) -> Option<f64> {
        (self.active_ms > 0.0)
            .then(|| round2(self.busy_ms / self.active_ms * 100.0).clamp(0.0, 100.0))
    }
}

#[derive(Debug, PartialEq)]
enum SurveyLine {
    Header,
    Frequency(u32),
    ActiveTime(f64),
    BusyTime(f64),
    Other,
}

fn timed(rest: &str) -> Option<f64> {
    let mut parts = rest.split_whitespace();
    duration_ms(parts.next()?, parts.next()?)
}

fn classify(line: &str) -> SurveyLine {
    let trimmed = line.trim();
    if trimmed.starts_with("Survey data from") {
        return SurveyLine::Header;
    }
    if let Some(rest) = trimmed.strip_prefix("frequency:") {
        let mhz = rest.contains("MHz").then(|| leading_f64(rest)).flatten();
        return match mhz {
            Some(v) if v > 0.0 => SurveyLine::Frequency(v.round() as u32),
            _ => SurveyLine::Other,
        };
    }
    if let Some(rest) = trimmed.strip_prefix("channel active time:") {
        return timed(rest).map_or(SurveyLine::Other, SurveyLine::ActiveTime);
    }
    if let Some(rest) = trimmed.strip_prefix("channel busy time:") {
        return timed(rest).map_or(SurveyLine::Other, SurveyLine::BusyTime);
    }
    SurveyLine::Other
}

/// Record collected between two frequency headers.
#[derive(Debug, Default)]
struct Block {
    freq_mhz: Option<u32>,
    active_ms: Option<f64>,
    busy_ms: Option<f64>,
}

/// Per-frequency active/busy totals across every survey round.
#[derive(Debug, Clone, Default)]
pub struct SurveyTable {
    totals: BTreeMap<u32, SurveyTotals>,
}

impl SurveyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one round and add its times to the running totals.
    pub fn ingest(&mut self, text: &str) {
        let mut block = Block::default();

        for line in text.lines() {
            match classify(line) {
                SurveyLine::Header => {
                    self.flush(std::mem::take(&mut block));
                }
                SurveyLine::Frequency(freq) => {
                    self.flush(std::mem::take(&mut block));
                    block.freq_mhz = Some(freq);
                }
                SurveyLine::ActiveTime(ms) if block.freq_mhz.is_some() => {
                    block.active_ms = Some(ms);
                }
                SurveyLine::BusyTime(ms) if block.freq_mhz.is_some() => {
                    block.busy_ms = Some(ms);
                }
                _ => {}
            }
        }
        self.flush(block);
    }

    fn flush(&mut self, block: Block) {
        let Some(freq) = block.freq_mhz else {
            return;
        };
        let totals = self.totals.entry(freq).or_default();
        totals.active_ms += block.active_ms.unwrap_or(0.0);
        totals.busy_ms += block.busy_ms.unwrap_or(0.0);
    }

    pub fn totals(&self, freq_mhz: u32) -> Option<SurveyTotals> {
        self.totals.get(&freq_mhz).copied()
    }

    /// Busy rate per frequency; frequencies with zero active time are absent.
    pub fn busy_rates(&self) -> BTreeMap<u32, f64> {
        self.totals
            .iter()
            .filter_map(|(&freq, totals)| totals.busy_rate().map(|rate| (freq, rate)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

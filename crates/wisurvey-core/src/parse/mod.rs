//! Decoders for the raw text the diagnostic tools print.
//!
//! Each decoder walks its input line by line as a small state machine:
//! fields are collected into the record currently open, and the record is
//! flushed when the next record header (or end of input) is reached. Lines
//! that match nothing are skipped, so extra tool output never breaks a parse.

pub mod scan;
pub mod spectrum;
pub mod survey;

pub use scan::{AccessPoint, AccessPointTable};
pub use spectrum::SpectrumTable;
pub use survey::SurveyTable;

/// Convert a `<value> <unit>` duration pair to milliseconds.
///
/// Accepts `us`, `ms` and `s`; any other unit is rejected.
fn duration_ms(value: &str, unit: &str) -> Option<f64> {
    let value: f64 = value.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    match unit {
        "us" => Some(value / 1000.0),
        "ms" => Some(value),
        "s" => Some(value * 1000.0),
        _ => None,
    }
}

/// Parse the first whitespace-separated token of `s` as a finite float.
fn leading_f64(s: &str) -> Option<f64> {
    s.split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

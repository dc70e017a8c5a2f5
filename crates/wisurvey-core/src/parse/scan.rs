//! `iw <dev> scan` decoder.
//!
//! ```text
//! BSS 3c:37:86:aa:bb:cc(on wlan1)
//! 	last seen: 120 ms ago
//! 	freq: 2412
//! 	signal: -70.00 dBm
//! 	DS Parameter set: channel 1
//! ```
//!
//! A record opens at a column-0 `BSS <bssid>(on <iface>)` header. Indented
//! `BSS Load:` lines inside a block are not headers.

use std::collections::BTreeMap;

use super::{duration_ms, leading_f64};

/// One access point as seen across every scan round merged so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPoint {
    pub bssid: String,
    pub freq_mhz: Option<f64>,
    pub channel: Option<u16>,
    pub signal_dbm: Option<f64>,
    pub last_seen_s: Option<f64>,
}

impl AccessPoint {
    fn new(bssid: &str) -> Self {
        Self {
            bssid: bssid.to_string(),
            ..Default::default()
        }
    }

    /// Overwrite fields that `later` observed; keep the rest.
    fn merge(&mut self, later: AccessPoint) {
        if later.freq_mhz.is_some() {
            self.freq_mhz = later.freq_mhz;
        }
        if later.channel.is_some() {
            self.channel = later.channel;
        }
        if later.signal_dbm.is_some() {
            self.signal_dbm = later.signal_dbm;
        }
        if later.last_seen_s.is_some() {
            self.last_seen_s = later.last_seen_s;
        }
    }
}

#[derive(Debug, PartialEq)]
enum ScanLine<'a> {
    Bss(&'a str),
    Freq(f64),
    Signal(f64),
    DsChannel(u16),
    LastSeen(f64),
    Other,
}

fn classify(line: &str) -> ScanLine<'_> {
    if let Some(rest) = line.strip_prefix("BSS ") {
        return match rest.split_once("(on ") {
            Some((bssid, tail)) if tail.contains(')') && !bssid.trim().is_empty() => {
                ScanLine::Bss(bssid.trim())
            }
            _ => ScanLine::Other,
        };
    }

    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix("freq:") {
        return leading_f64(rest).map_or(ScanLine::Other, ScanLine::Freq);
    }
    if let Some(rest) = trimmed.strip_prefix("signal:") {
        if rest.contains("dBm") {
            return leading_f64(rest).map_or(ScanLine::Other, ScanLine::Signal);
        }
        return ScanLine::Other;
    }
    if let Some(rest) = trimmed.strip_prefix("DS Parameter set: channel") {
        return rest
            .trim()
            .parse()
            .map_or(ScanLine::Other, ScanLine::DsChannel);
    }
    if let Some(rest) = trimmed.strip_prefix("last seen:") {
        let mut parts = rest.split_whitespace();
        return match (parts.next(), parts.next(), parts.next()) {
            (Some(value), Some(unit), Some("ago")) => duration_ms(value, unit)
                .map_or(ScanLine::Other, |ms| ScanLine::LastSeen(ms / 1000.0)),
            _ => ScanLine::Other,
        };
    }
    ScanLine::Other
}

/// Decode one scan artifact into per-BSS records, in order of appearance.
pub fn parse_scan(text: &str) -> Vec<AccessPoint> {
    let mut records = Vec::new();
    let mut current: Option<AccessPoint> = None;

    for line in text.lines() {
        match classify(line) {
            ScanLine::Bss(bssid) => {
                records.extend(current.take());
                current = Some(AccessPoint::new(bssid));
            }
            // Fields before the first header have no owner.
            _ if current.is_none() => {}
            ScanLine::Freq(v) => set(&mut current, |ap| ap.freq_mhz = Some(v)),
            ScanLine::Signal(v) => set(&mut current, |ap| ap.signal_dbm = Some(v)),
            ScanLine::DsChannel(v) => set(&mut current, |ap| ap.channel = Some(v)),
            ScanLine::LastSeen(v) => set(&mut current, |ap| ap.last_seen_s = Some(v)),
            ScanLine::Other => {}
        }
    }
    records.extend(current);
    records
}

fn set(current: &mut Option<AccessPoint>, f: impl FnOnce(&mut AccessPoint)) {
    if let Some(ap) = current.as_mut() {
        f(ap);
    }
}

/// Access points accumulated over every scan round, keyed by BSSID.
#[derive(Debug, Clone, Default)]
pub struct AccessPointTable {
    aps: BTreeMap<String, AccessPoint>,
}

impl AccessPointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one round and merge it over the existing table.
    pub fn ingest(&mut self, text: &str) {
        for record in parse_scan(text) {
            match self.aps.get_mut(&record.bssid) {
                Some(existing) => existing.merge(record),
                None => {
                    self.aps.insert(record.bssid.clone(), record);
                }
            }
        }
    }

    pub fn get(&self, bssid: &str) -> Option<&AccessPoint> {
        self.aps.get(bssid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccessPoint> {
        self.aps.values()
    }

    pub fn len(&self) -> usize {
        self.aps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUND_1: &str = "\
BSS 3c:37:86:aa:bb:cc(on wlan1)
\tTSF: 1234 usec (0d, 00:00:00)
\tfreq: 2412
\tbeacon interval: 100 TUs
\tsignal: -70.00 dBm
\tlast seen: 1500 ms ago
\tSSID: office
\tDS Parameter set: channel 1
\tBSS Load:
\t\t * station count: 3
BSS 3c:37:86:dd:ee:ff(on wlan1) -- associated
\tfreq: 5180.0
\tsignal: -55.00 dBm
\tlast seen: 2 s ago
\tDS Parameter set: channel 36
BSS 00:11:22:33:44:55(on wlan1)
\tfreq: 5955
\tsignal: -82.00 dBm
";

    #[test]
    fn parses_blocks_in_order() {
        let aps = parse_scan(ROUND_1);
        assert_eq!(aps.len(), 3);

        assert_eq!(aps[0].bssid, "3c:37:86:aa:bb:cc");
        assert_eq!(aps[0].freq_mhz, Some(2412.0));
        assert_eq!(aps[0].signal_dbm, Some(-70.0));
        assert_eq!(aps[0].channel, Some(1));
        assert_eq!(aps[0].last_seen_s, Some(1.5));

        assert_eq!(aps[1].bssid, "3c:37:86:dd:ee:ff");
        assert_eq!(aps[1].freq_mhz, Some(5180.0));
        assert_eq!(aps[1].channel, Some(36));
        assert_eq!(aps[1].last_seen_s, Some(2.0));

        // No DS parameter set: kept in the parse, dropped at scoring time.
        assert_eq!(aps[2].channel, None);
    }

    #[test]
    fn indented_bss_load_is_not_a_header() {
        assert_eq!(classify("\tBSS Load:"), ScanLine::Other);
        assert_eq!(classify("BSS Load:"), ScanLine::Other);
    }

    #[test]
    fn fields_before_first_header_are_ignored() {
        let text = "\tfreq: 2437\n\tsignal: -40.00 dBm\nBSS aa:aa:aa:aa:aa:aa(on wlan1)\n";
        let aps = parse_scan(text);
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].freq_mhz, None);
        assert_eq!(aps[0].signal_dbm, None);
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let text = "command failed: Device or resource busy (-16)\n\
                    BSS aa:aa:aa:aa:aa:aa(on wlan1)\n\
                    \tsignal: strong\n\
                    \tfreq: ???\n\
                    \tDS Parameter set: channel 6\n";
        let aps = parse_scan(text);
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].channel, Some(6));
        assert_eq!(aps[0].signal_dbm, None);
        assert_eq!(aps[0].freq_mhz, None);
    }

    #[test]
    fn later_rounds_overwrite_observed_fields_only() {
        let mut table = AccessPointTable::new();
        table.ingest(ROUND_1);
        table.ingest(
            "BSS 3c:37:86:aa:bb:cc(on wlan1)\n\
             \tsignal: -60.00 dBm\n\
             \tlast seen: 10 ms ago\n",
        );

        assert_eq!(table.len(), 3);
        let ap = table.get("3c:37:86:aa:bb:cc").unwrap();
        assert_eq!(ap.signal_dbm, Some(-60.0));
        assert_eq!(ap.last_seen_s, Some(0.01));
        assert_eq!(ap.freq_mhz, Some(2412.0));
        assert_eq!(ap.channel, Some(1));
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(parse_scan("").is_empty());
        let mut table = AccessPointTable::new();
        table.ingest("");
        assert!(table.is_empty());
    }
}

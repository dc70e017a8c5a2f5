//! Raw capture artifacts: the write-once text files a capture leaves behind.
//!
//! File names encode kind and ordinal: `channel_scan_3.txt`,
//! `survey_dump_3.txt`, `spectrum_5ghz_1.txt`.

use std::fmt;

use crate::channels::Band;

/// Which diagnostic command produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    ChannelScan,
    SurveyDump,
    Spectrum(Band),
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::ChannelScan,
        ArtifactKind::SurveyDump,
        ArtifactKind::Spectrum(Band::Ghz24),
        ArtifactKind::Spectrum(Band::Ghz5),
        ArtifactKind::Spectrum(Band::Ghz6),
    ];

    /// File-name prefix, without the ordinal.
    pub fn stem(self) -> String {
        match self {
            ArtifactKind::ChannelScan => "channel_scan".to_string(),
            ArtifactKind::SurveyDump => "survey_dump".to_string(),
            ArtifactKind::Spectrum(band) => format!("spectrum_{}", band.artifact_tag()),
        }
    }

    pub fn file_name(self, ordinal: u32) -> String {
        format!("{}_{ordinal}.txt", self.stem())
    }

    /// Recognise an artifact file name, returning its kind and ordinal.
    pub fn parse_file_name(name: &str) -> Option<(ArtifactKind, u32)> {
        let base = name.strip_suffix(".txt")?;
        let (stem, ordinal) = base.rsplit_once('_')?;
        let ordinal: u32 = ordinal.parse().ok()?;
        let kind = ArtifactKind::ALL.into_iter().find(|k| k.stem() == stem)?;
        Some((kind, ordinal))
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stem())
    }
}

/// One artifact loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub ordinal: u32,
    pub text: String,
}

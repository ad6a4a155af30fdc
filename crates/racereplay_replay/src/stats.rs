//! Race statistics and outcome reporting.
//!
//! The instrumented target writes its race counters to the file named by
//! `RACEBENCH_STAT`: little-endian `u32`s, a header first, then one counter
//! per race-check site. A site whose counter is nonzero observed its race.
//! A missing file means the target never got that far and is read as "no
//! race", never as an error.

use racereplay_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming the artifact the target writes
pub const STAT_PATH_ENV: &str = "RACEBENCH_STAT";

/// Per-site race counters, header removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceStatistics {
    header: Option<u32>,
    counters: Vec<u32>,
}

impl RaceStatistics {
    /// Decode an artifact; trailing bytes short of a full counter are ignored
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let chunks = bytes.chunks_exact(4);
        if !chunks.remainder().is_empty() {
            tracing::warn!(
                trailing = chunks.remainder().len(),
                "race statistics length is not a multiple of 4"
            );
        }

        let mut words = chunks.map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        let header = words.next();
        Self {
            header,
            counters: words.collect(),
        }
    }

    /// Read an artifact, `None` if it does not exist
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Option<Self>> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(Self::from_bytes(&bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::io(path, &e)),
        }
    }

    /// Header word, if present
    #[must_use]
    pub fn header(&self) -> Option<u32> {
        self.header
    }

    /// Counters after the header
    #[must_use]
    pub fn counters(&self) -> &[u32] {
        &self.counters
    }

    /// 0-based indices of sites that observed a race
    #[must_use]
    pub fn triggered(&self) -> Vec<usize> {
        self.counters
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether any site observed a race
    #[must_use]
    pub fn any_triggered(&self) -> bool {
        self.counters.iter().any(|c| *c > 0)
    }
}

/// Which report the harness produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportMode {
    /// List every triggered site
    Enumerate,
    /// Single reproduced / not reproduced verdict
    Verdict,
}

/// Result of reading the artifact in a given mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Triggered site indices
    Triggered(Vec<usize>),
    /// Whether the race reproduced
    Verdict(bool),
}

impl Outcome {
    /// Read the artifact at `path` and report in `mode`
    ///
    /// Never fails: an absent or unreadable artifact reports no race.
    #[must_use]
    pub fn collect(mode: ReportMode, path: impl AsRef<Path>) -> Self {
        let stats = match RaceStatistics::load(path) {
            Ok(Some(stats)) => stats,
            Ok(None) => {
                tracing::debug!("no race statistics written");
                RaceStatistics::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot read race statistics");
                RaceStatistics::default()
            }
        };
        Self::from_statistics(mode, &stats)
    }

    /// Report already-decoded statistics in `mode`
    #[must_use]
    pub fn from_statistics(mode: ReportMode, stats: &RaceStatistics) -> Self {
        match mode {
            ReportMode::Enumerate => Self::Triggered(stats.triggered()),
            ReportMode::Verdict => Self::Verdict(stats.any_triggered()),
        }
    }

    /// Whether at least one race fired
    #[must_use]
    pub fn reproduced(&self) -> bool {
        match self {
            Self::Triggered(indices) => !indices.is_empty(),
            Self::Verdict(hit) => *hit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_header_is_skipped() {
        let stats = RaceStatistics::from_bytes(&encode(&[3, 0, 5, 0]));
        assert_eq!(stats.header(), Some(3));
        assert_eq!(stats.counters(), &[0, 5, 0]);
        assert_eq!(stats.triggered(), vec![1]);
        assert!(stats.any_triggered());
    }

    #[test]
    fn test_enumerate_and_verdict() {
        let stats = RaceStatistics::from_bytes(&encode(&[3, 0, 5, 0]));
        assert_eq!(
            Outcome::from_statistics(ReportMode::Enumerate, &stats),
            Outcome::Triggered(vec![1])
        );
        assert_eq!(
            Outcome::from_statistics(ReportMode::Verdict, &stats),
            Outcome::Verdict(true)
        );
    }

    #[test]
    fn test_all_zero_is_failure() {
        let stats = RaceStatistics::from_bytes(&encode(&[2, 0, 0]));
        assert_eq!(
            Outcome::from_statistics(ReportMode::Verdict, &stats),
            Outcome::Verdict(false)
        );
        assert!(stats.triggered().is_empty());
    }

    #[test]
    fn test_header_value_is_not_a_counter() {
        let stats = RaceStatistics::from_bytes(&encode(&[7]));
        assert!(!stats.any_triggered());
        assert!(RaceStatistics::from_bytes(&[]).counters().is_empty());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = encode(&[1, 0, 9]);
        bytes.extend_from_slice(&[1, 2]);
        let stats = RaceStatistics::from_bytes(&bytes);
        assert_eq!(stats.counters(), &[0, 9]);
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rb_stat");

        assert_eq!(RaceStatistics::load(&path).unwrap(), None);
        assert_eq!(
            Outcome::collect(ReportMode::Enumerate, &path),
            Outcome::Triggered(vec![])
        );
        assert_eq!(
            Outcome::collect(ReportMode::Verdict, &path),
            Outcome::Verdict(false)
        );
    }

    #[test]
    fn test_collect_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rb_stat");
        std::fs::write(&path, encode(&[4, 1, 0, 0, 2])).unwrap();

        let outcome = Outcome::collect(ReportMode::Enumerate, &path);
        assert_eq!(outcome, Outcome::Triggered(vec![0, 3]));
        assert!(outcome.reproduced());
    }
}

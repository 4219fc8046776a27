//! Scan progress reporting.

use std::path::PathBuf;
use std::time::Duration;

use strum::{AsRefStr, Display, EnumString};

/// Lifecycle of the scan pipeline.
///
/// `Idle -> Running -> {Paused <-> Running} -> Idle`, and
/// `Running | Paused -> Stopped`. `Stopped` holds until the next scan starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum ScanState {
    #[default]
    Idle = 0,
    Running = 1,
    Paused = 2,
    Stopped = 3,
}

impl ScanState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ScanState::Running,
            2 => ScanState::Paused,
            3 => ScanState::Stopped,
            _ => ScanState::Idle,
        }
    }

    /// Whether a walk is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, ScanState::Running | ScanState::Paused)
    }
}

/// Progress information during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanProgress {
    /// Files written (or skipped after a failed write) by the workers.
    pub indexed: u64,
    /// Files queued but not yet processed.
    pub pending: u64,
    /// Eligible files in the tree, from the pre-count or discovered so far.
    pub total: u64,
    pub state: ScanState,
    /// Root of the current or last scan.
    pub root: PathBuf,
    /// Time elapsed since the scan started.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Create initial progress state.
    pub fn new() -> Self {
        Self {
            indexed: 0,
            pending: 0,
            total: 0,
            state: ScanState::Idle,
            root: PathBuf::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Calculate scan rate in files per second.
    pub fn files_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.indexed as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Completion in percent, capped at 100.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.indexed as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings() {
        assert_eq!(ScanState::Paused.to_string(), "paused");
        assert_eq!("stopped".parse::<ScanState>().unwrap(), ScanState::Stopped);
        for state in [
            ScanState::Idle,
            ScanState::Running,
            ScanState::Paused,
            ScanState::Stopped,
        ] {
            assert_eq!(ScanState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_rates() {
        let mut progress = ScanProgress::new();
        assert_eq!(progress.files_per_second(), 0.0);
        assert_eq!(progress.percent(), 0.0);

        progress.indexed = 50;
        progress.total = 200;
        progress.elapsed = Duration::from_secs(10);
        assert_eq!(progress.files_per_second(), 5.0);
        assert_eq!(progress.percent(), 25.0);
    }
}

use std::time::{Duration, Instant};

use serde::Serialize;

/// Minimum spacing between two non-terminal progress updates.
pub const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(250);

/// Snapshot published to progress subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub active: bool,
}

impl DownloadProgress {
    /// 0-100, or `None` while the total is unknown.
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => Some(self.bytes_downloaded as f64 * 100.0 / total as f64),
            _ => None,
        }
    }
}

/// Decides which byte counts are worth telling observers about.
///
/// An update passes when at least `PROGRESS_MIN_INTERVAL` has elapsed since
/// the previous one and at least a quarter of `chunk_size` has arrived. The
/// update reaching the total always passes, once.
#[derive(Debug)]
pub struct ProgressThrottle {
    chunk_size: u64,
    min_interval: Duration,
    last_emit: Option<Instant>,
    last_bytes: u64,
    finished: bool,
}

impl ProgressThrottle {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            min_interval: PROGRESS_MIN_INTERVAL,
            last_emit: None,
            last_bytes: 0,
            finished: false,
        }
    }

    pub fn should_emit(&mut self, downloaded: u64, total: Option<u64>, now: Instant) -> bool {
        if total.is_some_and(|total| downloaded >= total) {
            if self.finished {
                return false;
            }
            self.finished = true;
            self.record(downloaded, now);
            return true;
        }

        let waited = self
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= self.min_interval);
        let advanced = downloaded.saturating_sub(self.last_bytes);
        let moved = advanced.saturating_mul(4) >= self.chunk_size;

        if waited && moved {
            self.record(downloaded, now);
            true
        } else {
            false
        }
    }

    fn record(&mut self, downloaded: u64, now: Instant) {
        self.last_emit = Some(now);
        self.last_bytes = downloaded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_known_total() {
        let p = DownloadProgress {
            bytes_downloaded: 250,
            total_bytes: Some(1000),
            active: true,
        };
        assert_eq!(p.percent(), Some(25.0));

        let unknown = DownloadProgress {
            total_bytes: None,
            ..p
        };
        assert_eq!(unknown.percent(), None);
    }

    #[test]
    fn needs_both_time_and_bytes() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(400);

        assert!(throttle.should_emit(100, Some(1000), start));
        // Enough bytes, too soon.
        assert!(!throttle.should_emit(300, Some(1000), start + Duration::from_millis(100)));
        // Enough time, too few bytes.
        assert!(!throttle.should_emit(150, Some(1000), start + Duration::from_millis(400)));
        // Both.
        assert!(throttle.should_emit(300, Some(1000), start + Duration::from_millis(400)));
    }

    #[test]
    fn completion_always_emits_once() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(1_000_000);

        assert!(throttle.should_emit(10, Some(1000), start));
        assert!(!throttle.should_emit(20, Some(1000), start));
        assert!(throttle.should_emit(1000, Some(1000), start));
        assert!(!throttle.should_emit(1000, Some(1000), start + Duration::from_secs(5)));
    }
}

use std::time::{Duration, Instant};

/// Edge reported by [`CommsWatchdog`] when link health changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommsTransition {
    Lost { consecutive_failures: u32 },
    Restored { after_failures: u32, outage: Duration },
}

/// Motor bus link watchdog.
///
/// Counts consecutive failed poll cycles. The link is declared lost once when the count
/// reaches `threshold`, and restored on the next successful cycle.
#[derive(Debug)]
pub struct CommsWatchdog {
    name: String,
    threshold: u32,
    consecutive_failures: u32,
    lost_at: Option<Instant>,
    last_error: Option<String>,
}

impl CommsWatchdog {
    pub fn new(name: impl Into<String>, threshold: u32) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            consecutive_failures: 0,
            lost_at: None,
            last_error: None,
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost_at.is_some()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn record_success(&mut self) -> Option<CommsTransition> {
        let after_failures = std::mem::take(&mut self.consecutive_failures);
        self.last_error = None;
        let lost_at = self.lost_at.take()?;
        let outage = lost_at.elapsed();
        tracing::info!(
            watchdog = %self.name,
            after_failures,
            outage_ms = outage.as_millis() as u64,
            "comms restored"
        );
        Some(CommsTransition::Restored {
            after_failures,
            outage,
        })
    }

    pub fn record_failure(&mut self, error: impl Into<String>) -> Option<CommsTransition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.into());
        if self.is_lost() || self.consecutive_failures < self.threshold {
            return None;
        }
        self.lost_at = Some(Instant::now());
        tracing::warn!(
            watchdog = %self.name,
            failures = self.consecutive_failures,
            error = ?self.last_error,
            "comms lost"
        );
        Some(CommsTransition::Lost {
            consecutive_failures: self.consecutive_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_once_then_restored() {
        let mut wd = CommsWatchdog::new("bus", 3);
        assert_eq!(wd.record_failure("timeout"), None);
        assert_eq!(wd.record_failure("timeout"), None);
        assert_eq!(
            wd.record_failure("timeout"),
            Some(CommsTransition::Lost {
                consecutive_failures: 3
            })
        );
        assert_eq!(wd.record_failure("crc"), None);
        assert!(wd.is_lost());
        assert_eq!(wd.last_error(), Some("crc"));

        match wd.record_success() {
            Some(CommsTransition::Restored { after_failures, .. }) => assert_eq!(after_failures, 4),
            other => panic!("expected restore, got {other:?}"),
        }
        assert_eq!(wd.record_success(), None);
        assert!(!wd.is_lost());
        assert_eq!(wd.consecutive_failures(), 0);
    }

    #[test]
    fn test_threshold_floor_is_one() {
        let mut wd = CommsWatchdog::new("bus", 0);
        assert!(matches!(
            wd.record_failure("io"),
            Some(CommsTransition::Lost {
                consecutive_failures: 1
            })
        ));
    }

    #[test]
    fn test_success_before_threshold_is_silent() {
        let mut wd = CommsWatchdog::new("bus", 2);
        assert_eq!(wd.record_failure("io"), None);
        assert_eq!(wd.record_success(), None);
        assert_eq!(wd.record_failure("io"), None);
        assert!(!wd.is_lost());
    }
}

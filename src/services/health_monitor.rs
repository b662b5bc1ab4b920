//! Detection health monitor
//!
//! Some devices never deliver face-detector callbacks. While preparing, the
//! monitor polls at a fixed cadence and compares the cumulative callback
//! count against a small threshold:
//! - threshold reached on any poll: detector confirmed working
//! - poll budget exhausted below threshold: detector confirmed broken, and
//!   the capture degrades to blind fixed-duration mode
//!
//! The monitor writes `detection` on the session, which the session only
//! accepts while `Preparing`. A poll that fires after the state advanced is
//! therefore a no-op.

use crate::domain::session::Session;
use crate::domain::types::{DetectionHealth, SessionState};
use crate::infra::config::Config;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Keep polling
    Pending,
    Working,
    Broken,
    /// Poll arrived outside `Preparing` or after a verdict
    Ignored,
}

#[derive(Debug)]
pub struct DetectionHealthMonitor {
    poll_interval: Duration,
    max_checks: u32,
    working_threshold: u64,
    checks: u32,
}

impl DetectionHealthMonitor {
    pub fn new(config: &Config) -> Self {
        Self {
            poll_interval: config.health_poll_interval(),
            max_checks: config.health_max_checks(),
            working_threshold: config.health_working_threshold(),
            checks: 0,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn checks(&self) -> u32 {
        self.checks
    }

    pub fn reset(&mut self) {
        self.checks = 0;
    }

    /// One poll of the health check loop
    pub fn poll(&mut self, session: &mut Session) -> HealthVerdict {
        if session.state() != SessionState::Preparing
            || session.detection() != DetectionHealth::Unknown
        {
            return HealthVerdict::Ignored;
        }

        self.checks += 1;
        let callbacks = session.detection_callback_count();
        debug!(check = %self.checks, callbacks = %callbacks, "detection_health_poll");

        if callbacks >= self.working_threshold {
            session.set_detection(DetectionHealth::Working);
            HealthVerdict::Working
        } else if self.checks >= self.max_checks {
            session.set_detection(DetectionHealth::Broken);
            HealthVerdict::Broken
        } else {
            HealthVerdict::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::RecordingHandle;
    use tokio::time::Instant;

    fn preparing() -> Session {
        let mut session = Session::new();
        session.begin_preparing();
        session
    }

    #[test]
    fn test_confirms_working_once_threshold_reached() {
        let mut monitor = DetectionHealthMonitor::new(&Config::default());
        let mut session = preparing();

        session.note_detection_callback(true);
        assert_eq!(monitor.poll(&mut session), HealthVerdict::Pending);

        session.note_detection_callback(false);
        session.note_detection_callback(true);
        assert_eq!(monitor.poll(&mut session), HealthVerdict::Working);
        assert_eq!(session.detection(), DetectionHealth::Working);
        assert_eq!(monitor.checks(), 2);

        // Further polls do nothing
        assert_eq!(monitor.poll(&mut session), HealthVerdict::Ignored);
    }

    #[test]
    fn test_counts_cumulatively_across_polls() {
        let mut monitor = DetectionHealthMonitor::new(&Config::default());
        let mut session = preparing();

        // One callback per poll window still reaches the threshold on the third poll
        for expected in [HealthVerdict::Pending, HealthVerdict::Pending, HealthVerdict::Working] {
            session.note_detection_callback(true);
            assert_eq!(monitor.poll(&mut session), expected);
        }
    }

    #[test]
    fn test_confirms_broken_after_budget() {
        let mut monitor = DetectionHealthMonitor::new(&Config::default());
        let mut session = preparing();
        session.note_detection_callback(true);
        session.note_detection_callback(true);

        for _ in 0..9 {
            assert_eq!(monitor.poll(&mut session), HealthVerdict::Pending);
        }
        assert_eq!(monitor.poll(&mut session), HealthVerdict::Broken);
        assert_eq!(session.detection(), DetectionHealth::Broken);
        assert_eq!(monitor.checks(), 10);
    }

    #[test]
    fn test_threshold_checked_before_budget_on_last_poll() {
        let mut monitor = DetectionHealthMonitor::new(&Config::default());
        let mut session = preparing();
        for _ in 0..9 {
            monitor.poll(&mut session);
        }
        for _ in 0..3 {
            session.note_detection_callback(false);
        }
        assert_eq!(monitor.poll(&mut session), HealthVerdict::Working);
    }

    #[test]
    fn test_stale_poll_after_recording_started_is_ignored() {
        let mut monitor = DetectionHealthMonitor::new(&Config::default());
        let mut session = preparing();
        session.begin_recording(RecordingHandle(1), Instant::now());

        assert_eq!(monitor.poll(&mut session), HealthVerdict::Ignored);
        assert_eq!(session.detection(), DetectionHealth::Unknown);
        assert_eq!(monitor.checks(), 0);
    }

    #[test]
    fn test_reset() {
        let mut monitor = DetectionHealthMonitor::new(&Config::default());
        let mut session = preparing();
        monitor.poll(&mut session);
        monitor.reset();
        assert_eq!(monitor.checks(), 0);
    }
}

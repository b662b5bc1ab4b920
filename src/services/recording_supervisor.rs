//! Recording supervisor
//!
//! Owns the timed capture once recording begins:
//! - fixed-step progress ticks that accumulate unpaused time only
//! - pause/resume driven by detector callbacks, when detection is trusted
//! - the stall check used by the pause watchdog
//!
//! All writes go through the session's licensed setters, so a tick or
//! callback that lands after the recording ended changes nothing.

use crate::domain::session::Session;
use crate::domain::types::SessionState;
use crate::infra::config::Config;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Target duration reached, the device should be asked to stop
    TargetReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceTransition {
    None,
    Paused,
    Resumed,
}

#[derive(Debug, Clone)]
pub struct RecordingSupervisor {
    tick_ms: u64,
    target_ms: u64,
    stall_threshold: Duration,
}

impl RecordingSupervisor {
    pub fn new(config: &Config) -> Self {
        Self {
            tick_ms: config.progress_tick_ms(),
            target_ms: config.target_duration_ms(),
            stall_threshold: config.stall_threshold(),
        }
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    pub fn target_ms(&self) -> u64 {
        self.target_ms
    }

    /// One progress tick
    pub fn on_tick(&self, session: &mut Session) -> TickOutcome {
        if session.state() != SessionState::Recording || session.stop_requested() {
            return TickOutcome::Continue;
        }

        if session.pause_logic_enabled() && session.is_paused() {
            session.add_paused_ms(self.tick_ms);
        } else {
            session.add_recorded_ms(self.tick_ms);
        }

        if self.target_reached(session) {
            TickOutcome::TargetReached
        } else {
            TickOutcome::Continue
        }
    }

    /// Apply one detector callback to the pause state
    ///
    /// Any invalid frame pauses immediately; any valid frame resumes.
    pub fn on_observation(&self, session: &mut Session, valid: bool, now: Instant) -> FaceTransition {
        if session.state() != SessionState::Recording || !session.pause_logic_enabled() {
            return FaceTransition::None;
        }

        if valid {
            session.mark_face_seen(now);
            if session.is_paused() {
                session.set_paused(false);
                return FaceTransition::Resumed;
            }
        } else if !session.is_paused() {
            session.set_paused(true);
            return FaceTransition::Paused;
        }
        FaceTransition::None
    }

    /// Paused with no valid face for longer than the stall threshold
    pub fn is_stalled(&self, session: &Session, now: Instant) -> bool {
        if session.state() != SessionState::Recording
            || !session.pause_logic_enabled()
            || !session.is_paused()
            || session.stop_requested()
        {
            return false;
        }
        session
            .last_face_seen_at()
            .is_some_and(|seen| now.saturating_duration_since(seen) > self.stall_threshold)
    }

    pub fn target_reached(&self, session: &Session) -> bool {
        session.elapsed_recorded_ms() >= self.target_ms
    }

    /// Time since the last valid face, for logging
    pub fn face_absent_for(&self, session: &Session, now: Instant) -> Duration {
        session.last_face_seen_at().map(|seen| now.saturating_duration_since(seen)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{DetectionHealth, RecordingHandle};

    fn recording(health: DetectionHealth) -> Session {
        let mut session = Session::new();
        session.begin_preparing();
        session.set_detection(health);
        session.begin_recording(RecordingHandle(1), Instant::now());
        session
    }

    #[test]
    fn test_reaches_target_after_exact_ticks() {
        let supervisor = RecordingSupervisor::new(&Config::default());
        let mut session = recording(DetectionHealth::Working);

        for _ in 0..99 {
            assert_eq!(supervisor.on_tick(&mut session), TickOutcome::Continue);
        }
        assert_eq!(supervisor.on_tick(&mut session), TickOutcome::TargetReached);
        assert_eq!(session.elapsed_recorded_ms(), 10_000);
    }

    #[test]
    fn test_paused_ticks_do_not_advance_elapsed() {
        let supervisor = RecordingSupervisor::new(&Config::default());
        let mut session = recording(DetectionHealth::Working);
        let now = Instant::now();

        supervisor.on_tick(&mut session);
        assert_eq!(supervisor.on_observation(&mut session, false, now), FaceTransition::Paused);
        for _ in 0..5 {
            supervisor.on_tick(&mut session);
        }
        assert_eq!(session.elapsed_recorded_ms(), 100);
        assert_eq!(session.paused_ms(), 500);

        assert_eq!(supervisor.on_observation(&mut session, true, now), FaceTransition::Resumed);
        supervisor.on_tick(&mut session);
        assert_eq!(session.elapsed_recorded_ms(), 200);
    }

    #[test]
    fn test_alternating_faces_reach_exact_target() {
        let supervisor = RecordingSupervisor::new(&Config::default());
        let mut session = recording(DetectionHealth::Working);
        let now = Instant::now();
        let mut ticks = 0u64;
        let mut last_elapsed = 0u64;

        loop {
            let valid = (ticks / 3) % 2 == 0;
            supervisor.on_observation(&mut session, valid, now);
            ticks += 1;
            let outcome = supervisor.on_tick(&mut session);
            assert!(session.elapsed_recorded_ms() >= last_elapsed);
            last_elapsed = session.elapsed_recorded_ms();
            if outcome == TickOutcome::TargetReached {
                break;
            }
        }

        assert_eq!(session.elapsed_recorded_ms(), 10_000);
        // Paused ticks pushed wall-clock time past the target
        assert!(ticks * 100 > 10_000);
        assert_eq!(ticks * 100, session.elapsed_recorded_ms() + session.paused_ms());
    }

    #[test]
    fn test_blind_mode_ignores_faces() {
        let supervisor = RecordingSupervisor::new(&Config::default());
        let mut session = recording(DetectionHealth::Broken);

        assert_eq!(
            supervisor.on_observation(&mut session, false, Instant::now()),
            FaceTransition::None
        );
        assert!(!session.is_paused());
        for _ in 0..100 {
            supervisor.on_tick(&mut session);
        }
        assert_eq!(session.elapsed_recorded_ms(), 10_000);
        assert_eq!(session.paused_ms(), 0);
    }

    #[test]
    fn test_no_advance_after_stop_requested() {
        let supervisor = RecordingSupervisor::new(&Config::default());
        let mut session = recording(DetectionHealth::Working);
        for _ in 0..100 {
            supervisor.on_tick(&mut session);
        }
        assert!(session.mark_stop_requested());
        assert_eq!(supervisor.on_tick(&mut session), TickOutcome::Continue);
        assert_eq!(session.elapsed_recorded_ms(), 10_000);
    }

    #[test]
    fn test_stall_detection() {
        let supervisor = RecordingSupervisor::new(&Config::default());
        let mut session = recording(DetectionHealth::Working);
        let seen = Instant::now();
        supervisor.on_observation(&mut session, true, seen);
        supervisor.on_observation(&mut session, false, seen);

        assert!(!supervisor.is_stalled(&session, seen + Duration::from_millis(3000)));
        assert!(supervisor.is_stalled(&session, seen + Duration::from_millis(3001)));

        // A valid face clears the stall
        supervisor.on_observation(&mut session, true, seen + Duration::from_millis(3100));
        assert!(!supervisor.is_stalled(&session, seen + Duration::from_millis(3200)));
    }

    #[test]
    fn test_no_stall_in_blind_mode() {
        let supervisor = RecordingSupervisor::new(&Config::default());
        let session = recording(DetectionHealth::Broken);
        assert!(!supervisor.is_stalled(&session, Instant::now() + Duration::from_secs(60)));
    }

    #[test]
    fn test_tick_outside_recording_is_noop() {
        let supervisor = RecordingSupervisor::new(&Config::default());
        let mut session = Session::new();
        session.begin_preparing();
        assert_eq!(supervisor.on_tick(&mut session), TickOutcome::Continue);
        assert_eq!(session.elapsed_recorded_ms(), 0);
    }
}

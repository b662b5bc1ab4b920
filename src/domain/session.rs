//! Session aggregate - the single mutable unit of work
//!
//! The controller is the only writer of `state`. Subordinate fields are
//! licensed by state: detection health may only change while `Preparing`,
//! pause and elapsed accounting only while `Recording`. Writes outside the
//! licensing state are rejected and reported as `false`, which is how stale
//! callbacks from a previous attempt are neutralised.

use crate::domain::types::{
    AttemptId, DetectionHealth, Prompt, RecordingHandle, SessionState,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    prompt: Option<Prompt>,
    /// Only advances while not paused (or while detection is not trusted)
    elapsed_recorded_ms: u64,
    /// Diagnostic only
    paused_ms: u64,
    is_paused: bool,
    detection: DetectionHealth,
    /// Cumulative detector callbacks since entering Preparing
    detection_callback_count: u64,
    last_face_seen_at: Option<Instant>,
    /// Any valid face observed since entering Preparing
    valid_face_seen: bool,
    last_observation_valid: bool,
    /// Present iff `state == Recording`
    recording_handle: Option<RecordingHandle>,
    stop_requested: bool,
    /// Monotonic across resets
    attempt: AttemptId,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Controller-only writes
    // ------------------------------------------------------------------

    /// Move to `to`. Leaving `Recording` releases the recording handle, which
    /// is returned so the caller can stop the device.
    pub(crate) fn transition(&mut self, to: SessionState) -> Option<RecordingHandle> {
        let released = if to != SessionState::Recording { self.recording_handle.take() } else { None };
        self.state = to;
        released
    }

    /// Full reset to `Instruction`. Returns the handle if one was still held.
    pub(crate) fn reset(&mut self) -> Option<RecordingHandle> {
        let released = self.recording_handle.take();
        let attempt = self.attempt;
        *self = Self { attempt, ..Self::default() };
        released
    }

    /// Reset every counter and enter `Preparing`
    pub(crate) fn begin_preparing(&mut self) -> Option<RecordingHandle> {
        let released = self.reset();
        self.state = SessionState::Preparing;
        released
    }

    /// Enter `Recording` with a fresh accounting window. Detection health is kept.
    pub(crate) fn begin_recording(&mut self, handle: RecordingHandle, now: Instant) {
        self.state = SessionState::Recording;
        self.prompt = None;
        self.recording_handle = Some(handle);
        self.elapsed_recorded_ms = 0;
        self.paused_ms = 0;
        self.is_paused = false;
        self.stop_requested = false;
        self.last_face_seen_at = Some(now);
    }

    pub(crate) fn next_attempt(&mut self) -> AttemptId {
        self.attempt = AttemptId(self.attempt.0 + 1);
        self.attempt
    }

    pub(crate) fn set_prompt(&mut self, prompt: Option<Prompt>) {
        self.prompt = prompt;
    }

    /// Returns true only for the first stop request of the current recording
    pub(crate) fn mark_stop_requested(&mut self) -> bool {
        if self.state != SessionState::Recording || self.stop_requested {
            return false;
        }
        self.stop_requested = true;
        true
    }

    // ------------------------------------------------------------------
    // Licensed subordinate writes
    // ------------------------------------------------------------------

    /// Count a detector callback. Licensed in `Preparing` and `Recording`.
    pub fn note_detection_callback(&mut self, valid: bool) -> bool {
        if !matches!(self.state, SessionState::Preparing | SessionState::Recording) {
            return false;
        }
        self.detection_callback_count += 1;
        self.last_observation_valid = valid;
        if valid {
            self.valid_face_seen = true;
        }
        true
    }

    /// Licensed in `Preparing` only
    pub fn set_detection(&mut self, health: DetectionHealth) -> bool {
        if self.state != SessionState::Preparing {
            return false;
        }
        self.detection = health;
        true
    }

    /// Licensed in `Recording` only
    pub fn set_paused(&mut self, paused: bool) -> bool {
        if self.state != SessionState::Recording {
            return false;
        }
        self.is_paused = paused;
        true
    }

    /// Licensed in `Recording` only
    pub fn mark_face_seen(&mut self, now: Instant) -> bool {
        if self.state != SessionState::Recording {
            return false;
        }
        self.last_face_seen_at = Some(now);
        true
    }

    /// Licensed in `Recording` only
    pub fn add_recorded_ms(&mut self, ms: u64) -> bool {
        if self.state != SessionState::Recording {
            return false;
        }
        self.elapsed_recorded_ms = self.elapsed_recorded_ms.saturating_add(ms);
        true
    }

    /// Licensed in `Recording` only
    pub fn add_paused_ms(&mut self, ms: u64) -> bool {
        if self.state != SessionState::Recording {
            return false;
        }
        self.paused_ms = self.paused_ms.saturating_add(ms);
        true
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    pub fn elapsed_recorded_ms(&self) -> u64 {
        self.elapsed_recorded_ms
    }

    pub fn paused_ms(&self) -> u64 {
        self.paused_ms
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn detection(&self) -> DetectionHealth {
        self.detection
    }

    pub fn detection_callback_count(&self) -> u64 {
        self.detection_callback_count
    }

    pub fn last_face_seen_at(&self) -> Option<Instant> {
        self.last_face_seen_at
    }

    pub fn valid_face_seen(&self) -> bool {
        self.valid_face_seen
    }

    pub fn last_observation_valid(&self) -> bool {
        self.last_observation_valid
    }

    pub fn recording_handle(&self) -> Option<RecordingHandle> {
        self.recording_handle
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Pause/resume only applies when detection is trusted
    pub fn pause_logic_enabled(&self) -> bool {
        self.detection == DetectionHealth::Working
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            prompt: self.prompt.clone(),
            detection: self.detection,
            is_paused: self.is_paused,
            elapsed_recorded_ms: self.elapsed_recorded_ms,
            paused_ms: self.paused_ms,
            detection_callback_count: self.detection_callback_count,
            attempt: self.attempt,
            updated_at: Utc::now(),
        }
    }
}

/// Read-only view published to the UI after every processed input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub prompt: Option<Prompt>,
    pub detection: DetectionHealth,
    pub is_paused: bool,
    pub elapsed_recorded_ms: u64,
    pub paused_ms: u64,
    pub detection_callback_count: u64,
    pub attempt: AttemptId,
    pub updated_at: DateTime<Utc>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Session::new().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Instruction);
        assert_eq!(session.detection(), DetectionHealth::Unknown);
        assert!(session.recording_handle().is_none());
    }

    #[test]
    fn test_detection_write_licensed_by_preparing() {
        let mut session = Session::new();
        assert!(!session.set_detection(DetectionHealth::Working));

        session.begin_preparing();
        assert!(session.set_detection(DetectionHealth::Working));
        assert_eq!(session.detection(), DetectionHealth::Working);

        session.begin_recording(RecordingHandle(1), Instant::now());
        assert!(!session.set_detection(DetectionHealth::Broken));
        assert_eq!(session.detection(), DetectionHealth::Working);
    }

    #[test]
    fn test_recording_writes_licensed_by_recording() {
        let mut session = Session::new();
        session.begin_preparing();
        assert!(!session.add_recorded_ms(100));
        assert!(!session.set_paused(true));
        assert_eq!(session.elapsed_recorded_ms(), 0);

        session.begin_recording(RecordingHandle(7), Instant::now());
        assert!(session.add_recorded_ms(100));
        assert!(session.set_paused(true));
        assert_eq!(session.elapsed_recorded_ms(), 100);
        assert!(session.is_paused());
    }

    #[test]
    fn test_handle_released_when_leaving_recording() {
        let mut session = Session::new();
        session.begin_preparing();
        session.begin_recording(RecordingHandle(3), Instant::now());
        assert_eq!(session.recording_handle(), Some(RecordingHandle(3)));

        let released = session.transition(SessionState::Processing);
        assert_eq!(released, Some(RecordingHandle(3)));
        assert!(session.recording_handle().is_none());
        assert_eq!(session.state(), SessionState::Processing);
    }

    #[test]
    fn test_stop_request_is_idempotent() {
        let mut session = Session::new();
        assert!(!session.mark_stop_requested());

        session.begin_preparing();
        session.begin_recording(RecordingHandle(1), Instant::now());
        assert!(session.mark_stop_requested());
        assert!(!session.mark_stop_requested());
        assert!(session.stop_requested());
    }

    #[test]
    fn test_reset_keeps_attempt_counter() {
        let mut session = Session::new();
        session.begin_preparing();
        session.note_detection_callback(true);
        let attempt = session.next_attempt();
        session.begin_recording(RecordingHandle(1), Instant::now());
        session.add_recorded_ms(500);

        let released = session.reset();
        assert_eq!(released, Some(RecordingHandle(1)));
        assert_eq!(session.state(), SessionState::Instruction);
        assert_eq!(session.elapsed_recorded_ms(), 0);
        assert_eq!(session.detection_callback_count(), 0);
        assert!(!session.valid_face_seen());
        assert_eq!(session.attempt(), attempt);
        assert!(session.next_attempt() > attempt);
    }

    #[test]
    fn test_callbacks_ignored_outside_capture_states() {
        let mut session = Session::new();
        assert!(!session.note_detection_callback(true));
        assert_eq!(session.detection_callback_count(), 0);

        session.begin_preparing();
        assert!(session.note_detection_callback(false));
        assert!(session.note_detection_callback(true));
        assert_eq!(session.detection_callback_count(), 2);
        assert!(session.valid_face_seen());
    }

    #[test]
    fn test_snapshot_reflects_session() {
        let mut session = Session::new();
        session.begin_preparing();
        session.set_prompt(Some(Prompt::FallbackOffered));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Preparing);
        assert_eq!(snapshot.prompt, Some(Prompt::FallbackOffered));
    }
}

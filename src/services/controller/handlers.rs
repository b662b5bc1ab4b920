//! Input handlers for the SessionController
//!
//! Each handler runs to completion on the controller task. Handlers check
//! the current state (and attempt, for completions) before acting, so timers
//! or completions that outlived the state that armed them are inert.

use super::{InFlightSubmission, SessionController};
use crate::domain::error::DeviceError;
use crate::domain::event::{ControlEvent, FaceEvent};
use crate::domain::types::{
    AttemptId, CompletedRecording, DetectionHealth, Prompt, SessionState, SubmissionInputs,
    SubmissionResult, UserChoice,
};
use crate::io::recorder::RecordingSink;
use crate::io::staging::delete_file;
use crate::services::health_monitor::HealthVerdict;
use crate::services::recording_supervisor::{FaceTransition, TickOutcome};
use crate::services::submission::check_preconditions;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

impl SessionController {
    /// Dispatch one control event
    pub(crate) async fn handle_control(&mut self, event: ControlEvent) {
        debug!(event = %event.as_str(), state = %self.session.state().as_str(), "control_event");
        match event {
            ControlEvent::Start => self.handle_start().await,
            ControlEvent::Cancel => self.handle_cancel().await,
            ControlEvent::Choose(choice) => self.handle_choice(choice).await,
            ControlEvent::SetInputs(inputs) => self.handle_set_inputs(inputs),
            ControlEvent::RecordingFinished { attempt, result } => {
                self.handle_recording_finished(attempt, result).await;
            }
            ControlEvent::SubmissionFinished { attempt, result, latency_ms } => {
                self.handle_submission_finished(attempt, result, latency_ms).await;
            }
            // Handled by the run loop
            ControlEvent::Shutdown => {}
        }
    }

    // ------------------------------------------------------------------
    // Instruction -> Preparing
    // ------------------------------------------------------------------

    pub(crate) async fn handle_start(&mut self) {
        if self.session.state() != SessionState::Instruction {
            debug!(state = %self.session.state().as_str(), "start_ignored");
            return;
        }
        if let Some(Prompt::StartOver { reason }) = self.session.prompt() {
            warn!(reason = %reason, "start_refused_inputs_missing");
            return;
        }
        self.enter_preparing().await;
    }

    /// Fresh capture attempt: reset everything and arm the Preparing timers
    pub(crate) async fn enter_preparing(&mut self) {
        self.teardown().await;

        if let Err(e) = self.recorder.ensure_permission().await {
            warn!(error = %e, "camera_permission_denied");
            self.session.set_prompt(Some(Prompt::RecordingFailed { reason: e.to_string() }));
            return;
        }

        self.session.begin_preparing();
        self.health.reset();
        self.timers.arm_preparing(self.config.no_face_timeout(), self.health.poll_interval());
        self.metrics.record_session_started();

        info!(
            session_tag = %self.session_tag,
            attempt = %self.session.attempt(),
            no_face_timeout_ms = %self.config.no_face_timeout().as_millis(),
            "session_preparing"
        );
    }

    // ------------------------------------------------------------------
    // Detector callbacks
    // ------------------------------------------------------------------

    pub(crate) async fn handle_face(&mut self, event: FaceEvent) {
        self.metrics.record_detection_event();
        let valid = event.observation.is_valid_face(self.config.face_criteria());
        if !self.session.note_detection_callback(valid) {
            trace!(state = %self.session.state().as_str(), "face_event_outside_capture");
            return;
        }

        match self.session.state() {
            SessionState::Preparing => {
                if valid && self.session.detection() == DetectionHealth::Working {
                    self.start_recording().await;
                }
            }
            SessionState::Recording => {
                match self.supervisor.on_observation(&mut self.session, valid, event.received_at) {
                    FaceTransition::Paused => {
                        debug!(elapsed_ms = %self.session.elapsed_recorded_ms(), "recording_paused");
                    }
                    FaceTransition::Resumed => {
                        debug!(elapsed_ms = %self.session.elapsed_recorded_ms(), "recording_resumed");
                    }
                    FaceTransition::None => {}
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Preparing timers
    // ------------------------------------------------------------------

    pub(crate) async fn on_health_poll(&mut self) {
        match self.health.poll(&mut self.session) {
            HealthVerdict::Pending => {}
            HealthVerdict::Working => {
                self.timers.health_poll = None;
                self.metrics.record_detector_working();
                info!(
                    checks = %self.health.checks(),
                    callbacks = %self.session.detection_callback_count(),
                    "detection_confirmed_working"
                );
                if self.session.last_observation_valid() {
                    self.start_recording().await;
                }
            }
            HealthVerdict::Broken => {
                self.timers.health_poll = None;
                self.metrics.record_detector_broken();
                warn!(
                    checks = %self.health.checks(),
                    callbacks = %self.session.detection_callback_count(),
                    "detection_confirmed_broken"
                );
                if self.config.auto_accept_fallback() {
                    info!("blind_capture_auto_accepted");
                    self.start_recording().await;
                } else {
                    self.session.set_prompt(Some(Prompt::FallbackOffered));
                }
            }
            HealthVerdict::Ignored => {
                self.timers.health_poll = None;
            }
        }
    }

    pub(crate) async fn on_no_face_timeout(&mut self) {
        self.timers.no_face = None;
        if self.session.state() != SessionState::Preparing {
            return;
        }
        self.metrics.record_no_face_timeout();
        warn!(
            callbacks = %self.session.detection_callback_count(),
            valid_face_seen = %self.session.valid_face_seen(),
            detection = %self.session.detection().as_str(),
            "no_face_timeout"
        );
        self.fail_to_instruction(Prompt::NoFaceTimeout).await;
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Start a device recording from Preparing or resume from Stalled
    pub(crate) async fn start_recording(&mut self) {
        if !matches!(self.session.state(), SessionState::Preparing | SessionState::Stalled) {
            return;
        }

        let attempt = self.session.next_attempt();
        let sink = RecordingSink::new(attempt, self.control_tx.clone());
        match self.recorder.start(sink).await {
            Ok(handle) => {
                self.timers.cancel_preparing();
                self.session.begin_recording(handle, Instant::now());
                let watchdog = self
                    .session
                    .pause_logic_enabled()
                    .then(|| self.config.stall_watchdog_interval());
                self.timers
                    .arm_recording(Duration::from_millis(self.supervisor.tick_ms()), watchdog);
                self.metrics.record_recording_started();
                info!(
                    attempt = %attempt,
                    handle = %handle,
                    detection = %self.session.detection().as_str(),
                    target_ms = %self.supervisor.target_ms(),
                    "recording_started"
                );
            }
            Err(e) => {
                self.metrics.record_recording_failed();
                warn!(attempt = %attempt, error = %e, "recording_start_failed");
                self.fail_to_instruction(Prompt::RecordingFailed { reason: e.to_string() }).await;
            }
        }
    }

    pub(crate) async fn on_progress_tick(&mut self) {
        match self.supervisor.on_tick(&mut self.session) {
            TickOutcome::Continue => {
                trace!(
                    elapsed_ms = %self.session.elapsed_recorded_ms(),
                    paused_ms = %self.session.paused_ms(),
                    "recording_progress"
                );
            }
            TickOutcome::TargetReached => self.request_stop().await,
        }
    }

    /// Ask the device to stop. A second request for the same recording is a no-op.
    pub(crate) async fn request_stop(&mut self) {
        if !self.session.mark_stop_requested() {
            return;
        }
        self.timers.cancel_recording();
        let Some(handle) = self.session.recording_handle() else {
            return;
        };
        info!(
            attempt = %self.session.attempt(),
            handle = %handle,
            elapsed_ms = %self.session.elapsed_recorded_ms(),
            paused_ms = %self.session.paused_ms(),
            "recording_stop_requested"
        );
        self.recorder.stop(handle).await;
    }

    pub(crate) async fn on_watchdog(&mut self) {
        let now = Instant::now();
        if !self.supervisor.is_stalled(&self.session, now) {
            return;
        }
        self.metrics.record_stall();
        warn!(
            attempt = %self.session.attempt(),
            absent_ms = %self.supervisor.face_absent_for(&self.session, now).as_millis(),
            elapsed_ms = %self.session.elapsed_recorded_ms(),
            "recording_stalled"
        );

        self.timers.cancel_recording();
        let released = self.session.transition(SessionState::Stalled);
        self.session.set_prompt(Some(Prompt::Stalled));
        if let Some(handle) = released {
            self.recorder.stop(handle).await;
        }
    }

    pub(crate) async fn handle_recording_finished(
        &mut self,
        attempt: AttemptId,
        result: Result<CompletedRecording, DeviceError>,
    ) {
        if attempt != self.session.attempt() || self.session.state() != SessionState::Recording {
            debug!(
                attempt = %attempt,
                current = %self.session.attempt(),
                state = %self.session.state().as_str(),
                "stale_recording_discarded"
            );
            if let Ok(recording) = result {
                delete_file(&recording.path).await;
            }
            return;
        }

        let reached = self.supervisor.target_reached(&self.session);
        let failure = match result {
            Ok(recording) if reached => {
                self.metrics.record_recording_completed();
                info!(
                    attempt = %attempt,
                    path = %recording.path.display(),
                    duration_hint_ms = ?recording.duration_hint_ms,
                    "recording_completed"
                );
                self.begin_submission(recording).await;
                return;
            }
            Ok(recording) => {
                delete_file(&recording.path).await;
                DeviceError::EndedEarly { elapsed_ms: self.session.elapsed_recorded_ms() }
            }
            Err(e) => e,
        };

        // The device already released this recording
        self.session.transition(SessionState::Instruction);
        self.metrics.record_recording_failed();
        warn!(attempt = %attempt, error = %failure, "recording_failed");
        self.fail_to_instruction(Prompt::RecordingFailed { reason: failure.to_string() }).await;
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    pub(crate) async fn begin_submission(&mut self, recording: CompletedRecording) {
        // The handle is spent once the device has delivered the file
        self.session.transition(SessionState::Processing);
        self.timers.teardown();

        let ready = match check_preconditions(&self.inputs) {
            Ok(ready) => ready,
            Err(e) => {
                self.metrics.record_precondition_failure();
                warn!(error = %e, "submission_precondition_failed");
                delete_file(&recording.path).await;
                self.fail_to_instruction(Prompt::StartOver { reason: e.to_string() }).await;
                return;
            }
        };

        let attempt = self.session.attempt();
        let staged_path = self.pipeline.staged_path(&self.session_tag, attempt);
        let pipeline = self.pipeline.clone();
        let tx = self.control_tx.clone();
        let task_path = staged_path.clone();

        let task = tokio::spawn(async move {
            let start = Instant::now();
            let result = pipeline.submit(recording, ready, task_path).await;
            let latency_ms = start.elapsed().as_millis() as u64;
            let _ = tx.send(ControlEvent::SubmissionFinished { attempt, result, latency_ms });
        });

        info!(attempt = %attempt, staged_path = %staged_path.display(), "submission_started");
        self.submission = Some(InFlightSubmission { attempt, staged_path, task });
    }

    pub(crate) async fn handle_submission_finished(
        &mut self,
        attempt: AttemptId,
        result: SubmissionResult,
        latency_ms: u64,
    ) {
        let current = self.submission.as_ref().map(|s| s.attempt);
        if current != Some(attempt) || self.session.state() != SessionState::Processing {
            debug!(attempt = %attempt, "stale_submission_result");
            return;
        }
        // Task has already finished and cleaned up its staged copy
        self.submission = None;

        let verified = result == SubmissionResult::Verified;
        self.metrics.record_submission(verified, latency_ms);
        info!(
            attempt = %attempt,
            result = %result.as_str(),
            latency_ms = %latency_ms,
            "submission_finished"
        );

        match result {
            SubmissionResult::Verified => {
                self.session.transition(SessionState::Success);
            }
            SubmissionResult::Failed { reason } => {
                self.fail_to_instruction(Prompt::SubmissionFailed { reason }).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // User choices
    // ------------------------------------------------------------------

    pub(crate) async fn handle_choice(&mut self, choice: UserChoice) {
        let state = self.session.state();
        let prompt = self.session.prompt().map(|p| p.as_str()).unwrap_or("none");

        match (self.session.prompt().cloned(), choice) {
            (Some(Prompt::FallbackOffered), UserChoice::AcceptFallback)
                if state == SessionState::Preparing =>
            {
                info!("blind_capture_accepted");
                self.start_recording().await;
            }
            (Some(Prompt::Stalled), UserChoice::Resume) if state == SessionState::Stalled => {
                info!(attempt = %self.session.attempt(), "stall_resume");
                self.start_recording().await;
            }
            (Some(Prompt::Stalled), UserChoice::Restart) => {
                info!(attempt = %self.session.attempt(), "stall_restart");
                self.teardown().await;
            }
            (
                Some(
                    Prompt::RecordingFailed { .. }
                    | Prompt::NoFaceTimeout
                    | Prompt::SubmissionFailed { .. },
                ),
                UserChoice::Retry,
            ) => {
                info!(prompt = %prompt, "capture_retry");
                self.enter_preparing().await;
            }
            (Some(Prompt::StartOver { .. }), UserChoice::Retry) => {
                warn!("retry_refused_start_over");
            }
            _ => {
                debug!(choice = ?choice, prompt = %prompt, state = %state.as_str(), "choice_ignored");
            }
        }
    }

    pub(crate) async fn handle_cancel(&mut self) {
        info!(state = %self.session.state().as_str(), attempt = %self.session.attempt(), "session_cancelled");
        self.teardown().await;
    }

    pub(crate) fn handle_set_inputs(&mut self, inputs: SubmissionInputs) {
        if self.session.state() != SessionState::Instruction {
            warn!(state = %self.session.state().as_str(), "inputs_change_ignored_outside_instruction");
            return;
        }
        self.inputs = inputs;
        if matches!(self.session.prompt(), Some(Prompt::StartOver { .. })) {
            self.session.set_prompt(None);
        }
        debug!(
            has_identifier = %self.inputs.identifier.is_some(),
            has_reference = %self.inputs.reference.is_some(),
            "submission_inputs_updated"
        );
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    /// Release everything and reset to Instruction. Safe to call repeatedly.
    ///
    /// Cancels every timer, aborts an in-flight submission and discards its
    /// staged copy, and stops the device unless a stop is already pending.
    pub(crate) async fn teardown(&mut self) {
        self.timers.teardown();

        if let Some(submission) = self.submission.take() {
            let staged_path = submission.staged_path.clone();
            drop(submission);
            debug!(staged_path = %staged_path.display(), "submission_aborted");
            self.pipeline.discard_staged(&staged_path).await;
        }

        let stop_pending = self.session.stop_requested();
        if let Some(handle) = self.session.reset() {
            if !stop_pending {
                info!(handle = %handle, "recording_stopped_on_teardown");
                self.recorder.stop(handle).await;
            }
        }
    }

    /// Reset to Instruction and surface `prompt`
    pub(crate) async fn fail_to_instruction(&mut self, prompt: Prompt) {
        self.teardown().await;
        self.session.set_prompt(Some(prompt));
    }
}

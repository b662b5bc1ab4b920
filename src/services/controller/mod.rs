//! Session controller - the liveness capture state machine
//!
//! The controller is a single tokio task that owns the `Session` and all
//! four timing activities:
//! - the global no-face timeout and the detection health poll (Preparing)
//! - the progress tick and the pause watchdog (Recording)
//!
//! Every input is processed serially on this task: user commands and device
//! or upload completions arrive on the control queue, detector callbacks on
//! the face queue, and timers are raced alongside both in one `select!`.
//! Timers are plain `Option` fields, so cancelling one is dropping it.

mod handlers;

use crate::domain::event::{ControlEvent, FaceEvent};
use crate::domain::session::{Session, SessionSnapshot};
use crate::domain::types::{AttemptId, FaceObservation, SubmissionInputs, UserChoice};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::recorder::Recorder;
use crate::io::staging::FileStager;
use crate::io::uploader::Uploader;
use crate::services::health_monitor::DetectionHealthMonitor;
use crate::services::recording_supervisor::RecordingSupervisor;
use crate::services::submission::SubmissionPipeline;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, Sleep};
use tracing::{debug, info, trace};

/// Detector callbacks buffered between the camera layer and the controller
pub const FACE_CHANNEL_CAPACITY: usize = 256;

/// The four timing activities. At most two are armed at any time.
#[derive(Default)]
pub(crate) struct SessionTimers {
    pub(crate) no_face: Option<Pin<Box<Sleep>>>,
    pub(crate) health_poll: Option<Interval>,
    pub(crate) progress: Option<Interval>,
    pub(crate) watchdog: Option<Interval>,
}

impl SessionTimers {
    pub(crate) fn arm_preparing(&mut self, no_face_timeout: Duration, poll_interval: Duration) {
        self.no_face = Some(Box::pin(tokio::time::sleep(no_face_timeout)));
        self.health_poll = Some(periodic(poll_interval));
    }

    /// The watchdog only runs when pause logic is enabled
    pub(crate) fn arm_recording(&mut self, tick: Duration, watchdog: Option<Duration>) {
        self.progress = Some(periodic(tick));
        self.watchdog = watchdog.map(periodic);
    }

    pub(crate) fn cancel_preparing(&mut self) {
        self.no_face = None;
        self.health_poll = None;
    }

    pub(crate) fn cancel_recording(&mut self) {
        self.progress = None;
        self.watchdog = None;
    }

    pub(crate) fn teardown(&mut self) {
        self.cancel_preparing();
        self.cancel_recording();
    }

    pub(crate) fn pending(&self) -> usize {
        [
            self.no_face.is_some(),
            self.health_poll.is_some(),
            self.progress.is_some(),
            self.watchdog.is_some(),
        ]
        .into_iter()
        .filter(|armed| *armed)
        .count()
    }
}

/// First tick one full period after arming
fn periodic(period: Duration) -> Interval {
    interval_at(Instant::now() + period, period)
}

async fn tick_opt(interval: &mut Option<Interval>) -> Instant {
    match interval {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// A spawned submission; dropping it aborts the upload
pub(crate) struct InFlightSubmission {
    pub(crate) attempt: AttemptId,
    pub(crate) staged_path: PathBuf,
    pub(crate) task: JoinHandle<()>,
}

impl Drop for InFlightSubmission {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Liveness capture session controller
pub struct SessionController {
    pub(crate) session: Session,
    pub(crate) config: Config,
    /// Decides whether the detector is delivering callbacks
    pub(crate) health: DetectionHealthMonitor,
    /// Progress accounting, pause/resume and stall checks
    pub(crate) supervisor: RecordingSupervisor,
    pub(crate) pipeline: SubmissionPipeline,
    pub(crate) recorder: Arc<dyn Recorder>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) inputs: SubmissionInputs,
    pub(crate) timers: SessionTimers,
    pub(crate) submission: Option<InFlightSubmission>,
    /// Unique per controller, keeps staged file names apart
    pub(crate) session_tag: String,
    /// Kept so recording sinks and submission tasks can report back
    pub(crate) control_tx: mpsc::UnboundedSender<ControlEvent>,
    control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    face_rx: mpsc::Receiver<FaceEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    /// Run until shutdown or until every [`SessionHandle`] is dropped
    pub async fn run(mut self) {
        info!(session_tag = %self.session_tag, "session_controller_started");
        self.publish();

        loop {
            tokio::select! {
                biased;

                event = self.control_rx.recv() => {
                    match event {
                        Some(ControlEvent::Shutdown) | None => break,
                        Some(event) => self.handle_control(event).await,
                    }
                }
                _ = sleep_opt(&mut self.timers.no_face) => {
                    self.on_no_face_timeout().await;
                }
                _ = tick_opt(&mut self.timers.health_poll) => {
                    self.on_health_poll().await;
                }
                _ = tick_opt(&mut self.timers.progress) => {
                    self.on_progress_tick().await;
                }
                _ = tick_opt(&mut self.timers.watchdog) => {
                    self.on_watchdog().await;
                }
                event = self.face_rx.recv() => {
                    match event {
                        Some(event) => self.handle_face(event).await,
                        // All handles dropped: the embedding view is gone
                        None => break,
                    }
                }
            }
            self.publish();
        }

        self.teardown().await;
        self.publish();
        info!(session_tag = %self.session_tag, "session_controller_stopped");
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Number of timing activities currently armed
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    /// Push the current view to subscribers, skipping no-op updates
    pub(crate) fn publish(&self) {
        let snapshot = self.session.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            let changed = current.state != snapshot.state
                || current.prompt != snapshot.prompt
                || current.detection != snapshot.detection
                || current.is_paused != snapshot.is_paused
                || current.elapsed_recorded_ms != snapshot.elapsed_recorded_ms
                || current.paused_ms != snapshot.paused_ms
                || current.detection_callback_count != snapshot.detection_callback_count
                || current.attempt != snapshot.attempt;
            if changed {
                *current = snapshot;
            }
            changed
        });
    }
}

/// Cloneable front door used by the UI and the camera layer
#[derive(Clone)]
pub struct SessionHandle {
    control_tx: mpsc::UnboundedSender<ControlEvent>,
    face_tx: mpsc::Sender<FaceEvent>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    metrics: Arc<Metrics>,
}

impl SessionHandle {
    pub fn start(&self) {
        self.send(ControlEvent::Start);
    }

    pub fn cancel(&self) {
        self.send(ControlEvent::Cancel);
    }

    pub fn choose(&self, choice: UserChoice) {
        self.send(ControlEvent::Choose(choice));
    }

    pub fn set_inputs(&self, inputs: SubmissionInputs) {
        self.send(ControlEvent::SetInputs(inputs));
    }

    /// Stop the controller with full cleanup
    pub fn shutdown(&self) {
        self.send(ControlEvent::Shutdown);
    }

    /// Deliver one detector callback without blocking. Returns false if the
    /// observation was dropped.
    pub fn face_detected(&self, observation: FaceObservation) -> bool {
        let event = FaceEvent { observation, received_at: Instant::now() };
        match self.face_tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.record_detection_event_dropped();
                trace!("face_event_dropped_channel_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    fn send(&self, event: ControlEvent) {
        let name = event.as_str();
        if self.control_tx.send(event).is_err() {
            debug!(event = %name, "session_controller_gone");
        }
    }
}

/// Create a session controller and its handle
///
/// Returns the handle (for the UI and detector) and the controller (to be spawned)
pub fn create_session(
    config: Config,
    recorder: Arc<dyn Recorder>,
    uploader: Arc<dyn Uploader>,
    metrics: Arc<Metrics>,
    inputs: SubmissionInputs,
) -> (SessionHandle, SessionController) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (face_tx, face_rx) = mpsc::channel(FACE_CHANNEL_CAPACITY);
    let session = Session::new();
    let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

    let pipeline = SubmissionPipeline::new(
        FileStager::new(config.staging_dir()),
        uploader,
        metrics.clone(),
    );

    let controller = SessionController {
        session,
        health: DetectionHealthMonitor::new(&config),
        supervisor: RecordingSupervisor::new(&config),
        pipeline,
        recorder,
        metrics: metrics.clone(),
        inputs,
        timers: SessionTimers::default(),
        submission: None,
        session_tag: uuid::Uuid::now_v7().simple().to_string(),
        control_tx: control_tx.clone(),
        control_rx,
        face_rx,
        snapshot_tx,
        config,
    };
    let handle = SessionHandle { control_tx, face_tx, snapshot_rx, metrics };
    (handle, controller)
}

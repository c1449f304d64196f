use crate::camera::{CameraResource, CaptureFrame};
use crate::common::{ClockFaceError, Config, Result};
use crate::service::{ActivityFeed, ClockAction, RecognitionReply, SessionTransport};
use crate::session::{FrameSampler, SessionPhase, SessionState};
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;

const WAITING_MESSAGE: &str = "System active. Please look at the camera to clock in/out.";
const UNRECOGNIZED_MESSAGE: &str = "Face not recognized. Please contact admin if you are registered.";
const SERVER_ERROR_MESSAGE: &str = "Error communicating with server.";

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionEvent {
    pub identity_name: String,
    pub external_id: String,
    pub action: ClockAction,
    pub confidence: f32,
    pub is_late: bool,
    pub observed_at: DateTime<Local>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognitionSnapshot {
    pub state: SessionState,
    pub last_event: Option<RecognitionEvent>,
    /// Failed ticks since the last successful round trip.
    pub consecutive_errors: u32,
}

struct RecognitionState {
    generation: u64,
    phase: SessionPhase,
    message: String,
    last_error: Option<String>,
    last_event: Option<RecognitionEvent>,
    consecutive_errors: u32,
    sampler: FrameSampler,
}

impl RecognitionState {
    fn snapshot(&self) -> RecognitionSnapshot {
        RecognitionSnapshot {
            state: SessionState {
                phase: self.phase,
                message: self.message.clone(),
                last_error: self.last_error.clone(),
                generation: self.generation,
            },
            last_event: self.last_event.clone(),
            consecutive_errors: self.consecutive_errors,
        }
    }
}

struct Inner {
    camera: CameraResource,
    transport: Arc<dyn SessionTransport>,
    feed: ActivityFeed,
    interval: Duration,
    escalation_threshold: Option<u32>,
    state: Mutex<RecognitionState>,
    updates: watch::Sender<RecognitionSnapshot>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RecognitionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &RecognitionState) {
        self.updates.send_replace(state.snapshot());
    }

    async fn on_frame(&self, generation: u64, frame: CaptureFrame) {
        {
            let mut state = self.lock();
            if state.generation != generation || state.phase != SessionPhase::Running {
                tracing::debug!("Dropping recognition tick from generation {}", generation);
                return;
            }
            state.phase = SessionPhase::AwaitingReply;
            self.publish(&state);
        }

        let reply = self.transport.submit_recognition_frame(&frame).await;

        let recognized = {
            let mut state = self.lock();
            if state.generation != generation || state.phase != SessionPhase::AwaitingReply {
                tracing::debug!("Discarding stale recognition reply from generation {}", generation);
                return;
            }
            state.phase = SessionPhase::Running;
            let recognized = self.apply_reply(&mut state, reply);
            self.publish(&state);
            recognized
        };

        if recognized {
            if let Err(e) = self.feed.refresh().await {
                tracing::debug!("Activity refresh after recognition failed: {}", e);
            }
        }
    }

    /// Returns whether the reply recorded a new recognition.
    fn apply_reply(&self, state: &mut RecognitionState, reply: RecognitionReply) -> bool {
        match reply {
            RecognitionReply::Recognized { name, external_id, action, confidence, is_late } => {
                tracing::info!(
                    "{} for {} ({}) confidence {:.2}{}",
                    action, name, external_id, confidence, if is_late { " [late]" } else { "" }
                );
                state.message = format!("{} successful for {}", action, name);
                state.last_event = Some(RecognitionEvent {
                    identity_name: name,
                    external_id,
                    action,
                    confidence,
                    is_late,
                    observed_at: Local::now(),
                });
                state.consecutive_errors = 0;
                true
            }
            RecognitionReply::NoFace => {
                state.message = WAITING_MESSAGE.into();
                state.last_event = None;
                state.consecutive_errors = 0;
                false
            }
            RecognitionReply::Unknown => {
                state.message = UNRECOGNIZED_MESSAGE.into();
                state.last_event = None;
                state.consecutive_errors = 0;
                false
            }
            RecognitionReply::Error { message } => {
                state.consecutive_errors += 1;
                tracing::warn!(
                    "Recognition round trip failed ({} in a row): {}",
                    state.consecutive_errors, message
                );
                state.message = match self.escalation_threshold {
                    Some(threshold) if state.consecutive_errors >= threshold => {
                        tracing::warn!(
                            "Recognition has failed {} consecutive times; check the backend",
                            state.consecutive_errors
                        );
                        format!(
                            "Recognition unavailable: {} consecutive failures. Please contact admin.",
                            state.consecutive_errors
                        )
                    }
                    _ => SERVER_ERROR_MESSAGE.into(),
                };
                state.last_error = Some(message);
                false
            }
        }
    }
}

/// Unattended clock-in/clock-out loop. Failed round trips are reported but
/// never end the session.
pub struct RecognitionSession {
    inner: Arc<Inner>,
}

impl RecognitionSession {
    pub fn new(
        camera: CameraResource,
        transport: Arc<dyn SessionTransport>,
        feed: ActivityFeed,
        config: &Config,
    ) -> Self {
        let state = RecognitionState {
            generation: 0,
            phase: SessionPhase::Idle,
            message: String::new(),
            last_error: None,
            last_event: None,
            consecutive_errors: 0,
            sampler: FrameSampler::new(config.camera.jpeg_quality),
        };
        let (updates, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(Inner {
                camera,
                transport,
                feed,
                interval: config.recognition.sample_interval(),
                escalation_threshold: config.recognition.error_escalation_threshold,
                state: Mutex::new(state),
                updates,
            }),
        }
    }

    pub fn snapshot(&self) -> RecognitionSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot().state
    }

    pub fn last_event(&self) -> Option<RecognitionEvent> {
        self.snapshot().last_event
    }

    pub fn subscribe(&self) -> watch::Receiver<RecognitionSnapshot> {
        self.inner.updates.subscribe()
    }

    /// Acquire the camera and begin the recognition loop. On acquisition
    /// failure the session returns to `Idle` with an explanatory message;
    /// `StartCancelled` means `stop()` won the race with the camera.
    pub async fn start(&self) -> Result<()> {
        let generation = {
            let mut state = self.inner.lock();
            if state.phase.is_active() {
                return Err(ClockFaceError::SessionActive);
            }
            state.generation += 1;
            state.phase = SessionPhase::Acquiring;
            state.message = "Starting camera system...".into();
            state.last_error = None;
            state.last_event = None;
            state.consecutive_errors = 0;
            self.inner.publish(&state);
            state.generation
        };

        if let Err(e) = self.inner.camera.acquire().await {
            let mut state = self.inner.lock();
            if state.generation == generation && state.phase == SessionPhase::Acquiring {
                state.phase = SessionPhase::Idle;
                state.message = match e {
                    ClockFaceError::PermissionDenied(_) => {
                        "Failed to access camera: permission was denied.".into()
                    }
                    _ => "Failed to access camera. Please ensure it's connected and permission is granted.".into(),
                };
                state.last_error = Some(e.to_string());
                self.inner.publish(&state);
            }
            tracing::error!("Camera acquisition failed: {}", e);
            return Err(e);
        }

        let mut state = self.inner.lock();
        if state.generation != generation || state.phase != SessionPhase::Acquiring {
            self.inner.camera.release();
            return Err(ClockFaceError::StartCancelled);
        }

        state.phase = SessionPhase::Running;
        state.message = WAITING_MESSAGE.into();

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        state.sampler.start(self.inner.camera.clone(), self.inner.interval, move |frame| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.on_frame(generation, frame).await;
                }
            }
        });
        self.inner.publish(&state);
        tracing::info!("Recognition system active");
        Ok(())
    }

    /// Stop sampling, release the camera, forget the last recognition and
    /// move to `Stopped`. A no-op while `Idle`.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if state.phase == SessionPhase::Idle {
            return;
        }
        state.sampler.stop();
        if state.phase.is_active() {
            self.inner.camera.release();
        }
        state.last_event = None;
        if state.phase != SessionPhase::Stopped {
            state.phase = SessionPhase::Stopped;
            state.message = "System stopped.".into();
            tracing::info!("Recognition system stopped");
        }
        self.inner.publish(&state);
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.sampler.stop();
        if state.phase.is_active() {
            self.inner.camera.release();
        }
        // in-flight replies must not land on a disposed session
        state.generation += 1;
        state.phase = SessionPhase::Stopped;
        self.inner.publish(&state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeCamera, ScriptedTransport};

    fn bob_clock_in() -> RecognitionReply {
        RecognitionReply::Recognized {
            name: "Bob".into(),
            external_id: "E7".into(),
            action: ClockAction::ClockIn,
            confidence: 0.92,
            is_late: false,
        }
    }

    fn session_with(
        camera: &Arc<FakeCamera>,
        transport: &Arc<ScriptedTransport>,
        config: &Config,
    ) -> RecognitionSession {
        RecognitionSession::new(
            CameraResource::new(camera.clone()),
            transport.clone(),
            ActivityFeed::new(transport.clone()),
            config,
        )
    }

    fn session(camera: &Arc<FakeCamera>, transport: &Arc<ScriptedTransport>) -> RecognitionSession {
        session_with(camera, transport, &Config::default())
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_stays_idle() {
        let camera = FakeCamera::denied();
        let transport = ScriptedTransport::new();
        let session = session(&camera, &transport);

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, ClockFaceError::PermissionDenied(_)));

        let state = session.state();
        assert_eq!(state.phase, SessionPhase::Idle);
        assert!(state.message.contains("permission"));

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(transport.recognition_calls(), 0);
        assert_eq!(camera.releases(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recognition_records_event_and_refreshes_feed_once() {
        let camera = FakeCamera::new(64, 48);
        let transport = ScriptedTransport::new();
        transport.push_recognition(bob_clock_in());
        let session = session(&camera, &transport);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let event = session.last_event().unwrap();
        assert_eq!(event.identity_name, "Bob");
        assert_eq!(event.action, ClockAction::ClockIn);
        assert!((event.confidence - 0.92).abs() < f32::EPSILON);
        assert!(!event.is_late);
        assert_eq!(session.state().message, "Clock In successful for Bob");
        assert_eq!(session.state().phase, SessionPhase::Running);
        assert_eq!(transport.activity_calls(), 1);
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn errors_keep_session_active() {
        let camera = FakeCamera::new(64, 48);
        let transport = ScriptedTransport::new();
        transport.push_recognition(RecognitionReply::Error { message: "timeout".into() });
        transport.push_recognition(RecognitionReply::Error { message: "timeout".into() });
        transport.push_recognition(RecognitionReply::NoFace);
        let session = session(&camera, &transport);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state.phase, SessionPhase::Running);
        assert_eq!(snapshot.consecutive_errors, 2);
        assert_eq!(snapshot.state.message, SERVER_ERROR_MESSAGE);
        assert_eq!(snapshot.state.last_error.as_deref(), Some("timeout"));
        assert_eq!(camera.releases(), 0);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.consecutive_errors, 0);
        assert_eq!(snapshot.state.message, WAITING_MESSAGE);
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn escalates_only_when_threshold_configured() {
        let mut config = Config::default();
        config.recognition.error_escalation_threshold = Some(2);

        let camera = FakeCamera::new(64, 48);
        let transport = ScriptedTransport::new();
        for _ in 0..3 {
            transport.push_recognition(RecognitionReply::Error { message: "down".into() });
        }
        let session = session_with(&camera, &transport, &config);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(session.state().message, SERVER_ERROR_MESSAGE);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(session.state().message.contains("2 consecutive failures"));
        assert_eq!(session.state().phase, SessionPhase::Running);
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn no_face_and_unknown_clear_last_event() {
        let camera = FakeCamera::new(64, 48);
        let transport = ScriptedTransport::new();
        transport.push_recognition(bob_clock_in());
        transport.push_recognition(RecognitionReply::Unknown);
        let session = session(&camera, &transport);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(session.last_event().is_some());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(session.last_event().is_none());
        assert_eq!(session.state().message, UNRECOGNIZED_MESSAGE);
        assert_eq!(transport.activity_calls(), 1);
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_event_and_releases() {
        let camera = FakeCamera::new(64, 48);
        let transport = ScriptedTransport::new();
        transport.push_recognition(bob_clock_in());
        let session = session(&camera, &transport);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        session.stop();

        assert!(session.last_event().is_none());
        assert_eq!(session.state().phase, SessionPhase::Stopped);
        assert_eq!(camera.releases(), 1);

        let calls = transport.recognition_calls();
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(transport.recognition_calls(), calls);

        session.stop();
        assert_eq!(camera.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_running_session_releases_camera() {
        let camera = FakeCamera::new(64, 48);
        let transport = ScriptedTransport::new();
        let session = session(&camera, &transport);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        let calls = transport.recognition_calls();
        assert!(calls >= 2);

        drop(session);
        assert_eq!(camera.releases(), 1);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(transport.recognition_calls(), calls);
        assert_eq!(camera.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recognition_after_drop_is_discarded() {
        let camera = FakeCamera::new(64, 48);
        let transport = ScriptedTransport::with_latency(Duration::from_millis(500));
        transport.push_recognition(bob_clock_in());
        let session = session(&camera, &transport);
        let updates = session.subscribe();

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(updates.borrow().state.phase, SessionPhase::AwaitingReply);

        drop(session);
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let last = updates.borrow().clone();
        assert_eq!(last.state.phase, SessionPhase::Stopped);
        assert!(last.last_event.is_none());
        assert_eq!(transport.activity_calls(), 0);
        assert_eq!(camera.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_acquiring_releases_late_stream() {
        let camera = FakeCamera::slow_to_open(64, 48, Duration::from_millis(300));
        let transport = ScriptedTransport::new();
        let session = session(&camera, &transport);

        let (started, _) = tokio::join!(session.start(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            session.stop();
        });

        assert!(matches!(started, Err(ClockFaceError::StartCancelled)));
        assert_eq!(session.state().phase, SessionPhase::Stopped);
        assert_eq!(camera.acquires(), 1);
        assert_eq!(camera.releases(), 1);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(transport.recognition_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_camera_blocks_second_session() {
        let camera = FakeCamera::new(64, 48);
        let transport = ScriptedTransport::new();
        let resource = CameraResource::new(camera.clone());
        let config = Config::default();

        let first = RecognitionSession::new(
            resource.clone(), transport.clone(), ActivityFeed::new(transport.clone()), &config,
        );
        let second = RecognitionSession::new(
            resource.clone(), transport.clone(), ActivityFeed::new(transport.clone()), &config,
        );

        first.start().await.unwrap();
        assert!(matches!(second.start().await, Err(ClockFaceError::CameraBusy)));
        assert_eq!(second.state().phase, SessionPhase::Idle);

        first.stop();
        second.start().await.unwrap();
        second.stop();
        assert_eq!(camera.acquires(), 2);
        assert_eq!(camera.releases(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_never_overlaps() {
        let camera = FakeCamera::new(64, 48);
        let transport = ScriptedTransport::with_latency(Duration::from_millis(2500));
        let session = session(&camera, &transport);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        session.stop();

        assert_eq!(transport.max_in_flight(), 1);
        assert!(transport.recognition_calls() <= 4);
    }
}

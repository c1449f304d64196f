use crate::camera::{CameraResource, CaptureFrame};
use crate::common::{ClockFaceError, Config, Result};
use crate::service::{EnrollmentReply, Identity, SessionTransport};
use crate::session::{FrameSampler, Outcome, SessionPhase, SessionState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentProgress {
    pub identity: Identity,
    pub images_captured: u32,
    pub target_images: u32,
    pub face_detected: bool,
    pub status: SessionPhase,
}

impl Default for EnrollmentProgress {
    fn default() -> Self {
        Self {
            identity: Identity::default(),
            images_captured: 0,
            target_images: 0,
            face_detected: false,
            status: SessionPhase::Idle,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrollmentSnapshot {
    pub state: SessionState,
    pub progress: EnrollmentProgress,
}

struct EnrollmentState {
    generation: u64,
    phase: SessionPhase,
    message: String,
    last_error: Option<String>,
    progress: EnrollmentProgress,
    sampler: FrameSampler,
}

impl EnrollmentState {
    fn snapshot(&self) -> EnrollmentSnapshot {
        EnrollmentSnapshot {
            state: SessionState {
                phase: self.phase,
                message: self.message.clone(),
                last_error: self.last_error.clone(),
                generation: self.generation,
            },
            progress: EnrollmentProgress {
                status: self.phase,
                ..self.progress.clone()
            },
        }
    }

    /// Apply a progress reply without ever moving the counters backwards.
    fn apply_progress(&mut self, images_captured: u32, target_images: u32, face_detected: bool) {
        if images_captured < self.progress.images_captured {
            tracing::warn!(
                "Backend reported {} captured images after {}; keeping the higher count",
                images_captured, self.progress.images_captured
            );
        }
        if target_images < self.progress.target_images {
            tracing::warn!(
                "Backend lowered target from {} to {}; ignoring",
                self.progress.target_images, target_images
            );
        }
        self.progress.images_captured = self.progress.images_captured.max(images_captured);
        self.progress.target_images = self.progress.target_images.max(target_images);
        self.progress.face_detected = face_detected;
    }
}

struct Inner {
    camera: CameraResource,
    transport: Arc<dyn SessionTransport>,
    interval: Duration,
    state: Mutex<EnrollmentState>,
    updates: watch::Sender<EnrollmentSnapshot>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, EnrollmentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &EnrollmentState) {
        self.updates.send_replace(state.snapshot());
    }

    fn teardown(&self, state: &mut EnrollmentState) {
        state.sampler.stop();
        self.camera.release();
    }

    async fn on_frame(&self, generation: u64, frame: CaptureFrame) {
        let identity = {
            let mut state = self.lock();
            if state.generation != generation || state.phase != SessionPhase::Running {
                tracing::debug!("Dropping enrollment tick from generation {}", generation);
                return;
            }
            state.phase = SessionPhase::AwaitingReply;
            self.publish(&state);
            state.progress.identity.clone()
        };

        let reply = self.transport.submit_enrollment_frame(&frame, &identity).await;

        let mut state = self.lock();
        if state.generation != generation || state.phase != SessionPhase::AwaitingReply {
            tracing::debug!("Discarding stale enrollment reply from generation {}", generation);
            return;
        }

        match reply {
            EnrollmentReply::Progress { images_captured, target_images, face_detected, message } => {
                state.apply_progress(images_captured, target_images, face_detected);
                state.phase = SessionPhase::Running;
                state.message = message;
                tracing::debug!(
                    "Enrollment progress for {}: {}/{}",
                    identity.name, state.progress.images_captured, state.progress.target_images
                );
            }
            EnrollmentReply::Complete { message } => {
                state.phase = SessionPhase::Terminal(Outcome::Complete);
                state.message = message;
                self.teardown(&mut state);
                tracing::info!("Enrollment complete for {}", identity.name);
            }
            EnrollmentReply::Error { message } => {
                state.phase = SessionPhase::Terminal(Outcome::Error);
                state.message = format!("Error: {}", message);
                state.last_error = Some(message);
                self.teardown(&mut state);
                tracing::error!("Enrollment failed for {}: {}", identity.name, state.message);
            }
        }
        self.publish(&state);
    }
}

/// Accumulates accepted frames for one identity until the backend reports
/// completion. Any error reply is terminal.
pub struct EnrollmentSession {
    inner: Arc<Inner>,
}

impl EnrollmentSession {
    pub fn new(camera: CameraResource, transport: Arc<dyn SessionTransport>, config: &Config) -> Self {
        let state = EnrollmentState {
            generation: 0,
            phase: SessionPhase::Idle,
            message: String::new(),
            last_error: None,
            progress: EnrollmentProgress::default(),
            sampler: FrameSampler::new(config.camera.jpeg_quality),
        };
        let (updates, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(Inner {
                camera,
                transport,
                interval: config.enrollment.sample_interval(),
                state: Mutex::new(state),
                updates,
            }),
        }
    }

    pub fn snapshot(&self) -> EnrollmentSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot().state
    }

    pub fn progress(&self) -> EnrollmentProgress {
        self.snapshot().progress
    }

    pub fn subscribe(&self) -> watch::Receiver<EnrollmentSnapshot> {
        self.inner.updates.subscribe()
    }

    /// Validate `identity`, acquire the camera and begin sampling.
    ///
    /// Invalid input is rejected before the camera is touched. A failed
    /// acquisition leaves the session in `Terminal(Error)`. If `stop()` runs
    /// while the camera is opening, the fresh stream is released and this
    /// returns `StartCancelled`.
    pub async fn start(&self, identity: Identity) -> Result<()> {
        let identity = match identity.validated() {
            Ok(identity) => identity,
            Err(e) => {
                let mut state = self.inner.lock();
                if let ClockFaceError::Validation(message) = &e {
                    state.message = message.clone();
                }
                self.inner.publish(&state);
                return Err(e);
            }
        };

        let generation = {
            let mut state = self.inner.lock();
            if state.phase.is_active() {
                return Err(ClockFaceError::SessionActive);
            }
            state.generation += 1;
            state.phase = SessionPhase::Acquiring;
            state.message = "Starting camera...".into();
            state.last_error = None;
            state.progress = EnrollmentProgress {
                identity: identity.clone(),
                ..EnrollmentProgress::default()
            };
            self.inner.publish(&state);
            state.generation
        };

        tracing::info!("Starting enrollment for {} ({})", identity.name, identity.external_id);

        if let Err(e) = self.inner.camera.acquire().await {
            let mut state = self.inner.lock();
            if state.generation == generation && state.phase == SessionPhase::Acquiring {
                state.phase = SessionPhase::Terminal(Outcome::Error);
                state.message = format!("Failed to access camera: {}", e);
                state.last_error = Some(e.to_string());
                self.inner.publish(&state);
            }
            tracing::error!("Camera acquisition failed: {}", e);
            return Err(e);
        }

        let mut state = self.inner.lock();
        if state.generation != generation || state.phase != SessionPhase::Acquiring {
            // stopped while the camera was opening
            self.inner.camera.release();
            return Err(ClockFaceError::StartCancelled);
        }

        state.phase = SessionPhase::Running;
        state.message = "Camera started. Please center your face in the frame and look directly at the camera.".into();

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
        Ok(())
    }

    /// Stop sampling, release the camera and move to `Stopped`. Safe from any
    /// state; a no-op while `Idle`. Does not wait for an in-flight reply.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if state.phase == SessionPhase::Idle {
            return;
        }
        if state.phase.is_active() {
            self.inner.teardown(&mut state);
        }
        if state.phase != SessionPhase::Stopped {
            state.phase = SessionPhase::Stopped;
            state.message = "Capture stopped.".into();
            tracing::info!("Enrollment stopped");
        }
        self.inner.publish(&state);
    }

    /// Return a finished session to `Idle`, clearing identity and progress.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if state.phase.is_active() {
            return Err(ClockFaceError::SessionActive);
        }
        state.phase = SessionPhase::Idle;
        state.message.clear();
        state.last_error = None;
        state.progress = EnrollmentProgress::default();
        self.inner.publish(&state);
        Ok(())
    }
}

impl Drop for EnrollmentSession {
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

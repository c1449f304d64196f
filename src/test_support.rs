//! Fakes shared by the unit tests.

use crate::camera::{CameraSource, CaptureFrame, VideoStream};
use crate::common::{ClockFaceError, Result};
use crate::service::{
    ActivityLogEntry, EnrollmentReply, HealthStatus, Identity, RecognitionReply, SessionTransport,
};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Copy)]
enum OpenFailure {
    Denied,
    Unavailable,
}

/// Camera that counts opens, grabs and stops.
#[derive(Default)]
pub struct FakeCamera {
    width: u32,
    height: u32,
    failure: Option<OpenFailure>,
    open_delay: Duration,
    grab_delay: Duration,
    acquires: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    grabs: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self { width, height, ..Self::default() })
    }

    /// `open()` waits `delay` (tokio time) before handing out the stream.
    pub fn slow_to_open(width: u32, height: u32, delay: Duration) -> Arc<Self> {
        Arc::new(Self { width, height, open_delay: delay, ..Self::default() })
    }

    /// Every grab blocks its thread for `delay`.
    pub fn slow_to_grab(width: u32, height: u32, delay: Duration) -> Arc<Self> {
        Arc::new(Self { width, height, grab_delay: delay, ..Self::default() })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self { failure: Some(OpenFailure::Denied), ..Self::default() })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self { failure: Some(OpenFailure::Unavailable), ..Self::default() })
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraSource for FakeCamera {
    async fn open(&self) -> Result<Box<dyn VideoStream>> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        match self.failure {
            Some(OpenFailure::Denied) => {
                return Err(ClockFaceError::PermissionDenied("Permission denied".into()))
            }
            Some(OpenFailure::Unavailable) => {
                return Err(ClockFaceError::DeviceUnavailable("No such device".into()))
            }
            None => {}
        }

        self.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            width: self.width,
            height: self.height,
            grab_delay: self.grab_delay,
            stopped: false,
            releases: self.releases.clone(),
            grabs: self.grabs.clone(),
        }))
    }
}

struct FakeStream {
    width: u32,
    height: u32,
    grab_delay: Duration,
    stopped: bool,
    releases: Arc<AtomicUsize>,
    grabs: Arc<AtomicUsize>,
}

impl VideoStream for FakeStream {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn grab(&mut self) -> Result<DynamicImage> {
        assert!(!self.stopped, "grab after stop");
        if !self.grab_delay.is_zero() {
            std::thread::sleep(self.grab_delay);
        }
        self.grabs.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(self.width, self.height, Rgb([90, 90, 90]))))
    }

    fn stop(&mut self) {
        assert!(!self.stopped, "stream stopped twice");
        self.stopped = true;
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transport that replays queued replies, optionally after a delay, and
/// tracks how many submissions overlap.
#[derive(Default)]
pub struct ScriptedTransport {
    latency: Duration,
    enrollment: Mutex<VecDeque<EnrollmentReply>>,
    recognition: Mutex<VecDeque<RecognitionReply>>,
    activity: Mutex<Vec<ActivityLogEntry>>,
    fail_activity: AtomicBool,
    enrollment_calls: AtomicUsize,
    recognition_calls: AtomicUsize,
    activity_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self { latency, ..Self::default() })
    }

    pub fn push_enrollment(&self, reply: EnrollmentReply) {
        self.enrollment.lock().unwrap().push_back(reply);
    }

    pub fn push_recognition(&self, reply: RecognitionReply) {
        self.recognition.lock().unwrap().push_back(reply);
    }

    pub fn set_activity(&self, entries: Vec<ActivityLogEntry>) {
        *self.activity.lock().unwrap() = entries;
    }

    pub fn fail_activity(&self, fail: bool) {
        self.fail_activity.store(fail, Ordering::SeqCst);
    }

    pub fn enrollment_calls(&self) -> usize {
        self.enrollment_calls.load(Ordering::SeqCst)
    }

    pub fn recognition_calls(&self) -> usize {
        self.recognition_calls.load(Ordering::SeqCst)
    }

    pub fn activity_calls(&self) -> usize {
        self.activity_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }
}

#[async_trait]
impl SessionTransport for ScriptedTransport {
    async fn submit_enrollment_frame(&self, frame: &CaptureFrame, identity: &Identity) -> EnrollmentReply {
        assert!(!frame.bytes.is_empty());
        assert!(!identity.name.is_empty());
        self.enrollment_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.round_trip().await;
        self.enrollment.lock().unwrap().pop_front().unwrap_or(EnrollmentReply::Progress {
            images_captured: 0,
            target_images: 0,
            face_detected: false,
            message: "No face detected".into(),
        })
    }

    async fn submit_recognition_frame(&self, frame: &CaptureFrame) -> RecognitionReply {
        assert!(!frame.bytes.is_empty());
        self.recognition_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.round_trip().await;
        self.recognition.lock().unwrap().pop_front().unwrap_or(RecognitionReply::NoFace)
    }

    async fn recent_activity(&self) -> Result<Vec<ActivityLogEntry>> {
        self.activity_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_activity.load(Ordering::SeqCst) {
            return Err(ClockFaceError::Transient("connection refused".into()));
        }
        Ok(self.activity.lock().unwrap().clone())
    }

    async fn health(&self) -> Result<HealthStatus> {
        Ok(HealthStatus {
            status: "running".into(),
            message: "Face recognition backend is up.".into(),
        })
    }
}

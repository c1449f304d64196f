// Core modules
pub mod camera;
pub mod common;
pub mod service;
pub mod session;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use camera::{CameraResource, CameraSource, CaptureFrame, V4lCamera, VideoStream};
pub use common::{ClockFaceError, Config, DevMode, Result};
pub use service::{
    ActivityFeed, ActivityLogEntry, ClockAction, EnrollmentReply, HttpTransport, Identity,
    RecognitionReply, SessionTransport,
};
pub use session::{
    EnrollmentProgress, EnrollmentSession, FrameSampler, Outcome, RecognitionEvent,
    RecognitionSession, SessionPhase, SessionState,
};

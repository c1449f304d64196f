//! Capture sessions.
//!
//! A session owns one [`CameraResource`](crate::camera::CameraResource) and
//! one [`FrameSampler`]. Every `start()` bumps the session generation; a
//! reply whose generation or phase no longer matches is dropped, so nothing
//! that resolves after `stop()` can touch the stopped session.

pub mod enrollment;
pub mod recognition;
pub mod sampler;

pub use enrollment::{EnrollmentProgress, EnrollmentSession, EnrollmentSnapshot};
pub use recognition::{RecognitionEvent, RecognitionSession, RecognitionSnapshot};
pub use sampler::FrameSampler;

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    Error,
}

/// Lifecycle shared by both session kinds.
///
/// Recognition uses `Running` for "active" and `AwaitingReply` for
/// "processing"; it never enters `Terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Acquiring,
    Running,
    AwaitingReply,
    Terminal(Outcome),
    Stopped,
}

impl SessionPhase {
    /// Holding, or about to hold, the camera.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Acquiring | Self::Running | Self::AwaitingReply)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingReply)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Acquiring => write!(f, "acquiring"),
            Self::Running => write!(f, "running"),
            Self::AwaitingReply => write!(f, "awaiting reply"),
            Self::Terminal(Outcome::Complete) => write!(f, "complete"),
            Self::Terminal(Outcome::Error) => write!(f, "error"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Immutable view of a session for hosts.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub message: String,
    pub last_error: Option<String>,
    pub generation: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            message: String::new(),
            last_error: None,
            generation: 0,
        }
    }
}

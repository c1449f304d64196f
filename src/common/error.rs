use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClockFaceError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Camera is already held by another session")]
    CameraBusy,

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Session is already active")]
    SessionActive,

    #[error("Session was stopped before the camera opened")]
    StartCancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClockFaceError>;

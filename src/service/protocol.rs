use crate::common::{ClockFaceError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Who is being enrolled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub external_id: String,
    pub department: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, external_id: impl Into<String>, department: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_id: external_id.into(),
            department: department.into(),
        }
    }

    /// Trimmed copy; name and external id must be non-empty.
    pub fn validated(&self) -> Result<Self> {
        let identity = Self::new(self.name.trim(), self.external_id.trim(), self.department.trim());
        if identity.name.is_empty() || identity.external_id.is_empty() {
            return Err(ClockFaceError::Validation(
                "Please enter both name and employee ID before starting capture.".into()
            ));
        }
        Ok(identity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentReply {
    Progress {
        images_captured: u32,
        target_images: u32,
        face_detected: bool,
        message: String,
    },
    Complete { message: String },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionReply {
    Recognized {
        name: String,
        external_id: String,
        action: ClockAction,
        confidence: f32,
        is_late: bool,
    },
    NoFace,
    Unknown,
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockAction {
    ClockIn,
    ClockOut,
}

impl ClockAction {
    /// Accepts "Clock In", "ClockIn", "clock_in" and friends.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "clockin" => Some(Self::ClockIn),
            "clockout" => Some(Self::ClockOut),
            _ => None,
        }
    }
}

impl fmt::Display for ClockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClockIn => write!(f, "Clock In"),
            Self::ClockOut => write!(f, "Clock Out"),
        }
    }
}

impl Serialize for ClockAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("unknown clock action: {}", raw)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Late,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    pub action: ClockAction,
    pub time: String,
    pub status: ActivityStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

// Wire types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFaceRequest<'a> {
    pub person_name: &'a str,
    pub employee_id: &'a str,
    pub department: &'a str,
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct RecognizeFaceRequest {
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterFaceResponse {
    pub status: String,
    #[serde(default)]
    pub images_captured: u32,
    #[serde(default)]
    pub target_images: u32,
    #[serde(default)]
    pub face_detected: bool,
    #[serde(default)]
    pub message: String,
}

impl From<RegisterFaceResponse> for EnrollmentReply {
    fn from(resp: RegisterFaceResponse) -> Self {
        match resp.status.as_str() {
            // the backend reports in-progress captures as "processing"
            "progress" | "processing" => EnrollmentReply::Progress {
                images_captured: resp.images_captured,
                target_images: resp.target_images,
                face_detected: resp.face_detected,
                message: resp.message,
            },
            "complete" => EnrollmentReply::Complete { message: resp.message },
            "error" => EnrollmentReply::Error { message: resp.message },
            other => EnrollmentReply::Error {
                message: format!("Unexpected enrollment status: {}", other),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecognizeFaceResponse {
    pub status: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub is_late: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<RecognizeFaceResponse> for RecognitionReply {
    fn from(resp: RecognizeFaceResponse) -> Self {
        match resp.status.as_str() {
            "recognized" => {
                let action = resp.action.as_deref().and_then(ClockAction::parse);
                match (resp.name, action) {
                    (Some(name), Some(action)) => RecognitionReply::Recognized {
                        name,
                        external_id: resp.employee_id.unwrap_or_default(),
                        action,
                        confidence: resp.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
                        is_late: resp.is_late.unwrap_or(false),
                    },
                    _ => RecognitionReply::Error {
                        message: "Recognition reply is missing name or action".into(),
                    },
                }
            }
            "no_face" => RecognitionReply::NoFace,
            "unknown" => RecognitionReply::Unknown,
            "error" => RecognitionReply::Error {
                message: resp.message.unwrap_or_else(|| "Backend reported an error".into()),
            },
            other => RecognitionReply::Error {
                message: format!("Unexpected recognition status: {}", other),
            },
        }
    }
}

/// Body of a non-success response, when the backend sent one.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {}", other))),
    }
}

fn optional_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!("expected string or number, got {}", other))),
    }
}

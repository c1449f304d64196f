use crate::camera::CaptureFrame;
use crate::common::config::BackendConfig;
use crate::common::{ClockFaceError, Result};
use crate::service::protocol::{
    ActivityLogEntry, EnrollmentReply, ErrorBody, HealthStatus, Identity, RecognitionReply,
    RecognizeFaceRequest, RecognizeFaceResponse, RegisterFaceRequest, RegisterFaceResponse,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// One request/response round trip per call; never retries.
///
/// Frame submissions fold every failure into the reply's `Error` variant so
/// the session state machines decide what a failure means.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn submit_enrollment_frame(&self, frame: &CaptureFrame, identity: &Identity) -> EnrollmentReply;

    async fn submit_recognition_frame(&self, frame: &CaptureFrame) -> RecognitionReply;

    /// Most-recent-first activity log.
    async fn recent_activity(&self) -> Result<Vec<ActivityLogEntry>>;

    async fn health(&self) -> Result<HealthStatus>;
}

/// JSON-over-HTTP client for the recognition backend.
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    #[tracing::instrument(skip(self, body), fields(url = %self.endpoint(path)))]
    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self.client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ClockFaceError::Transient(format!("Failed to reach backend: {}", e)))?;

        Self::read_json(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client
            .get(self.endpoint(path))
            .send()
            .await
            .map_err(|e| ClockFaceError::Transient(format!("Failed to reach backend: {}", e)))?;

        Self::read_json(response).await
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text()
            .await
            .map_err(|e| ClockFaceError::Transient(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or_else(|_| format!("HTTP {}", status));
            return Err(ClockFaceError::Protocol(message));
        }

        serde_json::from_str(&body)
            .map_err(|e| ClockFaceError::Protocol(format!("Malformed response: {}", e)))
    }
}

fn failure_message(err: ClockFaceError) -> String {
    match err {
        ClockFaceError::Protocol(message) | ClockFaceError::Transient(message) => message,
        other => other.to_string(),
    }
}

#[async_trait]
impl SessionTransport for HttpTransport {
    async fn submit_enrollment_frame(&self, frame: &CaptureFrame, identity: &Identity) -> EnrollmentReply {
        let request = RegisterFaceRequest {
            person_name: &identity.name,
            employee_id: &identity.external_id,
            department: &identity.department,
            image: frame.to_data_url(),
        };

        match self.post_json::<_, RegisterFaceResponse>("register_face", &request).await {
            Ok(resp) => resp.into(),
            Err(e) => {
                tracing::debug!("Enrollment submission failed: {}", e);
                EnrollmentReply::Error { message: failure_message(e) }
            }
        }
    }

    async fn submit_recognition_frame(&self, frame: &CaptureFrame) -> RecognitionReply {
        let request = RecognizeFaceRequest { image: frame.to_data_url() };

        match self.post_json::<_, RecognizeFaceResponse>("recognize_face", &request).await {
            Ok(resp) => resp.into(),
            Err(e) => {
                tracing::debug!("Recognition submission failed: {}", e);
                RecognitionReply::Error { message: failure_message(e) }
            }
        }
    }

    async fn recent_activity(&self) -> Result<Vec<ActivityLogEntry>> {
        self.get_json("recent-activity").await
    }

    async fn health(&self) -> Result<HealthStatus> {
        self.get_json("status").await
    }
}

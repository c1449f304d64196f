//! Shared helpers for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use clockface::{CameraSource, ClockFaceError, Config, HttpTransport, Result, VideoStream};
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::MockServer;

/// In-memory camera producing a flat grey frame.
#[derive(Default)]
pub struct StillCamera {
    pub deny: bool,
    acquires: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl StillCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self { deny: true, ..Self::default() })
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraSource for StillCamera {
    async fn open(&self) -> Result<Box<dyn VideoStream>> {
        if self.deny {
            return Err(ClockFaceError::PermissionDenied("NotAllowedError".into()));
        }
        self.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StillStream { releases: self.releases.clone() }))
    }
}

struct StillStream {
    releases: Arc<AtomicUsize>,
}

impl VideoStream for StillStream {
    fn dimensions(&self) -> (u32, u32) {
        (64, 48)
    }

    fn grab(&mut self) -> Result<DynamicImage> {
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([120, 110, 100]))))
    }

    fn stop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Config pointed at the mock server with fast cadences.
pub fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.backend.base_url = format!("{}/api", server.uri());
    config.backend.request_timeout_ms = 2_000;
    config.enrollment.sample_interval_ms = 20;
    config.recognition.sample_interval_ms = 30;
    config
}

pub fn transport(config: &Config) -> Arc<HttpTransport> {
    Arc::new(HttpTransport::new(&config.backend).expect("client builds"))
}

pub async fn requests_to(server: &MockServer, path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == path)
        .count()
}

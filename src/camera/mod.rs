//! Camera ownership.
//!
//! A [`CameraSource`] knows how to open a device; a [`CameraResource`] holds
//! at most one open [`VideoStream`] from it on behalf of a single session and
//! guarantees the stream is stopped when released or dropped.

pub mod frame;
pub mod v4l2;

pub use frame::CaptureFrame;
pub use v4l2::{list_cameras, CameraInfo, V4lCamera};

use crate::common::{ClockFaceError, Result};
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Something that can hand out a live video stream.
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Request hardware access. Fails with `PermissionDenied` or
    /// `DeviceUnavailable`.
    async fn open(&self) -> Result<Box<dyn VideoStream>>;
}

/// A live stream handle.
pub trait VideoStream: Send {
    /// Current frame dimensions; `(0, 0)` while the stream is not ready yet.
    fn dimensions(&self) -> (u32, u32);

    fn grab(&mut self) -> Result<DynamicImage>;

    /// Stop every underlying track. Called exactly once per stream.
    fn stop(&mut self);
}

#[derive(Default)]
struct Slot {
    stream: Option<Box<dyn VideoStream>>,
    acquiring: bool,
    /// The stream is out on a blocking grab.
    lent: bool,
    /// `release()` arrived while the stream was lent.
    release_pending: bool,
}

impl Slot {
    /// Take a lent stream back, stopping it if a release came in meanwhile.
    fn restore(&mut self, mut stream: Box<dyn VideoStream>) {
        self.lent = false;
        if self.release_pending {
            self.release_pending = false;
            stream.stop();
            tracing::info!("Camera released after in-flight grab");
        } else {
            self.stream = Some(stream);
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!("Releasing camera held by dropped resource");
            stream.stop();
        }
    }
}

fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive holder of one camera stream.
///
/// Cloning yields another handle to the same slot, so the sampler and the
/// owning session observe the same stream.
#[derive(Clone)]
pub struct CameraResource {
    source: Arc<dyn CameraSource>,
    slot: Arc<Mutex<Slot>>,
    returned: Arc<Notify>,
}

// Clears the in-progress flag even if the acquire future is dropped.
struct AcquireGuard<'a>(&'a Mutex<Slot>);

impl Drop for AcquireGuard<'_> {
    fn drop(&mut self) {
        lock_slot(self.0).acquiring = false;
    }
}

impl CameraResource {
    pub fn new(source: Arc<dyn CameraSource>) -> Self {
        Self {
            source,
            slot: Arc::new(Mutex::new(Slot::default())),
            returned: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        lock_slot(&self.slot)
    }

    /// Open the camera. A second acquire while one is held or pending is a
    /// caller error (`CameraBusy`). A stream that was released mid-grab is
    /// waited out first.
    pub async fn acquire(&self) -> Result<()> {
        loop {
            {
                let mut slot = self.lock();
                if !(slot.lent && slot.release_pending) {
                    if slot.stream.is_some() || slot.acquiring || slot.lent {
                        return Err(ClockFaceError::CameraBusy);
                    }
                    slot.acquiring = true;
                    break;
                }
            }
            self.returned.notified().await;
        }

        let guard = AcquireGuard(&self.slot);
        let opened = self.source.open().await;
        drop(guard);

        let stream = opened?;
        let (width, height) = stream.dimensions();
        tracing::info!("Camera acquired ({}x{})", width, height);
        self.lock().stream = Some(stream);
        Ok(())
    }

    /// Stop and drop the held stream. Idempotent; returns whether anything
    /// was actually released. A stream that is out on a grab is stopped as
    /// soon as the grab returns.
    pub fn release(&self) -> bool {
        let mut slot = self.lock();
        if let Some(mut stream) = slot.stream.take() {
            drop(slot);
            stream.stop();
            tracing::info!("Camera released");
            return true;
        }
        if slot.lent && !slot.release_pending {
            slot.release_pending = true;
            tracing::debug!("Camera release deferred until the current grab returns");
            return true;
        }
        false
    }

    pub fn is_held(&self) -> bool {
        let slot = self.lock();
        slot.stream.is_some() || (slot.lent && !slot.release_pending)
    }

    /// Grab a frame at the stream's current dimensions on the blocking pool.
    ///
    /// `Ok(None)` when nothing is held, the stream reports zero dimensions,
    /// or the camera was released while the grab was running.
    pub async fn capture(&self) -> Result<Option<DynamicImage>> {
        let mut stream = {
            let mut slot = self.lock();
            let Some(stream) = slot.stream.take() else {
                return Ok(None);
            };
            let (width, height) = stream.dimensions();
            if width == 0 || height == 0 {
                slot.stream = Some(stream);
                return Ok(None);
            }
            slot.lent = true;
            stream
        };

        // The blocking task hands the stream back itself, so an abandoned
        // capture future cannot leak it.
        let slot = self.slot.clone();
        let returned = self.returned.clone();
        let grabbed = tokio::task::spawn_blocking(move || {
            let image = stream.grab();
            let released = {
                let mut slot = lock_slot(&slot);
                let released = slot.release_pending;
                slot.restore(stream);
                released
            };
            returned.notify_one();
            (image, released)
        })
        .await;

        match grabbed {
            Ok((_, true)) => Ok(None),
            Ok((image, false)) => image.map(Some),
            Err(e) => {
                {
                    let mut slot = self.lock();
                    slot.lent = false;
                    slot.release_pending = false;
                }
                self.returned.notify_one();
                Err(ClockFaceError::Camera(format!("Frame grab task failed: {}", e)))
            }
        }
    }
}

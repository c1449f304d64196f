use crate::camera::{CameraResource, CaptureFrame};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Fires a callback with a fresh frame on a fixed period.
///
/// Grabbing and JPEG encoding run on the blocking pool, so a slow camera
/// never stalls the runtime thread.
///
/// Ticks never overlap: while a previous callback is still running the due
/// tick is dropped, not queued. The busy flag belongs to the sampler rather
/// than to a single run, so a callback left over from a stopped run still
/// holds off the next run's ticks until it resolves.
pub struct FrameSampler {
    jpeg_quality: u8,
    busy: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
    cancel: Option<CancellationToken>,
    ticker: Option<JoinHandle<()>>,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FrameSampler {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality,
            busy: Arc::new(AtomicBool::new(false)),
            skipped: Arc::new(AtomicU64::new(0)),
            cancel: None,
            ticker: None,
        }
    }

    /// Start ticking every `interval` against `camera`. Restarting stops the
    /// previous run first.
    pub fn start<F, Fut>(&mut self, camera: CameraResource, interval: Duration, on_tick: F)
    where
        F: Fn(CaptureFrame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let busy = self.busy.clone();
        let skipped = self.skipped.clone();
        let quality = self.jpeg_quality;

        let ticker = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if busy.load(Ordering::Acquire) {
                    skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Previous frame still in flight, skipping tick");
                    continue;
                }

                let image = match camera.capture().await {
                    Ok(Some(image)) => image,
                    Ok(None) => {
                        tracing::debug!("Stream not ready, skipping tick");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to capture frame: {}", e);
                        continue;
                    }
                };

                let encoded = tokio::task::spawn_blocking(move || CaptureFrame::encode(&image, quality)).await;
                let frame = match encoded {
                    Ok(Ok(frame)) => frame,
                    Ok(Err(e)) => {
                        tracing::warn!("Failed to encode frame: {}", e);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Frame encode task failed: {}", e);
                        continue;
                    }
                };

                if token.is_cancelled() {
                    break;
                }

                busy.store(true, Ordering::Release);
                let guard = BusyGuard(busy.clone());
                let work = on_tick(frame);
                tokio::spawn(async move {
                    let _guard = guard;
                    work.await;
                });
            }

            tracing::debug!("Frame sampler stopped");
        });

        self.cancel = Some(cancel);
        self.ticker = Some(ticker);
    }

    /// Halt future ticks. Idempotent; does not wait for an in-flight callback.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Ticks dropped because a callback was still running.
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

use crate::camera::{CameraSource, VideoStream};
use crate::common::config::CameraConfig;
use crate::common::{ClockFaceError, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use std::fs;
use std::io;
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// A Linux video device opened through V4L2.
pub struct V4lCamera {
    config: CameraConfig,
}

impl V4lCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    fn open_device(config: &CameraConfig) -> Result<V4lStream> {
        let index = config.device_index;
        tracing::debug!("Opening camera device {}...", index);

        let device = Device::new(index as usize).map_err(|e| map_open_error(index, e))?;

        let caps = device.query_caps()
            .map_err(|e| ClockFaceError::DeviceUnavailable(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} may not support standard video capture", index);
        }

        let mut fmt = device.format()
            .map_err(|e| ClockFaceError::DeviceUnavailable(format!("Failed to get format: {}", e)))?;

        fmt.width = config.width;
        fmt.height = config.height;
        // Keep GREY for IR sensors, otherwise ask for MJPG
        if fmt.fourcc.repr != *b"GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let format = device.format()
            .map_err(|e| ClockFaceError::DeviceUnavailable(format!("Failed to get final format: {}", e)))?;

        if format.width != config.width || format.height != config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                format.width, format.height, config.width, config.height
            );
        }

        // One stream for the whole hold; re-queuing buffers per grab hands
        // back stale frames on UVC cameras.
        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|e| ClockFaceError::DeviceUnavailable(format!("Failed to create stream: {}", e)))?;

        for i in 0..config.warmup_frames {
            stream.next()
                .map_err(|e| ClockFaceError::Camera(format!("Failed to capture warmup frame {}: {}", i, e)))?;
            std::thread::sleep(std::time::Duration::from_millis(config.warmup_delay_ms));
        }

        Ok(V4lStream {
            stream: Some(stream),
            device: Some(device),
            format,
        })
    }
}

fn map_open_error(index: u32, e: io::Error) -> ClockFaceError {
    let message = format!("Failed to open camera {}: {}", index, e);
    match e.kind() {
        io::ErrorKind::PermissionDenied => ClockFaceError::PermissionDenied(message),
        _ => ClockFaceError::DeviceUnavailable(message),
    }
}

#[async_trait]
impl CameraSource for V4lCamera {
    async fn open(&self) -> Result<Box<dyn VideoStream>> {
        let config = self.config.clone();
        let stream = tokio::task::spawn_blocking(move || Self::open_device(&config))
            .await
            .map_err(|e| ClockFaceError::DeviceUnavailable(format!("Camera open task failed: {}", e)))??;
        Ok(Box::new(stream))
    }
}

/// An open device with its capture queue running. Grabs block until the
/// next buffer is dequeued, so callers run them on the blocking pool.
pub struct V4lStream {
    // dropped before `device` so the buffers unmap before the fd closes
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
    format: v4l::Format,
}

impl VideoStream for V4lStream {
    fn dimensions(&self) -> (u32, u32) {
        if self.stream.is_some() {
            (self.format.width, self.format.height)
        } else {
            (0, 0)
        }
    }

    fn grab(&mut self) -> Result<DynamicImage> {
        let stream = self.stream.as_mut()
            .ok_or_else(|| ClockFaceError::Camera("Stream already stopped".into()))?;

        let (buf, meta) = stream.next()
            .map_err(|e| ClockFaceError::Camera(format!("Failed to capture: {}", e)))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used > 0 { &buf[..used] } else { buf };

        decode_buffer(&self.format.fourcc.repr, data, self.format.width, self.format.height)
    }

    fn stop(&mut self) {
        // STREAMOFF happens when the stream drops; closing the fd follows.
        self.stream.take();
        if self.device.take().is_some() {
            tracing::debug!("V4L2 device closed");
        }
    }
}

fn decode_buffer(fourcc: &[u8; 4], data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    match fourcc {
        b"MJPG" => Ok(image::load_from_memory(data)?),
        b"GREY" => {
            let expected = (width * height) as usize;
            let pixels = data.get(..expected)
                .ok_or_else(|| ClockFaceError::Camera("Short grayscale buffer".into()))?;
            let buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels.to_vec())
                .ok_or_else(|| ClockFaceError::Camera("Failed to create grayscale image buffer".into()))?;
            Ok(DynamicImage::ImageLuma8(buffer))
        }
        b"YUYV" => yuyv_to_image(data, width, height),
        other => Err(ClockFaceError::Camera(format!(
            "Unsupported format {}", String::from_utf8_lossy(other)
        ))),
    }
}

fn yuyv_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return Err(ClockFaceError::Camera("Short YUYV buffer".into()));
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }

    let buffer = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, rgb)
        .ok_or_else(|| ClockFaceError::Camera("Failed to create RGB image buffer".into()))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(1.164 * c + 1.596 * e),
        clamp(1.164 * c - 0.392 * d - 0.813 * e),
        clamp(1.164 * c + 2.017 * d),
    ]
}

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub formats: Vec<String>,
}

/// List `/dev/video*` devices that can capture video.
pub fn list_cameras() -> Result<Vec<CameraInfo>> {
    let mut cameras = Vec::new();

    for entry in fs::read_dir("/dev")? {
        let entry = entry?;
        let path = entry.path();
        let Some(index) = path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("video"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };

        let Ok(device) = Device::new(index as usize) else { continue };
        let Ok(caps) = device.query_caps() else { continue };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }

        let formats = device.enum_formats()
            .unwrap_or_default()
            .iter()
            .map(|fmt| String::from_utf8_lossy(&fmt.fourcc.repr).trim().to_string())
            .collect();

        cameras.push(CameraInfo { index, name: caps.card.clone(), formats });
    }

    cameras.sort_by_key(|c| c.index);
    Ok(cameras)
}

use crate::common::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage};

/// One encoded still, handed straight to the backend and then dropped.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Local>,
}

impl CaptureFrame {
    /// JPEG-encode `image` at the given quality (1-100).
    pub fn encode(image: &DynamicImage, quality: u8) -> Result<Self> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
        encoder.encode(rgb.as_raw(), width, height, ColorType::Rgb8)?;

        Ok(Self {
            bytes,
            width,
            height,
            captured_at: Local::now(),
        })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", STANDARD.encode(&self.bytes))
    }
}

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::Path;

pub const PNG_MIME: &str = "image/png";

/// Image bytes sent to or received from the model, with their mime type.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl ImageAttachment {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mime = sniff_image_mime(&bytes)
            .ok_or_else(|| anyhow!("data is not a supported image"))?
            .to_string();
        Ok(Self { bytes, mime })
    }

    /// Accepts raw base64 or a `data:image/...;base64,` URL.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let payload = strip_data_url(encoded);
        let bytes = BASE64
            .decode(payload.trim())
            .with_context(|| "image is not valid base64")?;
        Self::from_bytes(bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

pub fn load_image(path: &Path) -> Result<ImageAttachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image file: {}", path.display()))?;
    ImageAttachment::from_bytes(bytes)
        .with_context(|| format!("unsupported image file: {}", path.display()))
}

pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    let kind = infer::get(bytes)?;
    let detected = kind.mime_type();
    detected.starts_with("image/").then_some(detected)
}

pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(strip_data_url(encoded).trim())
        .with_context(|| "value is not valid base64")
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

fn strip_data_url(value: &str) -> &str {
    match value.split_once(";base64,") {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => value,
    }
}

//! Image hosting for question photos.
//!
//! Images either travel inline as base64 data URLs or are uploaded to a
//! hosting service that hands back a public URL. Either way the result is an
//! [`ImageRef`] the chat client can put in a multimodal message.

use crate::chat::ImageRef;
use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// How question images reach the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageHostMode {
    /// Send bytes inline as a data URL
    #[default]
    Inline,
    /// Upload to a hosting service and send its URL
    Remote,
}

/// Image hosting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageHostConfig {
    #[serde(default)]
    pub mode: ImageHostMode,
    /// Unsigned upload endpoint (Cloudinary style)
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub upload_preset: Option<String>,
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Fixed output size, injected as a URL transformation
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_folder() -> String {
    "doubt-solver".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for ImageHostConfig {
    fn default() -> Self {
        Self {
            mode: ImageHostMode::default(),
            upload_url: None,
            upload_preset: None,
            folder: default_folder(),
            width: None,
            height: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Image hosting errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImageHostError {
    #[error("Image is empty")]
    Empty,

    #[error("Image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Unsupported image format (expected jpg or png)")]
    UnsupportedFormat,

    #[error("Image host not configured: {0}")]
    NotConfigured(String),

    #[error("Upload failed: {0}")]
    Http(String),

    #[error("HTTP {0} from image host")]
    Status(u16),

    #[error("Invalid upload response: {0}")]
    InvalidResponse(String),
}

/// Raw image submitted with a question
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl ImageUpload {
    /// Validate bytes and detect the format from magic numbers
    pub fn new(bytes: Vec<u8>, max_bytes: usize) -> Result<Self, ImageHostError> {
        if bytes.is_empty() {
            return Err(ImageHostError::Empty);
        }
        if bytes.len() > max_bytes {
            return Err(ImageHostError::TooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }
        let mime = sniff_mime(&bytes).ok_or(ImageHostError::UnsupportedFormat)?;
        Ok(Self { bytes, mime })
    }

    pub fn extension(&self) -> &'static str {
        match self.mime {
            "image/png" => "png",
            _ => "jpg",
        }
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(PNG_MAGIC) {
        Some("image/png")
    } else if bytes.starts_with(JPEG_MAGIC) {
        Some("image/jpeg")
    } else {
        None
    }
}

/// Turns uploaded bytes into something the model can fetch
pub trait ImageHost: Send + Sync {
    fn upload(&self, image: &ImageUpload) -> Result<ImageRef, ImageHostError>;
}

/// No remote service: embed the bytes
pub struct InlineImageHost;

impl ImageHost for InlineImageHost {
    fn upload(&self, image: &ImageUpload) -> Result<ImageRef, ImageHostError> {
        Ok(ImageRef::Inline {
            mime: image.mime.to_string(),
            data: image.to_base64(),
        })
    }
}

/// Unsigned multipart upload to a hosting service
pub struct HttpImageHost {
    config: ImageHostConfig,
    upload_url: String,
    upload_preset: String,
    client: reqwest::blocking::Client,
}

impl HttpImageHost {
    pub fn new(config: ImageHostConfig) -> Result<Self> {
        let upload_url = config
            .upload_url
            .clone()
            .ok_or_else(|| ImageHostError::NotConfigured("upload_url is missing".to_string()))?;
        let upload_preset = config
            .upload_preset
            .clone()
            .ok_or_else(|| ImageHostError::NotConfigured("upload_preset is missing".to_string()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            config,
            upload_url,
            upload_preset,
            client,
        })
    }
}

impl ImageHost for HttpImageHost {
    fn upload(&self, image: &ImageUpload) -> Result<ImageRef, ImageHostError> {
        let part = reqwest::blocking::multipart::Part::bytes(image.bytes.clone())
            .file_name(format!("question.{}", image.extension()))
            .mime_str(image.mime)
            .map_err(|e| ImageHostError::Http(e.to_string()))?;

        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone())
            .text("folder", self.config.folder.clone());

        debug!("Uploading {} byte image to {}", image.bytes.len(), self.upload_url);

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .map_err(|e| ImageHostError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ImageHostError::Status(response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .map_err(|e| ImageHostError::InvalidResponse(e.to_string()))?;
        let url = hosted_url(&body, self.config.width, self.config.height)?;

        info!("Image uploaded");
        Ok(ImageRef::Url { url })
    }
}

/// Pull the public URL out of an upload response, applying a size transform
pub fn hosted_url(
    body: &Value,
    width: Option<u32>,
    height: Option<u32>,
) -> Result<String, ImageHostError> {
    let url = body
        .get("secure_url")
        .or_else(|| body.get("url"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ImageHostError::InvalidResponse("no url in response".to_string()))?;

    Ok(match (width, height) {
        (Some(w), Some(h)) => with_transformation(url, &format!("w_{},h_{},c_fill", w, h)),
        (Some(w), None) => with_transformation(url, &format!("w_{}", w)),
        (None, Some(h)) => with_transformation(url, &format!("h_{}", h)),
        (None, None) => url.to_string(),
    })
}

/// Insert a transformation segment after `/upload/`; other URLs pass through
fn with_transformation(url: &str, transformation: &str) -> String {
    match url.split_once("/upload/") {
        Some((head, tail)) => format!("{}/upload/{}/{}", head, transformation, tail),
        None => url.to_string(),
    }
}

/// Build the configured host
pub fn from_config(config: &ImageHostConfig) -> Result<Box<dyn ImageHost>> {
    match config.mode {
        ImageHostMode::Inline => Ok(Box::new(InlineImageHost)),
        ImageHostMode::Remote => Ok(Box::new(HttpImageHost::new(config.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn png_bytes() -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 13]);
        bytes
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(&png_bytes()), Some("image/png"));
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"GIF89a"), None);
    }

    #[test]
    fn test_upload_validation() {
        assert_eq!(ImageUpload::new(vec![], 10), Err(ImageHostError::Empty));
        assert_eq!(
            ImageUpload::new(png_bytes(), 4),
            Err(ImageHostError::TooLarge { size: 12, limit: 4 })
        );
        assert_eq!(
            ImageUpload::new(b"GIF89a".to_vec(), 100),
            Err(ImageHostError::UnsupportedFormat)
        );
        let upload = ImageUpload::new(png_bytes(), 100).unwrap();
        assert_eq!(upload.mime, "image/png");
        assert_eq!(upload.extension(), "png");
    }

    #[test]
    fn test_inline_host_builds_data_url() {
        let upload = ImageUpload::new(vec![0xFF, 0xD8, 0xFF], 100).unwrap();
        let image = InlineImageHost.upload(&upload).unwrap();
        assert_eq!(image.url(), "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn test_hosted_url_transformations() {
        let body = json!({"secure_url": "https://res.example.com/demo/image/upload/v1/q.png"});
        assert_eq!(
            hosted_url(&body, None, None).unwrap(),
            "https://res.example.com/demo/image/upload/v1/q.png"
        );
        assert_eq!(
            hosted_url(&body, Some(800), Some(600)).unwrap(),
            "https://res.example.com/demo/image/upload/w_800,h_600,c_fill/v1/q.png"
        );
        assert_eq!(
            hosted_url(&body, Some(400), None).unwrap(),
            "https://res.example.com/demo/image/upload/w_400/v1/q.png"
        );
    }

    #[test]
    fn test_hosted_url_missing() {
        assert!(matches!(
            hosted_url(&json!({"error": "bad"}), None, None),
            Err(ImageHostError::InvalidResponse(_))
        ));
        let fallback = json!({"url": "http://other.example/q.png"});
        assert_eq!(
            hosted_url(&fallback, Some(1), Some(1)).unwrap(),
            "http://other.example/q.png"
        );
    }

    #[test]
    fn test_remote_host_requires_url_and_preset() {
        let config = ImageHostConfig {
            mode: ImageHostMode::Remote,
            ..ImageHostConfig::default()
        };
        assert!(from_config(&config).is_err());
        assert!(from_config(&ImageHostConfig::default()).is_ok());
    }
}

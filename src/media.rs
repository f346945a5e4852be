//! Image hosting delegate.
//!
//! Images are never stored locally: they are forwarded to the media host and
//! only the returned public URL is attached to a record.

use async_trait::async_trait;
use chrono::Utc;
use mime_guess::{from_path, get_mime_extensions_str};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::MediaConfig;

const ALLOWED_FORMATS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub url: String,
    pub public_id: String,
}

/// An image received from a client, fully read into memory.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Media host credentials are not configured")]
    MissingCredentials,

    #[error("Image is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("Image format {0} is not allowed")]
    UnsupportedFormat(String),

    #[error("Upload preset {0} was not found")]
    PresetNotFound(String),

    #[error("Media host rejected the upload: {0}")]
    Upstream(String),

    #[error("Media host request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl MediaError {
    /// Whether the client sent something the host would never accept.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::TooLarge { .. } | Self::UnsupportedFormat(_))
    }
}

#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, file: MediaFile, folder: &str) -> Result<UploadedMedia, MediaError>;
}

/// Checks size and format before anything leaves the process. Returns the
/// detected format.
pub fn check_image(file: &MediaFile, max_bytes: usize) -> Result<&'static str, MediaError> {
    if file.bytes.len() > max_bytes {
        return Err(MediaError::TooLarge {
            size: file.bytes.len(),
            limit: max_bytes,
        });
    }

    let from_content_type = file
        .content_type
        .as_deref()
        .and_then(get_mime_extensions_str)
        .unwrap_or_default();
    let from_name = file
        .file_name
        .as_deref()
        .and_then(|name| from_path(name).first())
        .and_then(|mime| get_mime_extensions_str(mime.essence_str()))
        .unwrap_or_default();

    ALLOWED_FORMATS
        .into_iter()
        .find(|format| from_content_type.contains(format) || from_name.contains(format))
        .ok_or_else(|| {
            MediaError::UnsupportedFormat(
                file.content_type
                    .clone()
                    .or_else(|| file.file_name.clone())
                    .unwrap_or_else(|| String::from("unknown")),
            )
        })
}

/// Signs upload parameters the way the media host expects: sorted
/// `key=value` pairs joined with `&`, followed by the secret, SHA-256 hex.
pub fn sign(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let payload = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    hex::encode(Sha256::digest(format!("{payload}{secret}").as_bytes()))
}

#[derive(Deserialize)]
struct CloudinaryResponse {
    secure_url: Option<String>,
    public_id: Option<String>,
    error: Option<CloudinaryErrorDetail>,
}

#[derive(Deserialize)]
struct CloudinaryErrorDetail {
    message: String,
}

/// Cloudinary REST upload. Uses the unsigned preset flow when a preset is
/// configured and a signed request otherwise.
#[derive(Debug, Clone)]
pub struct CloudinaryUploader {
    config: MediaConfig,
    client: reqwest::Client,
}

impl CloudinaryUploader {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(cloud_name: &str) -> String {
        format!("https://api.cloudinary.com/v1_1/{cloud_name}/image/upload")
    }
}

#[async_trait]
impl MediaUploader for CloudinaryUploader {
    async fn upload(&self, file: MediaFile, folder: &str) -> Result<UploadedMedia, MediaError> {
        let format = check_image(&file, self.config.max_upload_bytes)?;
        let cloud_name = self
            .config
            .cloud_name
            .as_deref()
            .ok_or(MediaError::MissingCredentials)?;

        let file_name = file
            .file_name
            .clone()
            .unwrap_or_else(|| format!("upload.{format}"));
        let mut part = Part::bytes(file.bytes).file_name(file_name);
        if let Some(content_type) = &file.content_type {
            part = part.mime_str(content_type)?;
        }
        let mut form = Form::new().text("folder", folder.to_string()).part("file", part);

        if let Some(preset) = &self.config.upload_preset {
            form = form.text("upload_preset", preset.clone());
        } else {
            let (Some(api_key), Some(api_secret)) = (&self.config.api_key, &self.config.api_secret)
            else {
                return Err(MediaError::MissingCredentials);
            };
            let timestamp = Utc::now().timestamp().to_string();
            let signature = sign(&[("folder", folder), ("timestamp", timestamp.as_str())], api_secret);
            form = form
                .text("api_key", api_key.clone())
                .text("timestamp", timestamp)
                .text("signature", signature)
                .text("signature_algorithm", "sha256");
        }

        log::debug!("Uploading {format} image to {cloud_name}/{folder}");
        let response = self
            .client
            .post(Self::endpoint(cloud_name))
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        let body: CloudinaryResponse = response.json().await?;

        if let Some(error) = body.error {
            let message = error.message;
            return Err(match &self.config.upload_preset {
                Some(preset) if message.to_lowercase().contains("preset not found") => {
                    MediaError::PresetNotFound(preset.clone())
                }
                _ => MediaError::Upstream(message),
            });
        }

        match (status.is_success(), body.secure_url, body.public_id) {
            (true, Some(url), Some(public_id)) => {
                log::info!("Uploaded image {public_id}");
                Ok(UploadedMedia { url, public_id })
            }
            _ => Err(MediaError::Upstream(format!(
                "unexpected response with status {status}"
            ))),
        }
    }
}

//! Emotion detection from uploaded media.
//!
//! Multipart fields:
//! - `source`: `face` or `voice`
//! - `image` (face) or `audio` (voice): the file
//! - `session_id` (optional): attach the log to this session instead of the
//!   owner's active one
//!
//! Validation failures answer 400 before any detector runs. A successful
//! reading is stored as an emotion log; "no face" answers `detected: false`
//! without storing anything.

use std::path::Path;

use axum::extract::Multipart;
use bytes::Bytes;
use emotionsense_core::detector::{Detection, DetectionFailure, EmotionDetector, MediaInput};
use emotionsense_core::models::{EmotionLog, EmotionSource, NewEmotionLog};
use emotionsense_core::store::EmotionStore;
use emotionsense_core::StoreError;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::http::HttpState;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg", "flac", "m4a", "webm"];

/// Raw multipart contents before validation.
#[derive(Debug, Default)]
pub struct DetectUpload {
    pub source: Option<String>,
    pub session_id: Option<String>,
    pub image: Option<MediaInput>,
    pub audio: Option<MediaInput>,
}

/// A validated upload ready for inference.
#[derive(Debug)]
pub struct DetectRequest {
    pub source: EmotionSource,
    pub media: MediaInput,
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    #[serde(flatten)]
    pub detection: Detection,
    pub log: Option<EmotionLog>,
    pub session_id: Option<Uuid>,
}

/// Drain the multipart body, enforcing the size limit while streaming.
pub async fn read_upload(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<DetectUpload, ApiError> {
    let mut upload = DetectUpload::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "source" | "session_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read {name}: {e}")))?;
                if name == "source" {
                    upload.source = Some(value);
                } else {
                    upload.session_id = Some(value);
                }
            }
            "image" | "audio" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();

                let mut data: Vec<u8> = Vec::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file chunk: {e}")))?
                {
                    data.extend_from_slice(&chunk);
                    if data.len() > max_bytes {
                        return Err(ApiError::BadRequest(format!(
                            "File too large: exceeds maximum of {max_bytes} bytes"
                        )));
                    }
                }

                tracing::debug!(
                    field = %name,
                    file_name = %file_name,
                    content_type = %content_type,
                    size_bytes = data.len(),
                    "Received upload"
                );

                let media = MediaInput {
                    bytes: Bytes::from(data),
                    content_type,
                    file_name,
                };
                if name == "image" {
                    upload.image = Some(media);
                } else {
                    upload.audio = Some(media);
                }
            }
            other => tracing::debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }

    Ok(upload)
}

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Check source, file presence, extension and size.
pub fn validate_upload(upload: DetectUpload, max_bytes: usize) -> Result<DetectRequest, ApiError> {
    let source = match upload.source.as_deref().map(str::trim) {
        Some("face") => EmotionSource::Face,
        Some("voice") => EmotionSource::Voice,
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "source must be 'face' or 'voice', got '{other}'"
            )))
        }
        None => return Err(ApiError::BadRequest("source is required".into())),
    };

    let (media, field, allowed) = match source {
        EmotionSource::Voice => (upload.audio, "audio", AUDIO_EXTENSIONS),
        _ => (upload.image, "image", IMAGE_EXTENSIONS),
    };
    let media = media.ok_or_else(|| {
        ApiError::BadRequest(format!("{field} file is required for {source} detection"))
    })?;

    match extension(&media.file_name) {
        Some(ext) if allowed.contains(&ext.as_str()) => {}
        _ => {
            return Err(ApiError::BadRequest(format!(
                "Unsupported {field} file '{}'. Supported formats: {}",
                media.file_name,
                allowed.join(", ")
            )))
        }
    }

    if media.bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".into()));
    }
    if media.bytes.len() > max_bytes {
        return Err(ApiError::BadRequest(format!(
            "File too large: exceeds maximum of {max_bytes} bytes"
        )));
    }

    let session_id = match upload.session_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            Uuid::parse_str(raw)
                .map_err(|_| ApiError::BadRequest(format!("invalid session_id '{raw}'")))?,
        ),
    };

    Ok(DetectRequest {
        source,
        media,
        session_id,
    })
}

fn detector_for<'a>(
    state: &'a HttpState,
    source: EmotionSource,
) -> Result<&'a dyn EmotionDetector, ApiError> {
    let configured = match source {
        EmotionSource::Voice => state.voice.as_deref(),
        _ => state.face.as_deref(),
    };
    configured
        .ok_or_else(|| ApiError::NotImplemented(format!("{source} detection is not configured")))
}

/// Validate, run inference and record the result.
pub async fn detect(
    state: &HttpState,
    owner: i64,
    upload: DetectUpload,
) -> Result<DetectResponse, ApiError> {
    let req = validate_upload(upload, state.config.http.max_upload_bytes())?;
    let detector = detector_for(state, req.source)?;

    // An explicit session must be usable before any inference is spent on it
    if let Some(session_id) = req.session_id {
        let session = state.store.get_session(owner, session_id).await?;
        if !session.is_active {
            return Err(StoreError::SessionClosed(session_id).into());
        }
    }

    let detection = detector.detect(&req.media).await;
    if let Some(DetectionFailure::Inference(message)) = &detection.failure {
        return Err(ApiError::Inference(message.clone()));
    }
    if detection.failure == Some(DetectionFailure::NoFace) {
        return Ok(DetectResponse {
            detection,
            log: None,
            session_id: None,
        });
    }

    let entry = NewEmotionLog {
        emotion_type: detection.emotion,
        confidence: detection.confidence,
        source: req.source,
        session_id: req.session_id,
        raw_data: Some(serde_json::json!({
            "scores": detection.raw_scores,
            "model": detection.model,
            "file_name": req.media.file_name,
        })),
    };
    let log = attach_log(state.store.as_ref(), owner, entry).await?;

    tracing::info!(
        owner,
        emotion = %log.emotion_type,
        confidence = log.confidence,
        source = %log.source,
        session_id = ?log.session_id,
        "Emotion detected"
    );

    Ok(DetectResponse {
        session_id: log.session_id,
        log: Some(log),
        detection,
    })
}

/// Store the log against the requested session, or the owner's active one.
///
/// The active session can be closed between lookup and insert; that race is
/// retried once against a fresh session.
async fn attach_log(
    store: &dyn EmotionStore,
    owner: i64,
    entry: NewEmotionLog,
) -> Result<EmotionLog, ApiError> {
    if let Some(session_id) = entry.session_id {
        return Ok(store.insert_log(entry.into_log(owner, Some(session_id))).await?);
    }

    let mut retried = false;
    loop {
        let session = store.active_session(owner).await?;
        match store
            .insert_log(entry.clone().into_log(owner, Some(session.id)))
            .await
        {
            Err(StoreError::SessionClosed(id)) if !retried => {
                tracing::debug!(
                    owner,
                    session_id = %id,
                    "Active session closed mid-detect, retrying"
                );
                retried = true;
            }
            result => return Ok(result?),
        }
    }
}

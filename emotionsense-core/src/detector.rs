//! Emotion inference adapters.
//!
//! Provides an `EmotionDetector` trait with implementations for:
//! - **HTTP face**: a DeepFace-compatible `/analyze` service
//! - **Voice placeholder**: fixed neutral reading until a voice model exists
//!
//! Detectors are built once at startup and handed to the HTTP layer; callers
//! use [`EmotionDetector::detect`], which never fails and folds every error
//! into a neutral, zero-confidence [`Detection`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::DetectionConfig;
use crate::models::Emotion;

/// An uploaded file handed to a detector.
#[derive(Debug, Clone)]
pub struct MediaInput {
    pub bytes: Bytes,
    pub content_type: String,
    pub file_name: String,
}

/// Why a detection produced no reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum DetectionFailure {
    NoFace,
    Inference(String),
}

/// Result of one inference call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub detected: bool,
    pub emotion: Emotion,
    pub confidence: f64,
    pub raw_scores: HashMap<String, f64>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<DetectionFailure>,
}

impl Detection {
    pub fn found(
        emotion: Emotion,
        confidence: f64,
        raw_scores: HashMap<String, f64>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            detected: true,
            emotion,
            confidence: confidence.clamp(0.0, 1.0),
            raw_scores,
            model: model.into(),
            failure: None,
        }
    }

    /// Neutral, zero-confidence sentinel.
    pub fn failed(failure: DetectionFailure, model: impl Into<String>) -> Self {
        Self {
            detected: false,
            emotion: Emotion::Neutral,
            confidence: 0.0,
            raw_scores: HashMap::new(),
            model: model.into(),
            failure: Some(failure),
        }
    }
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("No face detected: {0}")]
    NoFace(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unknown {kind} detector backend '{backend}'")]
    UnknownBackend { kind: &'static str, backend: String },
}

impl DetectorError {
    /// Network failures, rate limits and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            DetectorError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            DetectorError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// EmotionDetector trait
// ============================================================================

#[async_trait]
pub trait EmotionDetector: Send + Sync {
    /// Run inference, surfacing every failure.
    async fn analyze(&self, input: &MediaInput) -> Result<Detection, DetectorError>;

    /// Backend name for logging and stored raw data.
    fn name(&self) -> &str;

    /// Run inference, converting failures into the neutral sentinel.
    async fn detect(&self, input: &MediaInput) -> Detection {
        match self.analyze(input).await {
            Ok(detection) => detection,
            Err(DetectorError::NoFace(reason)) => {
                tracing::info!(backend = self.name(), reason = %reason, "No face found in upload");
                Detection::failed(DetectionFailure::NoFace, self.name())
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.name(),
                    file = %input.file_name,
                    error = %e,
                    "Emotion inference failed"
                );
                Detection::failed(DetectionFailure::Inference(e.to_string()), self.name())
            }
        }
    }
}

/// Build the face detector named by `[detection] face_backend`.
///
/// Returns `Ok(None)` when face detection is disabled.
pub fn create_face_detector(
    config: &DetectionConfig,
) -> Result<Option<Arc<dyn EmotionDetector>>, DetectorError> {
    match config.face_backend.as_str() {
        "http" => Ok(Some(Arc::new(HttpFaceDetector::new(config)?))),
        "disabled" => Ok(None),
        other => Err(DetectorError::UnknownBackend {
            kind: "face",
            backend: other.to_string(),
        }),
    }
}

/// Build the voice detector named by `[detection] voice_backend`.
pub fn create_voice_detector(
    config: &DetectionConfig,
) -> Result<Option<Arc<dyn EmotionDetector>>, DetectorError> {
    match config.voice_backend.as_str() {
        "placeholder" => Ok(Some(Arc::new(PlaceholderVoiceDetector))),
        "disabled" => Ok(None),
        other => Err(DetectorError::UnknownBackend {
            kind: "voice",
            backend: other.to_string(),
        }),
    }
}

// ============================================================================
// DeepFace-compatible wire types (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    img: String,
    actions: [&'a str; 1],
    enforce_detection: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalyzeResponse {
    Wrapped { results: Vec<FaceResult> },
    Bare(Vec<FaceResult>),
    Single(FaceResult),
}

impl AnalyzeResponse {
    fn into_first(self) -> Option<FaceResult> {
        match self {
            AnalyzeResponse::Wrapped { results } | AnalyzeResponse::Bare(results) => {
                results.into_iter().next()
            }
            AnalyzeResponse::Single(face) => Some(face),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FaceResult {
    dominant_emotion: String,
    /// Percentages, 0-100.
    emotion: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeError {
    error: String,
}

// ============================================================================
// HttpFaceDetector
// ============================================================================

/// Calls a DeepFace-style REST service with the image as a base64 data URI.
#[derive(Debug, Clone)]
pub struct HttpFaceDetector {
    client: Client,
    base_url: String,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl HttpFaceDetector {
    pub fn new(config: &DetectionConfig) -> Result<Self, DetectorError> {
        Self::with_base_url(config, config.face_url.clone())
    }

    /// Create a detector against a custom base URL (for testing)
    pub fn with_base_url(
        config: &DetectionConfig,
        base_url: String,
    ) -> Result<Self, DetectorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    async fn analyze_once(&self, input: &MediaInput) -> Result<Detection, DetectorError> {
        let url = format!("{}/analyze", self.base_url);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&input.bytes);
        let request = AnalyzeRequest {
            img: format!("data:{};base64,{}", input.content_type, encoded),
            actions: ["emotion"],
            enforce_detection: true,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnalyzeError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);

            if status == StatusCode::BAD_REQUEST && is_no_face_message(&message) {
                return Err(DetectorError::NoFace(message));
            }

            tracing::error!(code = status.as_u16(), message = %message, "Face service error");
            return Err(DetectorError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;

        let face = parsed
            .into_first()
            .ok_or_else(|| DetectorError::NoFace("service returned no faces".to_string()))?;

        let score = face
            .emotion
            .get(&face.dominant_emotion)
            .copied()
            .ok_or_else(|| {
                DetectorError::InvalidResponse(format!(
                    "dominant emotion '{}' missing from scores",
                    face.dominant_emotion
                ))
            })?;

        Ok(Detection::found(
            Emotion::from_model_label(&face.dominant_emotion),
            score / 100.0,
            face.emotion,
            self.name(),
        ))
    }
}

fn is_no_face_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("face could not be detected") || lower.contains("no face")
}

#[async_trait]
impl EmotionDetector for HttpFaceDetector {
    async fn analyze(&self, input: &MediaInput) -> Result<Detection, DetectorError> {
        let strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(
            strategy,
            || self.analyze_once(input),
            |e: &DetectorError| {
                let retry = e.is_transient();
                if retry {
                    tracing::debug!(error = %e, "Retrying face analysis");
                }
                retry
            },
        )
        .await
    }

    fn name(&self) -> &str {
        "deepface-http"
    }
}

// ============================================================================
// PlaceholderVoiceDetector
// ============================================================================

/// Stand-in for a voice model: every clip reads as neutral at 0.5.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderVoiceDetector;

#[async_trait]
impl EmotionDetector for PlaceholderVoiceDetector {
    async fn analyze(&self, input: &MediaInput) -> Result<Detection, DetectorError> {
        if input.bytes.is_empty() {
            return Err(DetectorError::InvalidResponse("empty audio clip".to_string()));
        }
        let mut scores = HashMap::new();
        scores.insert(Emotion::Neutral.as_str().to_string(), 0.5);
        Ok(Detection::found(Emotion::Neutral, 0.5, scores, self.name()))
    }

    fn name(&self) -> &str {
        "voice-placeholder"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(max_retries: usize) -> DetectionConfig {
        DetectionConfig {
            face_backend: "http".to_string(),
            face_url: "http://unused".to_string(),
            voice_backend: "disabled".to_string(),
            timeout_seconds: 5,
            max_retries,
            retry_delay_ms: 10,
        }
    }

    fn image() -> MediaInput {
        MediaInput {
            bytes: Bytes::from_static(b"\xff\xd8\xff\xe0fake-jpeg"),
            content_type: "image/jpeg".to_string(),
            file_name: "face.jpg".to_string(),
        }
    }

    fn mock_analyze_response() -> serde_json::Value {
        serde_json::json!({
            "results": [{
                "dominant_emotion": "happy",
                "emotion": {
                    "angry": 0.5, "disgust": 0.0, "fear": 1.0, "happy": 92.0,
                    "sad": 2.5, "surprise": 3.0, "neutral": 1.0
                },
                "region": { "x": 10, "y": 12, "w": 80, "h": 80 }
            }]
        })
    }

    #[tokio::test]
    async fn test_analyze_parses_dominant_emotion() {
        let mock_server = MockServer::start().await;
        let detector =
            HttpFaceDetector::with_base_url(&test_config(0), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/analyze"))
            .and(body_partial_json(serde_json::json!({ "actions": ["emotion"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_analyze_response()))
            .mount(&mock_server)
            .await;

        let detection = detector.analyze(&image()).await.unwrap();
        assert!(detection.detected);
        assert_eq!(detection.emotion, Emotion::Happy);
        assert!((detection.confidence - 0.92).abs() < 1e-9);
        assert_eq!(detection.raw_scores.len(), 7);
        assert_eq!(detection.model, "deepface-http");
    }

    #[tokio::test]
    async fn test_bare_list_response_is_accepted() {
        let mock_server = MockServer::start().await;
        let detector =
            HttpFaceDetector::with_base_url(&test_config(0), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "dominant_emotion": "contempt", "emotion": { "contempt": 40.0 } }
            ])))
            .mount(&mock_server)
            .await;

        let detection = detector.analyze(&image()).await.unwrap();
        assert_eq!(detection.emotion, Emotion::Neutral, "unknown labels map to neutral");
        assert!((detection.confidence - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_face_becomes_sentinel() {
        let mock_server = MockServer::start().await;
        let detector =
            HttpFaceDetector::with_base_url(&test_config(3), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "Exception while analyzing: Face could not be detected in numpy array."
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let detection = detector.detect(&image()).await;
        assert!(!detection.detected);
        assert_eq!(detection.emotion, Emotion::Neutral);
        assert_eq!(detection.confidence, 0.0);
        assert_eq!(detection.failure, Some(DetectionFailure::NoFace));
    }

    #[tokio::test]
    async fn test_server_error_retries_then_reports_inference_failure() {
        let mock_server = MockServer::start().await;
        let detector =
            HttpFaceDetector::with_base_url(&test_config(2), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": "model crashed"
            })))
            .expect(3)
            .mount(&mock_server)
            .await;

        let detection = detector.detect(&image()).await;
        assert!(!detection.detected);
        match detection.failure {
            Some(DetectionFailure::Inference(msg)) => assert!(msg.contains("model crashed")),
            other => panic!("Expected inference failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retries_on_503_then_succeeds() {
        let mock_server = MockServer::start().await;
        let detector =
            HttpFaceDetector::with_base_url(&test_config(2), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_analyze_response()))
            .mount(&mock_server)
            .await;

        let detection = detector.detect(&image()).await;
        assert!(detection.detected, "Expected success after retry");
    }

    #[tokio::test]
    async fn test_missing_dominant_score_is_invalid() {
        let mock_server = MockServer::start().await;
        let detector =
            HttpFaceDetector::with_base_url(&test_config(0), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{ "dominant_emotion": "sad", "emotion": { "happy": 10.0 } }]
            })))
            .mount(&mock_server)
            .await;

        let result = detector.analyze(&image()).await;
        assert!(matches!(result, Err(DetectorError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_placeholder_voice_reads_neutral() {
        let clip = MediaInput {
            bytes: Bytes::from_static(b"RIFF....WAVEfmt "),
            content_type: "audio/wav".to_string(),
            file_name: "clip.wav".to_string(),
        };
        let detection = PlaceholderVoiceDetector.detect(&clip).await;
        assert!(detection.detected);
        assert_eq!(detection.emotion, Emotion::Neutral);
        assert_eq!(detection.confidence, 0.5);
    }

    #[test]
    fn test_factory_honours_backend_names() {
        let mut config = test_config(0);
        assert!(create_face_detector(&config).unwrap().is_some());
        assert!(create_voice_detector(&config).unwrap().is_none());

        config.face_backend = "disabled".to_string();
        config.voice_backend = "placeholder".to_string();
        assert!(create_face_detector(&config).unwrap().is_none());
        assert!(create_voice_detector(&config).unwrap().is_some());

        config.voice_backend = "speechbrain".to_string();
        assert!(matches!(
            create_voice_detector(&config),
            Err(DetectorError::UnknownBackend { kind: "voice", .. })
        ));
    }
}

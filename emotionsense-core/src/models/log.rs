use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{now, Emotion, EmotionSource};

/// A single detected emotion. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionLog {
    pub id: Uuid,
    pub owner_id: i64,
    pub emotion_type: Emotion,
    pub confidence: f64,
    pub source: EmotionSource,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<Uuid>,
    pub raw_data: Option<serde_json::Value>,
}

/// Fields a caller supplies when recording an emotion.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEmotionLog {
    pub emotion_type: Emotion,
    pub confidence: f64,
    pub source: EmotionSource,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub raw_data: Option<serde_json::Value>,
}

impl NewEmotionLog {
    pub fn validate(&self) -> Result<(), String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence must be between 0 and 1, got {}",
                self.confidence
            ));
        }
        Ok(())
    }

    pub fn into_log(self, owner_id: i64, session_id: Option<Uuid>) -> EmotionLog {
        EmotionLog {
            id: Uuid::new_v4(),
            owner_id,
            emotion_type: self.emotion_type,
            confidence: self.confidence,
            source: self.source,
            timestamp: now(),
            session_id,
            raw_data: self.raw_data,
        }
    }
}

/// Optional narrowing for log listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    pub emotion: Option<Emotion>,
    pub source: Option<EmotionSource>,
    pub session_id: Option<Uuid>,
    pub limit: Option<u32>,
}

impl LogFilter {
    pub fn matches(&self, log: &EmotionLog) -> bool {
        self.emotion.map_or(true, |e| e == log.emotion_type)
            && self.source.map_or(true, |s| s == log.source)
            && self.session_id.map_or(true, |s| Some(s) == log.session_id)
    }
}

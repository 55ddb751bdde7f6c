use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::EmotionStats;
use crate::models::Emotion;

/// A time-bounded group of emotion detections for one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSession {
    pub id: Uuid,
    pub owner_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub dominant_emotion: Option<Emotion>,
    pub average_confidence: Option<f64>,
    pub total_emotions_detected: i64,
}

impl EmotionSession {
    pub fn open(owner_id: i64, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            start_time: at,
            end_time: None,
            is_active: true,
            dominant_emotion: None,
            average_confidence: None,
            total_emotions_detected: 0,
        }
    }

    /// Freeze the session with statistics computed from its logs.
    ///
    /// Returns `false` and leaves the session untouched when it is
    /// already closed.
    pub fn close_with(&mut self, stats: &EmotionStats, at: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        self.end_time = Some(at);
        self.is_active = false;
        self.dominant_emotion = stats.dominant_emotion;
        self.average_confidence = stats.average_confidence;
        self.total_emotions_detected = stats.total as i64;
        true
    }
}

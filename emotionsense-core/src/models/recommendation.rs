use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::label_enum;
use crate::models::{now, Emotion};

label_enum! {
    ContentType, "content type" {
        Text => "text",
        Music => "music",
        Activity => "activity",
        Quote => "quote",
    }
}

label_enum! {
    Difficulty, "difficulty" {
        Easy => "easy",
        Medium => "medium",
        Hard => "hard",
    }
}

label_enum! {
    /// How the user rated a recommendation.
    Feedback, "feedback" {
        Helpful => "helpful",
        NotHelpful => "not_helpful",
        Neutral => "neutral",
    }
}

label_enum! {
    MoodTrend, "mood trend" {
        Improving => "improving",
        Stable => "stable",
        Declining => "declining",
    }
}

/// Pre-authored content offered for a given emotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub content_type: ContentType,
    pub emotion_trigger: Emotion,
    pub title: String,
    pub content: String,
    pub artist: String,
    pub spotify_url: String,
    pub youtube_url: String,
    pub duration_minutes: Option<i32>,
    pub difficulty: Option<Difficulty>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub usage_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecommendation {
    pub content_type: ContentType,
    pub emotion_trigger: Emotion,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub spotify_url: String,
    #[serde(default)]
    pub youtube_url: String,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

impl NewRecommendation {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is required".to_string());
        }
        if self.title.chars().count() > 200 {
            return Err("title must be at most 200 characters".to_string());
        }
        if self.content.trim().is_empty() {
            return Err("content is required".to_string());
        }
        if matches!(self.duration_minutes, Some(m) if m < 0) {
            return Err("duration_minutes must not be negative".to_string());
        }
        Ok(())
    }

    pub fn into_recommendation(self) -> Recommendation {
        Recommendation {
            id: Uuid::new_v4(),
            content_type: self.content_type,
            emotion_trigger: self.emotion_trigger,
            title: self.title,
            content: self.content,
            artist: self.artist,
            spotify_url: self.spotify_url,
            youtube_url: self.youtube_url,
            duration_minutes: self.duration_minutes,
            difficulty: self.difficulty,
            is_active: true,
            created_at: now(),
            usage_count: 0,
        }
    }
}

/// A recommendation shown to a user, and what they did with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationHistory {
    pub id: Uuid,
    pub owner_id: i64,
    pub recommendation_id: Uuid,
    pub detected_emotion: Emotion,
    pub emotion_confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub was_clicked: bool,
    pub was_completed: bool,
    pub user_feedback: Option<Feedback>,
    pub feedback_comment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHistory {
    pub recommendation_id: Uuid,
    pub detected_emotion: Emotion,
    pub emotion_confidence: f64,
    #[serde(default)]
    pub was_clicked: bool,
    #[serde(default)]
    pub was_completed: bool,
}

impl NewHistory {
    pub fn validate(&self) -> Result<(), String> {
        if !self.emotion_confidence.is_finite() || !(0.0..=1.0).contains(&self.emotion_confidence) {
            return Err(format!(
                "emotion_confidence must be between 0 and 1, got {}",
                self.emotion_confidence
            ));
        }
        Ok(())
    }

    pub fn into_history(self, owner_id: i64) -> RecommendationHistory {
        RecommendationHistory {
            id: Uuid::new_v4(),
            owner_id,
            recommendation_id: self.recommendation_id,
            detected_emotion: self.detected_emotion,
            emotion_confidence: self.emotion_confidence,
            timestamp: now(),
            was_clicked: self.was_clicked,
            was_completed: self.was_completed,
            user_feedback: None,
            feedback_comment: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackUpdate {
    pub feedback: Feedback,
    #[serde(default)]
    pub comment: String,
    pub was_clicked: Option<bool>,
    pub was_completed: Option<bool>,
}

impl FeedbackUpdate {
    pub fn apply(&self, history: &mut RecommendationHistory) {
        history.user_feedback = Some(self.feedback);
        history.feedback_comment = self.comment.clone();
        if let Some(clicked) = self.was_clicked {
            history.was_clicked = clicked;
        }
        if let Some(completed) = self.was_completed {
            history.was_completed = completed;
        }
    }
}

/// Summary of a user's emotional patterns over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionInsight {
    pub id: Uuid,
    pub owner_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub most_common_emotion: Emotion,
    pub emotion_distribution: HashMap<String, u64>,
    pub mood_trend: MoodTrend,
    pub most_helpful_content_type: Option<ContentType>,
    pub total_recommendations_received: i64,
    pub ai_summary: String,
    pub created_at: DateTime<Utc>,
}

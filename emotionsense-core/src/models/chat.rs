use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::label_enum;
use crate::models::{Emotion, MoodTrend};
use crate::mood::mood_trend;

const MAX_CONCERNS: usize = 20;
const CONCERN_CHARS: usize = 120;

label_enum! {
    /// Author of a chat message.
    Sender, "sender" {
        User => "user",
        Bot => "bot",
    }
}

label_enum! {
    /// Kind of reply the bot produced.
    ResponseType, "response type" {
        Comfort => "comfort",
        Reassurance => "reassurance",
        Calming => "calming",
        Celebration => "celebration",
        General => "general",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub owner_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub initial_emotion: Option<Emotion>,
    pub total_messages: i64,
}

impl ChatSession {
    pub fn open(owner_id: i64, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            start_time: at,
            end_time: None,
            is_active: true,
            initial_emotion: None,
            total_messages: 0,
        }
    }

    /// Returns `false` when the session was already closed.
    pub fn close_with(&mut self, message_count: i64, at: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        self.end_time = Some(at);
        self.is_active = false;
        self.total_messages = message_count;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender: Sender,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub detected_emotion: Option<Emotion>,
    pub emotion_confidence: Option<f64>,
    pub response_type: Option<ResponseType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    pub emotion: Emotion,
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Running conversation memory, one per chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatbotContext {
    pub id: Uuid,
    pub session_id: Uuid,
    pub conversation_summary: String,
    pub user_concerns: Vec<String>,
    pub suggested_topics: Vec<String>,
    pub emotion_history: Vec<EmotionReading>,
    pub mood_trend: Option<MoodTrend>,
    pub updated_at: DateTime<Utc>,
}

impl ChatbotContext {
    pub fn new(session_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            conversation_summary: String::new(),
            user_concerns: Vec::new(),
            suggested_topics: Vec::new(),
            emotion_history: Vec::new(),
            mood_trend: None,
            updated_at: at,
        }
    }
}

/// One user message and the bot's reply, stored together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub user_message: ChatMessage,
    pub bot_message: ChatMessage,
}

impl ChatbotContext {
    /// Fold a turn into the running context and recompute the mood trend.
    pub fn record_turn(&mut self, turn: &ChatTurn, at: DateTime<Utc>) {
        let user = &turn.user_message;

        if let Some(emotion) = user.detected_emotion {
            self.emotion_history.push(EmotionReading {
                emotion,
                confidence: user.emotion_confidence,
                timestamp: user.timestamp,
            });

            if emotion.valence() < 0.0 && self.user_concerns.len() < MAX_CONCERNS {
                let concern: String = user.message.trim().chars().take(CONCERN_CHARS).collect();
                if !concern.is_empty() && !self.user_concerns.contains(&concern) {
                    self.user_concerns.push(concern);
                }
            }
        }

        if let Some(kind) = turn.bot_message.response_type {
            let topic = kind.as_str().to_string();
            if kind != ResponseType::General && !self.suggested_topics.contains(&topic) {
                self.suggested_topics.push(topic);
            }
        }

        let emotions: Vec<Emotion> = self.emotion_history.iter().map(|r| r.emotion).collect();
        self.mood_trend = mood_trend(&emotions);

        if let Some(latest) = emotions.last() {
            self.conversation_summary = format!(
                "Latest emotion: {}. Mood trend: {}. Concerns raised: {}.",
                latest,
                self.mood_trend.map_or("unknown", |t| t.as_str()),
                self.user_concerns.len()
            );
        }
        self.updated_at = at;
    }
}

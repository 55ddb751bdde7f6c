//! Chatbot sessions and message exchange.

use chrono::Duration;
use emotionsense_core::models::{
    ChatMessage, ChatSession, ChatTurn, ChatbotContext, Emotion, MoodTrend, Sender,
};
use emotionsense_core::respond;
use emotionsense_core::store::EmotionStore;
use emotionsense_core::StoreError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(default)]
    pub emotion: Option<Emotion>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl SendMessageRequest {
    pub fn validate(&self) -> Result<(), String> {
        let len = self.message.trim().chars().count();
        if len == 0 {
            return Err("message must not be empty".to_string());
        }
        if len > MAX_MESSAGE_CHARS {
            return Err(format!("message must be at most {MAX_MESSAGE_CHARS} characters"));
        }
        if let Some(c) = self.confidence {
            if !c.is_finite() || !(0.0..=1.0).contains(&c) {
                return Err(format!("confidence must be between 0 and 1, got {c}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub session_id: Uuid,
    pub user_message: ChatMessage,
    pub bot_message: ChatMessage,
    pub mood_trend: Option<MoodTrend>,
}

#[derive(Debug, Serialize)]
pub struct ChatSessionDetail {
    #[serde(flatten)]
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
    pub context: Option<ChatbotContext>,
}

/// Pair the user's message with the canned reply for their emotion.
pub fn build_turn(session_id: Uuid, req: &SendMessageRequest) -> ChatTurn {
    let now = emotionsense_core::models::now();
    let text = req.message.trim();
    let (reply, response_type) = respond(text, req.emotion);

    ChatTurn {
        user_message: ChatMessage {
            id: Uuid::new_v4(),
            session_id,
            sender: Sender::User,
            message: text.to_string(),
            timestamp: now,
            detected_emotion: req.emotion,
            emotion_confidence: req.emotion.and(req.confidence),
            response_type: None,
        },
        bot_message: ChatMessage {
            id: Uuid::new_v4(),
            session_id,
            sender: Sender::Bot,
            message: reply.to_string(),
            // keeps the reply after the prompt when ordering by time
            timestamp: now + Duration::microseconds(1),
            detected_emotion: None,
            emotion_confidence: None,
            response_type: Some(response_type),
        },
    }
}

pub async fn send_message(
    store: &dyn EmotionStore,
    owner: i64,
    req: SendMessageRequest,
) -> Result<SendMessageResponse, ApiError> {
    req.validate().map_err(ApiError::BadRequest)?;

    // A concurrent close can win between lookup and write; retry once.
    let mut retried = false;
    loop {
        let session = store.active_chat_session(owner).await?;
        let turn = build_turn(session.id, &req);
        match store.record_turn(owner, &turn).await {
            Ok(context) => {
                tracing::debug!(
                    owner,
                    session_id = %session.id,
                    emotion = ?req.emotion,
                    response_type = ?turn.bot_message.response_type,
                    "Chat turn recorded"
                );
                return Ok(SendMessageResponse {
                    session_id: session.id,
                    user_message: turn.user_message,
                    bot_message: turn.bot_message,
                    mood_trend: context.mood_trend,
                });
            }
            Err(StoreError::SessionClosed(_)) if !retried => retried = true,
            Err(e) => return Err(e.into()),
        }
    }
}

pub async fn active_session(store: &dyn EmotionStore, owner: i64) -> Result<ChatSession, ApiError> {
    Ok(store.active_chat_session(owner).await?)
}

pub async fn list_sessions(
    store: &dyn EmotionStore,
    owner: i64,
) -> Result<Vec<ChatSession>, ApiError> {
    Ok(store.list_chat_sessions(owner).await?)
}

pub async fn session_detail(
    store: &dyn EmotionStore,
    owner: i64,
    id: Uuid,
) -> Result<ChatSessionDetail, ApiError> {
    let session = store.get_chat_session(owner, id).await?;
    let messages = store.chat_messages(owner, id).await?;
    let context = store.chat_context(owner, id).await?;
    Ok(ChatSessionDetail {
        session,
        messages,
        context,
    })
}

pub async fn close_session(
    store: &dyn EmotionStore,
    owner: i64,
    id: Uuid,
) -> Result<ChatSession, ApiError> {
    Ok(store.close_chat_session(owner, id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emotionsense_core::models::ResponseType;
    use emotionsense_core::MemoryStore;

    fn request(message: &str, emotion: Option<Emotion>) -> SendMessageRequest {
        SendMessageRequest {
            message: message.to_string(),
            emotion,
            confidence: emotion.map(|_| 0.75),
        }
    }

    #[test]
    fn test_turn_timestamps_are_microsecond_aligned() {
        use chrono::Timelike;

        let turn = build_turn(Uuid::new_v4(), &request("hello", None));
        assert_eq!(turn.user_message.timestamp.nanosecond() % 1_000, 0);
        assert_eq!(turn.bot_message.timestamp.nanosecond() % 1_000, 0);
        assert!(turn.bot_message.timestamp > turn.user_message.timestamp);
    }

    #[tokio::test]
    async fn test_send_records_turn_and_initial_emotion() {
        let store = MemoryStore::new();
        let resp = send_message(&store, 1, request("rough day", Some(Emotion::Sad)))
            .await
            .unwrap();
        assert_eq!(
            resp.bot_message.message,
            "I'm here to listen. Would you like to talk about what's making you feel this way?"
        );
        assert_eq!(resp.bot_message.response_type, Some(ResponseType::Comfort));

        send_message(&store, 1, request("better now", Some(Emotion::Happy)))
            .await
            .unwrap();

        let detail = session_detail(&store, 1, resp.session_id).await.unwrap();
        assert_eq!(detail.session.initial_emotion, Some(Emotion::Sad));
        assert_eq!(detail.messages.len(), 4);
        assert_eq!(detail.messages[0].sender, Sender::User);
        assert_eq!(detail.messages[1].sender, Sender::Bot);
        let context = detail.context.unwrap();
        assert_eq!(context.emotion_history.len(), 2);
        assert_eq!(context.mood_trend, Some(MoodTrend::Improving));
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected() {
        let store = MemoryStore::new();
        let err = send_message(&store, 1, request("   ", None)).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(list_sessions(&store, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_counts_messages_and_next_send_opens_new_session() {
        let store = MemoryStore::new();
        let first = send_message(&store, 1, request("hi", None)).await.unwrap();
        let closed = close_session(&store, 1, first.session_id).await.unwrap();
        assert!(!closed.is_active);
        assert_eq!(closed.total_messages, 2);

        let second = send_message(&store, 1, request("hi again", None)).await.unwrap();
        assert_ne!(first.session_id, second.session_id);
    }

    #[test]
    fn test_confidence_without_emotion_is_dropped() {
        let req = SendMessageRequest {
            message: "hello".into(),
            emotion: None,
            confidence: Some(0.9),
        };
        let turn = build_turn(Uuid::new_v4(), &req);
        assert!(turn.user_message.emotion_confidence.is_none());
        assert_eq!(turn.bot_message.response_type, Some(ResponseType::General));
    }
}

//! Persistence layer.
//!
//! The service talks to storage only through these traits. [`PgStore`] is
//! the production implementation; [`MemoryStore`] backs tests and
//! `--in-memory` development runs. Both enforce the same invariants:
//!
//! - at most one active emotion session and one active chat session per owner
//! - closing freezes aggregates computed from the session's logs; closing again
//!   returns the stored state unchanged
//! - logs and chat turns cannot be attached to a closed session
//! - recording recommendation history bumps the usage count in the same write

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ChatMessage, ChatSession, ChatTurn, ChatbotContext, ContentType, Emotion, EmotionInsight,
    EmotionLog, EmotionSession, FeedbackUpdate, LogFilter, ProfileUpdate, Recommendation,
    RecommendationHistory, UserProfile,
};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Default cap on list endpoints.
pub const DEFAULT_LIST_LIMIT: u32 = 100;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the owner's active session, creating one if none exists.
    async fn active_session(&self, owner_id: i64) -> StoreResult<EmotionSession>;

    /// Open a new session; fails with `AlreadyActive` if one is open.
    async fn open_session(&self, owner_id: i64) -> StoreResult<EmotionSession>;

    async fn get_session(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionSession>;

    async fn list_sessions(&self, owner_id: i64) -> StoreResult<Vec<EmotionSession>>;

    /// Close the session and freeze its statistics.
    async fn close_session(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionSession>;
}

#[async_trait]
pub trait EmotionLogStore: Send + Sync {
    /// Append a log. A referenced session must belong to the same owner and be active.
    async fn insert_log(&self, log: EmotionLog) -> StoreResult<EmotionLog>;

    async fn get_log(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionLog>;

    /// Newest first.
    async fn list_logs(&self, owner_id: i64, filter: &LogFilter) -> StoreResult<Vec<EmotionLog>>;

    /// Every log attached to a session, oldest first. No limit applies.
    async fn session_logs(&self, owner_id: i64, session_id: Uuid) -> StoreResult<Vec<EmotionLog>>;

    /// Oldest first, `from` inclusive, `to` exclusive.
    async fn logs_between(
        &self,
        owner_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<EmotionLog>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Return the owner's profile, creating the default one on first access.
    async fn profile(&self, owner_id: i64) -> StoreResult<UserProfile>;

    async fn update_profile(&self, owner_id: i64, update: &ProfileUpdate)
        -> StoreResult<UserProfile>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn active_chat_session(&self, owner_id: i64) -> StoreResult<ChatSession>;

    async fn get_chat_session(&self, owner_id: i64, id: Uuid) -> StoreResult<ChatSession>;

    async fn list_chat_sessions(&self, owner_id: i64) -> StoreResult<Vec<ChatSession>>;

    /// Close the chat session, recording its message count.
    async fn close_chat_session(&self, owner_id: i64, id: Uuid) -> StoreResult<ChatSession>;

    /// Oldest first.
    async fn chat_messages(&self, owner_id: i64, session_id: Uuid) -> StoreResult<Vec<ChatMessage>>;

    async fn chat_context(
        &self,
        owner_id: i64,
        session_id: Uuid,
    ) -> StoreResult<Option<ChatbotContext>>;

    /// Store both messages of a turn and update the session context atomically.
    async fn record_turn(&self, owner_id: i64, turn: &ChatTurn) -> StoreResult<ChatbotContext>;
}

#[async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn insert_recommendation(&self, rec: Recommendation) -> StoreResult<Recommendation>;

    /// Active recommendations only.
    async fn get_recommendation(&self, id: Uuid) -> StoreResult<Recommendation>;

    /// Active recommendations, most used first.
    async fn list_recommendations(
        &self,
        emotion: Option<Emotion>,
        content_type: Option<ContentType>,
    ) -> StoreResult<Vec<Recommendation>>;

    /// Insert the history row and increment the recommendation's usage count.
    async fn record_history(&self, history: RecommendationHistory)
        -> StoreResult<RecommendationHistory>;

    /// Newest first.
    async fn list_history(&self, owner_id: i64) -> StoreResult<Vec<RecommendationHistory>>;

    async fn update_feedback(
        &self,
        owner_id: i64,
        id: Uuid,
        update: &FeedbackUpdate,
    ) -> StoreResult<RecommendationHistory>;

    /// History rows with their recommendation's content type, `from` inclusive, `to` exclusive.
    async fn history_between(
        &self,
        owner_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<(RecommendationHistory, ContentType)>>;
}

#[async_trait]
pub trait InsightStore: Send + Sync {
    async fn insert_insight(&self, insight: EmotionInsight) -> StoreResult<EmotionInsight>;

    /// Most recent period first.
    async fn list_insights(&self, owner_id: i64) -> StoreResult<Vec<EmotionInsight>>;

    async fn get_insight(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionInsight>;
}

/// Everything the HTTP layer needs from storage.
pub trait EmotionStore:
    SessionStore + EmotionLogStore + ProfileStore + ChatStore + RecommendationStore + InsightStore
{
}

impl<T> EmotionStore for T where
    T: SessionStore
        + EmotionLogStore
        + ProfileStore
        + ChatStore
        + RecommendationStore
        + InsightStore
{
}

pub(crate) fn effective_limit(limit: Option<u32>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 1000) as usize
}

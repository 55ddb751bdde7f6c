//! Process-local store used by tests and `--in-memory` runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    effective_limit, ChatStore, EmotionLogStore, InsightStore, ProfileStore, RecommendationStore,
    SessionStore, StoreResult,
};
use crate::aggregate::aggregate;
use crate::error::StoreError;
use crate::models::{
    ChatMessage, ChatSession, ChatTurn, ChatbotContext, ContentType, Emotion, EmotionInsight,
    EmotionLog, EmotionSession, FeedbackUpdate, LogFilter, ProfileUpdate, Recommendation,
    RecommendationHistory, UserProfile,
};
use crate::models::now;

#[derive(Default)]
struct Tables {
    sessions: Vec<EmotionSession>,
    logs: Vec<EmotionLog>,
    profiles: HashMap<i64, UserProfile>,
    chat_sessions: Vec<ChatSession>,
    chat_messages: Vec<ChatMessage>,
    contexts: HashMap<Uuid, ChatbotContext>,
    recommendations: Vec<Recommendation>,
    history: Vec<RecommendationHistory>,
    insights: Vec<EmotionInsight>,
}

/// Every operation takes one lock, which makes each call atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Tables {
    fn owned_session(&mut self, owner_id: i64, id: Uuid) -> StoreResult<&mut EmotionSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id && s.owner_id == owner_id)
            .ok_or_else(|| StoreError::not_found("session", id))
    }

    fn owned_chat_session(&mut self, owner_id: i64, id: Uuid) -> StoreResult<&mut ChatSession> {
        self.chat_sessions
            .iter_mut()
            .find(|s| s.id == id && s.owner_id == owner_id)
            .ok_or_else(|| StoreError::not_found("chat session", id))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn active_session(&self, owner_id: i64) -> StoreResult<EmotionSession> {
        let mut t = self.lock();
        if let Some(active) = t
            .sessions
            .iter()
            .find(|s| s.owner_id == owner_id && s.is_active)
        {
            return Ok(active.clone());
        }
        let session = EmotionSession::open(owner_id, now());
        t.sessions.push(session.clone());
        Ok(session)
    }

    async fn open_session(&self, owner_id: i64) -> StoreResult<EmotionSession> {
        let mut t = self.lock();
        if t.sessions.iter().any(|s| s.owner_id == owner_id && s.is_active) {
            return Err(StoreError::AlreadyActive("session"));
        }
        let session = EmotionSession::open(owner_id, now());
        t.sessions.push(session.clone());
        Ok(session)
    }

    async fn get_session(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionSession> {
        let mut t = self.lock();
        t.owned_session(owner_id, id).map(|s| s.clone())
    }

    async fn list_sessions(&self, owner_id: i64) -> StoreResult<Vec<EmotionSession>> {
        let t = self.lock();
        let mut out: Vec<EmotionSession> = t
            .sessions
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(out)
    }

    async fn close_session(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionSession> {
        let mut t = self.lock();

        let mut readings: Vec<&EmotionLog> =
            t.logs.iter().filter(|l| l.session_id == Some(id)).collect();
        readings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        let stats = aggregate(readings.iter().map(|l| (l.emotion_type, l.confidence)));

        let session = t.owned_session(owner_id, id)?;
        session.close_with(&stats, now());
        Ok(session.clone())
    }
}

#[async_trait]
impl EmotionLogStore for MemoryStore {
    async fn insert_log(&self, log: EmotionLog) -> StoreResult<EmotionLog> {
        let mut t = self.lock();
        if let Some(session_id) = log.session_id {
            let session = t.owned_session(log.owner_id, session_id)?;
            if !session.is_active {
                return Err(StoreError::SessionClosed(session_id));
            }
        }
        t.logs.push(log.clone());
        Ok(log)
    }

    async fn get_log(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionLog> {
        let t = self.lock();
        t.logs
            .iter()
            .find(|l| l.id == id && l.owner_id == owner_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("emotion log", id))
    }

    async fn list_logs(&self, owner_id: i64, filter: &LogFilter) -> StoreResult<Vec<EmotionLog>> {
        let t = self.lock();
        let mut out: Vec<EmotionLog> = t
            .logs
            .iter()
            .filter(|l| l.owner_id == owner_id && filter.matches(l))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(effective_limit(filter.limit));
        Ok(out)
    }

    async fn session_logs(&self, owner_id: i64, session_id: Uuid) -> StoreResult<Vec<EmotionLog>> {
        let t = self.lock();
        let mut out: Vec<EmotionLog> = t
            .logs
            .iter()
            .filter(|l| l.owner_id == owner_id && l.session_id == Some(session_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn logs_between(
        &self,
        owner_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<EmotionLog>> {
        let t = self.lock();
        let mut out: Vec<EmotionLog> = t
            .logs
            .iter()
            .filter(|l| l.owner_id == owner_id && l.timestamp >= from && l.timestamp < to)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn profile(&self, owner_id: i64) -> StoreResult<UserProfile> {
        let mut t = self.lock();
        let total_sessions = t.sessions.iter().filter(|s| s.owner_id == owner_id).count() as i64;
        let profile = t
            .profiles
            .entry(owner_id)
            .or_insert_with(|| UserProfile::new(owner_id, now()));
        let mut out = profile.clone();
        out.total_sessions = total_sessions;
        Ok(out)
    }

    async fn update_profile(
        &self,
        owner_id: i64,
        update: &ProfileUpdate,
    ) -> StoreResult<UserProfile> {
        let mut t = self.lock();
        let total_sessions = t.sessions.iter().filter(|s| s.owner_id == owner_id).count() as i64;
        let now = crate::models::now();
        let profile = t
            .profiles
            .entry(owner_id)
            .or_insert_with(|| UserProfile::new(owner_id, now));
        update.apply(profile, now);
        let mut out = profile.clone();
        out.total_sessions = total_sessions;
        Ok(out)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn active_chat_session(&self, owner_id: i64) -> StoreResult<ChatSession> {
        let mut t = self.lock();
        if let Some(active) = t
            .chat_sessions
            .iter()
            .find(|s| s.owner_id == owner_id && s.is_active)
        {
            return Ok(active.clone());
        }
        let session = ChatSession::open(owner_id, now());
        t.chat_sessions.push(session.clone());
        Ok(session)
    }

    async fn get_chat_session(&self, owner_id: i64, id: Uuid) -> StoreResult<ChatSession> {
        let mut t = self.lock();
        t.owned_chat_session(owner_id, id).map(|s| s.clone())
    }

    async fn list_chat_sessions(&self, owner_id: i64) -> StoreResult<Vec<ChatSession>> {
        let t = self.lock();
        let mut out: Vec<ChatSession> = t
            .chat_sessions
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(out)
    }

    async fn close_chat_session(&self, owner_id: i64, id: Uuid) -> StoreResult<ChatSession> {
        let mut t = self.lock();
        let count = t.chat_messages.iter().filter(|m| m.session_id == id).count() as i64;
        let session = t.owned_chat_session(owner_id, id)?;
        session.close_with(count, now());
        Ok(session.clone())
    }

    async fn chat_messages(
        &self,
        owner_id: i64,
        session_id: Uuid,
    ) -> StoreResult<Vec<ChatMessage>> {
        let mut t = self.lock();
        t.owned_chat_session(owner_id, session_id)?;
        let mut out: Vec<ChatMessage> = t
            .chat_messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        // stable sort keeps user-before-bot for equal timestamps
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(out)
    }

    async fn chat_context(
        &self,
        owner_id: i64,
        session_id: Uuid,
    ) -> StoreResult<Option<ChatbotContext>> {
        let mut t = self.lock();
        t.owned_chat_session(owner_id, session_id)?;
        Ok(t.contexts.get(&session_id).cloned())
    }

    async fn record_turn(&self, owner_id: i64, turn: &ChatTurn) -> StoreResult<ChatbotContext> {
        let session_id = turn.user_message.session_id;
        let now = crate::models::now();
        let mut t = self.lock();

        let session = t.owned_chat_session(owner_id, session_id)?;
        if !session.is_active {
            return Err(StoreError::SessionClosed(session_id));
        }
        if session.initial_emotion.is_none() {
            session.initial_emotion = turn.user_message.detected_emotion;
        }
        session.total_messages += 2;

        t.chat_messages.push(turn.user_message.clone());
        t.chat_messages.push(turn.bot_message.clone());

        let context = t
            .contexts
            .entry(session_id)
            .or_insert_with(|| ChatbotContext::new(session_id, now));
        context.record_turn(turn, now);
        Ok(context.clone())
    }
}

#[async_trait]
impl RecommendationStore for MemoryStore {
    async fn insert_recommendation(&self, rec: Recommendation) -> StoreResult<Recommendation> {
        self.lock().recommendations.push(rec.clone());
        Ok(rec)
    }

    async fn get_recommendation(&self, id: Uuid) -> StoreResult<Recommendation> {
        let t = self.lock();
        t.recommendations
            .iter()
            .find(|r| r.id == id && r.is_active)
            .cloned()
            .ok_or_else(|| StoreError::not_found("recommendation", id))
    }

    async fn list_recommendations(
        &self,
        emotion: Option<Emotion>,
        content_type: Option<ContentType>,
    ) -> StoreResult<Vec<Recommendation>> {
        let t = self.lock();
        let mut out: Vec<Recommendation> = t
            .recommendations
            .iter()
            .filter(|r| r.is_active)
            .filter(|r| emotion.map_or(true, |e| r.emotion_trigger == e))
            .filter(|r| content_type.map_or(true, |c| r.content_type == c))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
        Ok(out)
    }

    async fn record_history(
        &self,
        history: RecommendationHistory,
    ) -> StoreResult<RecommendationHistory> {
        let mut t = self.lock();
        let rec = t
            .recommendations
            .iter_mut()
            .find(|r| r.id == history.recommendation_id)
            .ok_or_else(|| StoreError::not_found("recommendation", history.recommendation_id))?;
        rec.usage_count += 1;
        t.history.push(history.clone());
        Ok(history)
    }

    async fn list_history(&self, owner_id: i64) -> StoreResult<Vec<RecommendationHistory>> {
        let t = self.lock();
        let mut out: Vec<RecommendationHistory> = t
            .history
            .iter()
            .filter(|h| h.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    async fn update_feedback(
        &self,
        owner_id: i64,
        id: Uuid,
        update: &FeedbackUpdate,
    ) -> StoreResult<RecommendationHistory> {
        let mut t = self.lock();
        let entry = t
            .history
            .iter_mut()
            .find(|h| h.id == id && h.owner_id == owner_id)
            .ok_or_else(|| StoreError::not_found("recommendation history", id))?;
        update.apply(entry);
        Ok(entry.clone())
    }

    async fn history_between(
        &self,
        owner_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<(RecommendationHistory, ContentType)>> {
        let t = self.lock();
        let out = t
            .history
            .iter()
            .filter(|h| h.owner_id == owner_id && h.timestamp >= from && h.timestamp < to)
            .filter_map(|h| {
                t.recommendations
                    .iter()
                    .find(|r| r.id == h.recommendation_id)
                    .map(|r| (h.clone(), r.content_type))
            })
            .collect();
        Ok(out)
    }
}

#[async_trait]
impl InsightStore for MemoryStore {
    async fn insert_insight(&self, insight: EmotionInsight) -> StoreResult<EmotionInsight> {
        self.lock().insights.push(insight.clone());
        Ok(insight)
    }

    async fn list_insights(&self, owner_id: i64) -> StoreResult<Vec<EmotionInsight>> {
        let t = self.lock();
        let mut out: Vec<EmotionInsight> = t
            .insights
            .iter()
            .filter(|i| i.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.end_date.cmp(&a.end_date));
        Ok(out)
    }

    async fn get_insight(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionInsight> {
        let t = self.lock();
        t.insights
            .iter()
            .find(|i| i.id == id && i.owner_id == owner_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("insight", id))
    }
}

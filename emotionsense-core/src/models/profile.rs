use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub owner_id: i64,
    pub preferred_music_genre: String,
    pub enable_voice_detection: bool,
    pub enable_face_detection: bool,
    /// Derived from the owner's emotion sessions at read time.
    pub total_sessions: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(owner_id: i64, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            preferred_music_genre: String::new(),
            enable_voice_detection: true,
            enable_face_detection: true,
            total_sessions: 0,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub preferred_music_genre: Option<String>,
    pub enable_voice_detection: Option<bool>,
    pub enable_face_detection: Option<bool>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), String> {
        match &self.preferred_music_genre {
            Some(genre) if genre.chars().count() > 50 => {
                Err("preferred_music_genre must be at most 50 characters".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn apply(&self, profile: &mut UserProfile, at: DateTime<Utc>) {
        if let Some(genre) = &self.preferred_music_genre {
            profile.preferred_music_genre = genre.trim().to_string();
        }
        if let Some(voice) = self.enable_voice_detection {
            profile.enable_voice_detection = voice;
        }
        if let Some(face) = self.enable_face_detection {
            profile.enable_face_detection = face;
        }
        profile.updated_at = at;
    }
}

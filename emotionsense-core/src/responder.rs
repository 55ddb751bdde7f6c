//! Canned chatbot replies keyed by the user's emotion.

use crate::models::{Emotion, ResponseType};

pub const FALLBACK_RESPONSE: &str = "I'm here to support you. How can I help you today?";

/// Pick the bot reply for a user message.
///
/// The message text does not influence the reply; only the emotion does.
pub fn respond(_message: &str, emotion: Option<Emotion>) -> (&'static str, ResponseType) {
    match emotion {
        Some(Emotion::Sad) => (
            "I'm here to listen. Would you like to talk about what's making you feel this way?",
            ResponseType::Comfort,
        ),
        Some(Emotion::Worried) => (
            "It's normal to feel worried sometimes. Let's work through this together.",
            ResponseType::Reassurance,
        ),
        Some(Emotion::Angry) => (
            "I understand you're upset. Take a deep breath. What's troubling you?",
            ResponseType::Calming,
        ),
        Some(Emotion::Happy) => (
            "That's wonderful! I'm glad you're feeling good. What's bringing you joy today?",
            ResponseType::Celebration,
        ),
        Some(Emotion::Fear | Emotion::Surprise | Emotion::Disgust | Emotion::Neutral) | None => {
            (FALLBACK_RESPONSE, ResponseType::General)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sad_gets_listening_reply() {
        let (text, kind) = respond("rough day", Some(Emotion::Sad));
        assert!(text.starts_with("I'm here to listen."));
        assert_eq!(kind, ResponseType::Comfort);
    }

    #[test]
    fn test_unmapped_emotion_falls_back() {
        assert_eq!(respond("hi", Some(Emotion::Fear)).0, FALLBACK_RESPONSE);
        assert_eq!(respond("hi", None), (FALLBACK_RESPONSE, ResponseType::General));
    }

    #[test]
    fn test_reply_ignores_message_text() {
        assert_eq!(
            respond("a", Some(Emotion::Happy)),
            respond("completely different", Some(Emotion::Happy))
        );
    }
}

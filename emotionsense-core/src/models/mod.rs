/// Text-backed enum with `as_str`, `Display` and `FromStr`.
macro_rules! label_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::emotion::UnknownLabel;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err($crate::models::emotion::UnknownLabel::new($kind, other)),
                }
            }
        }
    };
}

pub(crate) use label_enum;

/// Current time truncated to the microsecond precision PostgreSQL stores.
///
/// Every stored timestamp is taken from here so a value returned on write
/// equals the value read back later.
pub fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::SubsecRound::trunc_subsecs(chrono::Utc::now(), 6)
}

pub mod chat;
pub mod emotion;
pub mod log;
pub mod profile;
pub mod recommendation;
pub mod session;

pub use chat::{
    ChatMessage, ChatSession, ChatTurn, ChatbotContext, EmotionReading, ResponseType, Sender,
};
pub use emotion::{Emotion, EmotionSource, UnknownLabel};
pub use log::{EmotionLog, LogFilter, NewEmotionLog};
pub use profile::{ProfileUpdate, UserProfile};
pub use recommendation::{
    ContentType, Difficulty, EmotionInsight, Feedback, FeedbackUpdate, MoodTrend, NewHistory,
    NewRecommendation, Recommendation, RecommendationHistory,
};
pub use session::EmotionSession;


use super::label_enum;

/// Error returned when a label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownLabel {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

label_enum! {
    /// Closed set of emotion labels used across logs, chat and recommendations.
    Emotion, "emotion" {
        Happy => "happy",
        Sad => "sad",
        Angry => "angry",
        Fear => "fear",
        Surprise => "surprise",
        Disgust => "disgust",
        Neutral => "neutral",
        Worried => "worried",
    }
}

impl Emotion {
    /// Signed pleasantness used for mood trends, in [-1, 1].
    pub fn valence(&self) -> f64 {
        match self {
            Emotion::Happy => 1.0,
            Emotion::Surprise => 0.5,
            Emotion::Neutral => 0.0,
            Emotion::Worried => -0.5,
            Emotion::Sad | Emotion::Angry | Emotion::Fear | Emotion::Disgust => -1.0,
        }
    }

    /// Map a model-specific label onto the closed set.
    ///
    /// Face models emit a subset of our labels; anything unrecognised
    /// collapses to `Neutral` rather than failing the detection.
    pub fn from_model_label(label: &str) -> Self {
        label.trim().to_ascii_lowercase().parse().unwrap_or(Emotion::Neutral)
    }
}

label_enum! {
    /// Where an emotion reading came from.
    EmotionSource, "source" {
        Face => "face",
        Voice => "voice",
        Combined => "combined",
    }
}

//! The fixed mood catalog. Every session picks one mood at creation; the
//! mood selects the responder's persona and the client's theme.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Happy,
    Calm,
    Energetic,
    Wise,
    Playful,
    Professional,
}

/// Returned when a mood name is not in the catalog.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown mood: {0}")]
pub struct UnknownMood(pub String);

/// Public description of a mood, as served by `GET /moods`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodInfo {
    pub name: String,
    pub color: String,
    pub emoji: String,
    pub description: String,
}

impl Mood {
    pub const ALL: [Mood; 6] = [
        Mood::Happy,
        Mood::Calm,
        Mood::Energetic,
        Mood::Wise,
        Mood::Playful,
        Mood::Professional,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Calm => "calm",
            Self::Energetic => "energetic",
            Self::Wise => "wise",
            Self::Playful => "playful",
            Self::Professional => "professional",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Happy => "#FFD700",
            Self::Calm => "#87CEEB",
            Self::Energetic => "#FF6347",
            Self::Wise => "#9370DB",
            Self::Playful => "#FF69B4",
            Self::Professional => "#708090",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Happy => "😊",
            Self::Calm => "😌",
            Self::Energetic => "⚡",
            Self::Wise => "🦉",
            Self::Playful => "🎭",
            Self::Professional => "💼",
        }
    }

    /// System prompt handed to the responder for sessions in this mood.
    pub fn system_prompt(self) -> &'static str {
        match self {
            Self::Happy => "You are a cheerful and optimistic AI. Respond with enthusiasm and positivity. Keep responses concise but warm.",
            Self::Calm => "You are a peaceful and measured AI. Speak slowly and thoughtfully. Provide calming and reassuring responses.",
            Self::Energetic => "You are a dynamic and enthusiastic AI. Use exciting language and be motivational. Keep the energy high!",
            Self::Wise => "You are a thoughtful and insightful AI. Provide deep, philosophical responses with wisdom and understanding.",
            Self::Playful => "You are a creative and fun AI. Use humor, wordplay, and imaginative responses. Be lighthearted and entertaining.",
            Self::Professional => "You are a formal and business-focused AI. Use professional language and provide structured, informative responses.",
        }
    }

    pub fn info(self) -> MoodInfo {
        MoodInfo {
            name: self.name().to_string(),
            color: self.color().to_string(),
            emoji: self.emoji().to_string(),
            description: self.system_prompt().to_string(),
        }
    }

    /// The whole catalog in display order.
    pub fn catalog() -> Vec<MoodInfo> {
        Self::ALL.iter().map(|m| m.info()).collect()
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mood {
    type Err = UnknownMood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownMood(s.to_string()))
    }
}

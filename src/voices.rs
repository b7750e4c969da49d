//! Selectable synthesis voices

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoiceOption {
    pub id: &'static str,
    pub name: &'static str,
    pub accent: &'static str,
    pub description: &'static str,
}

/// Built-in catalog; the first entry is the default voice
pub const VOICES: &[VoiceOption] = &[
    VoiceOption {
        id: "IKne3meq5aSn9XLyUdCD",
        name: "Charlie",
        accent: "American",
        description: "Casual and conversational",
    },
    VoiceOption {
        id: "TxGEqnHWrfWFTfGW9XjX",
        name: "Michael",
        accent: "American",
        description: "Authoritative and professional",
    },
    VoiceOption {
        id: "pNInz6obpgDQGcFmaJgB",
        name: "Adam",
        accent: "British",
        description: "Energetic and dynamic",
    },
    VoiceOption {
        id: "yoZ06aMxZJJ28mfd3POQ",
        name: "James",
        accent: "Australian",
        description: "Confident and clear",
    },
    VoiceOption {
        id: "21m00Tcm4TlvDq8ikWAM",
        name: "Rachel",
        accent: "British",
        description: "Professional and articulate",
    },
    VoiceOption {
        id: "EXAVITQu4vr4xnSDxMaL",
        name: "Sarah",
        accent: "American",
        description: "Warm and friendly",
    },
    VoiceOption {
        id: "ThT5KcBeYPX3keUQqHPh",
        name: "Emily",
        accent: "British",
        description: "Warm and professional",
    },
];

pub fn default_voice() -> &'static VoiceOption {
    &VOICES[0]
}

pub fn find_voice(id: &str) -> Option<&'static VoiceOption> {
    VOICES.iter().find(|v| v.id == id)
}

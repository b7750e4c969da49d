use serde::{Deserialize, Serialize};

/// Audio frame message published to NATS
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u64,
    pub pcm: String, // Base64-encoded little-endian i16 PCM
    pub sample_rate: u32,
    pub channels: u16,
    pub language: String,
    pub timestamp: String, // RFC3339 timestamp
    #[serde(rename = "final")]
    pub final_frame: bool,
}

/// Transcript message received from the STT service
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub session_id: String,
    pub text: String,
    pub partial: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Error reported by the STT service for one session
#[derive(Debug, Serialize, Deserialize)]
pub struct SttErrorMessage {
    pub session_id: String,
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_without_optional_fields() {
        let json = r#"{"session_id":"abc","text":"hello","partial":true}"#;
        let msg: TranscriptMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.text, "hello");
        assert!(msg.partial);
        assert_eq!(msg.confidence, None);
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_frame_final_flag_is_renamed() {
        let msg = AudioFrameMessage {
            session_id: "abc".to_string(),
            sequence: 3,
            pcm: String::new(),
            sample_rate: 16000,
            channels: 1,
            language: "en-US".to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            final_frame: true,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["final"], true);
        assert!(value.get("final_frame").is_none());
    }
}

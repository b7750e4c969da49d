use anyhow::{Context, Result};
use async_nats::Client;
use base64::Engine;
use tracing::{debug, info};

use super::messages::AudioFrameMessage;

/// Thin wrapper over a NATS connection speaking the STT subjects
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }

    /// Publish one PCM frame for `session_id`
    #[allow(clippy::too_many_arguments)]
    pub async fn publish_audio_frame(
        &self,
        session_id: &str,
        pcm_bytes: &[u8],
        sample_rate: u32,
        channels: u16,
        language: &str,
        sequence: u64,
        is_final: bool,
    ) -> Result<()> {
        let subject = format!("audio.frame.{}", session_id);

        let message = AudioFrameMessage {
            session_id: session_id.to_string(),
            sequence,
            pcm: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
            sample_rate,
            channels,
            language: language.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            final_frame: is_final,
        };

        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish audio frame")?;

        debug!(
            "Published audio frame to {} (seq={}, bytes={}, final={})",
            subject,
            sequence,
            pcm_bytes.len(),
            is_final
        );

        Ok(())
    }

    /// Subscribe to transcript messages
    pub async fn subscribe_transcripts(&self) -> Result<async_nats::Subscriber> {
        // The STT service publishes to stt.text.partial and stt.text.final;
        // sessions are told apart by the session_id in the payload
        let subject = "stt.text.>";

        let subscriber = self
            .client
            .subscribe(subject)
            .await
            .context("Failed to subscribe to transcripts")?;

        debug!("Subscribed to {}", subject);

        Ok(subscriber)
    }

    /// Subscribe to STT errors for one session
    pub async fn subscribe_errors(&self, session_id: &str) -> Result<async_nats::Subscriber> {
        let subject = format!("stt.error.{}", session_id);

        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .context("Failed to subscribe to STT errors")?;

        debug!("Subscribed to {}", subject);

        Ok(subscriber)
    }
}

//! Recognition over NATS
//!
//! Frames from the capture feed are published to `audio.frame.<session>`;
//! the STT service answers on `stt.text.partial` / `stt.text.final` and
//! reports failures on `stt.error.<session>`. Every engine instance gets a
//! fresh session id, so results addressed to a replaced instance are never
//! picked up by its successor.

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::engine::{EngineEvent, EngineFactory, RecognitionEngine};
use crate::audio::AudioFrame;
use crate::error::EngineError;
use crate::nats::{NatsClient, SttErrorMessage, TranscriptMessage};

const EVENT_CAPACITY: usize = 32;

pub struct NatsRecognitionEngine {
    client: NatsClient,
    session_id: String,
    language: String,
    target_rate: u32,
    publisher: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl NatsRecognitionEngine {
    pub fn new(client: NatsClient, language: String, target_rate: u32) -> Self {
        let session_id = Uuid::new_v4().to_string();
        debug!("Created NATS recognition engine for session {}", session_id);

        Self {
            client,
            session_id,
            language,
            target_rate,
            publisher: None,
            listener: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn stop_tasks(&mut self) {
        if let Some(task) = self.publisher.take() {
            task.abort();
        }
        if let Some(task) = self.listener.take() {
            task.abort();
        }
    }
}

#[async_trait::async_trait]
impl RecognitionEngine for NatsRecognitionEngine {
    async fn start(
        &mut self,
        mut audio: broadcast::Receiver<AudioFrame>,
    ) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        self.stop_tasks();

        let mut transcripts = self
            .client
            .subscribe_transcripts()
            .await
            .map_err(|e| EngineError::Start(e.to_string()))?;
        let mut errors = self
            .client
            .subscribe_errors(&self.session_id)
            .await
            .map_err(|e| EngineError::Start(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);

        // Audio publishing task
        let client = self.client.clone();
        let session_id = self.session_id.clone();
        let language = self.language.clone();
        let target_rate = self.target_rate;
        let mut sequence: u64 = 0;
        let publisher_tx = tx.clone();

        self.publisher = Some(tokio::spawn(async move {
            loop {
                let frame = match audio.recv().await {
                    Ok(frame) => frame,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Recognition feed lagged, skipped {} frames", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let frame = downsample_frame(frame, target_rate);
                let pcm_bytes: Vec<u8> = frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect();

                if let Err(e) = client
                    .publish_audio_frame(
                        &session_id,
                        &pcm_bytes,
                        frame.sample_rate,
                        frame.channels,
                        &language,
                        sequence,
                        false,
                    )
                    .await
                {
                    error!("Failed to publish audio frame: {}", e);
                    let _ = publisher_tx.send(EngineEvent::Error("network".to_string())).await;
                    return;
                }
                sequence += 1;
            }

            if let Err(e) = client
                .publish_audio_frame(&session_id, &[], target_rate, 1, &language, sequence, true)
                .await
            {
                warn!("Failed to send final frame: {}", e);
            }
            let _ = publisher_tx.send(EngineEvent::End).await;
        }));

        // Result listening task
        let session_id = self.session_id.clone();
        self.listener = Some(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    msg = transcripts.next() => {
                        let Some(msg) = msg else { break };
                        match serde_json::from_slice::<TranscriptMessage>(&msg.payload) {
                            Ok(t) if t.session_id == session_id => {
                                if t.partial {
                                    EngineEvent::Partial(t.text)
                                } else {
                                    EngineEvent::Final(t.text)
                                }
                            }
                            Ok(_) => continue,
                            Err(e) => {
                                warn!("Failed to parse transcript message: {}", e);
                                continue;
                            }
                        }
                    }
                    msg = errors.next() => {
                        let Some(msg) = msg else { break };
                        match serde_json::from_slice::<SttErrorMessage>(&msg.payload) {
                            Ok(err) => {
                                debug!("STT error for {}: {} {}", session_id, err.kind, err.message);
                                EngineEvent::Error(err.kind)
                            }
                            Err(e) => {
                                warn!("Failed to parse STT error message: {}", e);
                                continue;
                            }
                        }
                    }
                };

                if tx.send(event).await.is_err() {
                    return;
                }
            }

            let _ = tx.send(EngineEvent::End).await;
        }));

        info!("NATS recognition started for session {}", self.session_id);
        Ok(rx)
    }

    async fn abort(&mut self) {
        self.stop_tasks();
        debug!("NATS recognition aborted for session {}", self.session_id);
    }

    fn name(&self) -> &str {
        "nats"
    }
}

impl Drop for NatsRecognitionEngine {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

/// Builds engines on a shared connection
pub struct NatsEngineFactory {
    client: NatsClient,
    language: String,
    target_rate: u32,
}

impl NatsEngineFactory {
    pub fn new(client: NatsClient, language: String, target_rate: u32) -> Self {
        Self {
            client,
            language,
            target_rate,
        }
    }
}

impl EngineFactory for NatsEngineFactory {
    fn create(&self) -> Result<Box<dyn RecognitionEngine>, EngineError> {
        Ok(Box::new(NatsRecognitionEngine::new(
            self.client.clone(),
            self.language.clone(),
            self.target_rate,
        )))
    }
}

/// Decimate to `target_rate` by taking every Nth sample; never upsamples
fn downsample_frame(frame: AudioFrame, target_rate: u32) -> AudioFrame {
    if target_rate == 0 || frame.sample_rate <= target_rate {
        return frame;
    }

    let ratio = (frame.sample_rate / target_rate) as usize;
    if ratio <= 1 {
        return frame;
    }

    let channels = frame.channels.max(1) as usize;
    let samples: Vec<i16> = frame
        .samples
        .chunks(channels)
        .step_by(ratio)
        .flatten()
        .copied()
        .collect();

    AudioFrame {
        samples,
        sample_rate: frame.sample_rate / ratio as u32,
        channels: frame.channels,
        timestamp_ms: frame.timestamp_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rate: u32, len: usize) -> AudioFrame {
        AudioFrame {
            samples: (0..len as i16).collect(),
            sample_rate: rate,
            channels: 1,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_downsample_48k_to_16k() {
        let out = downsample_frame(frame(48000, 9), 16000);
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.samples, vec![0, 3, 6]);
    }

    #[test]
    fn test_no_upsampling() {
        let out = downsample_frame(frame(8000, 4), 16000);
        assert_eq!(out.sample_rate, 8000);
        assert_eq!(out.samples.len(), 4);
    }
}

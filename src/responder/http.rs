use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Responder, ResponderReply, ResponderRequest};
use crate::config::ResponderConfig;
use crate::error::ResponderError;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(rename = "voiceId", skip_serializing_if = "Option::is_none")]
    voice_id: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Responder backed by a JSON chat endpoint
pub struct HttpResponder {
    client: reqwest::Client,
    url: String,
}

impl HttpResponder {
    pub fn new(config: &ResponderConfig) -> Result<Self, ResponderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ResponderError::Request(e.to_string()))?;

        info!("HTTP responder targeting {}", config.url);

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl Responder for HttpResponder {
    async fn respond(&self, request: ResponderRequest) -> Result<ResponderReply, ResponderError> {
        debug!("Sending utterance to responder: \"{}\"", request.text);

        let body = ChatRequest {
            message: &request.text,
            voice_id: request.voice_id.as_deref(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ResponderError::Request(e.to_string()))?;

        let status = response.status();
        let reply: ChatResponse = response.json().await.unwrap_or_else(|e| {
            warn!("Responder body was not JSON: {}", e);
            ChatResponse::default()
        });

        if !status.is_success() {
            let message = reply
                .details
                .or(reply.error)
                .unwrap_or_else(|| status.to_string());
            return Err(ResponderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let text = reply
            .text
            .ok_or_else(|| ResponderError::InvalidReply("missing text".to_string()))?;

        let audio = match reply.audio.as_deref() {
            Some(encoded) if !encoded.is_empty() => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| ResponderError::InvalidReply(format!("bad audio: {}", e)))?;
                (!bytes.is_empty()).then_some(bytes)
            }
            _ => None,
        };

        debug!(
            "Responder replied ({} chars, audio: {} bytes)",
            text.len(),
            audio.as_ref().map(|a| a.len()).unwrap_or(0)
        );

        Ok(ResponderReply { text, audio })
    }
}

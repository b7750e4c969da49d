//! Remote responder: utterance text in, reply text and optional speech out

mod http;

pub use http::HttpResponder;

use crate::error::ResponderError;

#[derive(Debug, Clone, PartialEq)]
pub struct ResponderRequest {
    pub text: String,
    pub voice_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponderReply {
    pub text: String,
    /// Encoded speech for `text`; absent when synthesis was skipped or failed
    pub audio: Option<Vec<u8>>,
}

#[async_trait::async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, request: ResponderRequest) -> Result<ResponderReply, ResponderError>;
}

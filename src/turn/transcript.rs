use std::time::Duration;
use tokio::time::Instant;

/// The in-progress utterance plus the time the last one was forwarded
#[derive(Debug, Default, Clone)]
pub struct TranscriptBuffer {
    text: String,
    last_finalized: Option<Instant>,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffer with the latest partial result
    pub fn update_partial(&mut self, text: &str) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.text = trimmed.to_string();
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn last_finalized(&self) -> Option<Instant> {
        self.last_finalized
    }

    /// True when nothing was forwarded within `window` before `now`
    pub fn outside_duplicate_window(&self, now: Instant, window: Duration) -> bool {
        match self.last_finalized {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= window,
        }
    }

    /// Take the buffered text and stamp it as forwarded at `now`
    pub fn finalize(&mut self, now: Instant) -> String {
        self.last_finalized = Some(now);
        std::mem::take(&mut self.text)
    }

    /// Accept an engine final result unless it falls in the duplicate window
    pub fn accept_final(&mut self, text: &str, now: Instant, window: Duration) -> Option<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() || !self.outside_duplicate_window(now, window) {
            return None;
        }

        self.text.clear();
        self.last_finalized = Some(now);
        Some(trimmed.to_string())
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Forget both the text and the duplicate-suppression stamp
    pub fn reset(&mut self) {
        self.text.clear();
        self.last_finalized = None;
    }
}

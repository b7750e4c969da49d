use std::collections::HashSet;

use crate::config::RecognitionConfig;

/// How the lifecycle manager treats an engine-reported error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected condition (silence timeout, our own abort); ignored
    Benign,
    /// Permission-class failure; ends the session
    Fatal,
    /// Anything else; recovered by reinitializing with bounded retries
    Transient,
}

/// Error classification table, loaded from configuration
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    benign: HashSet<String>,
    fatal: HashSet<String>,
}

impl ErrorPolicy {
    pub fn new<I, J>(benign: I, fatal: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            benign: benign.into_iter().map(|k| k.to_ascii_lowercase()).collect(),
            fatal: fatal.into_iter().map(|k| k.to_ascii_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self::new(config.benign_errors.clone(), config.fatal_errors.clone())
    }

    pub fn classify(&self, kind: &str) -> ErrorClass {
        let kind = kind.trim().to_ascii_lowercase();
        if self.fatal.contains(&kind) {
            ErrorClass::Fatal
        } else if self.benign.contains(&kind) {
            ErrorClass::Benign
        } else {
            ErrorClass::Transient
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::from_config(&RecognitionConfig::default())
    }
}

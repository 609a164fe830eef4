//! Error types for the generator boundary and suggestion transitions.
//!
//! Most of the crate uses `anyhow`. The generator needs a typed error because
//! a safety-filter rejection is rendered differently from every other failure.

use thiserror::Error;

use crate::models::SuggestionStatus;

/// Failure reported by a [`Generator`](crate::generator::Generator) call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerateError {
    /// The provider's safety filters rejected the prompt or the response.
    #[error("blocked by safety filters: {reason}")]
    Safety { reason: String },

    /// Non-success HTTP status from the provider.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection, timeout, or stream read failure.
    #[error("{0}")]
    Transport(String),

    /// The provider answered with something we could not decode.
    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl GenerateError {
    pub fn is_safety(&self) -> bool {
        matches!(self, GenerateError::Safety { .. })
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerateError::Http { status, .. } => *status == 429 || *status >= 500,
            GenerateError::Transport(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GenerateError {
    fn from(err: reqwest::Error) -> Self {
        GenerateError::Transport(err.to_string())
    }
}

/// Misuse of the accept/reject transitions on a rendered suggestion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SuggestionError {
    #[error("no active session")]
    NoActiveSession,

    #[error("message {0} does not exist in the active session")]
    MessageNotFound(usize),

    #[error("message {0} carries no code suggestion")]
    NoSuggestion(usize),

    #[error("suggestion was already {status}")]
    AlreadyResolved { status: SuggestionStatus },

    #[error("no pending suggestion in the active session")]
    NonePending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_is_distinguishable() {
        let safety = GenerateError::Safety {
            reason: "SAFETY".to_string(),
        };
        assert!(safety.is_safety());
        assert!(!GenerateError::Other("boom".to_string()).is_safety());
    }

    #[test]
    fn test_retryable_statuses() {
        let http = |status| GenerateError::Http {
            status,
            message: String::new(),
        };
        assert!(http(429).is_retryable());
        assert!(http(503).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!GenerateError::Decode("x".into()).is_retryable());
    }

    #[test]
    fn test_other_displays_verbatim() {
        assert_eq!(GenerateError::Other("quota exceeded".into()).to_string(), "quota exceeded");
    }
}

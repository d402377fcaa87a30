// src/platform/mod.rs
//! Messaging-platform seam used by the detectors.

pub mod telegram;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::model::{ChatId, MessageId, UserId};

static RE_NOT_FOUND: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)not\s*found").unwrap());

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The referenced message (or file) no longer exists.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("platform api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("payload larger than {limit} bytes")]
    Oversized { limit: usize },
}

impl PlatformError {
    /// Builds an API error, promoting "not found"-class descriptions to [`PlatformError::NotFound`].
    pub fn from_api(code: i64, description: impl Into<String>) -> Self {
        let description = description.into();
        if RE_NOT_FOUND.is_match(&description) {
            PlatformError::NotFound(description)
        } else {
            PlatformError::Api { code, description }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Markdown,
}

impl ParseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseMode::Markdown => "Markdown",
        }
    }
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Copies `message_id` from `source` into `target` silently; returns the copy's id.
    async fn duplicate_message(
        &self,
        target: ChatId,
        source: ChatId,
        message_id: MessageId,
    ) -> Result<MessageId, PlatformError>;

    async fn remove_message(&self, chat: ChatId, message_id: MessageId) -> Result<(), PlatformError>;

    async fn send_alert(
        &self,
        chat: ChatId,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<(), PlatformError>;

    /// Current profile image bytes; `Ok(None)` when the user has none.
    async fn fetch_profile_image(&self, user: UserId) -> Result<Option<Vec<u8>>, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_descriptions_are_classified() {
        assert!(PlatformError::from_api(400, "Bad Request: message to copy not found").is_not_found());
        assert!(PlatformError::from_api(400, "Bad Request: MESSAGE NOTFOUND").is_not_found());
        assert!(!PlatformError::from_api(429, "Too Many Requests: retry after 5").is_not_found());
        assert!(!PlatformError::Decode("x".into()).is_not_found());
    }
}

// src/alerts.rs
//! Alert texts and delivery to the administrative channel.

use std::sync::Arc;

use tracing::{info, warn};

use crate::model::{ChatId, Participant, UserId};
use crate::platform::{ChatPlatform, ParseMode};

#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    Typosquat {
        handle: String,
        protected: String,
        distance: usize,
    },
    Solicitation {
        display: String,
        text: String,
    },
    DeletionSpike {
        display: String,
        count: u32,
    },
    Impersonation {
        member: Participant,
        admin: UserId,
        similarity: f64,
    },
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::Typosquat { .. } => "typosquat",
            Alert::Solicitation { .. } => "solicitation",
            Alert::DeletionSpike { .. } => "deletion_spike",
            Alert::Impersonation { .. } => "impersonation",
        }
    }

    pub fn parse_mode(&self) -> Option<ParseMode> {
        match self {
            Alert::Impersonation { .. } => Some(ParseMode::Markdown),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Alert::Typosquat {
                handle,
                protected,
                distance,
            } => format!(
                "⚠️ Possible typosquat detected!\nNew user @{} is similar to admin @{} (distance: {}).",
                handle, protected, distance
            ),
            Alert::Solicitation { display, text } => {
                format!("🚨 Private solicitation detected from @{}: \"{}\"", display, text)
            }
            Alert::DeletionSpike { display, count } => format!(
                "⚠️ Deletion spike detected: {} deleted {} messages.",
                display, count
            ),
            Alert::Impersonation {
                member,
                admin,
                similarity,
            } => format!(
                "🚨 *Impersonation alert!* User [{}](tg://user?id={}) is *{}%* similar to admin `{}`.",
                escape_markdown(&member.first_name),
                member.id,
                (similarity * 100.0).round() as i64,
                admin
            ),
        }
    }
}

/// Legacy Markdown has no escaping inside link text; strip what would break it.
fn escape_markdown(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '[' | ']' | '*' | '_' | '`'))
        .collect()
}

/// Sends alerts to the single administrative channel. Delivery failures are
/// logged and dropped; nothing propagates back into the detectors.
#[derive(Clone)]
pub struct AlertSink {
    platform: Arc<dyn ChatPlatform>,
    admin_chat: ChatId,
}

impl AlertSink {
    pub fn new(platform: Arc<dyn ChatPlatform>, admin_chat: ChatId) -> Self {
        Self {
            platform,
            admin_chat,
        }
    }

    pub fn admin_chat(&self) -> ChatId {
        self.admin_chat
    }

    pub async fn send(&self, alert: Alert) {
        let text = alert.render();
        match self
            .platform
            .send_alert(self.admin_chat, &text, alert.parse_mode())
            .await
        {
            Ok(()) => info!(kind = alert.kind(), "alert sent"),
            Err(e) => warn!(kind = alert.kind(), error = %e, "alert delivery failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typosquat_text() {
        let a = Alert::Typosquat {
            handle: "adm1n".into(),
            protected: "admin".into(),
            distance: 1,
        };
        assert_eq!(
            a.render(),
            "⚠️ Possible typosquat detected!\nNew user @adm1n is similar to admin @admin (distance: 1)."
        );
        assert_eq!(a.parse_mode(), None);
    }

    #[test]
    fn impersonation_text_rounds_percentage() {
        let a = Alert::Impersonation {
            member: Participant::new(42, "Eve_[x]"),
            admin: UserId(7),
            similarity: 0.846,
        };
        assert_eq!(
            a.render(),
            "🚨 *Impersonation alert!* User [Evex](tg://user?id=42) is *85%* similar to admin `7`."
        );
        assert_eq!(a.parse_mode(), Some(ParseMode::Markdown));
    }

    #[test]
    fn spike_and_solicitation_texts() {
        assert_eq!(
            Alert::DeletionSpike { display: "bob".into(), count: 3 }.render(),
            "⚠️ Deletion spike detected: bob deleted 3 messages."
        );
        assert_eq!(
            Alert::Solicitation { display: "spammer".into(), text: "pm me".into() }.render(),
            "🚨 Private solicitation detected from @spammer: \"pm me\""
        );
    }
}

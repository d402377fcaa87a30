// src/model.rs
//! Platform-agnostic event types consumed by the detector pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(
    /// Stable chat participant id. Key of every per-user map.
    UserId
);
id_type!(ChatId);
id_type!(MessageId);

/// A chat participant as seen on an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    /// Public handle without the leading `@`.
    pub handle: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl Participant {
    pub fn new(id: i64, first_name: impl Into<String>) -> Self {
        Self {
            id: UserId(id),
            handle: None,
            first_name: first_name.into(),
            last_name: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    /// Handle if set, otherwise "first last".
    pub fn display_name(&self) -> String {
        match self.handle.as_deref() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => self.full_name(),
        }
    }

    pub fn full_name(&self) -> String {
        match self.last_name.as_deref() {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    /// Handle if set, otherwise the numeric id.
    pub fn handle_or_id(&self) -> String {
        match self.handle.as_deref() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => self.id.to_string(),
        }
    }
}

/// One inbound message or membership event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender: Option<Participant>,
    pub text: Option<String>,
    #[serde(default)]
    pub new_members: Vec<Participant>,
}

impl InboundEvent {
    pub fn message(chat_id: i64, message_id: i64, sender: Participant, text: impl Into<String>) -> Self {
        Self {
            chat_id: ChatId(chat_id),
            message_id: MessageId(message_id),
            sender: Some(sender),
            text: Some(text.into()),
            new_members: Vec::new(),
        }
    }

    pub fn join(chat_id: i64, message_id: i64, sender: Participant, members: Vec<Participant>) -> Self {
        Self {
            chat_id: ChatId(chat_id),
            message_id: MessageId(message_id),
            sender: Some(sender),
            text: None,
            new_members: members,
        }
    }
}

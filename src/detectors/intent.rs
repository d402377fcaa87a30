// src/detectors/intent.rs
//! Private-message solicitation ("dm me", "pm me", ...). One alert per message.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Detector, Flow};
use crate::alerts::{Alert, AlertSink};
use crate::model::InboundEvent;

static TRIGGER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\bdm\b").unwrap(),
        Regex::new(r"(?i)\bpm\b").unwrap(),
        Regex::new(r"(?i)\bdm me\b").unwrap(),
        Regex::new(r"(?i)\bplease dm\b").unwrap(),
        Regex::new(r"(?i)\bpm me\b").unwrap(),
        Regex::new(r"(?i)\bplease pm\b").unwrap(),
        Regex::new(r"(?i)\bprivate message\b").unwrap(),
        Regex::new(r"(?i)\bmessage me\b").unwrap(),
    ]
});

/// Index of the first pattern matching `text`, in pattern order.
pub fn first_trigger(text: &str) -> Option<usize> {
    TRIGGER_PATTERNS.iter().position(|re| re.is_match(text))
}

pub struct IntentClassifier {
    alerts: AlertSink,
}

impl IntentClassifier {
    pub fn new(alerts: AlertSink) -> Self {
        Self { alerts }
    }
}

#[async_trait]
impl Detector for IntentClassifier {
    fn name(&self) -> &'static str {
        "intent"
    }

    async fn handle(&self, event: &InboundEvent) -> Result<Flow> {
        let Some(text) = event.text.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(Flow::Continue);
        };
        if first_trigger(text).is_none() {
            return Ok(Flow::Continue);
        }

        let display = event
            .sender
            .as_ref()
            .map(|s| s.display_name())
            .unwrap_or_default();
        self.alerts
            .send(Alert::Solicitation {
                display,
                text: text.to_string(),
            })
            .await;
        Ok(Flow::Continue)
    }
}

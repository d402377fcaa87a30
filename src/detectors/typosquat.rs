// src/detectors/typosquat.rs
//! New members whose handle sits within a small edit distance of a protected
//! handle. An exact match is not a typosquat and never alerts.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::edit_distance::levenshtein;
use super::{Detector, Flow};
use crate::alerts::{Alert, AlertSink};
use crate::model::{InboundEvent, Participant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TyposquatHit {
    pub handle: String,
    pub protected: String,
    pub distance: usize,
}

pub struct TyposquatDetector {
    protected: Vec<String>,
    threshold: usize,
    alerts: AlertSink,
}

impl TyposquatDetector {
    /// `protected` must already be lowercased, in configured order.
    pub fn new(protected: Vec<String>, threshold: usize, alerts: AlertSink) -> Self {
        Self {
            protected,
            threshold,
            alerts,
        }
    }

    /// First protected handle (configured order) at distance `1..=threshold`.
    pub fn check(&self, member: &Participant) -> Option<TyposquatHit> {
        let handle = member.handle.as_deref()?.to_lowercase();
        if handle.is_empty() {
            return None;
        }
        self.protected.iter().find_map(|protected| {
            let distance = levenshtein(&handle, protected);
            (distance > 0 && distance <= self.threshold).then(|| TyposquatHit {
                handle: handle.clone(),
                protected: protected.clone(),
                distance,
            })
        })
    }
}

#[async_trait]
impl Detector for TyposquatDetector {
    fn name(&self) -> &'static str {
        "typosquat"
    }

    async fn handle(&self, event: &InboundEvent) -> Result<Flow> {
        for member in &event.new_members {
            let Some(hit) = self.check(member) else {
                continue;
            };
            debug!(member = %member.id, handle = %hit.handle, protected = %hit.protected, distance = hit.distance, "typosquat match");
            self.alerts
                .send(Alert::Typosquat {
                    handle: hit.handle,
                    protected: hit.protected,
                    distance: hit.distance,
                })
                .await;
        }
        Ok(Flow::Continue)
    }
}

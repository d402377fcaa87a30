// src/detectors/mod.rs
//! The four heuristics run by the pipeline, plus the edit-distance helper.

pub mod deletion;
pub mod edit_distance;
pub mod impersonation;
pub mod intent;
pub mod typosquat;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::InboundEvent;

pub use deletion::DeletionSpikeDetector;
pub use impersonation::ImpersonationDetector;
pub use intent::IntentClassifier;
pub use typosquat::TyposquatDetector;

/// Whether the event continues down the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// One pipeline stage. Detectors observe; none of the built-in ones ever returns `Stop`.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &InboundEvent) -> Result<Flow>;
}

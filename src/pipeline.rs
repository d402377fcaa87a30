// src/pipeline.rs
//! Ordered detector chain. Each stage sees the event in turn; an error or a
//! panic in one stage is logged and the next stage still runs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{error, trace, warn};

use crate::detectors::{Detector, Flow};
use crate::model::InboundEvent;
use crate::state::DetectorState;

pub struct Pipeline {
    detectors: Vec<Arc<dyn Detector>>,
    state: Arc<DetectorState>,
}

impl Pipeline {
    pub fn new(state: Arc<DetectorState>) -> Self {
        Self {
            detectors: Vec::new(),
            state,
        }
    }

    /// Appends a stage; stages run in insertion order.
    pub fn with(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn state(&self) -> &Arc<DetectorState> {
        &self.state
    }

    pub fn stages(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub async fn dispatch(&self, event: &InboundEvent) {
        for detector in &self.detectors {
            let name = detector.name();
            let result = AssertUnwindSafe(detector.handle(event)).catch_unwind().await;
            match result {
                Ok(Ok(Flow::Continue)) => trace!(detector = name, "continue"),
                Ok(Ok(Flow::Stop)) => {
                    trace!(detector = name, "stop");
                    return;
                }
                Ok(Err(e)) => warn!(detector = name, error = ?e, "detector failed"),
                Err(_) => error!(detector = name, message = %event.message_id, "detector panicked"),
            }
        }
    }
}

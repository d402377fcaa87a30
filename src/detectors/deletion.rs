// src/detectors/deletion.rs
//! Silent-deletion spikes. The platform does not report deletions of other
//! users' messages, so each message is probed twice (after D and 5·D) by
//! copying it into the admin channel and removing the copy right away.
//! A "not found" copy counts as one deletion; every miss counts, so a message
//! missed by both probes counts twice.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Detector, Flow};
use crate::alerts::{Alert, AlertSink};
use crate::model::{ChatId, InboundEvent, MessageId, UserId};
use crate::platform::ChatPlatform;
use crate::scheduler::ProbeScheduler;
use crate::state::DetectorState;

/// The follow-up probe fires at this multiple of the base delay.
pub const FOLLOWUP_FACTOR: u32 = 5;

/// Everything a delayed probe needs; captured at scheduling time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub user: UserId,
    pub chat: ChatId,
    pub message: MessageId,
    pub display: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Present,
    Deleted { count: u32, alerted: bool },
    /// Any non-"not found" failure; no state change.
    Inconclusive,
}

#[derive(Clone)]
pub struct DeletionSpikeDetector {
    inner: Arc<Inner>,
}

struct Inner {
    platform: Arc<dyn ChatPlatform>,
    alerts: AlertSink,
    state: Arc<DetectorState>,
    scheduler: ProbeScheduler,
    threshold: u32,
    delay: Duration,
}

impl DeletionSpikeDetector {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        alerts: AlertSink,
        state: Arc<DetectorState>,
        scheduler: ProbeScheduler,
        threshold: u32,
        delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                alerts,
                state,
                scheduler,
                threshold,
                delay,
            }),
        }
    }

    /// Queues both probes for `probe` and returns immediately.
    pub fn schedule(&self, probe: Probe) {
        let followup = self.inner.delay * FOLLOWUP_FACTOR;
        for delay in [self.inner.delay, followup] {
            let this = self.clone();
            let probe = probe.clone();
            self.inner.scheduler.schedule(delay, async move {
                this.run_probe(&probe).await;
            });
        }
    }

    /// One visibility check; updates the ledger and alerts on the crossing miss.
    pub async fn run_probe(&self, probe: &Probe) -> ProbeOutcome {
        let inner = &self.inner;
        let admin_chat = inner.alerts.admin_chat();

        match inner
            .platform
            .duplicate_message(admin_chat, probe.chat, probe.message)
            .await
        {
            Ok(copy) => {
                if let Err(e) = inner.platform.remove_message(admin_chat, copy).await {
                    warn!(message = %probe.message, copy = %copy, error = %e, "failed to remove probe copy");
                }
                ProbeOutcome::Present
            }
            Err(e) if e.is_not_found() => {
                let tally = inner.state.record_deletion(probe.user, inner.threshold).await;
                info!(user = %probe.user, display = %probe.display, deletions = tally.count, "message gone");
                if tally.crossed {
                    inner
                        .alerts
                        .send(Alert::DeletionSpike {
                            display: probe.display.clone(),
                            count: tally.count,
                        })
                        .await;
                }
                ProbeOutcome::Deleted {
                    count: tally.count,
                    alerted: tally.crossed,
                }
            }
            Err(e) => {
                warn!(message = %probe.message, chat = %probe.chat, error = %e, "probe failed, not counted");
                ProbeOutcome::Inconclusive
            }
        }
    }
}

#[async_trait]
impl Detector for DeletionSpikeDetector {
    fn name(&self) -> &'static str {
        "deletion"
    }

    async fn handle(&self, event: &InboundEvent) -> Result<Flow> {
        let Some(sender) = event.sender.as_ref() else {
            return Ok(Flow::Continue);
        };
        debug!(message = %event.message_id, user = %sender.id, "scheduling deletion probes");
        self.schedule(Probe {
            user: sender.id,
            chat: event.chat_id,
            message: event.message_id,
            display: sender.handle_or_id(),
        });
        Ok(Flow::Continue)
    }
}

// src/detectors/impersonation.rs
//! Profile-picture impersonation: each new member's current photo is compared
//! against every cached administrator photo, first match above the threshold
//! alerts. Member photos are never cached, a rejoin is compared afresh.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Detector, Flow};
use crate::alerts::{Alert, AlertSink};
use crate::model::{InboundEvent, Participant, UserId};
use crate::oracle::ComparisonOracle;
use crate::platform::ChatPlatform;
use crate::state::{AdminImageCache, DetectorState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpersonationHit {
    pub admin: UserId,
    pub similarity: f64,
}

/// Fetches one image per administrator. Failures and missing photos are
/// logged and leave the entry absent; they are not retried later.
pub async fn load_admin_images(platform: &dyn ChatPlatform, admins: &[UserId]) -> AdminImageCache {
    let mut cache = AdminImageCache::new(admins.to_vec());
    for admin in admins {
        info!(admin = %admin, "loading admin image");
        match platform.fetch_profile_image(*admin).await {
            Ok(Some(image)) => {
                info!(admin = %admin, bytes = image.len(), "admin image loaded");
                cache.insert(*admin, image);
            }
            Ok(None) => warn!(admin = %admin, "admin has no profile image, comparisons skipped"),
            Err(e) => warn!(admin = %admin, error = %e, "failed to load admin image, comparisons skipped"),
        }
    }
    cache
}

pub struct ImpersonationDetector {
    platform: Arc<dyn ChatPlatform>,
    oracle: ComparisonOracle,
    state: Arc<DetectorState>,
    alerts: AlertSink,
    threshold: f64,
}

impl ImpersonationDetector {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        oracle: ComparisonOracle,
        state: Arc<DetectorState>,
        alerts: AlertSink,
        threshold: f64,
    ) -> Self {
        Self {
            platform,
            oracle,
            state,
            alerts,
            threshold,
        }
    }

    /// Sequential comparison against cached admins; stops at the first hit.
    pub async fn check(&self, member: &Participant) -> Option<ImpersonationHit> {
        let image = match self.platform.fetch_profile_image(member.id).await {
            Ok(Some(image)) => image,
            Ok(None) => {
                debug!(member = %member.id, "no profile picture");
                return None;
            }
            Err(e) => {
                warn!(member = %member.id, error = %e, "profile picture fetch failed");
                return None;
            }
        };

        for (admin, admin_image) in self.state.admin_images().iter() {
            let cmp = self.oracle.compare(&image, admin_image).await;
            debug!(member = %member.id, admin = %admin, score = cmp.score, status = ?cmp.status, "compared");
            if cmp.score >= self.threshold {
                return Some(ImpersonationHit {
                    admin,
                    similarity: cmp.score,
                });
            }
        }
        None
    }
}

#[async_trait]
impl Detector for ImpersonationDetector {
    fn name(&self) -> &'static str {
        "impersonation"
    }

    async fn handle(&self, event: &InboundEvent) -> Result<Flow> {
        for member in &event.new_members {
            info!(member = %member.id, name = %member.first_name, "new member joined");
            if let Some(hit) = self.check(member).await {
                self.alerts
                    .send(Alert::Impersonation {
                        member: member.clone(),
                        admin: hit.admin,
                        similarity: hit.similarity,
                    })
                    .await;
            }
        }
        Ok(Flow::Continue)
    }
}

// src/state.rs
//! Per-process detector state, owned by the pipeline and shared with the
//! detectors through an `Arc`. Nothing here is persisted or evicted: the maps
//! grow with every distinct user seen for the lifetime of the process.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use crate::model::UserId;

/// What a single missed probe did to the deletion ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionTally {
    pub count: u32,
    /// True exactly once per user: the miss that crossed the threshold.
    pub crossed: bool,
}

#[derive(Debug, Default)]
struct DeletionLedger {
    counts: HashMap<UserId, u32>,
    alerted: HashSet<UserId>,
}

/// Profile images of the configured administrators, loaded once at startup.
/// A missing entry means "skip comparisons against this administrator".
#[derive(Debug, Clone, Default)]
pub struct AdminImageCache {
    order: Vec<UserId>,
    images: HashMap<UserId, Vec<u8>>,
}

impl AdminImageCache {
    /// `order` is the configured administrator order; only some may have images.
    pub fn new(order: Vec<UserId>) -> Self {
        Self {
            order,
            images: HashMap::new(),
        }
    }

    pub fn insert(&mut self, admin: UserId, image: Vec<u8>) {
        self.images.insert(admin, image);
    }

    pub fn get(&self, admin: UserId) -> Option<&[u8]> {
        self.images.get(&admin).map(Vec::as_slice)
    }

    /// Administrators with a cached image, in configured order.
    pub fn iter(&self) -> impl Iterator<Item = (UserId, &[u8])> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.get(*id).map(|img| (*id, img)))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DetectorState {
    deletions: Mutex<DeletionLedger>,
    admin_images: AdminImageCache,
}

impl DetectorState {
    pub fn new(admin_images: AdminImageCache) -> Self {
        Self {
            deletions: Mutex::new(DeletionLedger::default()),
            admin_images,
        }
    }

    pub fn admin_images(&self) -> &AdminImageCache {
        &self.admin_images
    }

    /// Counts one missed probe for `user`. The increment, the threshold check
    /// and the alerted-set insert happen under one lock.
    pub async fn record_deletion(&self, user: UserId, threshold: u32) -> DeletionTally {
        let mut ledger = self.deletions.lock().await;
        let count = {
            let c = ledger.counts.entry(user).or_insert(0);
            *c = c.saturating_add(1);
            *c
        };
        let crossed = count >= threshold && ledger.alerted.insert(user);
        DeletionTally { count, crossed }
    }

    pub async fn deletion_count(&self, user: UserId) -> u32 {
        self.deletions
            .lock()
            .await
            .counts
            .get(&user)
            .copied()
            .unwrap_or(0)
    }

    pub async fn is_alerted(&self, user: UserId) -> bool {
        self.deletions.lock().await.alerted.contains(&user)
    }

    /// Number of users with a deletion counter. Grows without bound.
    pub async fn tracked_users(&self) -> usize {
        self.deletions.lock().await.counts.len()
    }
}

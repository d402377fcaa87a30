// src/oracle/mod.rs
//! Image comparison backends and the soft-fail adapter the detectors talk to.

pub mod ahash;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("rate limited")]
    RateLimited,
    #[error("quota exhausted")]
    QuotaExceeded,
    #[error("oracle api error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed oracle answer: {0}")]
    Malformed(String),
    #[error("image: {0}")]
    Image(String),
}

/// A backend scoring how alike two images are, in `[0, 1]`.
#[async_trait]
pub trait ImageComparer: Send + Sync {
    async fn similarity(&self, a: &[u8], b: &[u8]) -> Result<f64, OracleError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonStatus {
    Scored,
    /// Rate limit or quota; score forced to 0.
    Throttled,
    /// Any other backend failure; score forced to 0.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub score: f64,
    pub status: ComparisonStatus,
}

impl Comparison {
    fn zero(status: ComparisonStatus) -> Self {
        Self { score: 0.0, status }
    }
}

/// Wraps a comparer so that every failure becomes a zero score with a status.
/// Detectors only ever look at `score`.
#[derive(Clone)]
pub struct ComparisonOracle {
    inner: Arc<dyn ImageComparer>,
}

impl ComparisonOracle {
    pub fn new(inner: Arc<dyn ImageComparer>) -> Self {
        Self { inner }
    }

    pub fn backend(&self) -> &'static str {
        self.inner.name()
    }

    pub async fn compare(&self, a: &[u8], b: &[u8]) -> Comparison {
        match self.inner.similarity(a, b).await {
            Ok(score) if score.is_finite() => Comparison {
                score: score.clamp(0.0, 1.0),
                status: ComparisonStatus::Scored,
            },
            Ok(score) => {
                warn!(backend = self.inner.name(), score, "non-finite similarity, treating as 0");
                Comparison::zero(ComparisonStatus::Failed)
            }
            Err(OracleError::RateLimited | OracleError::QuotaExceeded) => {
                warn!(backend = self.inner.name(), "quota or rate limit reached, skipping comparison");
                Comparison::zero(ComparisonStatus::Throttled)
            }
            Err(e) => {
                error!(backend = self.inner.name(), error = %e, "image comparison failed");
                Comparison::zero(ComparisonStatus::Failed)
            }
        }
    }
}

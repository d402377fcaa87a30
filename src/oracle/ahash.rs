// src/oracle/ahash.rs
//! Local comparer: 8×8 average hash, similarity = 1 − hamming/64.
//! No network, no quota; coarse but good enough for a reused avatar.

use async_trait::async_trait;
use tokio::task;

use super::{ImageComparer, OracleError};

const MAX_IMAGE_DIMENSION: u32 = 4096; // 4096×4096 decode limit

#[derive(Debug, Default, Clone, Copy)]
pub struct AverageHashComparer;

#[async_trait]
impl ImageComparer for AverageHashComparer {
    async fn similarity(&self, a: &[u8], b: &[u8]) -> Result<f64, OracleError> {
        let (a, b) = (a.to_vec(), b.to_vec());
        let (ha, hb) = task::spawn_blocking(move || Ok::<_, OracleError>((ahash(&a)?, ahash(&b)?)))
            .await
            .map_err(|e| OracleError::Image(e.to_string()))??;
        Ok(similarity_from_hashes(ha, hb))
    }

    fn name(&self) -> &'static str {
        "ahash"
    }
}

pub fn similarity_from_hashes(a: u64, b: u64) -> f64 {
    1.0 - f64::from((a ^ b).count_ones()) / 64.0
}

/// aHash of an encoded image. Rejects undecodable or oversized input.
pub fn ahash(bytes: &[u8]) -> Result<u64, OracleError> {
    use image::{ImageReader, imageops::FilterType};
    use std::io::Cursor;

    let mut limits = image::Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| OracleError::Image(e.to_string()))?;
    reader.limits(limits);
    let img = reader.decode().map_err(|e| OracleError::Image(e.to_string()))?;

    let gray = img.resize_exact(8, 8, FilterType::Triangle).to_luma8();
    let mut sum: u64 = 0;
    let mut px = [0u8; 64];
    for (i, p) in gray.pixels().enumerate() {
        sum += p.0[0] as u64;
        px[i] = p.0[0];
    }
    let avg = (sum / 64) as u8;
    let mut bits: u64 = 0;
    for (i, &v) in px.iter().enumerate() {
        if v > avg {
            bits |= 1u64 << i;
        }
    }
    Ok(bits)
}

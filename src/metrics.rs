//! CLIP and color-histogram similarity for Style Recipe runs. Computation is
//! off-loop: image decode runs on the blocking thread pool via
//! `tokio::task::spawn_blocking` rather than the async executor.

use image::{DynamicImage, GenericImageView};

use crate::context::ConsistencyMetrics;
use crate::error::Result;
use crate::providers::ImageEmbedder;

/// Default weighting; not a tuned value, a reasoned starting point.
pub const CLIP_WEIGHT: f64 = 0.7;
pub const COLOR_WEIGHT: f64 = 0.3;

const HISTOGRAM_BUCKETS: usize = 32;

/// Cosine similarity between two embedding vectors, rescaled from `[-1, 1]`
/// to `[0, 1]` to match `clip_similarity`'s declared range.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = dot / (norm_a * norm_b);
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Per-channel normalized RGB histogram correlation, decoded and binned off
/// the cooperative scheduler.
pub async fn color_histogram_similarity(path_a: &str, path_b: &str) -> Result<f64> {
    let a = path_a.to_string();
    let b = path_b.to_string();
    let score = tokio::task::spawn_blocking(move || -> std::io::Result<f64> {
        let img_a = image::open(&a).map_err(to_io_error)?;
        let img_b = image::open(&b).map_err(to_io_error)?;
        Ok(histogram_correlation(&img_a, &img_b))
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))??;
    Ok(score)
}

fn to_io_error(e: image::ImageError) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

fn histogram_correlation(a: &DynamicImage, b: &DynamicImage) -> f64 {
    let hist_a = normalized_histogram(a);
    let hist_b = normalized_histogram(b);
    let mean_a: f64 = hist_a.iter().sum::<f64>() / hist_a.len() as f64;
    let mean_b: f64 = hist_b.iter().sum::<f64>() / hist_b.len() as f64;

    let mut numerator = 0.0;
    let mut denom_a = 0.0;
    let mut denom_b = 0.0;
    for (x, y) in hist_a.iter().zip(hist_b.iter()) {
        let da = x - mean_a;
        let db = y - mean_b;
        numerator += da * db;
        denom_a += da * da;
        denom_b += db * db;
    }
    if denom_a == 0.0 || denom_b == 0.0 {
        return if (mean_a - mean_b).abs() < f64::EPSILON {
            1.0
        } else {
            0.0
        };
    }
    let corr = numerator / (denom_a.sqrt() * denom_b.sqrt());
    ((corr + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn normalized_histogram(img: &DynamicImage) -> Vec<f64> {
    let mut buckets = vec![0u64; HISTOGRAM_BUCKETS * 3];
    let bucket_width = 256 / HISTOGRAM_BUCKETS;
    let mut total = 0u64;
    for (_, _, pixel) in img.pixels() {
        let [r, g, b, _] = pixel.0;
        buckets[(r as usize / bucket_width).min(HISTOGRAM_BUCKETS - 1)] += 1;
        buckets[HISTOGRAM_BUCKETS + (g as usize / bucket_width).min(HISTOGRAM_BUCKETS - 1)] += 1;
        buckets[2 * HISTOGRAM_BUCKETS + (b as usize / bucket_width).min(HISTOGRAM_BUCKETS - 1)] +=
            1;
        total += 1;
    }
    if total == 0 {
        return vec![0.0; buckets.len()];
    }
    buckets
        .into_iter()
        .map(|c| c as f64 / total as f64)
        .collect()
}

/// Computes the full consistency-metrics sub-record for a Style Recipe run.
/// Returns `None` (never an `Err`) when the embedder is unavailable, so
/// callers can record the `optional_failure` diagnostic without failing the
/// stage.
pub async fn compute_consistency_metrics(
    embedder: Option<&dyn ImageEmbedder>,
    generated_path: &str,
    recipe_reference_path: &str,
) -> Result<Option<ConsistencyMetrics>> {
    let clip_similarity = match embedder {
        Some(embedder) => {
            let a = embedder.embed_image(generated_path).await?;
            let b = embedder.embed_image(recipe_reference_path).await?;
            match (a, b) {
                (Some(a), Some(b)) => cosine_similarity(&a, &b),
                _ => return Ok(None),
            }
        }
        None => return Ok(None),
    };

    let color_histogram_similarity =
        color_histogram_similarity(generated_path, recipe_reference_path).await?;

    let overall = CLIP_WEIGHT * clip_similarity + COLOR_WEIGHT * color_histogram_similarity;

    Ok(Some(ConsistencyMetrics {
        clip_similarity,
        color_histogram_similarity,
        overall,
    }))
}

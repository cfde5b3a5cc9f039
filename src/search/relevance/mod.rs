// Section-level relevance from chunk-level similarity scores
// Everything here is pure and deterministic

#[cfg(test)]
mod tests;

use serde::Serialize;

/// Score bundle reported for one section of a query result
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RelevanceMetrics {
    /// Best chunk similarity weighted by how much of the section matched
    pub raw_similarity: f32,
    /// `raw_similarity` on a 0-100 display scale
    pub relevance_score: u8,
    /// Mean of the section's similarities after min-max normalization against the whole
    /// candidate pool; results are ranked by this value
    pub normalized_score: f32,
    /// Population standard deviation of the whole candidate pool
    pub standard_deviation: f32,
    /// Highest similarity among the section's matched chunks
    pub max_similarity: f32,
    /// Fraction of the section's chunks that were matched
    pub coverage_factor: f32,
    pub matched_chunks: usize,
}

impl RelevanceMetrics {
    /// Metrics for a section with nothing to score
    #[inline]
    pub fn empty(pool_standard_deviation: f32) -> Self {
        Self {
            raw_similarity: 0.0,
            relevance_score: 0,
            normalized_score: 0.0,
            standard_deviation: pool_standard_deviation,
            max_similarity: 0.0,
            coverage_factor: 0.0,
            matched_chunks: 0,
        }
    }
}

#[inline]
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Population standard deviation (divides by `n`, not `n - 1`)
#[inline]
pub fn standard_deviation(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }

    let average = mean(values);
    let variance = values
        .iter()
        .map(|value| (value - average).powi(2))
        .sum::<f32>()
        / values.len() as f32;
    variance.sqrt()
}

/// Rescale each value into `[0, 1]` using the given bounds
///
/// A degenerate range (`max <= min`) maps every value to `0.0`.
#[inline]
pub fn min_max_normalize(values: &[f32], global_min: f32, global_max: f32) -> Vec<f32> {
    let range = global_max - global_min;
    if !range.is_finite() || range <= 0.0 {
        return vec![0.0; values.len()];
    }

    values
        .iter()
        .map(|value| ((value - global_min) / range).clamp(0.0, 1.0))
        .collect()
}

/// Round half away from zero
#[inline]
pub fn round_to_int(value: f32) -> i64 {
    value.round() as i64
}

#[inline]
pub fn min_value(values: &[f32]) -> Option<f32> {
    values.iter().copied().reduce(f32::min)
}

#[inline]
pub fn max_value(values: &[f32]) -> Option<f32> {
    values.iter().copied().reduce(f32::max)
}

/// Score one section
///
/// * `section_scores` - similarities of the section's matched chunks
/// * `pool_scores` - similarities of every hydrated candidate in the query
/// * `total_chunks` - number of chunks the section holds
///
/// The display score rewards a strong peak match spread over much of the section, while
/// `normalized_score` ranks the section relative to the rest of the candidate pool.
#[inline]
pub fn score_section(
    section_scores: &[f32],
    pool_scores: &[f32],
    total_chunks: usize,
) -> RelevanceMetrics {
    let pool_deviation = standard_deviation(pool_scores);

    let Some(max_similarity) = max_value(section_scores) else {
        return RelevanceMetrics::empty(pool_deviation);
    };
    if total_chunks == 0 {
        return RelevanceMetrics::empty(pool_deviation);
    }

    let pool_min = min_value(pool_scores).unwrap_or(max_similarity);
    let pool_max = max_value(pool_scores).unwrap_or(max_similarity);
    let normalized_score = mean(&min_max_normalize(section_scores, pool_min, pool_max));

    // Capped in case the section's chunk count is stale relative to the index
    let coverage_factor = (section_scores.len() as f32 / total_chunks as f32).min(1.0);
    let raw_similarity = max_similarity * coverage_factor;
    let relevance_score = round_to_int(raw_similarity * 100.0).clamp(0, 100) as u8;

    RelevanceMetrics {
        raw_similarity,
        relevance_score,
        normalized_score,
        standard_deviation: pool_deviation,
        max_similarity,
        coverage_factor,
        matched_chunks: section_scores.len(),
    }
}

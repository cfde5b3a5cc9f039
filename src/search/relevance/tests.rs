use super::*;

const EPSILON: f32 = 1e-5;

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < EPSILON,
        "expected {}, got {}",
        expected,
        actual
    );
}

#[test]
fn mean_and_population_deviation() {
    assert_close(mean(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    assert_close(mean(&[]), 0.0);

    // Population deviation of [2, 4, 4, 4, 5, 5, 7, 9] is exactly 2
    assert_close(
        standard_deviation(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]),
        2.0,
    );
    assert_close(standard_deviation(&[0.5]), 0.0);
    assert_close(standard_deviation(&[]), 0.0);
}

#[test]
fn normalization_rescales_and_clamps() {
    let normalized = min_max_normalize(&[0.5, 0.7, 0.9, 1.2, 0.1], 0.5, 0.9);
    let expected = [0.0, 0.5, 1.0, 1.0, 0.0];
    for (actual, expected) in normalized.iter().zip(expected) {
        assert_close(*actual, expected);
    }
}

#[test]
fn normalization_with_degenerate_range_is_zero() {
    assert_eq!(min_max_normalize(&[0.4, 0.4], 0.4, 0.4), vec![0.0, 0.0]);
    assert_eq!(min_max_normalize(&[0.4], 0.9, 0.1), vec![0.0]);
    assert!(min_max_normalize(&[], 0.0, 1.0).is_empty());
}

#[test]
fn rounding_goes_half_away_from_zero() {
    assert_eq!(round_to_int(44.5), 45);
    assert_eq!(round_to_int(44.49), 44);
    assert_eq!(round_to_int(-0.5), -1);
    assert_eq!(round_to_int(0.0), 0);
}

#[test]
fn coverage_weighting_pins_display_and_ranking_scores() {
    // Section of 4 chunks, 2 matched; pool spans 0.5..=0.9
    let section = [0.9, 0.7];
    let pool = [0.9, 0.7, 0.5, 0.6];

    let metrics = score_section(&section, &pool, 4);

    assert_close(metrics.max_similarity, 0.9);
    assert_close(metrics.coverage_factor, 0.5);
    assert_close(metrics.raw_similarity, 0.45);
    assert_eq!(metrics.relevance_score, 45);
    // (1.0 + 0.5) / 2: the ranking key differs from the display score on purpose
    assert_close(metrics.normalized_score, 0.75);
    assert_close(metrics.standard_deviation, standard_deviation(&pool));
    assert_eq!(metrics.matched_chunks, 2);
}

#[test]
fn full_coverage_single_chunk_section() {
    let metrics = score_section(&[0.8], &[0.8, 0.4], 1);
    assert_close(metrics.coverage_factor, 1.0);
    assert_eq!(metrics.relevance_score, 80);
    assert_close(metrics.normalized_score, 1.0);
}

#[test]
fn empty_section_or_no_chunks_scores_zero() {
    let pool = [0.2, 0.4];

    let empty = score_section(&[], &pool, 3);
    assert_eq!(empty.relevance_score, 0);
    assert_eq!(empty.matched_chunks, 0);
    assert_close(empty.standard_deviation, 0.1);

    let no_chunks = score_section(&[0.4], &pool, 0);
    assert_eq!(no_chunks.relevance_score, 0);
    assert!(no_chunks.normalized_score.is_finite());
}

#[test]
fn stale_chunk_count_caps_coverage() {
    let metrics = score_section(&[0.6, 0.6, 0.6], &[0.6, 0.6, 0.6], 2);
    assert_close(metrics.coverage_factor, 1.0);
    assert_eq!(metrics.relevance_score, 60);
    // Every score equals the pool bounds, so normalization collapses to zero
    assert_close(metrics.normalized_score, 0.0);
}

#[test]
fn negative_similarity_clamps_display_score() {
    let metrics = score_section(&[-0.4], &[-0.4, 0.2], 1);
    assert_eq!(metrics.relevance_score, 0);
    assert_close(metrics.raw_similarity, -0.4);
}

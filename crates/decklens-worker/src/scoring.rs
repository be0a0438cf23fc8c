//! Score parsing and weighted aggregation for template analysis.

use decklens_core::defaults;
use regex::Regex;
use std::sync::OnceLock;

fn score_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+").expect("valid regex"))
}

/// Parse a 0–7 integer score from scoring-model output.
///
/// Takes the first integer found anywhere in the response, clamped to the
/// valid range. Unparseable output degrades to the middle score instead of
/// failing the task.
pub fn parse_score(output: &str) -> i32 {
    match score_regex()
        .find(output)
        .and_then(|m| m.as_str().parse::<i64>().ok())
    {
        Some(n) => n.clamp(defaults::SCORE_MIN as i64, defaults::SCORE_MAX as i64) as i32,
        None => defaults::SCORE_FALLBACK,
    }
}

/// Weighted mean of (value, weight) pairs. Zero total weight yields 0.0.
pub fn weighted_mean(pairs: &[(f64, f64)]) -> f64 {
    let total_weight: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total_weight == 0.0 {
        return 0.0;
    }
    let weighted_sum: f64 = pairs.iter().map(|(v, w)| v * w).sum();
    weighted_sum / total_weight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_score_plain_integer() {
        assert_eq!(parse_score("5"), 5);
        assert_eq!(parse_score("0"), 0);
        assert_eq!(parse_score("7"), 7);
    }

    #[test]
    fn test_parse_score_embedded_in_text() {
        assert_eq!(parse_score("Score: 6/7"), 6);
        assert_eq!(parse_score("I would rate this a 4 out of 7."), 4);
    }

    #[test]
    fn test_parse_score_clamps_out_of_range() {
        assert_eq!(parse_score("9"), 7);
        assert_eq!(parse_score("100"), 7);
        assert_eq!(parse_score("-2"), 0);
    }

    #[test]
    fn test_parse_score_unparseable_falls_back_to_middle() {
        assert_eq!(parse_score("excellent"), 3);
        assert_eq!(parse_score(""), 3);
    }

    #[test]
    fn test_weighted_mean_spec_example() {
        // Two questions, weights 1.0 and 2.0, scores 6 and 3.
        let score = weighted_mean(&[(6.0, 1.0), (3.0, 2.0)]);
        assert!((score - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weighted_mean_equal_weights() {
        let score = weighted_mean(&[(2.0, 1.0), (4.0, 1.0)]);
        assert!((score - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weighted_mean_empty_is_zero() {
        assert_eq!(weighted_mean(&[]), 0.0);
    }

    #[test]
    fn test_weighted_mean_includes_zero_scores() {
        // A failed question contributes 0, pulling the average down.
        let score = weighted_mean(&[(0.0, 1.0), (6.0, 1.0)]);
        assert!((score - 3.0).abs() < f64::EPSILON);
    }
}

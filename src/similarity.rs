//! Similarity scoring — lexical (token-set) and vector (embedding) measures.
//!
//! Both functions are pure and deterministic. Embedding vectors are produced
//! by the external provider and passed in as opaque float slices; this module
//! never calls out.

use std::collections::HashSet;

/// Jaccard index over lower-cased whitespace tokens.
///
/// Returns a score in `[0, 1]`; 0.0 when the token union is empty (both
/// strings blank). Symmetric in its arguments.
pub fn lexical_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let tokens_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();

    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();

    intersection as f64 / union as f64
}

/// Cosine similarity between two equal-length vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero norm,
/// otherwise a score in `[-1, 1]`.
pub fn vector_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_identical_strings() {
        assert_eq!(lexical_similarity("hey there", "hey there"), 1.0);
    }

    #[test]
    fn lexical_case_insensitive() {
        assert_eq!(lexical_similarity("Hey There", "hey there"), 1.0);
    }

    #[test]
    fn lexical_disjoint() {
        assert_eq!(lexical_similarity("foo bar", "baz qux"), 0.0);
    }

    #[test]
    fn lexical_partial_overlap() {
        // tokens: {what, are, you, doing} vs {what, you, want} → 2 / 5
        let score = lexical_similarity("what are you doing", "what you want");
        assert!((score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn lexical_symmetric() {
        let pairs = [
            ("hey how are you", "how are you doing"),
            ("", "something"),
            ("one two", "two three"),
        ];
        for (a, b) in pairs {
            assert_eq!(lexical_similarity(a, b), lexical_similarity(b, a));
        }
    }

    #[test]
    fn lexical_empty_union_is_zero() {
        assert_eq!(lexical_similarity("", ""), 0.0);
        assert_eq!(lexical_similarity("   ", "  "), 0.0);
    }

    #[test]
    fn lexical_in_unit_range() {
        let score = lexical_similarity("a b c d", "c d e f");
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn vector_self_similarity_is_one() {
        let v = [0.5f32, -1.0, 2.0];
        let score = vector_similarity(&v, &v);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn vector_opposite_is_negative_one() {
        let a = [1.0f32, 0.0];
        let b = [-1.0f32, 0.0];
        assert!((vector_similarity(&a, &b) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn vector_orthogonal_is_zero() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert!(vector_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn vector_length_mismatch_is_zero() {
        assert_eq!(vector_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn vector_zero_norm_is_zero() {
        assert_eq!(vector_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn vector_in_range() {
        let a = [0.3f32, -0.7, 1.2, 0.1];
        let b = [-0.2f32, 0.9, 0.4, -1.1];
        let score = vector_similarity(&a, &b);
        assert!((-1.0..=1.0).contains(&score));
    }
}

// Word-overlap similarity used for requirement search and claim support
//
// Jaccard similarity over normalized words is a fast stand-in for
// embeddings; `coverage` measures how much of a claim a source contains.

use std::collections::HashSet;

/// Similarity between two texts (0.0 = different, 1.0 = identical)
pub fn semantic_similarity(text1: &str, text2: &str) -> f64 {
    let words1 = tokenize(text1);
    let words2 = tokenize(text2);

    if words1.is_empty() && words2.is_empty() {
        return 1.0; // Both empty = identical
    }

    let intersection = words1.intersection(&words2).count();
    let union = words1.union(&words2).count();

    if union == 0 {
        return 0.0;
    }

    // Jaccard similarity: |A ∩ B| / |A ∪ B|
    intersection as f64 / union as f64
}

/// Share of the claim's words that appear in the source (0.0..=1.0)
pub fn coverage(claim: &str, source: &str) -> f64 {
    let claim_words = tokenize(claim);
    if claim_words.is_empty() {
        return 0.0;
    }
    let source_words = tokenize(source);
    let found = claim_words.intersection(&source_words).count();
    found as f64 / claim_words.len() as f64
}

/// Tokenize text into normalized words
pub(crate) fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty() && w.chars().count() > 2) // Skip very short words
        .map(String::from)
        .collect()
}

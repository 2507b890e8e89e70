//! String similarity measures used for correlation and fuzzy alert merging

use std::collections::HashSet;

/// Character-level Levenshtein distance
///
/// Uses two rolling rows, so memory is linear in the shorter input.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };

    if short.is_empty() {
        return long.len();
    }

    let mut previous: Vec<usize> = (0..=short.len()).collect();
    let mut current = vec![0; short.len() + 1];

    for (i, lc) in long.iter().enumerate() {
        current[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let substitution = previous[j] + usize::from(lc != sc);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[short.len()]
}

fn squash(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Similarity in percent, ignoring case and whitespace
///
/// Computed as `(1 - distance / max_len) * 100`. Identical inputs score 100; an input
/// that is empty after squashing scores 0 against anything different.
pub fn similarity_percent(a: &str, b: &str) -> f64 {
    if a == b {
        return 100.0;
    }
    let a = squash(a);
    let b = squash(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let max_len = a.chars().count().max(b.chars().count());
    let distance = levenshtein_distance(&a, &b);
    (1.0 - distance as f64 / max_len as f64) * 100.0
}

/// Whether `a` and `b` are at least `threshold` percent similar
///
/// Rejects early when the length difference alone rules the threshold out.
pub fn is_similar(a: &str, b: &str, threshold: f64) -> bool {
    if a == b {
        return true;
    }
    let a = squash(a);
    let b = squash(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }

    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    let max_len = len_a.max(len_b) as f64;
    let best_case = (1.0 - len_a.abs_diff(len_b) as f64 / max_len) * 100.0;
    if best_case < threshold {
        return false;
    }

    let distance = levenshtein_distance(&a, &b);
    (1.0 - distance as f64 / max_len) * 100.0 >= threshold
}

/// Dice coefficient over the distinct lower-cased words of two texts
///
/// Returns a value in `0.0..=1.0`; 0 when either side has no words.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let words_a: HashSet<&str> = a_lower.split_whitespace().collect();
    let words_b: HashSet<&str> = b_lower.split_whitespace().collect();

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let shared = words_a.intersection(&words_b).count();
    (2 * shared) as f64 / (words_a.len() + words_b.len()) as f64
}

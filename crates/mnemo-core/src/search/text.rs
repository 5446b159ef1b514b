//! Text heuristics used when no embedding is available: normalisation,
//! word-overlap similarity, keyword and entity-name extraction.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

static WORDS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[a-z0-9]+").ok());

static CAPITALISED_RUNS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").ok());

/// Words ignored by keyword extraction
pub const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "need", "dare", "ought", "used", "to", "of", "in", "for", "on", "with", "at", "by",
    "from", "as", "into", "through", "during", "before", "after", "above", "below", "between",
    "under", "again", "further", "then", "once", "here", "there", "when", "where", "why", "how",
    "all", "each", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only",
    "own", "same", "so", "than", "too", "very", "just", "and", "but", "if", "or", "because",
    "until", "while", "this", "that", "these", "those", "what", "which", "who", "whom", "it",
    "i", "you", "he", "she", "we", "they", "me", "him", "her", "us", "them",
];

/// Lowercase, collapse whitespace, drop trailing punctuation
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}

/// Lowercase alphanumeric words in order of appearance
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    match WORDS.as_ref() {
        Some(re) => re.find_iter(&lower).map(|m| m.as_str().to_string()).collect(),
        None => lower.split_whitespace().map(str::to_string).collect(),
    }
}

/// Jaccard overlap of the two word sets
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let a: BTreeSet<String> = tokenize(a).into_iter().collect();
    let b: BTreeSet<String> = tokenize(b).into_iter().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    shared / union
}

/// Similarity in [0, 1] without embeddings.
///
/// Identical after [`normalize`] scores 1. When one text contains the
/// other the score is `0.5 + 0.5 * shorter/longer`. Otherwise word overlap.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize(a), normalize(b));
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }

    let (short, long) = if na.len() <= nb.len() { (&na, &nb) } else { (&nb, &na) };
    let containment = if long.contains(short.as_str()) {
        0.5 + 0.5 * short.len() as f64 / long.len() as f64
    } else {
        0.0
    };
    containment.max(word_overlap(a, b))
}

/// Up to `limit` most frequent words longer than 3 characters that are not
/// stopwords; ties keep first appearance
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, word) in tokenize(text).into_iter().enumerate() {
        if word.len() <= 3 || word.chars().all(|c| c.is_ascii_digit()) || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(limit).map(|(word, _)| word).collect()
}

/// Runs of capitalised words longer than 2 characters, lowercased
pub fn capitalised_phrases(text: &str) -> Vec<String> {
    let Some(re) = CAPITALISED_RUNS.as_ref() else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    re.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|phrase| phrase.len() > 2)
        .filter(|phrase| seen.insert(phrase.clone()))
        .collect()
}

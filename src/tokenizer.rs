//! Meal tokenization
//!
//! Turns a meal name and its item names into a stable set of lowercase
//! tokens used to match similar meals later.

use std::collections::HashSet;

/// Minimum token length kept
pub const MIN_TOKEN_LEN: usize = 3;

/// Words that carry no meaning for meal matching
pub const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "with", "of", "in", "on", "for", "to", "from", "by", "at",
    "as", "is", "it", "no", "not",
];

/// Deduplicated tokens in first-seen order
pub fn tokenize_meal<S: AsRef<str>>(meal_name: &str, item_names: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();

    let texts = std::iter::once(meal_name).chain(item_names.iter().map(AsRef::as_ref));
    for text in texts {
        let lowered = text.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphanumeric()) {
            if word.chars().count() < MIN_TOKEN_LEN || STOPWORDS.contains(&word) {
                continue;
            }
            if seen.insert(word.to_string()) {
                tokens.push(word.to_string());
            }
        }
    }

    tokens
}

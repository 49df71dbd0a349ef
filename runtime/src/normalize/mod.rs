//! Field normalization: raw candidate payloads → canonical records.
//!
//! Every function here is pure and total. Unparseable inputs become `None`
//! (or a flagged partial value) instead of failing the record.

pub mod media;
pub mod price;
pub mod rating;
pub mod record;

pub use media::select_media;
pub use price::normalize_price;
pub use rating::normalize_rating;
pub use record::{RawFields, RecordNormalizer};

/// Words that carry no identity when comparing listing names.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "of", "at", "in", "by", "on", "der", "die", "das", "und", "am", "im",
    "le", "la", "les", "l", "de", "du", "des", "et", "el", "los", "las", "y", "il", "lo", "gli",
    "e", "di", "del", "het", "een", "en", "van",
];

/// Collapse runs of whitespace and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, strip punctuation and stop words, collapse whitespace.
pub fn fold_text(text: &str) -> String {
    let spaced: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    spaced
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_text() {
        assert_eq!(fold_text("  The Grand Hotel, Paris! "), "grand hotel paris");
        assert_eq!(fold_text("Hôtel de la Paix"), "hôtel paix");
        assert_eq!(fold_text("---"), "");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("a \n\t b  c "), "a b c");
    }
}

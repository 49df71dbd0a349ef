//! Record fingerprinting and first-seen-wins duplicate detection.
//!
//! A fingerprint is the site id when one exists, otherwise the folded
//! name + location text. Text fingerprints match exactly first and then by
//! Jaro-Winkler similarity to absorb small cross-page drift.

use crate::normalize::fold_text;
use crate::types::NormalizedRecord;
use std::collections::HashSet;

/// Derived key used only for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub external: Option<String>,
    pub text: String,
}

impl Fingerprint {
    pub fn of(record: &NormalizedRecord) -> Self {
        let name = fold_text(record.name.as_deref().unwrap_or(""));
        let location = fold_text(record.location.as_deref().unwrap_or(""));
        let text = match (name.is_empty(), location.is_empty()) {
            (false, false) => format!("{name} {location}"),
            (false, true) => name,
            _ => location,
        };
        Self {
            external: record.external_id.clone(),
            text,
        }
    }
}

/// Fingerprints accepted so far in one session.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    threshold: f64,
    seen: Vec<Fingerprint>,
    exact_external: HashSet<String>,
}

impl Deduplicator {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            seen: Vec::new(),
            exact_external: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Whether `record` matches anything already accepted.
    pub fn is_duplicate(&self, record: &NormalizedRecord) -> bool {
        let fp = Fingerprint::of(record);

        if let Some(ext) = &fp.external {
            if self.exact_external.contains(ext) {
                return true;
            }
        }
        if fp.text.is_empty() {
            return false;
        }
        self.seen.iter().any(|s| self.same_listing(&fp, s))
    }

    /// Accept `record` unless it duplicates an earlier one. Returns whether it was accepted.
    pub fn admit(&mut self, record: &NormalizedRecord) -> bool {
        if self.is_duplicate(record) {
            return false;
        }
        let fp = Fingerprint::of(record);
        if let Some(ext) = &fp.external {
            self.exact_external.insert(ext.clone());
        }
        self.seen.push(fp);
        true
    }

    fn same_listing(&self, a: &Fingerprint, b: &Fingerprint) -> bool {
        if let (Some(x), Some(y)) = (&a.external, &b.external) {
            return x == y;
        }
        if a.text.is_empty() || b.text.is_empty() {
            return false;
        }
        a.text == b.text || strsim::jaro_winkler(&a.text, &b.text) >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Provenance, StrategyKind};

    fn rec(name: &str, location: Option<&str>, external: Option<&str>) -> NormalizedRecord {
        NormalizedRecord {
            id: external.unwrap_or(name).to_string(),
            external_id: external.map(str::to_string),
            name: Some(name.to_string()),
            location: location.map(str::to_string),
            rating: None,
            price: None,
            media: Vec::new(),
            availability: None,
            provenance: Provenance {
                strategy: StrategyKind::Dom,
                page_index: 0,
            },
        }
    }

    #[test]
    fn test_whitespace_drift_is_duplicate() {
        let mut d = Deduplicator::new(0.92);
        assert!(d.admit(&rec("Hotel Beispiel", Some("Hauptstraße 1, Berlin"), None)));
        assert!(!d.admit(&rec("Hotel  Beispiel ", Some("Hauptstraße 1, Berlin"), None)));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_fuzzy_match_absorbs_small_drift() {
        let mut d = Deduplicator::new(0.92);
        assert!(d.admit(&rec("Grand Hotel Europa", Some("Innsbruck"), None)));
        assert!(d.is_duplicate(&rec("Grand Hotel Europa.", Some("Innsbruck Centre"), None)));
        assert!(!d.is_duplicate(&rec("Pension Alpenrose", Some("Innsbruck"), None)));
    }

    #[test]
    fn test_external_ids_decide_when_both_present() {
        let mut d = Deduplicator::new(0.92);
        assert!(d.admit(&rec("Ibis Centre", Some("Lyon"), Some("h-1"))));
        // same text, different site ids: two distinct listings
        assert!(d.admit(&rec("Ibis Centre", Some("Lyon"), Some("h-2"))));
        assert!(!d.admit(&rec("Totally Renamed", None, Some("h-1"))));
    }

    #[test]
    fn test_missing_id_falls_back_to_text() {
        let mut d = Deduplicator::new(0.92);
        assert!(d.admit(&rec("Ibis Centre", Some("Lyon"), Some("h-1"))));
        assert!(!d.admit(&rec("Ibis Centre", Some("Lyon"), None)));
    }

    #[test]
    fn test_fingerprint_folds_stop_words() {
        let fp = Fingerprint::of(&rec("The Savoy", Some("Strand, London"), None));
        assert_eq!(fp.text, "savoy strand london");
    }
}

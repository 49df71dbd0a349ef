//! Site-hint-keyed selector pack, embedded at compile time.

use serde::Deserialize;
use std::collections::HashMap;

const SELECTOR_PACK_JSON: &str = include_str!("selector_pack.json");

/// Ordered selectors for one site family; earlier entries win.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SiteSelectors {
    pub container: Vec<String>,
    pub card: Vec<String>,
    pub name: Vec<String>,
    pub price: Vec<String>,
    pub rating: Vec<String>,
    pub rating_context: Vec<String>,
    pub location: Vec<String>,
    pub image: Vec<String>,
    pub availability: Vec<String>,
    pub id_attributes: Vec<String>,
}

impl SiteSelectors {
    /// `self` first, then anything from `fallback` not already present.
    fn layered_over(&self, fallback: &SiteSelectors) -> SiteSelectors {
        fn merge(first: &[String], second: &[String]) -> Vec<String> {
            let mut out = first.to_vec();
            for s in second {
                if !out.contains(s) {
                    out.push(s.clone());
                }
            }
            out
        }
        SiteSelectors {
            container: merge(&self.container, &fallback.container),
            card: merge(&self.card, &fallback.card),
            name: merge(&self.name, &fallback.name),
            price: merge(&self.price, &fallback.price),
            rating: merge(&self.rating, &fallback.rating),
            rating_context: merge(&self.rating_context, &fallback.rating_context),
            location: merge(&self.location, &fallback.location),
            image: merge(&self.image, &fallback.image),
            availability: merge(&self.availability, &fallback.availability),
            id_attributes: merge(&self.id_attributes, &fallback.id_attributes),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectorPack {
    sites: HashMap<String, SiteSelectors>,
}

impl SelectorPack {
    pub fn embedded() -> Self {
        let sites: HashMap<String, SiteSelectors> =
            serde_json::from_str(SELECTOR_PACK_JSON).unwrap_or_default();
        Self { sites }
    }

    /// Selectors for a page hint such as `booking` or `www.expedia.com`,
    /// layered over the generic set.
    pub fn for_hint(&self, hint: Option<&str>) -> SiteSelectors {
        let generic = self.sites.get("generic").cloned().unwrap_or_default();
        let Some(hint) = hint.map(str::to_lowercase) else {
            return generic;
        };
        let mut keys: Vec<&String> = self.sites.keys().filter(|k| *k != "generic").collect();
        keys.sort();
        match keys.into_iter().find(|k| hint.contains(k.as_str())) {
            Some(key) => self.sites[key].layered_over(&generic),
            None => generic,
        }
    }
}

impl Default for SelectorPack {
    fn default() -> Self {
        Self::embedded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_pack_parses() {
        let pack = SelectorPack::embedded();
        let generic = pack.for_hint(None);
        assert!(!generic.card.is_empty());
        assert!(!generic.container.is_empty());
        assert!(generic.card[0].contains("schema.org"));
    }

    #[test]
    fn test_every_selector_is_valid_css() {
        let pack = SelectorPack::embedded();
        for site in pack.sites.values() {
            let all = site
                .container
                .iter()
                .chain(&site.card)
                .chain(&site.name)
                .chain(&site.price)
                .chain(&site.rating)
                .chain(&site.rating_context)
                .chain(&site.location)
                .chain(&site.image)
                .chain(&site.availability);
            for sel in all {
                assert!(scraper::Selector::parse(sel).is_ok(), "bad selector {sel}");
            }
        }
    }

    #[test]
    fn test_hint_layers_site_first() {
        let pack = SelectorPack::embedded();
        let booking = pack.for_hint(Some("www.Booking.com"));
        assert_eq!(booking.card[0], "[data-testid='property-card']");
        assert!(booking.card.len() > 1);
        assert_eq!(pack.for_hint(Some("unknown-site")), pack.for_hint(None));
    }
}

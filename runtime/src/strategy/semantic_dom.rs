//! Semantic-DOM strategy: JSON-LD first, then result cards found through the
//! selector pack (microdata, test ids and ARIA roles before class names).
//!
//! `scraper` documents are `!Send`, so all parsing happens in plain functions
//! after the snapshots have been awaited.

use super::selectors::SiteSelectors;
use super::{ExtractionStrategy, StrategyContext, StrategyOutcome};
use crate::error::HarvestResult;
use crate::normalize::collapse_whitespace;
use crate::types::{RawCandidate, StrategyKind};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;

const LODGING_TYPES: &[&str] = &[
    "Hotel",
    "LodgingBusiness",
    "Motel",
    "Hostel",
    "Resort",
    "BedAndBreakfast",
    "Campground",
    "VacationRental",
    "Accommodation",
    "Apartment",
    "House",
    "HotelRoom",
    "Product",
];

const OFFER_KEYS: &[&str] = &["offers", "price", "priceSpecification", "availability", "makesOffer", "@id", "identifier"];

const IMAGE_ATTRIBUTES: &[&str] = &["srcset", "data-srcset", "data-src", "src", "style"];

const MAX_IMAGES_PER_CARD: usize = 5;

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(el: ElementRef<'_>) -> String {
    if let Some(content) = el.value().attr("content") {
        return collapse_whitespace(content);
    }
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

// ── JSON-LD ──────────────────────────────────────────────────────────────────

/// Lodging objects from every JSON-LD block in the document.
pub fn jsonld_listings(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let Some(sel) = selector(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for element in document.select(&sel) {
        let text = element.inner_html();
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => collect_lodging(&value, &mut out, 0),
            Err(e) => debug!(error = %e, "skipping unparseable JSON-LD block"),
        }
    }
    out
}

fn ld_types(value: &Value) -> Vec<&str> {
    match value.get("@type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn collect_lodging(value: &Value, out: &mut Vec<Value>, depth: usize) {
    if depth > 4 {
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                collect_lodging(item, out, depth + 1);
            }
        }
        Value::Object(obj) => {
            if let Some(graph) = obj.get("@graph") {
                collect_lodging(graph, out, depth + 1);
            }
            let types = ld_types(value);
            if types.contains(&"ItemList") {
                if let Some(Value::Array(elements)) = obj.get("itemListElement") {
                    for element in elements {
                        let item = element.get("item").filter(|i| i.is_object()).unwrap_or(element);
                        collect_lodging(item, out, depth + 1);
                    }
                }
            } else if types.iter().any(|t| LODGING_TYPES.contains(t)) {
                out.push(value.clone());
            }
        }
        _ => {}
    }
}

fn has_offer_signal(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| OFFER_KEYS.iter().any(|k| obj.contains_key(*k)))
}

// ── Cards ────────────────────────────────────────────────────────────────────

/// One payload per result card, using the first card selector that matches
/// cards with names.
pub fn card_payloads(html: &str, selectors: &SiteSelectors) -> Vec<Value> {
    let document = Html::parse_document(html);
    for css in &selectors.card {
        let Some(sel) = selector(css) else {
            continue;
        };
        let payloads: Vec<Value> = document
            .select(&sel)
            .filter_map(|card| card_payload(card, selectors))
            .collect();
        if !payloads.is_empty() {
            debug!(selector = %css, cards = payloads.len(), "matched result cards");
            return payloads;
        }
    }
    Vec::new()
}

fn first_text<'a>(card: ElementRef<'a>, selectors: &[String]) -> Option<(String, ElementRef<'a>)> {
    selectors.iter().filter_map(|css| selector(css)).find_map(|sel| {
        card.select(&sel)
            .map(|el| (element_text(el), el))
            .find(|(text, _)| !text.is_empty())
    })
}

fn card_payload(card: ElementRef<'_>, selectors: &SiteSelectors) -> Option<Value> {
    let (name, _) = first_text(card, &selectors.name)?;
    let mut payload = Map::new();
    payload.insert("name".into(), Value::String(name));

    if let Some((price, _)) = first_text(card, &selectors.price) {
        payload.insert("price".into(), Value::String(price));
    }
    if let Some((rating, el)) = first_text(card, &selectors.rating) {
        let context = first_text(card, &selectors.rating_context)
            .map(|(t, _)| format!("/{t}"))
            .or_else(|| el.value().attr("aria-label").map(str::to_string));
        payload.insert("rating".into(), Value::String(rating));
        if let Some(context) = context {
            payload.insert("ratingContext".into(), Value::String(context));
        }
    }
    if let Some((location, _)) = first_text(card, &selectors.location) {
        payload.insert("location".into(), Value::String(location));
    }
    if let Some((availability, _)) = first_text(card, &selectors.availability) {
        payload.insert("availability".into(), Value::String(availability));
    }

    let images = card_images(card, &selectors.image);
    if !images.is_empty() {
        payload.insert(
            "images".into(),
            Value::Array(images.into_iter().map(Value::String).collect()),
        );
    }
    if let Some(id) = card_id(card, &selectors.id_attributes) {
        payload.insert("id".into(), Value::String(id));
    }
    Some(Value::Object(payload))
}

fn card_images(card: ElementRef<'_>, selectors: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for sel in selectors.iter().filter_map(|css| selector(css)) {
        for el in card.select(&sel) {
            let source = IMAGE_ATTRIBUTES
                .iter()
                .filter_map(|attr| el.value().attr(attr))
                .find(|v| !v.trim().is_empty() && (!v.contains(':') || v.contains("url(") || v.contains("//")));
            if let Some(source) = source {
                let source = source.trim().to_string();
                if !out.contains(&source) {
                    out.push(source);
                }
            }
            if out.len() >= MAX_IMAGES_PER_CARD {
                return out;
            }
        }
    }
    out
}

fn card_id(card: ElementRef<'_>, attributes: &[String]) -> Option<String> {
    attributes.iter().find_map(|attr| {
        card.value()
            .attr(attr)
            .or_else(|| {
                card.descendants()
                    .filter_map(ElementRef::wrap)
                    .find_map(|el| el.value().attr(attr))
            })
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

pub struct SemanticDom;

#[async_trait]
impl ExtractionStrategy for SemanticDom {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Dom
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> HarvestResult<StrategyOutcome> {
        let container_html = ctx.binding.read_dom_snapshot(&ctx.container).await?;
        let document_html = ctx.binding.read_dom_snapshot("html").await?;

        let jsonld = document_html.as_deref().map(jsonld_listings).unwrap_or_default();
        let card_source = container_html.as_deref().or(document_html.as_deref());
        let cards = card_source
            .map(|html| card_payloads(html, &ctx.selectors))
            .unwrap_or_default();

        let payloads = if !jsonld.is_empty() && (cards.is_empty() || jsonld.iter().any(has_offer_signal)) {
            jsonld
        } else {
            cards
        };

        if payloads.is_empty() {
            return Ok(StrategyOutcome::NotApplicable(format!(
                "no JSON-LD listings or result cards under {}",
                ctx.container
            )));
        }
        Ok(StrategyOutcome::Candidates(
            payloads
                .into_iter()
                .map(|p| RawCandidate::new(StrategyKind::Dom, p))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::selectors::SelectorPack;

    const CARDS: &str = r#"<html><body><main><div data-testid="property-list">
      <div data-testid="property-card" data-hotelid="101">
        <h3 data-testid="title">Hotel Beispiel</h3>
        <span data-testid="address">Hauptstraße 1, Berlin</span>
        <div data-testid="review-score"><div>8.6</div><div>Fabulous</div></div>
        <span data-testid="price-and-discounted-price">€ 120</span>
        <img srcset="/a-400.jpg 400w, /a-1200.jpg 1200w" src="/a.jpg">
      </div>
      <div data-testid="property-card">
        <h3 data-testid="title">Pension Sonne</h3>
        <span data-testid="price-and-discounted-price">€ 80</span>
      </div>
    </div></main></body></html>"#;

    #[test]
    fn test_booking_cards() {
        let selectors = SelectorPack::embedded().for_hint(Some("booking"));
        let cards = card_payloads(CARDS, &selectors);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0]["name"], "Hotel Beispiel");
        assert_eq!(cards[0]["price"], "€ 120");
        assert_eq!(cards[0]["rating"], "8.6");
        assert_eq!(cards[0]["location"], "Hauptstraße 1, Berlin");
        assert_eq!(cards[0]["id"], "101");
        assert_eq!(cards[0]["images"][0], "/a-400.jpg 400w, /a-1200.jpg 1200w");
        assert!(cards[1].get("id").is_none());
    }

    #[test]
    fn test_generic_microdata_cards() {
        let html = r#"<ul>
          <li itemscope itemtype="https://schema.org/Hotel">
            <span itemprop="name">Ryokan Kyo</span>
            <meta itemprop="price" content="18000 JPY">
            <span itemprop="ratingValue">4.6</span>
          </li></ul>"#;
        let cards = card_payloads(html, &SelectorPack::embedded().for_hint(None));
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0]["price"], "18000 JPY");
    }

    #[test]
    fn test_jsonld_item_list() {
        let html = r#"<html><head><script type="application/ld+json">
          {"@context":"https://schema.org","@type":"ItemList","itemListElement":[
            {"@type":"ListItem","position":1,"item":{"@type":"Hotel","name":"A",
              "offers":{"@type":"Offer","price":"99","priceCurrency":"EUR"}}},
            {"@type":"ListItem","position":2,"item":{"@type":"Hotel","name":"B"}}
          ]}</script>
          <script type="application/ld+json">{"@type":"Organization","name":"Site"}</script>
          <script type="application/ld+json">{broken</script>
        </head></html>"#;
        let items = jsonld_listings(html);
        assert_eq!(items.len(), 2);
        assert!(has_offer_signal(&items[0]));
        assert!(!has_offer_signal(&items[1]));
    }
}

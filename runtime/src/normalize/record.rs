//! Candidate payload → `NormalizedRecord`.
//!
//! Payload keys are matched case- and punctuation-insensitively against alias
//! lists, so `hotel_name`, `hotelName` and `HotelName` are the same field.
//! Structured values are first flattened into canonical text ([`RawFields`])
//! and then parsed, which makes re-normalizing a record a no-op.

use super::{collapse_whitespace, fold_text, normalize_price, normalize_rating, select_media};
use crate::types::{Availability, NormalizedRecord, Provenance, RawCandidate, StrategyKind};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::hash::Hasher;
use std::sync::OnceLock;

const NAME_KEYS: &[&str] = &[
    "name",
    "hotelname",
    "propertyname",
    "listingname",
    "displayname",
    "title",
    "headline",
];

const LOCATION_KEYS: &[&str] = &[
    "location",
    "address",
    "locationname",
    "neighborhood",
    "neighbourhood",
    "district",
    "area",
    "city",
    "region",
];

const ADDRESS_PARTS: &[&str] = &[
    "streetaddress",
    "addressline",
    "street",
    "district",
    "neighborhood",
    "addresslocality",
    "city",
    "addressregion",
    "region",
    "addresscountry",
    "country",
    "name",
    "text",
];

const PRICE_KEYS: &[&str] = &[
    "price",
    "displayprice",
    "formattedprice",
    "pricetext",
    "pricelabel",
    "priceformatted",
    "pricepernight",
    "nightlyprice",
    "nightlyrate",
    "rate",
    "totalprice",
    "pricetotal",
    "lowestprice",
    "leadprice",
    "minprice",
    "priceamount",
    "priceincents",
    "priceminor",
    "amount",
    "priceinfo",
    "pricing",
    "offers",
];

const FORMATTED_PRICE_KEYS: &[&str] = &[
    "formatted",
    "display",
    "displayprice",
    "formattedprice",
    "amountformatted",
    "text",
    "label",
];

const NUMERIC_PRICE_KEYS: &[&str] = &[
    "amount",
    "value",
    "price",
    "lowprice",
    "total",
    "amountincents",
    "amountminor",
];

const CURRENCY_KEYS: &[&str] = &[
    "currency",
    "currencycode",
    "pricecurrency",
    "currencyinfo",
    "currencysymbol",
];

const RATING_KEYS: &[&str] = &[
    "reviewscore",
    "guestrating",
    "guestreviewscore",
    "averagerating",
    "ratingvalue",
    "rating",
    "aggregaterating",
    "reviewrating",
    "starrating",
    "stars",
    "hotelclass",
    "score",
];

const RATING_VALUE_KEYS: &[&str] = &["ratingvalue", "value", "score", "average", "overall", "rating"];

const RATING_SCALE_KEYS: &[&str] = &["bestrating", "maxrating", "ratingscale", "ratingmax", "scale", "outof", "max"];

const MEDIA_KEYS: &[&str] = &[
    "images",
    "image",
    "photos",
    "photo",
    "pictures",
    "picture",
    "thumbnail",
    "thumbnailurl",
    "imageurl",
    "imagesrc",
    "photourl",
    "mainphoto",
    "heroimage",
    "img",
    "media",
    "srcset",
];

const MEDIA_URL_KEYS: &[&str] = &[
    "srcset", "url", "src", "href", "uri", "contenturl", "large", "original", "medium", "small",
];

const AVAILABILITY_KEYS: &[&str] = &[
    "availability",
    "available",
    "isavailable",
    "soldout",
    "issoldout",
    "instock",
    "bookable",
    "isbookable",
];

const ID_KEYS: &[&str] = &[
    "hotelid",
    "propertyid",
    "listingid",
    "productid",
    "offerid",
    "id",
    "identifier",
    "sku",
];

const MAX_MEDIA_SOURCES: usize = 20;
const MAX_TEXT_CHARS: usize = 300;

/// Flattened canonical text for each field, before parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFields {
    pub name: Option<String>,
    pub location: Option<String>,
    pub price_text: Option<String>,
    pub rating_text: Option<String>,
    pub rating_context: Option<String>,
    pub media: Vec<String>,
    pub availability: Option<String>,
    pub external_id: Option<String>,
}

impl RawFields {
    /// Pull field text out of an untyped payload object.
    pub fn from_payload(payload: &Value) -> Self {
        let Some(obj) = payload.as_object() else {
            return Self::default();
        };
        let obj = unwrap_node(obj);

        let (rating_text, rating_context) = rating_of(obj);
        Self {
            name: lookup(obj, NAME_KEYS).and_then(|(_, v)| text_of(v, 0)),
            location: lookup(obj, LOCATION_KEYS).and_then(|(_, v)| location_of(v)),
            price_text: lookup(obj, PRICE_KEYS).and_then(|(k, v)| price_text_of(k, v, obj, 0)),
            rating_text,
            rating_context,
            media: media_of(obj),
            availability: lookup(obj, AVAILABILITY_KEYS).and_then(|(k, v)| availability_text_of(k, v)),
            external_id: lookup(obj, ID_KEYS).and_then(|(_, v)| id_of(v)),
        }
    }

    /// Canonical text of an already-normalized record.
    pub fn from_record(record: &NormalizedRecord) -> Self {
        Self {
            name: record.name.clone(),
            location: record.location.clone(),
            price_text: record.price.as_ref().map(|p| p.raw.clone()),
            rating_text: record.rating.as_ref().map(|r| r.raw_text.clone()),
            rating_context: record.rating.as_ref().and_then(|r| r.context.clone()),
            media: record.media.clone(),
            availability: record.availability.map(|a| availability_word(a).to_string()),
            external_id: record.external_id.clone(),
        }
    }
}

/// Turns candidates into canonical records.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    media_width_ceiling: u32,
}

impl RecordNormalizer {
    pub fn new(media_width_ceiling: u32) -> Self {
        Self {
            media_width_ceiling,
        }
    }

    pub fn normalize(&self, candidate: &RawCandidate, page_url: &str, page_index: u32) -> NormalizedRecord {
        let fields = RawFields::from_payload(&candidate.payload);
        self.normalize_fields(&fields, page_url, candidate.source_strategy, page_index)
    }

    pub fn normalize_fields(
        &self,
        fields: &RawFields,
        page_url: &str,
        strategy: StrategyKind,
        page_index: u32,
    ) -> NormalizedRecord {
        let name = fields.name.as_deref().and_then(clean_text);
        let location = fields.location.as_deref().and_then(clean_text);
        let external_id = fields
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let price = fields
            .price_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(normalize_price);

        let rating = fields
            .rating_text
            .as_deref()
            .map(|t| normalize_rating(t, fields.rating_context.as_deref()))
            .filter(|r| r.raw.is_some());

        let media = select_media(&fields.media, page_url, self.media_width_ceiling);
        let availability = fields.availability.as_deref().and_then(classify_availability);

        let id = match &external_id {
            Some(ext) => ext.clone(),
            None => synthetic_id(name.as_deref(), location.as_deref()),
        };

        NormalizedRecord {
            id,
            external_id,
            name,
            location,
            rating,
            price,
            media,
            availability,
            provenance: Provenance {
                strategy,
                page_index,
            },
        }
    }

    /// Run a finished record through the normalizer again.
    pub fn renormalize(&self, record: &NormalizedRecord, page_url: &str) -> NormalizedRecord {
        self.normalize_fields(
            &RawFields::from_record(record),
            page_url,
            record.provenance.strategy,
            record.provenance.page_index,
        )
    }
}

fn unavailable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:sold\s*out|out\s*of\s*stock|unavailable|not available|no availability|fully booked|ausgebucht|nicht verfügbar|complet|complète|épuisé|agotado|no disponible|esaurito|non disponibile|niet beschikbaar|volgeboekt|false)\b",
        )
        .expect("unavailable regex is valid")
    })
}

fn limited_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:limited|only\s+(?:\d+|one|a few)|\d+\s+(?:rooms?\s+)?left|last\s+(?:\d+\s+)?rooms?|few\s+(?:rooms\s+)?left|selling fast|high demand|nur noch|plus que|il ne reste|solo quedan|quedan|últimas?|ultim[aeio]|nog maar)\b",
        )
        .expect("limited regex is valid")
    })
}

fn available_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:available|in\s*stock|book now|verfügbar|disponible|disponibile|beschikbaar|true)\b",
        )
        .expect("available regex is valid")
    })
}

/// Classify availability wording in the languages we see on booking sites.
///
/// Matches whole words, so "completely" or "last booked" say nothing.
pub fn classify_availability(text: &str) -> Option<Availability> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if unavailable_re().is_match(text) {
        Some(Availability::Unavailable)
    } else if limited_re().is_match(text) {
        Some(Availability::Limited)
    } else if available_re().is_match(text) {
        Some(Availability::Available)
    } else {
        None
    }
}

fn availability_word(a: Availability) -> &'static str {
    match a {
        Availability::Available => "available",
        Availability::Limited => "limited",
        Availability::Unavailable => "unavailable",
    }
}

/// Stable id from the folded name and location.
pub fn synthetic_id(name: Option<&str>, location: Option<&str>) -> String {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(fold_text(name.unwrap_or("")).as_bytes());
    hasher.write(b"|");
    hasher.write(fold_text(location.unwrap_or("")).as_bytes());
    format!("rec-{:016x}", hasher.finish())
}

fn clean_text(text: &str) -> Option<String> {
    let collapsed = collapse_whitespace(text);
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_TEXT_CHARS).collect())
}

fn norm_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// First non-null value whose key matches an alias, in alias priority order.
fn lookup<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<(&'a str, &'a Value)> {
    aliases.iter().find_map(|alias| {
        obj.iter()
            .find(|(k, v)| !v.is_null() && norm_key(k) == *alias)
            .map(|(k, v)| (k.as_str(), v))
    })
}

/// GraphQL edges wrap the listing in `node`.
fn unwrap_node(obj: &Map<String, Value>) -> &Map<String, Value> {
    if obj.len() <= 2 {
        if let Some(Value::Object(inner)) = obj.get("node") {
            return inner;
        }
    }
    obj
}

fn format_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    let f = n.as_f64().unwrap_or(0.0);
    let s = format!("{f:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn text_of(value: &Value, depth: usize) -> Option<String> {
    if depth > 2 {
        return None;
    }
    match value {
        Value::String(s) => clean_text(s),
        Value::Number(n) => Some(format_number(n)),
        Value::Object(inner) => lookup(inner, &["text", "value", "name", "content", "displayname", "title"])
            .and_then(|(_, v)| text_of(v, depth + 1)),
        Value::Array(items) => items.first().and_then(|v| text_of(v, depth + 1)),
        _ => None,
    }
}

fn location_of(value: &Value) -> Option<String> {
    match value {
        Value::Object(inner) => {
            let mut parts: Vec<String> = Vec::new();
            for key in ADDRESS_PARTS {
                if let Some((_, v)) = lookup(inner, &[*key]) {
                    if let Some(text) = text_of(v, 1) {
                        if !parts.contains(&text) {
                            parts.push(text);
                        }
                    }
                }
            }
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Array(items) => items.first().and_then(location_of),
        other => text_of(other, 0),
    }
}

fn price_text_of(key: &str, value: &Value, parent: &Map<String, Value>, depth: usize) -> Option<String> {
    if depth > 3 {
        return None;
    }
    let nk = norm_key(key);
    match value {
        Value::String(s) => {
            let s = collapse_whitespace(s);
            if s.is_empty() {
                return None;
            }
            let bare = s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',');
            Some(if bare { decorate_amount(&s, &nk, parent) } else { s })
        }
        Value::Number(n) => {
            let text = if nk.contains("cents") || nk.contains("minor") {
                let minor = n.as_i64()?;
                format!("{}.{:02}", minor / 100, (minor % 100).abs())
            } else {
                format_number(n)
            };
            Some(decorate_amount(&text, &nk, parent))
        }
        Value::Object(inner) => {
            if let Some((_, Value::String(s))) = lookup(inner, FORMATTED_PRICE_KEYS) {
                if let Some(text) = clean_text(s) {
                    return Some(text);
                }
            }
            if let Some((k, v)) = lookup(inner, NUMERIC_PRICE_KEYS) {
                if let Some(text) = price_text_of(k, v, inner, depth + 1) {
                    return Some(text);
                }
            }
            inner
                .iter()
                .filter(|(_, v)| v.is_object())
                .find_map(|(k, v)| price_text_of(k, v, inner, depth + 1))
        }
        Value::Array(items) => items
            .first()
            .and_then(|v| price_text_of(key, v, parent, depth + 1)),
        _ => None,
    }
}

/// Attach a sibling currency and a basis implied by the key name.
fn decorate_amount(amount: &str, key: &str, parent: &Map<String, Value>) -> String {
    let mut text = amount.to_string();
    if let Some(currency) = lookup(parent, CURRENCY_KEYS).and_then(|(_, v)| currency_of(v)) {
        text.push(' ');
        text.push_str(&currency);
    }
    if key.contains("night") {
        text.push_str(" per night");
    } else if key.contains("total") || key.contains("stay") {
        text.push_str(" total");
    }
    text
}

fn currency_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_text(s),
        Value::Object(inner) => lookup(inner, &["code", "currencycode", "symbol"])
            .and_then(|(_, v)| v.as_str())
            .and_then(clean_text),
        _ => None,
    }
}

fn rating_of(obj: &Map<String, Value>) -> (Option<String>, Option<String>) {
    let context = lookup(obj, &["ratingcontext"])
        .and_then(|(_, v)| v.as_str())
        .and_then(clean_text)
        .or_else(|| {
            lookup(obj, RATING_SCALE_KEYS)
                .and_then(|(_, v)| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
                .map(|scale: f64| format!("/{scale}"))
        });

    let Some((_, value)) = lookup(obj, RATING_KEYS) else {
        return (None, None);
    };
    match value {
        Value::Object(inner) => {
            let score = lookup(inner, RATING_VALUE_KEYS).and_then(|(_, v)| text_of(v, 1));
            let scale = lookup(inner, RATING_SCALE_KEYS).and_then(|(_, v)| text_of(v, 1));
            match (score, scale) {
                (Some(score), Some(scale)) => (Some(format!("{score}/{scale}")), None),
                (score, None) => (score, context),
                (None, Some(_)) => (None, None),
            }
        }
        Value::String(_) | Value::Number(_) => (text_of(value, 0), context),
        _ => (None, None),
    }
}

fn media_of(obj: &Map<String, Value>) -> Vec<String> {
    let mut sources = Vec::new();
    for alias in MEDIA_KEYS {
        for (k, v) in obj {
            if norm_key(k) == *alias {
                collect_media(v, &mut sources, 0);
            }
        }
        if sources.len() >= MAX_MEDIA_SOURCES {
            break;
        }
    }
    sources.truncate(MAX_MEDIA_SOURCES);
    sources
}

fn collect_media(value: &Value, out: &mut Vec<String>, depth: usize) {
    if depth > 2 || out.len() >= MAX_MEDIA_SOURCES {
        return;
    }
    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && !out.iter().any(|o| o == s) {
                out.push(s.to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_media(item, out, depth + 1);
            }
        }
        Value::Object(inner) => {
            if let Some((_, v)) = lookup(inner, MEDIA_URL_KEYS) {
                collect_media(v, out, depth + 1);
            }
        }
        _ => {}
    }
}

fn availability_text_of(key: &str, value: &Value) -> Option<String> {
    let negated = {
        let nk = norm_key(key);
        nk.contains("soldout")
    };
    match value {
        Value::Bool(b) => Some(if *b != negated { "available" } else { "unavailable" }.to_string()),
        Value::Number(n) => {
            let positive = n.as_f64().is_some_and(|v| v > 0.0);
            Some(if positive != negated { "available" } else { "unavailable" }.to_string())
        }
        Value::String(s) => clean_text(s),
        _ => None,
    }
}

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceBasis;
    use serde_json::json;

    const PAGE: &str = "https://hotels.test/search";

    fn normalize(payload: Value) -> NormalizedRecord {
        RecordNormalizer::new(1600).normalize(
            &RawCandidate::new(StrategyKind::Network, payload),
            PAGE,
            0,
        )
    }

    #[test]
    fn test_aliases_are_case_and_underscore_insensitive() {
        let r = normalize(json!({
            "hotel_name": "  Hotel  Adlon ",
            "Location": "Berlin Mitte",
            "price_per_night": 250,
            "currency": "EUR",
            "review_score": 9.1,
            "rating_scale": 10,
            "hotel_id": 4711
        }));
        assert_eq!(r.name.as_deref(), Some("Hotel Adlon"));
        assert_eq!(r.location.as_deref(), Some("Berlin Mitte"));
        let price = r.price.unwrap();
        assert_eq!(price.amount_minor_units, Some(25000));
        assert_eq!(price.currency.as_deref(), Some("EUR"));
        assert_eq!(price.basis, Some(PriceBasis::PerNight));
        let rating = r.rating.unwrap();
        assert_eq!(rating.scale, Some(10));
        assert_eq!(rating.normalized, Some(4.55));
        assert_eq!(r.external_id.as_deref(), Some("4711"));
        assert_eq!(r.id, "4711");
    }

    #[test]
    fn test_schema_org_shapes() {
        let r = normalize(json!({
            "@type": "Hotel",
            "name": "Le Meurice",
            "address": {"streetAddress": "228 Rue de Rivoli", "addressLocality": "Paris"},
            "aggregateRating": {"ratingValue": "4.7", "bestRating": "5"},
            "offers": {"@type": "Offer", "price": "890.00", "priceCurrency": "EUR"},
            "image": ["https://img.test/meurice.jpg"]
        }));
        assert_eq!(r.location.as_deref(), Some("228 Rue de Rivoli, Paris"));
        assert_eq!(r.rating.unwrap().normalized, Some(4.7));
        let price = r.price.unwrap();
        assert_eq!(price.amount_minor_units, Some(89000));
        assert_eq!(price.currency.as_deref(), Some("EUR"));
        assert_eq!(r.media, vec!["https://img.test/meurice.jpg".to_string()]);
    }

    #[test]
    fn test_nested_price_and_minor_units() {
        let r = normalize(json!({
            "title": "Casa Azul",
            "priceInfo": {"lead": {"amount": 180, "currencyInfo": {"code": "USD"}}}
        }));
        assert_eq!(r.price.unwrap().amount_minor_units, Some(18000));

        let r = normalize(json!({"name": "Casa Verde", "priceInCents": 12345, "currency": "USD"}));
        assert_eq!(r.price.unwrap().amount_minor_units, Some(12345));
    }

    #[test]
    fn test_graphql_node_is_unwrapped() {
        let r = normalize(json!({"node": {"name": "Ryokan", "soldOut": true}, "cursor": "x"}));
        assert_eq!(r.name.as_deref(), Some("Ryokan"));
        assert_eq!(r.availability, Some(Availability::Unavailable));
    }

    #[test]
    fn test_synthetic_id_is_stable_across_formatting() {
        let a = normalize(json!({"name": "The Grand Hotel", "location": "Paris"}));
        let b = normalize(json!({"name": "grand  hotel!", "location": " PARIS "}));
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("rec-"));
        assert!(a.external_id.is_none());
    }

    #[test]
    fn test_availability_wording() {
        assert_eq!(classify_availability("Only 2 rooms left!"), Some(Availability::Limited));
        assert_eq!(classify_availability("Ausgebucht"), Some(Availability::Unavailable));
        assert_eq!(classify_availability("Not available"), Some(Availability::Unavailable));
        assert_eq!(classify_availability("https://schema.org/InStock"), Some(Availability::Available));
        assert_eq!(classify_availability("Great location"), None);
    }

    #[test]
    fn test_availability_needs_whole_words() {
        assert_eq!(classify_availability("Completely renovated in 2023"), None);
        assert_eq!(classify_availability("Last booked 2 hours ago"), None);
        assert_eq!(classify_availability("The only hotel on the lake"), None);
        assert_eq!(classify_availability("Hôtel complet"), Some(Availability::Unavailable));
        assert_eq!(classify_availability("Only 1 left at this price"), Some(Availability::Limited));
        assert_eq!(classify_availability("Last 3 rooms"), Some(Availability::Limited));
        assert_eq!(classify_availability("Nur noch 2 Zimmer verfügbar"), Some(Availability::Limited));
        assert_eq!(classify_availability("https://schema.org/OutOfStock"), Some(Availability::Unavailable));
    }

    #[test]
    fn test_renormalize_is_identity() {
        let normalizer = RecordNormalizer::new(1600);
        let payloads = [
            json!({"name": "Hotel Adlon", "price": "ab €150 pro Nacht zzgl. Steuern",
                   "rating": "8.6", "ratingContext": "/10",
                   "images": ["/img/a-320.jpg 320w, /img/a-1280.jpg 1280w"],
                   "availability": "Only 1 left"}),
            json!({"title": "Casa", "offers": [{"price": 99, "priceCurrency": "USD"}], "id": "c-1"}),
            json!({"name": "Bare"}),
        ];
        for payload in payloads {
            let first = normalizer.normalize(&RawCandidate::new(StrategyKind::Dom, payload), PAGE, 2);
            assert_eq!(normalizer.renormalize(&first, PAGE), first);
        }
    }
}

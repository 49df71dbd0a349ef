//! Defensive shape matching over untyped JSON.
//!
//! Captured bodies and page globals have no schema we can rely on. Instead of
//! deserializing into fixed types, we look for arrays whose elements look like
//! listings: objects with a name-like key and a price-like key.

use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Paths where result lists usually live, tried before the deep search.
const COMMON_PATHS: &[&[&str]] = &[
    &["results"],
    &["data", "results"],
    &["data", "search", "results"],
    &["hotels"],
    &["data", "hotels"],
    &["listings"],
    &["data", "listings"],
    &["items"],
    &["data", "items"],
    &["props", "pageProps", "results"],
    &["props", "pageProps", "hotels"],
    &["searchResults"],
    &["data", "searchResults"],
    &["properties"],
];

const NAME_KEYS: &[&str] = &[
    "name",
    "title",
    "hotelname",
    "propertyname",
    "displayname",
    "listingname",
    "headline",
];

const PRICE_KEYS: &[&str] = &[
    "rate",
    "amount",
    "offers",
    "pricing",
    "cost",
    "fare",
    "displayprice",
];

const MAX_DEPTH: usize = 10;
const MAX_VISITED: usize = 20_000;
const MIN_LISTING_RATIO: f64 = 0.5;

/// Outcome of looking for a listing collection.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeMatch {
    Matched(Vec<Value>),
    Mismatch(String),
}

fn norm_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn has_name_key(obj: &Map<String, Value>) -> bool {
    obj.iter()
        .any(|(k, v)| !v.is_null() && NAME_KEYS.contains(&norm_key(k).as_str()))
}

fn has_price_key(obj: &Map<String, Value>) -> bool {
    obj.iter().any(|(k, v)| {
        let k = norm_key(k);
        !v.is_null() && (k.contains("price") || PRICE_KEYS.contains(&k.as_str()))
    })
}

/// The object that carries listing fields: the element itself or its `node`.
fn listing_body(value: &Value) -> Option<&Map<String, Value>> {
    let obj = value.as_object()?;
    match obj.get("node") {
        Some(Value::Object(inner)) => Some(inner),
        _ => Some(obj),
    }
}

/// Whether one element looks like a listing.
pub fn is_listing_like(value: &Value) -> bool {
    listing_body(value).is_some_and(|obj| has_name_key(obj) && has_price_key(obj))
}

/// Number of listing-like elements, or `None` when too few to count as a collection.
fn score_array(items: &[Value]) -> Option<usize> {
    if items.is_empty() {
        return None;
    }
    let listing = items.iter().filter(|v| is_listing_like(v)).count();
    let ratio = listing as f64 / items.len() as f64;
    (listing > 0 && ratio >= MIN_LISTING_RATIO).then_some(listing)
}

/// Apollo-style caches are maps of entities keyed by `Type:id`.
fn apollo_values(obj: &Map<String, Value>) -> Option<Vec<Value>> {
    let entities: Vec<Value> = obj
        .iter()
        .filter(|(k, v)| k.contains(':') && v.get("__typename").is_some())
        .map(|(_, v)| v.clone())
        .collect();
    let listings: Vec<Value> = entities.into_iter().filter(is_listing_like).collect();
    (!listings.is_empty()).then_some(listings)
}

fn at_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

fn collection_items(items: &[Value]) -> Vec<Value> {
    items.iter().filter(|v| is_listing_like(v)).cloned().collect()
}

/// Find the best listing collection in `value`.
pub fn match_listing_collection(value: &Value) -> ShapeMatch {
    if !value.is_object() && !value.is_array() {
        return ShapeMatch::Mismatch("not an object or array".into());
    }

    for path in COMMON_PATHS {
        if let Some(Value::Array(items)) = at_path(value, path) {
            if score_array(items).is_some() {
                return ShapeMatch::Matched(collection_items(items));
            }
        }
    }

    let mut best: Option<(usize, Vec<Value>)> = None;
    let mut consider = |score: usize, items: Vec<Value>| {
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, items));
        }
    };

    let mut queue: VecDeque<(&Value, usize)> = VecDeque::from([(value, 0)]);
    let mut visited = 0usize;
    while let Some((node, depth)) = queue.pop_front() {
        visited += 1;
        if visited > MAX_VISITED {
            break;
        }
        match node {
            Value::Array(items) => {
                if let Some(score) = score_array(items) {
                    consider(score, collection_items(items));
                }
                if depth < MAX_DEPTH {
                    queue.extend(items.iter().filter(|v| v.is_object() || v.is_array()).map(|v| (v, depth + 1)));
                }
            }
            Value::Object(obj) => {
                if let Some(listings) = apollo_values(obj) {
                    consider(listings.len(), listings);
                }
                if depth < MAX_DEPTH {
                    queue.extend(obj.values().filter(|v| v.is_object() || v.is_array()).map(|v| (v, depth + 1)));
                }
            }
            _ => {}
        }
    }

    match best {
        Some((_, items)) => ShapeMatch::Matched(items),
        None => ShapeMatch::Mismatch("no array of listing-like objects".into()),
    }
}

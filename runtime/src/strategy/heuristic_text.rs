//! Heuristic-text strategy: the last resort when the page offers no data,
//! no JSON-LD and no recognisable cards.
//!
//! The container's rendered text is split into lines at block elements, then
//! into listing blocks that each end on a price-looking line.

use super::{ExtractionStrategy, StrategyContext, StrategyOutcome};
use crate::error::HarvestResult;
use crate::normalize::collapse_whitespace;
use crate::normalize::record::classify_availability;
use crate::types::{RawCandidate, StrategyKind};
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde_json::{Map, Value};
use std::sync::OnceLock;

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "br", "dd", "div", "dl", "dt", "footer", "h1", "h2", "h3", "h4",
    "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p", "section", "table", "td", "th",
    "tr", "ul", "button", "figure", "figcaption",
];

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg"];

/// Lines that appear on cards but never name a listing.
const BOILERPLATE: &[&str] = &[
    "sponsored",
    "ad",
    "free cancellation",
    "breakfast included",
    "see availability",
    "show prices",
    "view deal",
    "book now",
    "new to",
    "genius",
    "getaway deal",
    "kostenlose stornierung",
    "annulation gratuite",
    "cancelación gratuita",
];

const MAX_BLOCKS: usize = 200;
const MAX_NAME_CHARS: usize = 120;

fn price_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:[€$£¥₹₩₺₽₪฿]\s?\d|\d[\d.,' ]*\s?(?:[€$£¥₹₩₺₽₪฿]|zł|kr\b|chf\b|eur\b|usd\b|gbp\b)|\b(?:eur|usd|gbp|chf|jpy|cad|aud)\s?\d)",
        )
        .expect("price line regex is valid")
    })
}

fn rating_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:scored\s+|rated\s+|note\s+)?\d{1,2}(?:[.,]\d)?(?:\s*(?:/|out of|von|sur)\s*\d{1,3})?$|[★☆]")
            .expect("rating line regex is valid")
    })
}

/// Rendered text with a newline at each block boundary.
pub fn block_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    push_text(document.root_element(), &mut out);
    out
}

fn push_text(el: ElementRef<'_>, out: &mut String) {
    let tag = el.value().name();
    if SKIPPED_ELEMENTS.contains(&tag) {
        return;
    }
    let block = BLOCK_ELEMENTS.contains(&tag);
    if block {
        out.push('\n');
    }
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            push_text(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(&text.text);
        }
    }
    if block {
        out.push('\n');
    }
}

fn is_boilerplate(line: &str) -> bool {
    let lower = line.to_lowercase();
    BOILERPLATE.iter().any(|b| lower == *b || lower.starts_with(&format!("{b} ")))
}

fn looks_like_name(line: &str) -> bool {
    let chars = line.chars().count();
    (3..=MAX_NAME_CHARS).contains(&chars)
        && line.chars().next().is_some_and(char::is_alphabetic)
        && !price_line_re().is_match(line)
        && !rating_line_re().is_match(line)
        && classify_availability(line).is_none()
        && !is_boilerplate(line)
}

/// Split lines into listing blocks, each ending on a run of price lines.
///
/// Adjacent price lines (a struck-through price followed by the current one)
/// stay in one block so the normalizer sees every amount.
pub fn segment_blocks(lines: &[String]) -> Vec<Value> {
    let mut blocks = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < lines.len() {
        if !price_line_re().is_match(&lines[i]) {
            i += 1;
            continue;
        }
        let mut end = i;
        while lines.get(end + 1).is_some_and(|l| price_line_re().is_match(l)) {
            end += 1;
        }
        let price_text = lines[i..=end].join(" ");
        let block = &lines[start..=end];
        start = end + 1;
        i = end + 1;
        if let Some(payload) = block_payload(block, &price_text) {
            blocks.push(payload);
            if blocks.len() >= MAX_BLOCKS {
                break;
            }
        }
    }
    blocks
}

fn block_payload(block: &[String], price_line: &str) -> Option<Value> {
    let name_idx = block.iter().position(|l| looks_like_name(l))?;
    let mut payload = Map::new();
    payload.insert("name".into(), Value::String(block[name_idx].clone()));
    payload.insert("price".into(), Value::String(price_line.to_string()));

    if let Some(location) = block
        .get(name_idx + 1)
        .filter(|l| looks_like_name(l) && l.as_str() != price_line)
    {
        payload.insert("location".into(), Value::String(location.clone()));
    }
    if let Some(rating) = block.iter().find(|l| rating_line_re().is_match(l)) {
        payload.insert("rating".into(), Value::String(rating.clone()));
    }
    if let Some(availability) = block.iter().find(|l| classify_availability(l).is_some()) {
        payload.insert("availability".into(), Value::String(availability.clone()));
    }
    Some(Value::Object(payload))
}

pub struct HeuristicText;

#[async_trait]
impl ExtractionStrategy for HeuristicText {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Heuristic
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> HarvestResult<StrategyOutcome> {
        let html = match ctx.binding.read_dom_snapshot(&ctx.container).await? {
            Some(html) => html,
            None => match ctx.binding.read_dom_snapshot("body").await? {
                Some(html) => html,
                None => {
                    return Ok(StrategyOutcome::NotApplicable("page has no body".into()));
                }
            },
        };

        let lines: Vec<String> = block_text(&html)
            .lines()
            .map(collapse_whitespace)
            .filter(|l| !l.is_empty())
            .collect();
        let blocks = segment_blocks(&lines);
        if blocks.is_empty() {
            return Ok(StrategyOutcome::NotApplicable(format!(
                "no price-anchored blocks in {} lines of text",
                lines.len()
            )));
        }
        Ok(StrategyOutcome::Candidates(
            blocks
                .into_iter()
                .map(|b| RawCandidate::new(StrategyKind::Heuristic, b))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_price;

    const LISTING: &str = r#"<div id="results">
      <div><span>Sponsored</span><h2>Hotel Beispiel</h2><p>Mitte, Berlin</p>
        <span>8,6</span><p>Only 2 rooms left</p><p>€ 120</p></div>
      <div><h2>Pension Sonne</h2><p>Kreuzberg, Berlin</p><p>€ 80 per night</p></div>
      <script>var price = "€ 999";</script>
    </div>"#;

    #[test]
    fn test_block_text_breaks_at_blocks() {
        let text = block_text("<div><p>a</p><span>b</span> <span>c</span><p>d</p></div>");
        let lines: Vec<String> = text.lines().map(collapse_whitespace).filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, vec!["a", "b c", "d"]);
    }

    #[test]
    fn test_segments_on_price_lines() {
        let lines: Vec<String> = block_text(LISTING)
            .lines()
            .map(collapse_whitespace)
            .filter(|l| !l.is_empty())
            .collect();
        let blocks = segment_blocks(&lines);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["name"], "Hotel Beispiel");
        assert_eq!(blocks[0]["location"], "Mitte, Berlin");
        assert_eq!(blocks[0]["rating"], "8,6");
        assert_eq!(blocks[0]["availability"], "Only 2 rooms left");
        assert_eq!(blocks[0]["price"], "€ 120");
        assert_eq!(blocks[1]["name"], "Pension Sonne");
        assert_eq!(blocks[1]["price"], "€ 80 per night");
    }

    #[test]
    fn test_adjacent_prices_stay_in_one_block() {
        let html = r#"<div><h2>Hotel Alpha</h2><p>Mitte, Berlin</p><p><s>€ 200</s></p><p>€ 150</p></div>
            <div><h2>Hotel Beta</h2><p>€ 90</p></div>"#;
        let lines: Vec<String> = block_text(html)
            .lines()
            .map(collapse_whitespace)
            .filter(|l| !l.is_empty())
            .collect();
        let blocks = segment_blocks(&lines);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["price"], "€ 200 € 150");
        assert_eq!(blocks[1]["name"], "Hotel Beta");

        let price = normalize_price(blocks[0]["price"].as_str().unwrap());
        assert!(price.ambiguous);
        assert_eq!(price.amount_minor_units, None);
    }

    #[test]
    fn test_no_prices_no_blocks() {
        let lines = vec!["About us".to_string(), "Contact".to_string()];
        assert!(segment_blocks(&lines).is_empty());
    }
}

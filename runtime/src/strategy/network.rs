//! Network-capture strategy: read listings out of JSON responses the page
//! fetched on its own while we waited for it to settle.

use super::shape::{match_listing_collection, ShapeMatch};
use super::{ExtractionStrategy, StrategyContext, StrategyOutcome};
use crate::binding::{CaptureFilter, CapturedResponse};
use crate::config::CaptureConfig;
use crate::error::HarvestResult;
use crate::types::{RawCandidate, StrategyKind};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// URL fragments that suggest a response carries results.
const RESULT_URL_TOKENS: &[&str] = &[
    "search",
    "results",
    "hotels",
    "listings",
    "properties",
    "graphql",
    "availability",
    "offers",
    "rates",
    "explore",
];

/// URL fragments of requests that never carry results.
const EXCLUDED_URL_TOKENS: &[&str] = &[
    "analytics",
    "tracking",
    "telemetry",
    "beacon",
    "metrics",
    "/log",
    "consent",
    ".js",
    ".css",
    ".png",
    ".jpg",
    ".webp",
    ".svg",
    ".woff",
];

const JSON_CONTENT_TYPES: &[&str] = &["json", "javascript"];

/// Prefixes servers put in front of JSON to defeat script inclusion.
const XSSI_PREFIXES: &[&str] = &[")]}'", "while(1);", "for(;;);"];

/// The capture filter used for one pass.
pub fn result_capture_filter(config: &CaptureConfig) -> CaptureFilter {
    CaptureFilter {
        url_tokens: RESULT_URL_TOKENS.iter().map(|s| s.to_string()).collect(),
        content_types: JSON_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
        exclude_tokens: EXCLUDED_URL_TOKENS.iter().map(|s| s.to_string()).collect(),
        max_body_bytes: config.max_body_bytes,
        max_responses: config.max_responses,
    }
}

/// Parse a body as JSON, tolerating XSSI prefixes and newline-delimited JSON.
pub fn parse_body(body: &str) -> Result<Vec<Value>, String> {
    let mut text = body.trim_start_matches('\u{feff}').trim();
    for prefix in XSSI_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start();
        }
    }
    if text.is_empty() {
        return Err("empty body".into());
    }

    match serde_json::from_str::<Value>(text) {
        Ok(v) => Ok(vec![v]),
        Err(whole_err) => {
            let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            if lines.len() < 2 {
                return Err(whole_err.to_string());
            }
            lines
                .into_iter()
                .map(|l| serde_json::from_str::<Value>(l).map_err(|e| e.to_string()))
                .collect()
        }
    }
}

pub struct NetworkCapture;

impl NetworkCapture {
    fn candidates_from(&self, response: &CapturedResponse, ctx: &StrategyContext<'_>) -> Vec<Value> {
        if !(200..300).contains(&response.status) {
            return Vec::new();
        }
        let documents = match parse_body(&response.body) {
            Ok(docs) => docs,
            Err(reason) => {
                ctx.note_malformed(&response.url, &reason);
                return Vec::new();
            }
        };
        let mut items = Vec::new();
        for doc in &documents {
            match match_listing_collection(doc) {
                ShapeMatch::Matched(found) => items.extend(found),
                ShapeMatch::Mismatch(why) => {
                    debug!(url = %response.url, why = %why, "captured body has no listings");
                }
            }
        }
        items
    }
}

#[async_trait]
impl ExtractionStrategy for NetworkCapture {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Network
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> HarvestResult<StrategyOutcome> {
        if ctx.captured.is_empty() {
            return Ok(StrategyOutcome::NotApplicable(
                "no result-like responses captured".into(),
            ));
        }

        let candidates: Vec<RawCandidate> = ctx
            .captured
            .iter()
            .flat_map(|r| self.candidates_from(r, ctx))
            .map(|payload| RawCandidate::new(StrategyKind::Network, payload))
            .collect();

        if candidates.is_empty() {
            return Ok(StrategyOutcome::NotApplicable(format!(
                "{} captured responses held no listing collection",
                ctx.captured.len()
            )));
        }
        Ok(StrategyOutcome::Candidates(candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::fixture::FixturePage;
    use crate::types::{Action, ExtractionRequest};

    fn response(url: &str, body: &str) -> CapturedResponse {
        CapturedResponse {
            url: url.into(),
            status: 200,
            content_type: "application/json".into(),
            body: body.into(),
        }
    }

    #[test]
    fn test_parse_body_variants() {
        assert_eq!(parse_body(")]}'\n{\"a\":1}").unwrap().len(), 1);
        assert_eq!(parse_body("{\"a\":1}\n{\"b\":2}\n").unwrap().len(), 2);
        assert!(parse_body("<html>").is_err());
        assert!(parse_body("   ").is_err());
    }

    #[test]
    fn test_filter_shape() {
        let f = result_capture_filter(&CaptureConfig::default());
        assert!(f.accepts("https://x.test/api/search?page=2", "application/json"));
        assert!(!f.accepts("https://x.test/static/search.js", "application/javascript"));
        assert!(!f.accepts("https://x.test/analytics/search", "application/json"));
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_counted_and_skipped() {
        let page = FixturePage::new("https://x.test/", "<body></body>");
        let request = ExtractionRequest::new("s", Action::Extract);
        let captured = vec![
            response("https://x.test/api/search", "{not json"),
            response(
                "https://x.test/api/search?p=1",
                r#"{"results":[{"name":"A","price":"€10"},{"name":"B","price":"€20"}]}"#,
            ),
        ];
        let ctx = StrategyContext::new(
            &page,
            &request,
            "https://x.test/".into(),
            "body".into(),
            captured,
            Default::default(),
        );
        let StrategyOutcome::Candidates(c) = NetworkCapture.attempt(&ctx).await.unwrap() else {
            panic!("expected candidates");
        };
        assert_eq!(c.len(), 2);
        assert_eq!(ctx.malformed_count(), 1);
    }

    #[tokio::test]
    async fn test_nothing_captured_is_not_applicable() {
        let page = FixturePage::new("https://x.test/", "<body></body>");
        let request = ExtractionRequest::new("s", Action::Extract);
        let ctx = StrategyContext::new(
            &page,
            &request,
            "https://x.test/".into(),
            "body".into(),
            Vec::new(),
            Default::default(),
        );
        assert!(matches!(
            NetworkCapture.attempt(&ctx).await.unwrap(),
            StrategyOutcome::NotApplicable(_)
        ));
    }
}

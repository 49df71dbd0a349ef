//! Hydration-state strategy: read the data a rendering framework left in page
//! globals and JSON script tags for its first paint.

use super::shape::{match_listing_collection, ShapeMatch};
use super::{ExtractionStrategy, StrategyContext, StrategyOutcome};
use crate::error::HarvestResult;
use crate::types::{RawCandidate, StrategyKind};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Marker left by the script when a script tag held unparseable JSON.
const MALFORMED_MARKER: &str = "__harvest_malformed__";

/// Collects known framework globals and `application/json` script blobs into
/// one object keyed by source. Values pass through a JSON round trip so only
/// plain data comes back.
pub const HYDRATION_SCRIPT: &str = r#"(() => {
  /* harvest:hydration */
  const out = {};
  const plain = (v) => { try { return JSON.parse(JSON.stringify(v)); } catch (e) { return null; } };
  for (const name of ["__NEXT_DATA__", "__NUXT__", "__INITIAL_STATE__", "__PRELOADED_STATE__",
                      "__APOLLO_STATE__", "__APP_STATE__"]) {
    if (typeof window[name] !== "undefined") { out[name] = plain(window[name]); }
  }
  document.querySelectorAll('script[type="application/json"]').forEach((s, i) => {
    const key = "script:" + (s.id || i);
    if (key === "script:__NEXT_DATA__" && out.__NEXT_DATA__) { return; }
    try { out[key] = JSON.parse(s.textContent || ""); } catch (e) { out[key] = "__harvest_malformed__"; }
  });
  return out;
})()"#;

pub struct HydrationState;

#[async_trait]
impl ExtractionStrategy for HydrationState {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hydration
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> HarvestResult<StrategyOutcome> {
        let state = ctx.binding.evaluate_in_page(HYDRATION_SCRIPT).await?;
        let Value::Object(sources) = state else {
            return Ok(StrategyOutcome::NotApplicable(
                "hydration script returned no object".into(),
            ));
        };
        if sources.is_empty() {
            return Ok(StrategyOutcome::NotApplicable(
                "no framework state on page".into(),
            ));
        }

        let mut candidates = Vec::new();
        for (source, value) in &sources {
            if value.as_str() == Some(MALFORMED_MARKER) {
                ctx.note_malformed(source, "script tag is not valid JSON");
                continue;
            }
            match match_listing_collection(value) {
                ShapeMatch::Matched(items) => {
                    debug!(source = %source, count = items.len(), "hydration listings found");
                    candidates.extend(
                        items
                            .into_iter()
                            .map(|item| RawCandidate::new(StrategyKind::Hydration, item)),
                    );
                }
                ShapeMatch::Mismatch(why) => debug!(source = %source, why = %why, "no listings in state"),
            }
        }

        if candidates.is_empty() {
            return Ok(StrategyOutcome::NotApplicable(format!(
                "{} state sources held no listing collection",
                sources.len()
            )));
        }
        Ok(StrategyOutcome::Candidates(candidates))
    }
}

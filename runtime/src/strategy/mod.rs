//! Extraction strategies.
//!
//! Each strategy turns what the page exposes into untyped candidates. They
//! share one interface and know nothing about each other; the chain in
//! [`crate::chain`] decides the order and when to move on.

pub mod heuristic_text;
pub mod hydration;
pub mod network;
pub mod selectors;
pub mod semantic_dom;
pub mod shape;

use crate::binding::{CapturedResponse, PageBinding};
use crate::error::HarvestResult;
use crate::types::{ExtractionRequest, RawCandidate, StrategyKind};
use async_trait::async_trait;
use selectors::SiteSelectors;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

pub use heuristic_text::HeuristicText;
pub use hydration::HydrationState;
pub use network::NetworkCapture;
pub use semantic_dom::SemanticDom;

/// What one attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Candidates(Vec<RawCandidate>),
    /// The page offers nothing this strategy can read; the reason is logged.
    NotApplicable(String),
}

/// Everything a strategy may look at during one pass.
pub struct StrategyContext<'a> {
    pub binding: &'a dyn PageBinding,
    pub request: &'a ExtractionRequest,
    pub page_url: String,
    /// Selector of the result container the pass waited on.
    pub container: String,
    /// Responses recorded during the stability wait.
    pub captured: Vec<CapturedResponse>,
    pub selectors: SiteSelectors,
    malformed: AtomicUsize,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        binding: &'a dyn PageBinding,
        request: &'a ExtractionRequest,
        page_url: String,
        container: String,
        captured: Vec<CapturedResponse>,
        selectors: SiteSelectors,
    ) -> Self {
        Self {
            binding,
            request,
            page_url,
            container,
            captured,
            selectors,
            malformed: AtomicUsize::new(0),
        }
    }

    /// Record an unparseable capture. It is skipped, never fatal.
    pub fn note_malformed(&self, source_hint: &str, reason: &str) {
        warn!(source = source_hint, reason, "skipping malformed capture");
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// One interchangeable extraction technique.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Produce candidates or report the page as unsuitable.
    ///
    /// Non-fatal errors are treated by the chain like `NotApplicable`.
    async fn attempt(&self, ctx: &StrategyContext<'_>) -> HarvestResult<StrategyOutcome>;
}

/// The four strategies in priority order.
pub fn default_strategies() -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(NetworkCapture),
        Box::new(HydrationState),
        Box::new(SemanticDom),
        Box::new(HeuristicText),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let kinds: Vec<StrategyKind> = default_strategies().iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                StrategyKind::Network,
                StrategyKind::Hydration,
                StrategyKind::Dom,
                StrategyKind::Heuristic
            ]
        );
    }
}

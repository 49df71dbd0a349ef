//! Strategy chain coordinator.
//!
//! One pass: resolve the result container, start capturing network traffic,
//! fire the load-more trigger if there is one, wait for the page to settle,
//! then try each strategy in priority order until one produces at least one
//! new record that passes the quality gate.

use crate::binding::PageBinding;
use crate::config::{CaptureConfig, HarvestConfig};
use crate::dedup::Deduplicator;
use crate::error::{HarvestError, HarvestResult};
use crate::gate::QualityGate;
use crate::normalize::RecordNormalizer;
use crate::stability::{StabilityDetector, StabilityReport};
use crate::strategy::network::result_capture_filter;
use crate::strategy::selectors::{SelectorPack, SiteSelectors};
use crate::strategy::{default_strategies, ExtractionStrategy, StrategyContext, StrategyOutcome};
use crate::types::{ExtractionRequest, NormalizedRecord, RejectionReason, StrategyKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Container used when no selector matches.
const FALLBACK_CONTAINER: &str = "body";

/// How one strategy fared during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Accepted,
    NotApplicable,
    GatedOut,
    /// Every gated record was already in the session.
    AlreadySeen,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptLog {
    pub strategy: StrategyKind,
    pub status: AttemptStatus,
    pub candidates: usize,
    pub accepted: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Load-more action fired inside a pass, after capture is armed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageTrigger {
    Click(String),
    Scroll(String),
}

impl PageTrigger {
    pub fn action(&self) -> &'static str {
        match self {
            PageTrigger::Click(_) => "click",
            PageTrigger::Scroll(_) => "scroll",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            PageTrigger::Click(t) | PageTrigger::Scroll(t) => t,
        }
    }

    async fn fire(&self, binding: &dyn PageBinding) -> HarvestResult<()> {
        match self {
            PageTrigger::Click(selector) => binding.click_element(selector).await,
            PageTrigger::Scroll(target) => binding.scroll_container(target).await,
        }
    }
}

/// Per-pass inputs beyond the request itself.
#[derive(Default)]
pub struct PassPlan<'a> {
    pub page_index: u32,
    /// Upper bound on the stability wait.
    pub budget: Option<Duration>,
    pub trigger: Option<PageTrigger>,
    /// Records the session already holds. A strategy that yields only these
    /// does not end the chain.
    pub seen: Option<&'a Deduplicator>,
}

impl PassPlan<'_> {
    fn is_known(&self, record: &NormalizedRecord) -> bool {
        self.seen.is_some_and(|d| d.is_duplicate(record))
    }
}

/// Result of one chain pass over the current page.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub strategy_used: Option<StrategyKind>,
    /// Gated records in page order, not yet deduplicated.
    pub records: Vec<NormalizedRecord>,
    pub rejections: BTreeMap<RejectionReason, usize>,
    pub attempts: Vec<AttemptLog>,
    pub stability_timed_out: bool,
    pub stability: Option<StabilityReport>,
    pub page_url: String,
    pub container: String,
    /// Non-fatal problems worth reporting to the caller.
    pub notes: Vec<String>,
}

impl ChainOutcome {
    pub fn rejected(&mut self, reason: RejectionReason, count: usize) {
        if count > 0 {
            *self.rejections.entry(reason).or_default() += count;
        }
    }
}

pub struct StrategyChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    detector: StabilityDetector,
    normalizer: RecordNormalizer,
    gate: QualityGate,
    capture: CaptureConfig,
    pack: SelectorPack,
}

impl StrategyChain {
    pub fn new(config: &HarvestConfig) -> Self {
        Self::with_strategies(config, default_strategies())
    }

    /// A chain over a custom strategy list, tried in the given order.
    pub fn with_strategies(config: &HarvestConfig, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self {
            strategies,
            detector: StabilityDetector::new(config.stability.clone()),
            normalizer: RecordNormalizer::new(config.normalize.media_width_ceiling),
            gate: QualityGate::new(config.gate.clone()),
            capture: config.capture.clone(),
            pack: SelectorPack::embedded(),
        }
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Run one pass. Only fatal binding errors are returned as `Err`.
    pub async fn run(
        &self,
        binding: &dyn PageBinding,
        request: &ExtractionRequest,
        plan: &PassPlan<'_>,
        cancel: &CancellationToken,
    ) -> HarvestResult<ChainOutcome> {
        let page_index = plan.page_index;
        let page_url = binding.page_url().await?;
        let selectors = self.pack.for_hint(request.page_hint.as_deref());
        let container = self.resolve_container(binding, request, &selectors).await?;
        info!(url = %page_url, container = %container, page_index, "extraction pass started");

        let mut outcome = ChainOutcome {
            strategy_used: None,
            records: Vec::new(),
            rejections: BTreeMap::new(),
            attempts: Vec::new(),
            stability_timed_out: false,
            stability: None,
            page_url: page_url.clone(),
            container: container.clone(),
            notes: Vec::new(),
        };

        if let Err(e) = binding
            .start_network_capture(result_capture_filter(&self.capture))
            .await
        {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "network capture unavailable for this pass");
        }

        if let Some(trigger) = &plan.trigger {
            match trigger.fire(binding).await {
                Ok(()) => info!(action = trigger.action(), target = %trigger.target(), "load-more triggered"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(action = trigger.action(), error = %e, "load-more trigger failed");
                    outcome
                        .notes
                        .push(format!("{} on {} failed: {e}", trigger.action(), trigger.target()));
                }
            }
        }

        match self.detector.until_stable(binding, &container, plan.budget, cancel).await {
            Ok(report) => outcome.stability = Some(report),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "proceeding on an unsettled page");
                outcome.stability_timed_out = true;
            }
        }

        let captured = match binding.stop_network_capture().await {
            Ok(captured) => captured,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "could not collect captured responses");
                Vec::new()
            }
        };
        debug!(captured = captured.len(), "network capture closed");

        let ctx = StrategyContext::new(binding, request, page_url, container, captured, selectors);
        let mut stale: Option<(StrategyKind, Vec<NormalizedRecord>)> = None;
        for strategy in &self.strategies {
            let kind = strategy.kind();
            let log = match strategy.attempt(&ctx).await {
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(strategy = kind.as_str(), error = %e, "strategy failed");
                    AttemptLog {
                        strategy: kind,
                        status: AttemptStatus::Failed,
                        candidates: 0,
                        accepted: 0,
                        detail: Some(e.to_string()),
                    }
                }
                Ok(StrategyOutcome::NotApplicable(why)) => {
                    debug!(strategy = kind.as_str(), why = %why, "strategy not applicable");
                    AttemptLog {
                        strategy: kind,
                        status: AttemptStatus::NotApplicable,
                        candidates: 0,
                        accepted: 0,
                        detail: Some(why),
                    }
                }
                Ok(StrategyOutcome::Candidates(candidates)) => {
                    let total = candidates.len();
                    let (passed, failed): (Vec<NormalizedRecord>, Vec<NormalizedRecord>) = candidates
                        .iter()
                        .map(|c| self.normalizer.normalize(c, &ctx.page_url, page_index))
                        .partition(|r| self.gate.passes(r));
                    outcome.rejected(RejectionReason::MissingCoreFields, failed.len());
                    debug!(
                        strategy = kind.as_str(),
                        candidates = total,
                        passed = passed.len(),
                        "strategy attempted"
                    );
                    let accepted = passed.len();
                    let fresh = passed.iter().filter(|r| !plan.is_known(r)).count();
                    let (status, detail) = if fresh > 0 {
                        outcome.records = passed;
                        outcome.strategy_used = Some(kind);
                        (AttemptStatus::Accepted, None)
                    } else if accepted > 0 {
                        if stale.is_none() {
                            stale = Some((kind, passed));
                        }
                        (
                            AttemptStatus::AlreadySeen,
                            Some(format!("all {accepted} records already collected")),
                        )
                    } else {
                        (AttemptStatus::GatedOut, None)
                    };
                    AttemptLog {
                        strategy: kind,
                        status,
                        candidates: total,
                        accepted,
                        detail,
                    }
                }
            };
            outcome.attempts.push(log);
            if outcome.strategy_used.is_some() {
                break;
            }
        }

        if outcome.strategy_used.is_none() {
            if let Some((kind, records)) = stale {
                debug!(strategy = kind.as_str(), "page holds nothing new");
                outcome.strategy_used = Some(kind);
                outcome.records = records;
            }
        }

        outcome.rejected(RejectionReason::MalformedCapture, ctx.malformed_count());
        match outcome.strategy_used {
            Some(kind) => info!(
                strategy = kind.as_str(),
                records = outcome.records.len(),
                uncertain = outcome.stability_timed_out,
                "extraction pass finished"
            ),
            None => info!(error = %HarvestError::NoStrategySucceeded, "extraction pass finished empty"),
        }
        Ok(outcome)
    }

    async fn resolve_container(
        &self,
        binding: &dyn PageBinding,
        request: &ExtractionRequest,
        selectors: &SiteSelectors,
    ) -> HarvestResult<String> {
        if let Some(selector) = request.dom_selector_override.as_deref() {
            return Ok(selector.to_string());
        }
        for selector in &selectors.container {
            match binding.read_dom_snapshot(selector).await {
                Ok(Some(_)) => return Ok(selector.clone()),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(selector = %selector, error = %e, "container lookup failed"),
            }
        }
        Ok(FALLBACK_CONTAINER.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::fixture::{FixturePage, FixtureStage};
    use crate::binding::{CapturedResponse, NetworkActivity};
    use crate::types::Action;

    fn request() -> ExtractionRequest {
        ExtractionRequest::new("s1", Action::Extract)
    }

    async fn run(page: &FixturePage, request: &ExtractionRequest) -> ChainOutcome {
        StrategyChain::new(&HarvestConfig::default())
            .run(page, request, &PassPlan::default(), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_wins_over_dom() {
        let page = FixturePage::new(
            "https://x.test/search",
            r#"<body><ul><li itemscope itemtype="https://schema.org/Hotel">
                 <span itemprop="name">Dom Hotel</span><span itemprop="price">€ 1</span></li></ul></body>"#,
        )
        .with_responses(vec![CapturedResponse {
            url: "https://x.test/api/search".into(),
            status: 200,
            content_type: "application/json".into(),
            body: r#"{"results":[{"name":"Net Hotel","price":"€ 99"}]}"#.into(),
        }]);
        let outcome = run(&page, &request()).await;
        assert_eq!(outcome.strategy_used, Some(StrategyKind::Network));
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].name.as_deref(), Some("Net Hotel"));
        assert_eq!(outcome.attempts.len(), 1);
        assert!(!page.is_capturing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gated_out_strategy_falls_through() {
        let page = FixturePage::new(
            "https://x.test/search",
            r#"<body><div id="results"><div><h2>Hotel Beispiel</h2><p>€ 120</p></div></div></body>"#,
        )
        .on_evaluate(
            "harvest:hydration",
            serde_json::json!({"__NEXT_DATA__": {"results": [{"name": "", "price": "?"}]}}),
        );
        let outcome = run(&page, &request().with_selector("#results")).await;
        assert_eq!(outcome.strategy_used, Some(StrategyKind::Heuristic));
        let statuses: Vec<AttemptStatus> = outcome.attempts.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![
                AttemptStatus::NotApplicable,
                AttemptStatus::GatedOut,
                AttemptStatus::NotApplicable,
                AttemptStatus::Accepted
            ]
        );
        assert_eq!(outcome.rejections.get(&RejectionReason::MissingCoreFields), Some(&1));
        assert_eq!(outcome.container, "#results");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_applies_is_empty_not_error() {
        let page = FixturePage::new("https://x.test/", "<body><p>Welcome</p></body>");
        let outcome = run(&page, &request()).await;
        assert_eq!(outcome.strategy_used, None);
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.attempts.len(), 4);
        assert_eq!(outcome.container, "body");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsettled_page_is_flagged_uncertain() {
        let busy = NetworkActivity {
            in_flight: 1,
            idle_for: Duration::ZERO,
        };
        let page = FixturePage::new(
            "https://x.test/",
            "<body><div><h2>Hotel Beispiel</h2><p>€ 120</p></div></body>",
        )
        .with_network(std::iter::repeat(busy).take(64));
        let outcome = run(&page, &request()).await;
        assert!(outcome.stability_timed_out);
        assert_eq!(outcome.strategy_used, Some(StrategyKind::Heuristic));
    }

    #[tokio::test]
    async fn test_detached_binding_is_fatal() {
        let err = StrategyChain::new(&HarvestConfig::default())
            .run(
                &FixturePage::unavailable(),
                &request(),
                &PassPlan::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_traffic_is_captured() {
        let page = FixturePage::new("https://x.test/search", "<body><button id='more'>More</button></body>")
            .then_stage(FixtureStage {
                html: "<body><p>loading</p></body>".into(),
                responses: vec![CapturedResponse {
                    url: "https://x.test/api/search?page=2".into(),
                    status: 200,
                    content_type: "application/json".into(),
                    body: r#"{"results":[{"name":"Late Hotel","price":"€ 70"}]}"#.into(),
                }],
            });
        let plan = PassPlan {
            page_index: 1,
            trigger: Some(PageTrigger::Click("#more".into())),
            ..Default::default()
        };
        let outcome = StrategyChain::new(&HarvestConfig::default())
            .run(&page, &request(), &plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.clicks(), vec!["#more".to_string()]);
        assert_eq!(outcome.strategy_used, Some(StrategyKind::Network));
        assert_eq!(outcome.records[0].name.as_deref(), Some("Late Hotel"));
        assert_eq!(outcome.records[0].provenance.page_index, 1);
        assert!(outcome.notes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trigger_becomes_note() {
        let page = FixturePage::new("https://x.test/", "<body><div><h2>Hotel Beispiel</h2><p>€ 120</p></div></body>");
        let plan = PassPlan {
            trigger: Some(PageTrigger::Click("#absent".into())),
            ..Default::default()
        };
        let outcome = StrategyChain::new(&HarvestConfig::default())
            .run(&page, &request(), &plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.notes.len(), 1);
        assert!(outcome.notes[0].starts_with("click on #absent failed"));
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_seen_strategy_falls_through() {
        let cards = |names: &[&str]| -> String {
            let items: String = names
                .iter()
                .map(|n| format!(r#"<li itemscope itemtype="https://schema.org/Hotel"><h3 itemprop="name">{n}</h3><span itemprop="price">€ 100</span></li>"#))
                .collect();
            format!(r#"<body><ul id="results">{items}</ul></body>"#)
        };
        let state = serde_json::json!({"__NEXT_DATA__": {"results": [
            {"name": "Alpha Inn", "price": "€ 100"},
            {"name": "Beta Lodge", "price": "€ 100"}
        ]}});
        let chain = StrategyChain::new(&HarvestConfig::default());
        let cancel = CancellationToken::new();

        let first_page = FixturePage::new("https://x.test/", &cards(&["Alpha Inn", "Beta Lodge"]))
            .on_evaluate("harvest:hydration", state.clone());
        let first = chain.run(&first_page, &request(), &PassPlan::default(), &cancel).await.unwrap();
        assert_eq!(first.strategy_used, Some(StrategyKind::Hydration));
        let mut seen = Deduplicator::new(0.92);
        for record in &first.records {
            seen.admit(record);
        }

        let grown = FixturePage::new(
            "https://x.test/",
            &cards(&["Alpha Inn", "Beta Lodge", "Gamma Hotel", "Delta House"]),
        )
        .on_evaluate("harvest:hydration", state);
        let plan = PassPlan {
            page_index: 1,
            seen: Some(&seen),
            ..Default::default()
        };
        let outcome = chain.run(&grown, &request(), &plan, &cancel).await.unwrap();
        assert_eq!(outcome.strategy_used, Some(StrategyKind::Dom));
        assert_eq!(outcome.records.len(), 4);
        let statuses: Vec<AttemptStatus> = outcome.attempts.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![AttemptStatus::NotApplicable, AttemptStatus::AlreadySeen, AttemptStatus::Accepted]
        );

        let unchanged = FixturePage::new("https://x.test/", &cards(&["Alpha Inn", "Beta Lodge"]));
        let outcome = chain.run(&unchanged, &request(), &plan, &cancel).await.unwrap();
        assert_eq!(outcome.strategy_used, Some(StrategyKind::Dom));
        assert_eq!(outcome.records.len(), 2);
    }
}

//! Request routing: one entry point from an [`ExtractionRequest`] to an
//! [`ExtractionResponse`].

use crate::binding::PageBinding;
use crate::config::HarvestConfig;
use crate::error::{HarvestError, HarvestResult};
use crate::package::{ExtractionResponse, ResultPackager};
use crate::session::{SessionAggregator, SessionStatus};
use crate::types::{Action, ExtractionRequest};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Harvester {
    aggregator: SessionAggregator,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(config: HarvestConfig) -> Self {
        Self::with_aggregator(SessionAggregator::new(&config))
    }

    pub fn with_aggregator(aggregator: SessionAggregator) -> Self {
        Self {
            aggregator,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts any in-progress stability wait when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.aggregator.status(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.aggregator.len()
    }

    /// Handle one request.
    ///
    /// Only fatal errors (an unreachable binding) come back as `Err`; every
    /// other failure is an `ok: false` response with diagnostics.
    pub async fn handle(
        &mut self,
        binding: &dyn PageBinding,
        request: &ExtractionRequest,
    ) -> HarvestResult<ExtractionResponse> {
        let started = Instant::now();
        let cancel = self.cancel.child_token();
        info!(session = %request.session_id, action = ?request.action, "request received");
        let expired = self.aggregator.expire_idle();
        if expired > 0 {
            info!(expired, "idle sessions dropped");
        }

        let result = match request.action {
            Action::Extract => match self.aggregator.extract(binding, request, &cancel).await {
                Ok(pass) => self.package_pass(pass, started),
                Err(e) => Err(e),
            },
            Action::Continue => match self.aggregator.continue_session(binding, request, &cancel).await {
                Ok(pass) => self.package_pass(pass, started),
                Err(e) => Err(e),
            },
            Action::EndSession => match self.aggregator.end_session(&request.session_id) {
                Some(session) => ResultPackager::ended(session, elapsed_ms(started)),
                None if self.aggregator.status(&request.session_id).is_some() => {
                    Err(HarvestError::SessionComplete(request.session_id.clone()))
                }
                None => Err(HarvestError::UnknownSession(request.session_id.clone())),
            },
        };

        match result {
            Ok(response) => Ok(response),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(session = %request.session_id, code = e.code(), error = %e, "request failed");
                let state = self.aggregator.phase(&request.session_id);
                Ok(ResultPackager::failure(
                    &request.session_id,
                    &e,
                    state,
                    elapsed_ms(started),
                ))
            }
        }
    }

    fn package_pass(
        &self,
        mut pass: crate::session::PassResult,
        started: Instant,
    ) -> HarvestResult<ExtractionResponse> {
        let records = match pass.final_records.take() {
            Some(records) => records,
            None => self
                .aggregator
                .session(&pass.session_id)
                .map(|s| s.records.clone())
                .unwrap_or_default(),
        };
        ResultPackager::from_pass(pass, &records, elapsed_ms(started))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::fixture::FixturePage;
    use crate::session::SessionPhase;
    use crate::types::StrategyUsed;

    const PAGE: &str = r#"<body><div id="results">
        <div><h2>Hotel Beispiel</h2><p>Hauptstraße 1, Berlin</p><p>ab €150 pro Nacht zzgl. Steuern</p></div>
        <div><h2>Hotel  Beispiel </h2><p>Hauptstraße 1, Berlin</p><p>€ 150</p></div>
    </div></body>"#;

    #[tokio::test(start_paused = true)]
    async fn test_extract_then_end() {
        let page = FixturePage::new("https://x.test/search", PAGE);
        let mut harvester = Harvester::new(HarvestConfig::default());

        let response = harvester
            .handle(&page, &ExtractionRequest::new("s", Action::Extract))
            .await
            .unwrap();
        assert!(response.ok);
        assert_eq!(response.strategy_used, StrategyUsed::Heuristic);
        assert_eq!(response.record_count, 1);
        assert_eq!(response.diagnostics.rejection_reasons.get("duplicate"), Some(&1));
        let price = response.records[0].price.clone().unwrap();
        assert_eq!(price.amount_minor_units, Some(15000));
        assert_eq!(price.currency.as_deref(), Some("EUR"));
        assert_eq!(harvester.status("s").unwrap().state, SessionPhase::AwaitingMore);

        let ended = harvester
            .handle(&page, &ExtractionRequest::new("s", Action::EndSession))
            .await
            .unwrap();
        assert_eq!(ended.record_count, 1);
        assert_eq!(ended.full_records().unwrap(), response.records);
        assert!(harvester.status("s").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_session_answers_from_tombstone() {
        let mut config = HarvestConfig::default();
        config.session.max_records = 1;
        let page = FixturePage::new("https://x.test/search", PAGE);
        let mut harvester = Harvester::new(config);

        let response = harvester
            .handle(&page, &ExtractionRequest::new("s", Action::Extract))
            .await
            .unwrap();
        assert_eq!(response.session_state, Some(SessionPhase::Complete));
        assert_eq!(response.full_records().unwrap(), response.records);
        assert_eq!(harvester.session_count(), 0);
        assert_eq!(harvester.status("s").unwrap().state, SessionPhase::Complete);

        let ended = harvester
            .handle(&page, &ExtractionRequest::new("s", Action::EndSession))
            .await
            .unwrap();
        assert!(!ended.ok);
        assert_eq!(ended.session_state, Some(SessionPhase::Complete));
        assert_eq!(ended.diagnostics.error.unwrap().code, "session_complete");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_fatal_errors_become_responses() {
        let page = FixturePage::new("https://x.test/", PAGE);
        let mut harvester = Harvester::new(HarvestConfig::default());
        let response = harvester
            .handle(&page, &ExtractionRequest::new("ghost", Action::Continue))
            .await
            .unwrap();
        assert!(!response.ok);
        assert_eq!(response.diagnostics.error.unwrap().code, "unknown_session");
    }

    #[tokio::test]
    async fn test_binding_unavailable_propagates() {
        let mut harvester = Harvester::new(HarvestConfig::default());
        let err = harvester
            .handle(&FixturePage::unavailable(), &ExtractionRequest::new("s", Action::Extract))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "binding_unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_still_extracts() {
        let page = FixturePage::new("https://x.test/", PAGE);
        let mut harvester = Harvester::new(HarvestConfig::default());
        harvester.cancellation().cancel();
        let response = harvester
            .handle(&page, &ExtractionRequest::new("s", Action::Extract))
            .await
            .unwrap();
        assert!(response.ok);
        assert!(response.diagnostics.stability_timed_out);
        assert_eq!(response.record_count, 1);
    }
}

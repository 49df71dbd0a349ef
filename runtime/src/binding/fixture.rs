//! Scriptable in-memory binding over saved HTML.
//!
//! Used by tests and for offline runs against a page saved to disk. The page
//! is static unless mutation counts, network activity or follow-up stages are
//! scripted in.

use super::{CaptureFilter, CapturedResponse, NetworkActivity, PageBinding};
use crate::error::{HarvestError, HarvestResult};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Duration of one simulated animation frame.
pub const FRAME: Duration = Duration::from_millis(16);

/// What the page turns into after a load-more click or scroll.
#[derive(Debug, Clone, Default)]
pub struct FixtureStage {
    pub html: String,
    /// Fetched by the trigger; only recorded when capture is already running.
    pub responses: Vec<CapturedResponse>,
}

#[derive(Default)]
struct FixtureState {
    url: String,
    html: String,
    responses: Vec<CapturedResponse>,
    evaluations: Vec<(String, Value)>,
    mutations: VecDeque<u64>,
    network: VecDeque<NetworkActivity>,
    armed: HashSet<String>,
    capture: Option<CaptureFilter>,
    stages: VecDeque<FixtureStage>,
    clicks: Vec<String>,
    scrolls: Vec<String>,
    unavailable: bool,
}

/// A fake page driven entirely from memory.
pub struct FixturePage {
    state: Mutex<FixtureState>,
}

impl FixturePage {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                url: url.to_string(),
                html: html.to_string(),
                ..Default::default()
            }),
        }
    }

    /// A page whose binding is unreachable.
    pub fn unavailable() -> Self {
        let page = Self::new("about:blank", "");
        page.lock().unavailable = true;
        page
    }

    /// Responses the page "fetches" while capture is running.
    pub fn with_responses(self, responses: Vec<CapturedResponse>) -> Self {
        self.lock().responses = responses;
        self
    }

    /// Answer any evaluated expression containing `needle` with `value`.
    pub fn on_evaluate(self, needle: &str, value: Value) -> Self {
        self.lock().evaluations.push((needle.to_string(), value));
        self
    }

    /// Mutation counts returned by successive observations after arming.
    pub fn with_mutations(self, counts: impl IntoIterator<Item = u64>) -> Self {
        self.lock().mutations.extend(counts);
        self
    }

    /// Network readings returned by successive activity polls.
    pub fn with_network(self, readings: impl IntoIterator<Item = NetworkActivity>) -> Self {
        self.lock().network.extend(readings);
        self
    }

    /// Page content revealed by the next click or scroll.
    pub fn then_stage(self, stage: FixtureStage) -> Self {
        self.lock().stages.push_back(stage);
        self
    }

    pub fn clicks(&self) -> Vec<String> {
        self.lock().clicks.clone()
    }

    pub fn scrolls(&self) -> Vec<String> {
        self.lock().scrolls.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().capture.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn checked(&self) -> HarvestResult<std::sync::MutexGuard<'_, FixtureState>> {
        let state = self.lock();
        if state.unavailable {
            return Err(HarvestError::BindingUnavailable(
                "fixture page is detached".into(),
            ));
        }
        Ok(state)
    }

    fn advance(state: &mut FixtureState) {
        if let Some(stage) = state.stages.pop_front() {
            state.html = stage.html;
            state.responses = if state.capture.is_some() {
                stage.responses
            } else {
                Vec::new()
            };
        }
    }
}

fn select_outer_html(html: &str, selector: &str) -> HarvestResult<Option<String>> {
    let sel = Selector::parse(selector)
        .map_err(|e| HarvestError::InvalidRequest(format!("bad selector {selector:?}: {e:?}")))?;
    let document = Html::parse_document(html);
    let found = document.select(&sel).next().map(|el| el.html());
    Ok(found)
}

#[async_trait]
impl PageBinding for FixturePage {
    async fn page_url(&self) -> HarvestResult<String> {
        Ok(self.checked()?.url.clone())
    }

    async fn read_dom_snapshot(&self, selector: &str) -> HarvestResult<Option<String>> {
        let html = self.checked()?.html.clone();
        select_outer_html(&html, selector)
    }

    async fn observe_mutations(&self, container: &str) -> HarvestResult<u64> {
        let mut state = self.checked()?;
        if state.armed.insert(container.to_string()) {
            return Ok(0);
        }
        Ok(state.mutations.pop_front().unwrap_or(0))
    }

    async fn start_network_capture(&self, filter: CaptureFilter) -> HarvestResult<()> {
        self.checked()?.capture = Some(filter);
        Ok(())
    }

    async fn stop_network_capture(&self) -> HarvestResult<Vec<CapturedResponse>> {
        let mut state = self.checked()?;
        let Some(filter) = state.capture.take() else {
            return Ok(Vec::new());
        };
        let captured = state
            .responses
            .iter()
            .filter(|r| filter.accepts(&r.url, &r.content_type))
            .filter(|r| r.body.len() <= filter.max_body_bytes)
            .take(filter.max_responses)
            .cloned()
            .collect();
        Ok(captured)
    }

    async fn network_activity(&self) -> HarvestResult<NetworkActivity> {
        let mut state = self.checked()?;
        Ok(state
            .network
            .pop_front()
            .unwrap_or_else(|| NetworkActivity::idle(Duration::from_secs(3600))))
    }

    async fn evaluate_in_page(&self, expr: &str) -> HarvestResult<Value> {
        let state = self.checked()?;
        Ok(state
            .evaluations
            .iter()
            .find(|(needle, _)| expr.contains(needle.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null))
    }

    async fn scroll_container(&self, target: &str) -> HarvestResult<()> {
        let mut state = self.checked()?;
        state.scrolls.push(target.to_string());
        Self::advance(&mut state);
        Ok(())
    }

    async fn click_element(&self, selector: &str) -> HarvestResult<()> {
        let mut state = self.checked()?;
        if select_outer_html(&state.html, selector)?.is_none() {
            return Err(HarvestError::InvalidRequest(format!(
                "no element matches {selector}"
            )));
        }
        state.clicks.push(selector.to_string());
        Self::advance(&mut state);
        Ok(())
    }

    async fn animation_frame(&self) -> HarvestResult<()> {
        self.checked()?;
        tokio::time::sleep(FRAME).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_selects_first_match() {
        let page = FixturePage::new(
            "https://x.test/",
            "<html><body><ul id='r'><li>a</li></ul></body></html>",
        );
        let html = page.read_dom_snapshot("#r").await.unwrap().unwrap();
        assert!(html.starts_with("<ul"));
        assert!(page.read_dom_snapshot("#missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_observation_arms() {
        let page = FixturePage::new("https://x.test/", "<body></body>").with_mutations([4]);
        assert_eq!(page.observe_mutations("body").await.unwrap(), 0);
        assert_eq!(page.observe_mutations("body").await.unwrap(), 4);
        assert_eq!(page.observe_mutations("body").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_click_advances_stage() {
        let page = FixturePage::new("https://x.test/", "<body><button id='more'></button></body>")
            .then_stage(FixtureStage {
                html: "<body><p id='new'></p></body>".into(),
                responses: Vec::new(),
            });
        page.click_element("#more").await.unwrap();
        assert!(page.read_dom_snapshot("#new").await.unwrap().is_some());
        assert_eq!(page.clicks(), vec!["#more".to_string()]);
        assert!(page.click_element("#more").await.is_err());
    }

    #[tokio::test]
    async fn test_stage_traffic_needs_running_capture() {
        let response = CapturedResponse {
            url: "https://x.test/api/search".into(),
            status: 200,
            content_type: "application/json".into(),
            body: "{}".into(),
        };
        let filter = CaptureFilter {
            url_tokens: vec!["search".into()],
            content_types: vec!["json".into()],
            exclude_tokens: Vec::new(),
            max_body_bytes: 1024,
            max_responses: 10,
        };
        let stage = || FixtureStage {
            html: "<body></body>".into(),
            responses: vec![response.clone()],
        };

        let late = FixturePage::new("https://x.test/", "<body></body>").then_stage(stage());
        late.scroll_container("window").await.unwrap();
        late.start_network_capture(filter.clone()).await.unwrap();
        assert!(late.stop_network_capture().await.unwrap().is_empty());

        let armed = FixturePage::new("https://x.test/", "<body></body>").then_stage(stage());
        armed.start_network_capture(filter).await.unwrap();
        armed.scroll_container("window").await.unwrap();
        assert_eq!(armed.stop_network_capture().await.unwrap(), vec![response]);
    }
}

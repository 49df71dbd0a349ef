//! Browser binding abstraction.
//!
//! Defines the `PageBinding` trait the extraction core talks to. The binding
//! owns every browser-side capability (DOM reads, script evaluation, mutation
//! observation, passive network capture, scrolling and clicking). The core never
//! navigates; it only reads a page the operator already has open.

pub mod chromium;
pub mod fixture;

use crate::error::{HarvestError, HarvestResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Which responses the binding should record while capture is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureFilter {
    /// Lowercase substrings; a request URL matching any of them is relevant.
    pub url_tokens: Vec<String>,
    /// Lowercase content-type fragments whose bodies are worth keeping.
    pub content_types: Vec<String>,
    /// URLs containing any of these are never relevant (assets, telemetry).
    pub exclude_tokens: Vec<String>,
    pub max_body_bytes: usize,
    pub max_responses: usize,
}

impl CaptureFilter {
    pub fn matches_url(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        if self.exclude_tokens.iter().any(|t| lower.contains(t.as_str())) {
            return false;
        }
        self.url_tokens.iter().any(|t| lower.contains(t.as_str()))
    }

    pub fn matches_content_type(&self, content_type: &str) -> bool {
        let lower = content_type.to_lowercase();
        self.content_types.iter().any(|t| lower.contains(t.as_str()))
    }

    /// A response is kept when both its URL and its content type look relevant.
    pub fn accepts(&self, url: &str, content_type: &str) -> bool {
        self.matches_url(url) && self.matches_content_type(content_type)
    }
}

/// A response body recorded during the capture window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

/// Relevant in-flight network state as seen by the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkActivity {
    /// Result-relevant requests that have not finished yet.
    pub in_flight: usize,
    /// Time since the last relevant request started or finished.
    pub idle_for: Duration,
}

impl NetworkActivity {
    pub fn idle(idle_for: Duration) -> Self {
        Self {
            in_flight: 0,
            idle_for,
        }
    }
}

/// Capabilities the extraction core needs from a live page.
#[async_trait]
pub trait PageBinding: Send + Sync {
    /// URL of the page currently displayed.
    async fn page_url(&self) -> HarvestResult<String>;
    /// Outer HTML of the first element matching `selector`, if any.
    async fn read_dom_snapshot(&self, selector: &str) -> HarvestResult<Option<String>>;
    /// Mutations observed in `container` since the previous call.
    ///
    /// The first call for a container arms the observer and returns 0.
    async fn observe_mutations(&self, container: &str) -> HarvestResult<u64>;
    /// Begin passively recording responses that match `filter`.
    async fn start_network_capture(&self, filter: CaptureFilter) -> HarvestResult<()>;
    /// Stop recording and hand back what was captured.
    async fn stop_network_capture(&self) -> HarvestResult<Vec<CapturedResponse>>;
    /// In-flight relevant requests and time since last relevant activity.
    async fn network_activity(&self) -> HarvestResult<NetworkActivity>;
    /// Evaluate a script expression in the page and return its JSON value.
    async fn evaluate_in_page(&self, expr: &str) -> HarvestResult<Value>;
    /// Scroll `target` (a selector, or `window`) to its end.
    async fn scroll_container(&self, target: &str) -> HarvestResult<()>;
    /// Click the first element matching `selector`.
    async fn click_element(&self, selector: &str) -> HarvestResult<()>;
    /// Resolve after one animation-frame cycle.
    async fn animation_frame(&self) -> HarvestResult<()>;
}

/// A binding used when no browser is attached. Every call fails fatally.
pub struct NoopBinding;

#[async_trait]
impl PageBinding for NoopBinding {
    async fn page_url(&self) -> HarvestResult<String> {
        Err(unattached())
    }
    async fn read_dom_snapshot(&self, _selector: &str) -> HarvestResult<Option<String>> {
        Err(unattached())
    }
    async fn observe_mutations(&self, _container: &str) -> HarvestResult<u64> {
        Err(unattached())
    }
    async fn start_network_capture(&self, _filter: CaptureFilter) -> HarvestResult<()> {
        Err(unattached())
    }
    async fn stop_network_capture(&self) -> HarvestResult<Vec<CapturedResponse>> {
        Err(unattached())
    }
    async fn network_activity(&self) -> HarvestResult<NetworkActivity> {
        Err(unattached())
    }
    async fn evaluate_in_page(&self, _expr: &str) -> HarvestResult<Value> {
        Err(unattached())
    }
    async fn scroll_container(&self, _target: &str) -> HarvestResult<()> {
        Err(unattached())
    }
    async fn click_element(&self, _selector: &str) -> HarvestResult<()> {
        Err(unattached())
    }
    async fn animation_frame(&self) -> HarvestResult<()> {
        Err(unattached())
    }
}

fn unattached() -> HarvestError {
    HarvestError::BindingUnavailable("no browser attached".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> CaptureFilter {
        CaptureFilter {
            url_tokens: vec!["search".into(), "graphql".into()],
            content_types: vec!["json".into()],
            exclude_tokens: vec!["analytics".into()],
            max_body_bytes: 1024,
            max_responses: 4,
        }
    }

    #[test]
    fn test_filter_matches_url_and_type() {
        let f = filter();
        assert!(f.accepts("https://x.test/api/Search?q=1", "application/json; charset=utf-8"));
        assert!(!f.accepts("https://x.test/api/search", "text/html"));
        assert!(!f.accepts("https://x.test/static/app.js", "application/json"));
        assert!(!f.matches_url("https://analytics.x.test/search/beacon"));
    }

    #[tokio::test]
    async fn test_noop_binding_is_fatal() {
        let err = NoopBinding.page_url().await.unwrap_err();
        assert!(err.is_fatal());
    }
}

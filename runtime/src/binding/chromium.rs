//! Chromium binding over the DevTools protocol using chromiumoxide.
//!
//! Attaches to a browser the operator already runs with
//! `--remote-debugging-port`. It never launches a browser and never navigates.

use super::{CaptureFilter, CapturedResponse, NetworkActivity, PageBinding};
use crate::error::{HarvestError, HarvestResult};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Resolve a CDP endpoint to a websocket debugger URL.
///
/// Accepts `ws://…` as-is; `http://host:port` is resolved via `/json/version`.
pub async fn resolve_ws_endpoint(endpoint: &str) -> Result<String> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        bail!("unsupported CDP endpoint {endpoint:?} (expected ws:// or http://)");
    }

    let version_url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    let response = reqwest::get(&version_url)
        .await
        .with_context(|| format!("requesting {version_url}"))?;
    let json: Value = response
        .json()
        .await
        .context("parsing /json/version response")?;
    json["webSocketDebuggerUrl"]
        .as_str()
        .map(|s| s.to_string())
        .context("no webSocketDebuggerUrl in /json/version response")
}

/// Per-capture bookkeeping shared with the event task.
struct CaptureLedger {
    filter: Option<CaptureFilter>,
    in_flight: HashMap<String, String>,
    responses: HashMap<String, (String, u16, String)>,
    captured: Vec<CapturedResponse>,
    last_activity: Instant,
}

impl CaptureLedger {
    fn new() -> Self {
        Self {
            filter: None,
            in_flight: HashMap::new(),
            responses: HashMap::new(),
            captured: Vec::new(),
            last_activity: Instant::now(),
        }
    }
}

/// A page in an operator-driven Chromium, attached over CDP.
pub struct ChromiumBinding {
    _browser: Browser,
    page: Page,
    ledger: Arc<Mutex<CaptureLedger>>,
    capture_task: Mutex<Option<JoinHandle<()>>>,
    handler_task: JoinHandle<()>,
}

impl ChromiumBinding {
    /// Attach to a running browser and pick the page to read.
    ///
    /// `page_match` selects the first page whose URL contains it; otherwise the
    /// first page that is not an internal `about:`/`chrome:` page.
    pub async fn attach(endpoint: &str, page_match: Option<&str>) -> Result<Self> {
        let ws_url = resolve_ws_endpoint(endpoint).await?;
        let (mut browser, mut handler) = Browser::connect(ws_url.clone())
            .await
            .with_context(|| format!("connecting to {ws_url}"))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("cdp handler: {e}");
                }
            }
        });

        if let Err(e) = browser.fetch_targets().await {
            debug!("fetching targets: {e}");
        }

        let mut chosen = None;
        for _ in 0..10 {
            let pages = browser.pages().await.context("listing pages")?;
            for page in pages {
                let url = page.url().await.ok().flatten().unwrap_or_default();
                let wanted = match page_match {
                    Some(fragment) => url.contains(fragment),
                    None => !url.starts_with("about:") && !url.starts_with("chrome"),
                };
                if wanted {
                    info!("attached to page {url}");
                    chosen = Some(page);
                    break;
                }
            }
            if chosen.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let page = chosen.context("no matching page found in the attached browser")?;

        Ok(Self {
            _browser: browser,
            page,
            ledger: Arc::new(Mutex::new(CaptureLedger::new())),
            capture_task: Mutex::new(None),
            handler_task,
        })
    }

    async fn eval(&self, script: &str) -> HarvestResult<Value> {
        let result = self.page.evaluate(script).await.map_err(map_cdp)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, CaptureLedger> {
        self.ledger.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn abort_capture_task(&self) {
        let handle = self
            .capture_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for ChromiumBinding {
    fn drop(&mut self) {
        self.abort_capture_task();
        self.handler_task.abort();
    }
}

fn map_cdp(err: CdpError) -> HarvestError {
    match err {
        CdpError::JavascriptException(details) => {
            HarvestError::InvalidRequest(format!("script raised: {}", details.text))
        }
        other => HarvestError::BindingUnavailable(other.to_string()),
    }
}

/// JSON-quote a string for splicing into a script.
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn mutation_watch_script(container: &str) -> String {
    format!(
        r#"(() => {{
            const sel = {sel};
            const bag = (window.__harvestMutations = window.__harvestMutations || {{}});
            const root = document.querySelector(sel) || document.body;
            const slot = bag[sel];
            if (!slot || slot.root !== root) {{
                if (slot && slot.observer) slot.observer.disconnect();
                const fresh = {{ root: root, count: 0, observer: null }};
                fresh.observer = new MutationObserver((list) => {{ fresh.count += list.length; }});
                fresh.observer.observe(root, {{ childList: true, subtree: true, characterData: true }});
                bag[sel] = fresh;
                return slot ? 1 : 0;
            }}
            const n = slot.count;
            slot.count = 0;
            return n;
        }})()"#,
        sel = js_str(container)
    )
}

fn lock(ledger: &Mutex<CaptureLedger>) -> std::sync::MutexGuard<'_, CaptureLedger> {
    ledger.lock().unwrap_or_else(|p| p.into_inner())
}

/// Network event subscriptions, registered before any trigger fires.
struct CaptureStreams {
    sent: EventStream<EventRequestWillBeSent>,
    received: EventStream<EventResponseReceived>,
    finished: EventStream<EventLoadingFinished>,
    failed: EventStream<EventLoadingFailed>,
}

impl CaptureStreams {
    async fn subscribe(page: &Page) -> Result<Self, CdpError> {
        Ok(Self {
            sent: page.event_listener::<EventRequestWillBeSent>().await?,
            received: page.event_listener::<EventResponseReceived>().await?,
            finished: page.event_listener::<EventLoadingFinished>().await?,
            failed: page.event_listener::<EventLoadingFailed>().await?,
        })
    }
}

async fn run_capture(page: Page, ledger: Arc<Mutex<CaptureLedger>>, streams: CaptureStreams) {
    let CaptureStreams {
        mut sent,
        mut received,
        mut finished,
        mut failed,
    } = streams;

    loop {
        tokio::select! {
            Some(ev) = sent.next() => {
                let mut l = lock(&ledger);
                let relevant = l.filter.as_ref().map(|f| f.matches_url(&ev.request.url)).unwrap_or(false);
                if relevant {
                    l.in_flight.insert(ev.request_id.inner().clone(), ev.request.url.clone());
                    l.last_activity = Instant::now();
                }
            }
            Some(ev) = received.next() => {
                let mut l = lock(&ledger);
                let id = ev.request_id.inner().clone();
                if l.in_flight.contains_key(&id) {
                    let status = u16::try_from(ev.response.status).unwrap_or(0);
                    l.responses.insert(id, (ev.response.url.clone(), status, ev.response.mime_type.clone()));
                    l.last_activity = Instant::now();
                }
            }
            Some(ev) = finished.next() => {
                let id = ev.request_id.inner().clone();
                let fetch = {
                    let mut l = lock(&ledger);
                    if l.in_flight.remove(&id).is_none() {
                        continue;
                    }
                    l.last_activity = Instant::now();
                    let meta = l.responses.remove(&id);
                    match (meta, l.filter.clone()) {
                        (Some((url, status, ct)), Some(filter))
                            if filter.matches_content_type(&ct)
                                && l.captured.len() < filter.max_responses =>
                        {
                            Some((url, status, ct, filter.max_body_bytes))
                        }
                        _ => None,
                    }
                };
                let Some((url, status, content_type, max_bytes)) = fetch else { continue };
                match page.execute(GetResponseBodyParams::new(RequestId::from(id))).await {
                    Ok(resp) => {
                        let body = if resp.result.base64_encoded {
                            base64::engine::general_purpose::STANDARD
                                .decode(resp.result.body.as_bytes())
                                .ok()
                                .and_then(|b| String::from_utf8(b).ok())
                                .unwrap_or_default()
                        } else {
                            resp.result.body.clone()
                        };
                        if body.len() > max_bytes {
                            debug!("skipping oversized capture {url} ({} bytes)", body.len());
                            continue;
                        }
                        lock(&ledger).captured.push(CapturedResponse { url, status, content_type, body });
                    }
                    Err(e) => warn!("could not read body of {url}: {e}"),
                }
            }
            Some(ev) = failed.next() => {
                let mut l = lock(&ledger);
                let id = ev.request_id.inner().clone();
                if l.in_flight.remove(&id).is_some() {
                    l.responses.remove(&id);
                    l.last_activity = Instant::now();
                }
            }
            else => break,
        }
    }
    debug!("network event streams closed");
}

#[async_trait]
impl PageBinding for ChromiumBinding {
    async fn page_url(&self) -> HarvestResult<String> {
        let url = self.page.url().await.map_err(map_cdp)?;
        Ok(url.unwrap_or_default())
    }

    async fn read_dom_snapshot(&self, selector: &str) -> HarvestResult<Option<String>> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.outerHTML : null; }})()",
            js_str(selector)
        );
        Ok(self.eval(&script).await?.as_str().map(|s| s.to_string()))
    }

    async fn observe_mutations(&self, container: &str) -> HarvestResult<u64> {
        Ok(self.eval(&mutation_watch_script(container)).await?.as_u64().unwrap_or(0))
    }

    async fn start_network_capture(&self, filter: CaptureFilter) -> HarvestResult<()> {
        self.abort_capture_task();
        self.page
            .execute(EnableParams::default())
            .await
            .map_err(map_cdp)?;
        {
            let mut l = self.ledger();
            *l = CaptureLedger::new();
            l.filter = Some(filter);
        }
        let streams = CaptureStreams::subscribe(&self.page).await.map_err(map_cdp)?;
        let page = self.page.clone();
        let ledger = Arc::clone(&self.ledger);
        let handle = tokio::spawn(run_capture(page, ledger, streams));
        *self.capture_task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    async fn stop_network_capture(&self) -> HarvestResult<Vec<CapturedResponse>> {
        self.abort_capture_task();
        let mut l = self.ledger();
        l.filter = None;
        l.in_flight.clear();
        Ok(std::mem::take(&mut l.captured))
    }

    async fn network_activity(&self) -> HarvestResult<NetworkActivity> {
        let l = self.ledger();
        Ok(NetworkActivity {
            in_flight: l.in_flight.len(),
            idle_for: l.last_activity.elapsed(),
        })
    }

    async fn evaluate_in_page(&self, expr: &str) -> HarvestResult<Value> {
        self.eval(expr).await
    }

    async fn scroll_container(&self, target: &str) -> HarvestResult<()> {
        let script = format!(
            r#"(() => {{
                const t = {t};
                const el = t === 'window' ? null : document.querySelector(t);
                if (el && el.scrollHeight > el.clientHeight + 4) {{
                    el.scrollTop = el.scrollHeight;
                }} else {{
                    window.scrollTo(0, document.body.scrollHeight);
                }}
                return true;
            }})()"#,
            t = js_str(target)
        );
        self.eval(&script).await.map(|_| ())
    }

    async fn click_element(&self, selector: &str) -> HarvestResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| HarvestError::InvalidRequest(format!("no element {selector}: {e}")))?;
        if let Err(e) = element.scroll_into_view().await {
            debug!("scrolling {selector} into view: {e}");
        }
        element.click().await.map_err(map_cdp)?;
        Ok(())
    }

    async fn animation_frame(&self) -> HarvestResult<()> {
        self.eval("new Promise((r) => requestAnimationFrame(() => r(true)))")
            .await
            .map(|_| ())
    }
}

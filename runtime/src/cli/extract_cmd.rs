//! `harvest extract`: one-shot extraction of the current page, optionally
//! following a load-more control for a few pages.

use crate::binding::PageBinding;
use crate::config::HarvestConfig;
use crate::harvester::Harvester;
use crate::package::ExtractionResponse;
use crate::session::SessionPhase;
use crate::types::{Action, ContinueTrigger, ExtractionRequest};
use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub hint: Option<String>,
    pub selector: Option<String>,
    pub max_records: Option<usize>,
    /// Pages to read, including the first.
    pub pages: u32,
    /// Load-more button to click between pages; scrolls when absent.
    pub click: Option<String>,
    pub session: Option<String>,
    pub pretty: bool,
}

/// Run the extraction and print the final response as JSON on stdout.
pub async fn run(binding: &dyn PageBinding, config: HarvestConfig, options: ExtractOptions) -> Result<()> {
    let response = collect(binding, config, &options).await?;
    let json = if options.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{json}");
    Ok(())
}

/// Extract, continue up to `pages`, then end the session and return its payload.
pub async fn collect(
    binding: &dyn PageBinding,
    config: HarvestConfig,
    options: &ExtractOptions,
) -> Result<ExtractionResponse> {
    let session_id = options
        .session
        .clone()
        .unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    let mut harvester = Harvester::new(config);

    let mut request = ExtractionRequest::new(&session_id, Action::Extract);
    request.page_hint = options.hint.clone();
    request.dom_selector_override = options.selector.clone();
    request.max_records = options.max_records;

    let mut response = harvester
        .handle(binding, &request)
        .await
        .context("extracting current page")?;
    let mut page = 1;
    while response.ok && page < options.pages.max(1) && response.session_state != Some(SessionPhase::Complete) {
        request.action = Action::Continue;
        request.trigger = Some(match &options.click {
            Some(selector) => ContinueTrigger::Click {
                selector: selector.clone(),
            },
            None => ContinueTrigger::Scroll { target: None },
        });
        response = harvester
            .handle(binding, &request)
            .await
            .with_context(|| format!("extracting page {}", page + 1))?;
        info!(page, records = response.record_count, "page extracted");
        page += 1;
    }

    if response.session_state == Some(SessionPhase::Complete) {
        // A completed session is already closed; its payload holds every record.
        return Ok(response);
    }
    let end = ExtractionRequest::new(&session_id, Action::EndSession);
    harvester
        .handle(binding, &end)
        .await
        .context("closing session")
}

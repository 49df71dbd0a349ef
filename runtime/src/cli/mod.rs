//! CLI subcommand implementations for the `harvest` binary.

pub mod extract_cmd;
pub mod repl;
pub mod serve;

use crate::binding::chromium::ChromiumBinding;
use crate::binding::fixture::FixturePage;
use crate::binding::PageBinding;
use crate::config::HarvestConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the page to read comes from.
#[derive(Debug, Clone, Default)]
pub struct PageSource {
    /// DevTools endpoint (`ws://…` or `http://host:port`).
    pub cdp: Option<String>,
    /// URL fragment selecting the tab to attach to.
    pub page: Option<String>,
    /// Saved HTML file to read instead of a live browser.
    pub html: Option<PathBuf>,
    /// Page URL reported for a saved file, used to resolve relative links.
    pub url: Option<String>,
}

/// Open the page binding described by `source`.
pub async fn open_page(source: &PageSource) -> Result<Box<dyn PageBinding>> {
    if let Some(path) = &source.html {
        let html = std::fs::read_to_string(path)
            .with_context(|| format!("reading saved page {}", path.display()))?;
        let url = source
            .url
            .clone()
            .unwrap_or_else(|| format!("file://{}", path.display()));
        info!(url = %url, "reading saved page");
        return Ok(Box::new(FixturePage::new(&url, &html)));
    }

    let endpoint = source.cdp.as_deref().context("no page: pass --cdp or --html")?;
    let binding = ChromiumBinding::attach(endpoint, source.page.as_deref())
        .await
        .with_context(|| format!("attaching to browser at {endpoint}"))?;
    Ok(Box::new(binding))
}

/// Load and validate configuration for a command.
pub fn load_config(path: Option<&Path>) -> Result<HarvestConfig> {
    HarvestConfig::load(path).context("loading configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_open_saved_page() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<html><body><h1>Saved</h1></body></html>").unwrap();
        let source = PageSource {
            html: Some(file.path().to_path_buf()),
            url: Some("https://x.test/search".into()),
            ..Default::default()
        };
        let page = open_page(&source).await.unwrap();
        assert_eq!(page.page_url().await.unwrap(), "https://x.test/search");
        assert!(page.read_dom_snapshot("h1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_source_is_an_error() {
        assert!(open_page(&PageSource::default()).await.is_err());
    }
}

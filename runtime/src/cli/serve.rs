//! `harvest serve`: newline-delimited JSON requests on stdin, replies on stdout.

use crate::binding::PageBinding;
use crate::config::HarvestConfig;
use crate::harvester::Harvester;
use crate::protocol;
use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the stdio loop until EOF or Ctrl+C.
pub async fn run(binding: &dyn PageBinding, config: HarvestConfig) -> Result<()> {
    let mut harvester = Harvester::new(config);
    let cancel = harvester.cancellation();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    info!("harvest v{} serving on stdio", env!("CARGO_PKG_VERSION"));
    let handled = serve_lines(
        &mut harvester,
        binding,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        &cancel,
    )
    .await?;
    info!(requests = handled, "stdio loop finished");
    Ok(())
}

/// Serve requests from `reader` until EOF or cancellation; returns the number handled.
pub async fn serve_lines<R, W>(
    harvester: &mut Harvester,
    binding: &dyn PageBinding,
    mut reader: R,
    mut writer: W,
    cancel: &CancellationToken,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    let mut handled = 0;
    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_line(&mut line) => read.context("reading request")?,
        };
        if read == 0 {
            info!("EOF on stdin");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let reply = protocol::dispatch(harvester, binding, trimmed).await;
        if reply.contains(protocol::E_PARSE) {
            warn!("unparseable request line");
        }
        writer
            .write_all(reply.as_bytes())
            .await
            .context("writing response")?;
        writer.flush().await.context("flushing response")?;
        handled += 1;
    }
    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::fixture::FixturePage;
    use serde_json::Value;

    const PAGE: &str = r#"<body><div id="results"><div><h2>Hotel Beispiel</h2><p>€ 120</p></div></div></body>"#;

    #[tokio::test(start_paused = true)]
    async fn test_serves_each_line() {
        let input = concat!(
            r#"{"id":"1","method":"extract","params":{"sessionId":"s"}}"#,
            "\n\n",
            "not json\n",
            r#"{"id":"3","method":"navigate"}"#,
            "\n",
            r#"{"id":"4","method":"status","params":{"sessionId":"s"}}"#,
            "\n",
            r#"{"id":"5","method":"end_session","params":{"sessionId":"s"}}"#,
            "\n",
        );
        let page = FixturePage::new("https://x.test/", PAGE);
        let mut harvester = Harvester::new(HarvestConfig::default());
        let mut out = Vec::new();
        let handled = serve_lines(
            &mut harvester,
            &page,
            input.as_bytes(),
            &mut out,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(handled, 5);

        let replies: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies[0]["result"]["recordCount"], 1);
        assert_eq!(replies[1]["error"]["code"], protocol::E_PARSE);
        assert_eq!(replies[2]["error"]["code"], protocol::E_INVALID_METHOD);
        assert_eq!(replies[3]["result"]["state"], "awaiting_more");
        assert_eq!(replies[4]["result"]["sessionState"], "complete");
    }

    #[tokio::test]
    async fn test_binding_failure_is_reported() {
        let input = r#"{"id":"1","method":"extract","params":{"sessionId":"s"}}"#.to_string() + "\n";
        let mut harvester = Harvester::new(HarvestConfig::default());
        let mut out = Vec::new();
        serve_lines(
            &mut harvester,
            &FixturePage::unavailable(),
            input.as_bytes(),
            &mut out,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let reply: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(reply["error"]["code"], protocol::E_BINDING_UNAVAILABLE);
    }
}

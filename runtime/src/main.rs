// Copyright 2026 Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use harvest_runtime::cli::{self, extract_cmd::ExtractOptions, PageSource};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Harvest: structured listings from the page you already have open",
    version,
    after_help = "Run 'harvest <command> --help' for details on each command.\nRun 'harvest' with no command to enter interactive mode."
)]
struct Cli {
    /// Configuration file (defaults to $HARVEST_CONFIG or ~/.harvest/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Default)]
struct PageArgs {
    /// DevTools endpoint: ws://… or http://host:port
    #[arg(long, default_value = "http://127.0.0.1:9222")]
    cdp: Option<String>,
    /// Attach to the first tab whose URL contains this text
    #[arg(long)]
    page: Option<String>,
    /// Read a saved HTML file instead of a live browser
    #[arg(long)]
    html: Option<PathBuf>,
    /// URL to report for --html (resolves relative links)
    #[arg(long, requires = "html")]
    url: Option<String>,
}

impl From<PageArgs> for PageSource {
    fn from(args: PageArgs) -> Self {
        PageSource {
            cdp: args.cdp,
            page: args.page,
            html: args.html,
            url: args.url,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve newline-delimited JSON requests on stdio
    Serve {
        #[command(flatten)]
        page: PageArgs,
    },
    /// Extract the current page once and print the result
    Extract {
        #[command(flatten)]
        page: PageArgs,
        /// Site hint selecting a selector pack (booking, expedia, airbnb)
        #[arg(long)]
        hint: Option<String>,
        /// CSS selector of the result container
        #[arg(long)]
        selector: Option<String>,
        /// Maximum records to accept from each page
        #[arg(long)]
        max_records: Option<usize>,
        /// Pages to read, following --click or scrolling between them
        #[arg(long, default_value = "1")]
        pages: u32,
        /// Load-more control to click between pages
        #[arg(long)]
        click: Option<String>,
        /// Session id (random when omitted)
        #[arg(long)]
        session: Option<String>,
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Interactive extraction loop
    Repl {
        #[command(flatten)]
        page: PageArgs,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("harvest_runtime={level},harvest={level}")));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "harvest", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(&cli.log_level, cli.json_logs);
    let config = cli::load_config(cli.config.as_deref())?;

    let result = match cli.command {
        None => {
            let binding = cli::open_page(&PageArgs::default().with_default_cdp().into()).await?;
            cli::repl::run(binding.as_ref(), config).await
        }
        Some(Commands::Repl { page }) => {
            let binding = cli::open_page(&page.into()).await?;
            cli::repl::run(binding.as_ref(), config).await
        }
        Some(Commands::Serve { page }) => {
            let binding = cli::open_page(&page.into()).await?;
            cli::serve::run(binding.as_ref(), config).await
        }
        Some(Commands::Extract {
            page,
            hint,
            selector,
            max_records,
            pages,
            click,
            session,
            pretty,
        }) => {
            let binding = cli::open_page(&page.into()).await?;
            let options = ExtractOptions {
                hint,
                selector,
                max_records,
                pages,
                click,
                session,
                pretty,
            };
            cli::extract_cmd::run(binding.as_ref(), config, options).await
        }
        Some(Commands::Completions { .. }) => Ok(()),
    };

    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }
    result
}

impl PageArgs {
    fn with_default_cdp(mut self) -> Self {
        self.cdp.get_or_insert_with(|| "http://127.0.0.1:9222".to_string());
        self
    }
}

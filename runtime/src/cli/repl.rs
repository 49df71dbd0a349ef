//! Interactive operator loop.
//!
//! Launch with `harvest repl` (or `harvest` with no command). The operator
//! drives the browser by hand and asks for extractions between moves. Type
//! `/help` for commands, Tab for completion.

use crate::binding::PageBinding;
use crate::config::HarvestConfig;
use crate::harvester::Harvester;
use crate::package::ExtractionResponse;
use crate::types::{Action, ContinueTrigger, ExtractionRequest, NormalizedRecord};
use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};

const COMMANDS: &[(&str, &str)] = &[
    ("/extract", "Extract the current page [hint]"),
    ("/more", "Load more and extract [click selector]"),
    ("/scroll", "Scroll and extract [target selector]"),
    ("/records", "List records collected this session"),
    ("/status", "Show session state"),
    ("/end", "End the session and print its payload size"),
    ("/new", "Start a fresh session"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

#[derive(Default)]
struct HarvestHelper;

impl Completer for HarvestHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];
        if input.contains(' ') {
            return Ok((pos, Vec::new()));
        }
        let matches = COMMANDS
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(input))
            .map(|(cmd, desc)| Pair {
                display: format!("{cmd:<12} {desc}"),
                replacement: format!("{cmd} "),
            })
            .collect();
        Ok((0, matches))
    }
}

impl Hinter for HarvestHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || !line.starts_with('/') || line.contains(' ') {
            return None;
        }
        COMMANDS
            .iter()
            .find(|(cmd, _)| cmd.starts_with(line) && *cmd != line)
            .map(|(cmd, _)| cmd[line.len()..].to_string())
    }
}

impl Highlighter for HarvestHelper {}
impl Validator for HarvestHelper {}
impl Helper for HarvestHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(&self, _evt: &Event, _n: RepeatCount, _positive: bool, ctx: &EventContext<'_>) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// A parsed REPL line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Extract(Option<String>),
    More(Option<String>),
    Scroll(Option<String>),
    Records,
    Status,
    End,
    New,
    Clear,
    Help,
    Exit,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let input = line.trim().strip_prefix('/').unwrap_or(line.trim());
    let mut parts = input.splitn(2, ' ');
    let cmd = parts.next().unwrap_or("");
    let arg = parts
        .next()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);
    match cmd {
        "extract" | "x" => Command::Extract(arg),
        "more" | "m" => Command::More(arg),
        "scroll" => Command::Scroll(arg),
        "records" | "r" => Command::Records,
        "status" => Command::Status,
        "end" => Command::End,
        "new" => Command::New,
        "clear" | "cls" => Command::Clear,
        "" | "help" | "h" | "?" => Command::Help,
        "exit" | "quit" | "q" => Command::Exit,
        other => Command::Unknown(other.to_string()),
    }
}

struct ReplState {
    harvester: Harvester,
    config: HarvestConfig,
    session_id: String,
    hint: Option<String>,
    records: Vec<NormalizedRecord>,
}

impl ReplState {
    fn new(config: HarvestConfig) -> Self {
        Self {
            harvester: Harvester::new(config.clone()),
            config,
            session_id: new_session_id(),
            hint: None,
            records: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.harvester = Harvester::new(self.config.clone());
        self.session_id = new_session_id();
        self.records.clear();
    }
}

fn new_session_id() -> String {
    format!("repl-{}", uuid::Uuid::new_v4())
}

/// Run the interactive REPL against `binding`.
pub async fn run(binding: &dyn PageBinding, config: HarvestConfig) -> anyhow::Result<()> {
    eprintln!();
    eprintln!("  \x1b[1mharvest v{}\x1b[0m", env!("CARGO_PKG_VERSION"));
    eprintln!("    Browse to a results page, then \x1b[36m/extract\x1b[0m. \x1b[90m/exit\x1b[0m to quit.");
    eprintln!();

    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .build();
    let mut rl: Editor<HarvestHelper, rustyline::history::DefaultHistory> = Editor::with_config(rl_config)?;
    rl.set_helper(Some(HarvestHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let hist_path = dirs::home_dir().map(|h| h.join(".harvest").join("history"));
    if let Some(path) = hist_path.as_ref().filter(|p| p.exists()) {
        let _ = rl.load_history(path);
    }

    let mut state = ReplState::new(config);
    let prompt = " \x1b[36mharvest>\x1b[0m ";

    loop {
        let line = tokio::task::block_in_place(|| rl.readline(prompt));
        match line {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Command::Exit => break,
                    Command::Help => cmd_help(),
                    Command::Clear => eprint!("\x1b[2J\x1b[H"),
                    Command::Records => cmd_records(&state),
                    Command::Status => cmd_status(&state),
                    Command::New => {
                        state.reset();
                        eprintln!("  New session {}", state.session_id);
                    }
                    Command::Extract(hint) => {
                        if hint.is_some() {
                            state.hint = hint;
                        }
                        let request = state.request(Action::Extract, None);
                        state.send(binding, request).await;
                    }
                    Command::More(selector) => {
                        let trigger = match selector {
                            Some(selector) => ContinueTrigger::Click { selector },
                            None => ContinueTrigger::Scroll { target: None },
                        };
                        let request = state.request(Action::Continue, Some(trigger));
                        state.send(binding, request).await;
                    }
                    Command::Scroll(target) => {
                        let request = state.request(Action::Continue, Some(ContinueTrigger::Scroll { target }));
                        state.send(binding, request).await;
                    }
                    Command::End => {
                        let request = state.request(Action::EndSession, None);
                        state.send(binding, request).await;
                        state.reset();
                    }
                    Command::Unknown(cmd) => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    if let Some(path) = hist_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = rl.save_history(&path);
    }
    Ok(())
}

impl ReplState {
    fn request(&self, action: Action, trigger: Option<ContinueTrigger>) -> ExtractionRequest {
        let mut request = ExtractionRequest::new(&self.session_id, action);
        request.page_hint = self.hint.clone();
        request.trigger = trigger;
        request
    }

    async fn send(&mut self, binding: &dyn PageBinding, request: ExtractionRequest) {
        match self.harvester.handle(binding, &request).await {
            Ok(response) => {
                print_summary(&response);
                if request.action != Action::EndSession {
                    self.records.extend(response.records);
                }
            }
            Err(e) => eprintln!("  \x1b[31mBrowser unavailable:\x1b[0m {e}"),
        }
    }
}

fn print_summary(response: &ExtractionResponse) {
    eprintln!();
    if let Some(error) = &response.diagnostics.error {
        eprintln!("  \x1b[31m{}\x1b[0m {}", error.code, error.message);
        eprintln!();
        return;
    }
    eprintln!(
        "  {} records via {:?} in {} ms{}",
        response.record_count,
        response.strategy_used,
        response.timing_ms,
        if response.diagnostics.stability_timed_out {
            " (page still moving)"
        } else {
            ""
        }
    );
    for (reason, count) in &response.diagnostics.rejection_reasons {
        eprintln!("    rejected {reason:<20} {count}");
    }
    if let Some(state) = response.session_state {
        eprintln!("    session {:?}, {} total", state, response.diagnostics.session_record_count);
    }
    for note in &response.diagnostics.notes {
        eprintln!("    note: {note}");
    }
    eprintln!();
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<12} {desc}");
    }
    eprintln!();
}

fn cmd_records(state: &ReplState) {
    eprintln!();
    if state.records.is_empty() {
        eprintln!("  No records yet. Try /extract.");
    }
    for (i, record) in state.records.iter().enumerate() {
        let price = record
            .price
            .as_ref()
            .map(|p| p.raw.as_str())
            .unwrap_or("-");
        let rating = record
            .rating
            .as_ref()
            .and_then(|r| r.normalized)
            .map(|n| format!("{n:.1}/5"))
            .unwrap_or_else(|| "-".into());
        eprintln!(
            "  {:>3}. {:<40} {:<24} {}",
            i + 1,
            record.name.as_deref().unwrap_or("?"),
            price,
            rating
        );
    }
    eprintln!();
}

fn cmd_status(state: &ReplState) {
    eprintln!();
    match state.harvester.status(&state.session_id) {
        Some(status) => eprintln!(
            "  Session {}: {:?}, {} pages, {} records, {} ms",
            status.session_id, status.state, status.pages, status.record_count, status.elapsed_ms
        ),
        None => eprintln!("  Session {} has not extracted yet.", state.session_id),
    }
    eprintln!();
}

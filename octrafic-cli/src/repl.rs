//! Interactive chat loop and the stdin-backed prompts it answers with.

use crate::render::TerminalObserver;
use async_trait::async_trait;
use octrafic::collab::TestSpec;
use octrafic::{
    CancelSwitch, ConfirmationHandler, ConfirmationRequest, Controller, Decision, PlanSelector,
    TranscriptLine,
};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const HELP: &str = "\
Commands:
  /run     run the last test plan
  /clear   start a new conversation
  /info    show project and session details
  /help    show this help
  /exit    quit

Ctrl-C cancels the running turn; Ctrl-C while idle quits.";

/// Line-oriented access to stdin, shared by the REPL and its prompts.
#[derive(Clone)]
pub struct Console {
    lines: Arc<Mutex<Lines<BufReader<Stdin>>>>,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines())),
        }
    }

    /// Print `prompt` and read one line. `None` at end of input.
    pub async fn ask(&self, prompt: &str) -> Option<String> {
        print!("{prompt}");
        let _ = io::stdout().flush();
        match self.lines.lock().await.next_line().await {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "stdin read failed");
                None
            }
        }
    }
}

/// Parse an answer to the confirmation prompt.
pub fn parse_decision(answer: &str) -> Option<Decision> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "a" | "y" | "yes" | "approve" => Some(Decision::Approve),
        "d" | "n" | "no" | "deny" => Some(Decision::Deny),
        "s" | "skip" => Some(Decision::SkipRemaining),
        _ => None,
    }
}

/// Parse 1-based positions to deselect. `none` deselects everything.
pub fn parse_deselection(answer: &str, len: usize) -> Result<Vec<usize>, String> {
    let answer = answer.trim();
    if answer.eq_ignore_ascii_case("none") {
        return Ok((0..len).collect());
    }
    answer
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.parse::<usize>() {
            Ok(n) if (1..=len).contains(&n) => Ok(n - 1),
            _ => Err(format!("not a test number: {part}")),
        })
        .collect()
}

/// Asks on stdin before state-changing calls run.
#[derive(Debug, Clone)]
pub struct StdinConfirmations {
    console: Console,
}

impl StdinConfirmations {
    pub const fn new(console: Console) -> Self {
        Self { console }
    }
}

#[async_trait]
impl ConfirmationHandler for StdinConfirmations {
    async fn confirm(&self, request: &ConfirmationRequest) -> Decision {
        println!("\n{}", request.description);
        let prompt = if request.remaining > 0 {
            format!("[a]pprove / [d]eny / [s]kip remaining ({} more queued): ", request.remaining)
        } else {
            "[a]pprove / [d]eny / [s]kip remaining: ".to_string()
        };
        loop {
            let Some(answer) = self.console.ask(&prompt).await else {
                return Decision::Deny;
            };
            if let Some(decision) = parse_decision(&answer) {
                return decision;
            }
        }
    }
}

/// Lists a plan and lets the user drop tests from it.
#[derive(Debug, Clone)]
pub struct StdinPlanSelector {
    console: Console,
}

impl StdinPlanSelector {
    pub const fn new(console: Console) -> Self {
        Self { console }
    }
}

#[async_trait]
impl PlanSelector for StdinPlanSelector {
    async fn select(&self, tests: &[TestSpec]) -> Vec<TestSpec> {
        println!("\nTest plan:");
        for (i, test) in tests.iter().enumerate() {
            match &test.description {
                Some(description) => println!("  {}. {} - {description}", i + 1, test.label()),
                None => println!("  {}. {}", i + 1, test.label()),
            }
        }
        loop {
            let Some(answer) = self
                .console
                .ask("Deselect (comma-separated numbers, 'none' for all, Enter to run): ")
                .await
            else {
                return Vec::new();
            };
            match parse_deselection(&answer, tests.len()) {
                Ok(dropped) => {
                    return tests
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !dropped.contains(i))
                        .map(|(_, t)| t.clone())
                        .collect();
                }
                Err(e) => println!("{e}"),
            }
        }
    }
}

/// Route Ctrl-C: cancel the running turn, or quit when idle.
/// The returned token fires when the user asked to quit.
pub fn spawn_interrupts(switch: CancelSwitch, observer: Arc<TerminalObserver>) -> CancellationToken {
    let quit = CancellationToken::new();
    let token = quit.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if observer.is_busy() {
                debug!("interrupt: cancelling turn");
                switch.cancel();
            } else {
                token.cancel();
                break;
            }
        }
    });
    quit
}

/// Run the chat loop until `/exit`, end of input or an idle Ctrl-C.
/// Returns `true` when every turn succeeded.
pub async fn run(controller: &mut Controller, console: &Console, quit: &CancellationToken) -> bool {
    println!("Octrafic | {} | /help for commands\n", controller.base_url());
    let mut success = true;
    loop {
        let line = tokio::select! {
            () = quit.cancelled() => break,
            line = console.ask("> ") => line,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let report = match input {
            "/exit" | "/quit" => break,
            "/help" => {
                println!("{HELP}");
                continue;
            }
            "/clear" => {
                controller.clear();
                continue;
            }
            "/info" => {
                print_info(controller);
                continue;
            }
            "/run" => controller.run_last_plan().await,
            command if command.starts_with('/') => {
                println!("{}", TranscriptLine::info(format!("Unknown command: {command}")));
                continue;
            }
            prompt => controller.submit(prompt).await,
        };
        success &= report.is_success();
        println!();
    }
    println!("{}", controller.metrics());
    success
}

fn print_info(controller: &Controller) {
    println!("Project:      {}", controller.project_id());
    println!("URL:          {}", controller.base_url());
    match controller.conversation_id() {
        Some(id) if controller.is_persistent() => println!("Conversation: {id}"),
        Some(id) => println!("Conversation: {id} (not persisted)"),
        None => println!("Conversation: temporary"),
    }
    print!("{}", controller.metrics());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decision() {
        assert_eq!(parse_decision("a"), Some(Decision::Approve));
        assert_eq!(parse_decision(" D "), Some(Decision::Deny));
        assert_eq!(parse_decision("s"), Some(Decision::SkipRemaining));
        assert_eq!(parse_decision("maybe"), None);
    }

    #[test]
    fn test_parse_deselection() {
        assert_eq!(parse_deselection("", 3), Ok(vec![]));
        assert_eq!(parse_deselection("2", 3), Ok(vec![1]));
        assert_eq!(parse_deselection("1, 3", 3), Ok(vec![0, 2]));
        assert_eq!(parse_deselection("none", 2), Ok(vec![0, 1]));
        assert!(parse_deselection("4", 3).is_err());
        assert!(parse_deselection("x", 3).is_err());
    }
}

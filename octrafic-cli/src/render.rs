//! Prints session output to the terminal.

use octrafic::{LineKind, SessionObserver, SessionState, TranscriptLine};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Streams model text and prints transcript lines as they arrive.
#[derive(Debug, Default)]
pub struct TerminalObserver {
    /// Text printed since the last newline.
    mid_line: AtomicBool,
    /// Set while a turn runs.
    busy: AtomicBool,
}

impl TerminalObserver {
    /// Returns `true` while the session is inside a turn.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn end_line(&self) {
        if self.mid_line.swap(false, Ordering::SeqCst) {
            println!();
        }
    }
}

impl SessionObserver for TerminalObserver {
    fn on_state(&self, state: SessionState) {
        self.busy.store(state.is_active(), Ordering::SeqCst);
    }

    fn on_text(&self, chunk: &str) {
        print!("{chunk}");
        let _ = io::stdout().flush();
        self.mid_line.store(!chunk.ends_with('\n'), Ordering::SeqCst);
    }

    fn on_reasoning(&self, chunk: &str) {
        tracing::trace!(chunk, "reasoning");
    }

    fn on_stream_end(&self) {
        self.end_line();
    }

    fn on_line(&self, line: &TranscriptLine) {
        self.end_line();
        println!("{}", format_line(line));
    }
}

/// Terminal form of a transcript line.
pub fn format_line(line: &TranscriptLine) -> String {
    match line.kind {
        LineKind::User => format!("> {}", line.text),
        LineKind::Tool => format!("● {}", line.text),
        LineKind::Assistant
        | LineKind::Detail
        | LineKind::Success
        | LineKind::Failure
        | LineKind::Info
        | LineKind::Warning
        | LineKind::Error => line.text.clone(),
    }
}

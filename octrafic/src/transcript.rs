//! User-visible transcript lines.
//!
//! The engine never renders anything itself. Dispatch, test runs and replay
//! produce [`TranscriptLine`]s and the front-end decides how to style them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a transcript line shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Text the user sent.
    User,
    /// Committed assistant text.
    Assistant,
    /// A tool is being run; the headline of a tool block.
    Tool,
    /// Secondary detail under a headline.
    Detail,
    /// A passing result.
    Success,
    /// A failing result.
    Failure,
    /// Neutral notice.
    Info,
    /// Something degraded but the session continues.
    Warning,
    /// An error shown to the user.
    Error,
}

/// One line of transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptLine {
    /// Styling class.
    pub kind: LineKind,
    /// Text, without trailing newline.
    pub text: String,
}

impl TranscriptLine {
    /// Create a line.
    #[must_use]
    pub fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// A [`LineKind::User`] line.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(LineKind::User, text)
    }

    /// A [`LineKind::Assistant`] line.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(LineKind::Assistant, text)
    }

    /// A [`LineKind::Tool`] line.
    #[must_use]
    pub fn tool(text: impl Into<String>) -> Self {
        Self::new(LineKind::Tool, text)
    }

    /// A [`LineKind::Detail`] line.
    #[must_use]
    pub fn detail(text: impl Into<String>) -> Self {
        Self::new(LineKind::Detail, text)
    }

    /// A [`LineKind::Info`] line.
    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(LineKind::Info, text)
    }

    /// A [`LineKind::Warning`] line.
    #[must_use]
    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(LineKind::Warning, text)
    }

    /// A [`LineKind::Error`] line.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(LineKind::Error, text)
    }

    /// [`LineKind::Success`] or [`LineKind::Failure`].
    #[must_use]
    pub fn outcome(passed: bool, text: impl Into<String>) -> Self {
        Self::new(
            if passed {
                LineKind::Success
            } else {
                LineKind::Failure
            },
            text,
        )
    }
}

impl fmt::Display for TranscriptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Cut `text` to at most `max` characters, appending `...` when cut.
#[must_use]
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 200), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("ééé", 2), "éé...");
    }

    #[test]
    fn test_outcome_kind() {
        assert_eq!(TranscriptLine::outcome(true, "ok").kind, LineKind::Success);
        assert_eq!(TranscriptLine::outcome(false, "no").kind, LineKind::Failure);
        assert_eq!(TranscriptLine::info("x").to_string(), "x");
    }
}

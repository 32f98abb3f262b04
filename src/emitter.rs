//! Makefile text emitter.
//!
//! A single, append-only sink every other component writes through. The
//! orchestrator owns exactly one [`MakefileEmitter`] per run; section order
//! is fixed by [`crate::backend`] and nothing else writes to the output.
//!
//! Text accumulates in memory and is written to disk once, after the whole
//! generation pass has succeeded, so a fatal error mid-generation never
//! leaves a truncated Makefile behind.

use std::fmt::{self, Display, Formatter, Write};

/// Prerequisite lists longer than this wrap onto continuation lines.
pub const WRAP_AT: usize = 5;

/// A single build rule produced by module handlers and consumed here.
#[derive(Debug, Clone, Default)]
pub struct BuildRule {
    /// Target text, typically a macro reference or a path.
    pub target: String,
    /// Ordinary prerequisites.
    pub prerequisites: Vec<String>,
    /// Order-only prerequisites, emitted after `|`.
    pub order_only: Vec<String>,
    /// Recipe lines, each emitted with a leading tab.
    pub recipe: Vec<String>,
    /// Whether to declare the target `.PHONY` first.
    pub phony: bool,
}

impl Display for BuildRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.phony {
            writeln!(f, ".PHONY: {}", self.target)?;
        }
        write!(f, "{}:", self.target)?;
        if !self.prerequisites.is_empty() {
            write!(f, " {}", wrap_join(&self.prerequisites, WRAP_AT))?;
        }
        if !self.order_only.is_empty() {
            write!(f, " | {}", wrap_join(&self.order_only, WRAP_AT))?;
        }
        writeln!(f)?;
        for line in &self.recipe {
            writeln!(f, "\t{line}")?;
        }
        Ok(())
    }
}

/// Join non-empty items with spaces, inserting a backslash continuation
/// every `wrap_at` items to keep generated lines readable.
#[must_use]
pub fn wrap_join(items: &[String], wrap_at: usize) -> String {
    let mut out = String::new();
    let mut count = 0;
    for item in items.iter().filter(|i| !i.is_empty()) {
        if wrap_at > 0 && count == wrap_at {
            out.push_str(" \\\n\t\t");
            count = 0;
        } else if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(item);
        count += 1;
    }
    out
}

/// The append-only Makefile sink.
#[derive(Debug, Default)]
pub struct MakefileEmitter {
    buf: String,
}

impl MakefileEmitter {
    /// Create an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line, terminating it with a newline.
    pub fn line(&mut self, text: impl Display) {
        // Writing to a String cannot fail.
        let _ = writeln!(self.buf, "{text}");
    }

    /// Append text without a trailing newline.
    pub fn text(&mut self, text: impl Display) {
        let _ = write!(self.buf, "{text}");
    }

    /// Append a blank separator line.
    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    /// Append a variable assignment, `name op value`.
    pub fn assign(&mut self, name: &str, op: &str, value: &str) {
        let _ = writeln!(self.buf, "{name} {op} {value}");
    }

    /// Append a complete build rule.
    pub fn rule(&mut self, rule: &BuildRule) {
        let _ = write!(self.buf, "{rule}");
    }

    /// Open a conditional guard testing `property` against `value`.
    ///
    /// Guards nest; every `open_guard` must be paired with a
    /// [`Self::close_guard`].
    pub fn open_guard(&mut self, property: &str, value: &str) {
        let _ = writeln!(self.buf, "ifeq (\"$({property})\",\"{value}\")");
    }

    /// Close the innermost conditional guard.
    pub fn close_guard(&mut self) {
        self.buf.push_str("endif\n\n");
    }

    /// Borrow the accumulated Makefile text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Consume the emitter, returning the accumulated text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.buf
    }
}

//! Side channel for controller output and progress messages.
//!
//! Output that does not belong to the reply of the current command (a
//! background program printing, or a stale handshake echo) must reach the
//! operator without being mistaken for a result. Callers pick where it goes.

use tracing::{info, warn};

pub trait Reporter {
    /// Unsolicited controller output.
    fn extra_output(&mut self, text: &str);

    /// Progress of a multi-step operation.
    fn status(&mut self, message: &str);

    /// Liveness tick while waiting (restart polling).
    fn tick(&mut self) {}
}

/// Routes everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn extra_output(&mut self, text: &str) {
        warn!(target: "trio_link::console", "{}", indent(text));
    }

    fn status(&mut self, message: &str) {
        info!("{message}");
    }
}

/// Keeps every message, for tests and for callers that render later.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectingReporter {
    pub extra: Vec<String>,
    pub messages: Vec<String>,
    pub ticks: usize,
}

impl Reporter for CollectingReporter {
    fn extra_output(&mut self, text: &str) {
        self.extra.push(text.to_string());
    }

    fn status(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }

    fn tick(&mut self) {
        self.ticks += 1;
    }
}

/// Indents every line by four spaces.
#[must_use]
pub fn indent(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    for (idx, line) in text.split('\n').enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str("    ");
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indent_prefixes_each_line() {
        assert_eq!(indent("a\nb"), "    a\n    b");
        assert_eq!(indent(""), "    ");
    }
}

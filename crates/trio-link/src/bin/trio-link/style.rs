//! Terminal colours for CLI output.

use std::io::IsTerminal;

use owo_colors::{AnsiColors, OwoColorize};

/// Colours `text` when `tty` is a terminal.
fn paint(text: impl AsRef<str>, color: AnsiColors, tty: bool) -> String {
    let text = text.as_ref();
    if tty {
        text.color(color).to_string()
    } else {
        text.to_string()
    }
}

fn stdout_tty() -> bool {
    std::io::stdout().is_terminal()
}

pub fn success(text: impl AsRef<str>) -> String {
    paint(text, AnsiColors::Green, stdout_tty())
}

pub fn warning(text: impl AsRef<str>) -> String {
    paint(text, AnsiColors::Yellow, stdout_tty())
}

/// Errors go to stderr, so colour follows stderr.
pub fn error(text: impl AsRef<str>) -> String {
    paint(text, AnsiColors::Red, std::io::stderr().is_terminal())
}

/// Autorun markers in program listings.
pub fn accent(text: impl AsRef<str>) -> String {
    paint(text, AnsiColors::Cyan, stdout_tty())
}

/// Controller output that is not a command result.
pub fn console(text: impl AsRef<str>) -> String {
    let text = text.as_ref();
    if stdout_tty() {
        text.dimmed().to_string()
    } else {
        text.to_string()
    }
}

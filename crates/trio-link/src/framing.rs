//! Reply framing for the controller command channel.
//!
//! A reply to `CMD` looks like:
//!
//! ```text
//! <preamble>CMD\r\n<body>>>\nControl char : <status>\r\n>>
//! ```
//!
//! The preamble is output of unrelated activity (background programs printing
//! to channel 0) that arrived before the echo. The body ends at the first
//! trailer. [`ReplyParser`] walks these phases incrementally as bytes arrive.

#![allow(missing_docs)]

use smol_str::SmolStr;

use crate::error::TrioError;

/// Status token the controller sends for a successful command.
pub const SUCCESS_STATUS: &[u8] = b"0x10000000A";

const ECHO_END: &[u8] = b"\r\n";
const TRAILER: &[u8] = b">>\nControl char : ";
const STATUS_END: &[u8] = b"\r\n>>";
const ERROR_MARKER: &[u8] = b"%[COMMAND";

/// A complete reply frame, not yet interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawReply {
    pub preamble: Vec<u8>,
    pub body: Vec<u8>,
    pub status: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Looking for `CMD\r\n`.
    Echo,
    /// Looking for the trailer after the body that starts at `body_start`.
    Body { body_start: usize, search_from: usize },
    /// Trailer found, looking for `\r\n>>` after the status token.
    Status { body_start: usize, body_end: usize },
}

/// Incremental parser for one command's reply.
#[derive(Debug, Clone)]
pub struct ReplyParser {
    echo: Vec<u8>,
    buf: Vec<u8>,
    phase: Phase,
    scanned: usize,
}

impl ReplyParser {
    #[must_use]
    pub fn new(command: &[u8]) -> Self {
        let mut echo = command.to_vec();
        echo.extend_from_slice(ECHO_END);
        Self {
            echo,
            buf: Vec::new(),
            phase: Phase::Echo,
            scanned: 0,
        }
    }

    /// Everything received so far.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Whether the echo of the command has been seen.
    #[must_use]
    pub fn echo_seen(&self) -> bool {
        !matches!(self.phase, Phase::Echo)
    }

    /// Appends bytes and returns the reply once the frame is complete.
    ///
    /// The second element holds bytes received after the frame.
    pub fn push(&mut self, bytes: &[u8]) -> Option<(RawReply, Vec<u8>)> {
        self.buf.extend_from_slice(bytes);
        loop {
            match self.phase {
                Phase::Echo => {
                    let from = self.scanned.saturating_sub(self.echo.len());
                    match find(&self.buf[from..], &self.echo) {
                        Some(pos) => {
                            let body_start = from + pos + self.echo.len();
                            self.phase = Phase::Body {
                                body_start,
                                search_from: body_start,
                            };
                        }
                        None => {
                            self.scanned = self.buf.len();
                            return None;
                        }
                    }
                }
                Phase::Body {
                    body_start,
                    search_from,
                } => match find(&self.buf[search_from..], TRAILER) {
                    Some(pos) => {
                        self.phase = Phase::Status {
                            body_start,
                            body_end: search_from + pos,
                        };
                    }
                    None => {
                        let keep = self.buf.len().saturating_sub(TRAILER.len() - 1);
                        self.phase = Phase::Body {
                            body_start,
                            search_from: keep.max(search_from),
                        };
                        return None;
                    }
                },
                Phase::Status {
                    body_start,
                    body_end,
                } => {
                    let status_start = body_end + TRAILER.len();
                    let region = &self.buf[status_start..];
                    // The status token is a single line, so the first newline
                    // must be the one of `\r\n>>`.
                    let Some(newline) = region.iter().position(|byte| *byte == b'\n') else {
                        return None;
                    };
                    let after = &region[newline + 1..];
                    let terminated = newline > 0 && region[newline - 1] == b'\r';
                    if terminated && after.len() < 2 && b">>".starts_with(after) {
                        return None;
                    }
                    if !terminated || !after.starts_with(b">>") {
                        // This trailer was part of the body.
                        self.phase = Phase::Body {
                            body_start,
                            search_from: body_end + 1,
                        };
                        continue;
                    }
                    let status_end = status_start + newline - 1;
                    let echo_start = body_start - self.echo.len();
                    let reply = RawReply {
                        preamble: self.buf[..echo_start].to_vec(),
                        body: self.buf[body_start..body_end].to_vec(),
                        status: self.buf[status_start..status_end].to_vec(),
                    };
                    let rest = self.buf[status_end + STATUS_END.len()..].to_vec();
                    return Some((reply, rest));
                }
            }
        }
    }
}

/// Parses a complete buffer in one go.
#[must_use]
pub fn parse_reply(command: &[u8], bytes: &[u8]) -> Option<RawReply> {
    ReplyParser::new(command)
        .push(bytes)
        .map(|(reply, _)| reply)
}

/// Interprets a framed reply: inline errors first, then the status token.
///
/// Returns the body without its final `\r\n`.
pub fn decode_reply(command: &str, reply: &RawReply) -> Result<Vec<u8>, TrioError> {
    if let Some(marker) = find_error_marker(&reply.body) {
        return Err(TrioError::Command {
            command: SmolStr::new(command),
            marker: SmolStr::new(String::from_utf8_lossy(marker)),
        });
    }
    if reply.status != SUCCESS_STATUS {
        return Err(TrioError::BadReturnCode {
            command: SmolStr::new(command),
            code: SmolStr::new(String::from_utf8_lossy(&reply.status)),
            reply: String::from_utf8_lossy(&reply.body).into_owned(),
        });
    }
    let body = reply
        .body
        .strip_suffix(ECHO_END)
        .unwrap_or(&reply.body)
        .to_vec();
    Ok(body)
}

/// Last `%[COMMAND...` marker on a line terminated by `\r`, without the `%`.
fn find_error_marker(body: &[u8]) -> Option<&[u8]> {
    let mut end = body.len();
    while let Some(pos) = rfind(&body[..end], ERROR_MARKER) {
        let start = pos + 1;
        let line_end = body[start..]
            .iter()
            .position(|byte| *byte == b'\n')
            .map_or(body.len(), |offset| start + offset);
        let line = &body[start..line_end];
        if let Some(cr) = line.iter().rposition(|byte| *byte == b'\r') {
            if cr > ERROR_MARKER.len() - 1 {
                return Some(&line[..cr]);
            }
        }
        end = pos;
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

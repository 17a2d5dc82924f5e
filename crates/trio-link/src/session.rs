//! Command protocol engine: one command at a time over the telnet channel.

#![allow(missing_docs)]

mod transport;

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use smol_str::SmolStr;
use tracing::{debug, trace, warn};

use crate::error::TrioError;
use crate::framing::{decode_reply, ReplyParser};
use crate::report::{LogReporter, Reporter};
use crate::telnet::TelnetFilter;

pub use transport::{Connector, TcpConnector, TcpTransport, Transport, DEFAULT_PORT};

const HANDSHAKE_TOKEN_RANGE: u32 = 1_000_000;

/// Timeouts and retry bounds for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Per attempt, for opening the socket and each handshake command.
    pub connect_timeout: Duration,
    /// Default read timeout for commands.
    pub command_timeout: Duration,
    /// Handshake attempts after the first one.
    pub connect_retries: u32,
    /// Reconnection attempts after `EX`.
    pub restart_attempts: u32,
    /// Pause between failed reconnection attempts.
    pub restart_interval: Duration,
    pub halt_timeout: Duration,
    pub exit_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(30),
            connect_retries: 3,
            restart_attempts: 30,
            restart_interval: Duration::from_secs(1),
            halt_timeout: Duration::from_millis(500),
            exit_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    AwaitingReply,
}

/// Exclusive owner of the command channel to one controller.
///
/// The transport is released when the session is closed or dropped, so a
/// session scoped to an operation frees the controller's telnet slot on every
/// exit path.
pub struct Session<C: Connector> {
    connector: C,
    transport: Option<C::Transport>,
    telnet: TelnetFilter,
    options: SessionOptions,
    state: SessionState,
    last_activity: Option<Instant>,
    pending: Vec<u8>,
    reporter: Box<dyn Reporter>,
}

impl<C: Connector> Session<C> {
    /// Creates a disconnected session.
    pub fn new(connector: C, options: SessionOptions) -> Self {
        Self {
            connector,
            transport: None,
            telnet: TelnetFilter::new(),
            options,
            state: SessionState::Disconnected,
            last_activity: None,
            pending: Vec::new(),
            reporter: Box::new(LogReporter),
        }
    }

    /// Creates a session and performs the connection handshake.
    pub fn open(
        connector: C,
        options: SessionOptions,
        reporter: Box<dyn Reporter>,
    ) -> Result<Self, TrioError> {
        let mut session = Self::new(connector, options).with_reporter(reporter);
        session.connect()?;
        Ok(session)
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn reporter_mut(&mut self) -> &mut dyn Reporter {
        self.reporter.as_mut()
    }

    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    #[must_use]
    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Opens the channel and checks that no other session holds the
    /// controller.
    pub fn connect(&mut self) -> Result<(), TrioError> {
        self.close();
        self.state = SessionState::Connecting;
        let timeout = self.options.connect_timeout;
        let transport = self.connector.open(timeout).map_err(|err| {
            self.state = SessionState::Disconnected;
            self.connection_error(err.to_string())
        })?;
        self.transport = Some(transport);
        self.state = SessionState::Ready;
        debug!(endpoint = self.endpoint(), "channel open");

        if let Err(err) = self.handshake(timeout) {
            self.close();
            return Err(err);
        }
        Ok(())
    }

    fn handshake(&mut self, timeout: Duration) -> Result<(), TrioError> {
        let mut synced = false;
        for attempt in 0..=self.options.connect_retries {
            let token = (rand::random::<u32>() % HANDSHAKE_TOKEN_RANGE).to_string();
            match self.command_string_within(&format!("?{token}"), timeout) {
                Ok(output) if output == token => {
                    synced = true;
                    break;
                }
                Ok(output) => {
                    debug!(attempt, "handshake echo mismatch");
                    self.reporter.extra_output(&output);
                }
                Err(err @ (TrioError::Io(_) | TrioError::NonAsciiCommand(_))) => return Err(err),
                Err(_) if !self.is_connected() => {
                    return Err(self.connection_error("connection closed during handshake"));
                }
                Err(err) => debug!(attempt, %err, "handshake attempt failed"),
            }
        }
        if !synced {
            return Err(self.connection_error(
                "handshake failed, an interactive session (Motion Perfect) is probably open",
            ));
        }
        if self.command_int("?MPE")? != 0 {
            return Err(self.connection_error(
                "controller is locked by an interactive session (MPE != 0)",
            ));
        }
        Ok(())
    }

    fn connection_error(&self, reason: impl AsRef<str>) -> TrioError {
        TrioError::Connection {
            endpoint: SmolStr::new(self.endpoint()),
            reason: SmolStr::new(reason),
        }
    }

    /// Releases the channel. The session can be reconnected later.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            debug!(endpoint = self.endpoint(), "channel closed");
        }
        self.telnet.reset();
        self.pending.clear();
        self.state = SessionState::Disconnected;
    }

    /// Sends a command with the default timeout; returns the raw reply body.
    pub fn command(&mut self, cmd: &str) -> Result<Vec<u8>, TrioError> {
        let timeout = self.options.command_timeout;
        self.command_within(cmd, timeout)
    }

    /// Sends a command and waits up to `timeout` for its framed reply.
    pub fn command_within(&mut self, cmd: &str, timeout: Duration) -> Result<Vec<u8>, TrioError> {
        if !cmd.is_ascii() {
            return Err(TrioError::NonAsciiCommand(cmd.to_string()));
        }
        if self.transport.is_none() {
            return Err(self.connection_error("not connected"));
        }
        let Self {
            transport: Some(transport),
            telnet,
            pending,
            ..
        } = self
        else {
            return Err(TrioError::NoResponse {
                command: SmolStr::new(cmd),
            });
        };

        let mut stale = std::mem::take(pending);
        let mut replies = Vec::new();
        let drained = transport.drain();
        let sent = drained.and_then(|bytes| {
            telnet.feed(&bytes, &mut stale, &mut replies);
            if !stale.is_empty() {
                debug!(
                    bytes = stale.len(),
                    output = %String::from_utf8_lossy(&stale),
                    "discarding buffered output"
                );
            }
            trace!("-> {cmd}");
            let mut line = Vec::with_capacity(replies.len() + cmd.len() + 2);
            line.append(&mut replies);
            line.extend_from_slice(cmd.as_bytes());
            line.extend_from_slice(b"\r\n");
            transport.send(&line)
        });
        if let Err(err) = sent {
            self.close();
            return Err(err.into());
        }

        self.state = SessionState::AwaitingReply;
        let outcome = read_frame(transport, telnet, cmd.as_bytes(), timeout);
        self.last_activity = Some(Instant::now());

        let (framed, closed, parser) = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                self.close();
                return Err(err.into());
            }
        };
        if closed {
            debug!(endpoint = self.endpoint(), "controller closed the channel");
            self.close();
        } else {
            self.state = SessionState::Ready;
        }

        let Some((reply, rest)) = framed else {
            let received = parser.buffered();
            trace!("<- (partial) {:?}", String::from_utf8_lossy(received));
            if received.is_empty() {
                return Err(TrioError::NoResponse {
                    command: SmolStr::new(cmd),
                });
            }
            self.reporter.extra_output(&decode_text(received));
            return Err(TrioError::ProtocolParse {
                command: SmolStr::new(cmd),
                unmatched: String::from_utf8_lossy(received).into_owned(),
            });
        };
        trace!(
            "<- {:?} status={:?}",
            String::from_utf8_lossy(&reply.body),
            String::from_utf8_lossy(&reply.status)
        );
        if !closed {
            self.pending = rest;
        }
        if !reply.preamble.is_empty() {
            self.reporter.extra_output(&decode_text(&reply.preamble));
        }
        decode_reply(cmd, &reply)
    }

    pub fn command_int(&mut self, cmd: &str) -> Result<i64, TrioError> {
        let body = self.command(cmd)?;
        parse_int(cmd, &body)
    }

    pub fn command_int_within(&mut self, cmd: &str, timeout: Duration) -> Result<i64, TrioError> {
        let body = self.command_within(cmd, timeout)?;
        parse_int(cmd, &body)
    }

    pub fn command_float(&mut self, cmd: &str) -> Result<f64, TrioError> {
        let body = self.command(cmd)?;
        let text = String::from_utf8_lossy(&body);
        text.trim()
            .parse::<f64>()
            .map_err(|source| TrioError::InvalidFloat {
                command: SmolStr::new(cmd),
                reply: text.into_owned(),
                source,
            })
    }

    /// Reply body decoded as text with `\n` line endings.
    pub fn command_string(&mut self, cmd: &str) -> Result<String, TrioError> {
        let body = self.command(cmd)?;
        Ok(decode_text(&body))
    }

    pub fn command_string_within(
        &mut self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<String, TrioError> {
        let body = self.command_within(cmd, timeout)?;
        Ok(decode_text(&body))
    }

    /// Restarts the controller with `EX`, optionally waiting until it
    /// accepts a new session.
    pub fn restart(&mut self, wait: bool) -> Result<(), TrioError> {
        let exit_timeout = self.options.exit_timeout;
        match self.command_within("EX", exit_timeout) {
            Ok(_) => {}
            // The controller resets before finishing the frame.
            Err(TrioError::ProtocolParse { unmatched, .. }) if unmatched.starts_with("EX\r\n") => {}
            Err(err) => return Err(err),
        }
        self.reporter.status("Restarting (may take up to 30sec)");
        if !wait {
            self.close();
            return Ok(());
        }
        let attempts = self.options.restart_attempts;
        for attempt in 0..attempts {
            let reconnected = self
                .connect()
                .and_then(|()| self.command_string("AUTORUN"));
            match reconnected {
                Ok(autorun) => {
                    self.reporter.status("Restarted");
                    if !autorun.is_empty() {
                        self.reporter.status(&autorun);
                    }
                    return Ok(());
                }
                Err(err) => {
                    debug!(attempt, %err, "controller not back yet");
                    self.reporter.tick();
                    thread::sleep(self.options.restart_interval);
                }
            }
        }
        self.close();
        Err(TrioError::RestartTimeout { attempts })
    }

    /// Stops running programs. Never fails: a program may keep channel 0 busy
    /// and there is nothing better to do than carry on.
    pub fn halt(&mut self) {
        let timeout = self.options.halt_timeout;
        if let Err(err) = self.command_within("HALT", timeout) {
            warn!(%err, "halt did not complete cleanly");
        }
    }
}

type FrameOutcome = (Option<(crate::framing::RawReply, Vec<u8>)>, bool, ReplyParser);

fn read_frame<T: Transport>(
    transport: &mut T,
    telnet: &mut TelnetFilter,
    command: &[u8],
    timeout: Duration,
) -> io::Result<FrameOutcome> {
    let deadline = Instant::now() + timeout;
    let mut parser = ReplyParser::new(command);
    let mut chunk = [0u8; 4096];
    let mut data = Vec::new();
    let mut replies = Vec::new();
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok((None, false, parser));
        }
        match transport.recv(&mut chunk, deadline - now) {
            Ok(0) => return Ok((None, true, parser)),
            Ok(n) => {
                data.clear();
                replies.clear();
                telnet.feed(&chunk[..n], &mut data, &mut replies);
                if !replies.is_empty() {
                    transport.send(&replies)?;
                }
                if let Some(framed) = parser.push(&data) {
                    return Ok((Some(framed), false, parser));
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Ok((None, false, parser));
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

fn parse_int(cmd: &str, body: &[u8]) -> Result<i64, TrioError> {
    let text = String::from_utf8_lossy(body);
    text.trim()
        .parse::<i64>()
        .map_err(|source| TrioError::InvalidInt {
            command: SmolStr::new(cmd),
            reply: text.into_owned(),
            source,
        })
}

/// Decodes controller output, normalizing `\r\n` and `\r` to `\n`.
#[must_use]
pub fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_normalizes_line_endings() {
        assert_eq!(decode_text(b"a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn int_replies_tolerate_whitespace() {
        assert_eq!(parse_int("?MPE", b" 0\r\n").unwrap(), 0);
        let err = parse_int("?MPE", b"0.5").unwrap_err();
        assert!(matches!(err, TrioError::InvalidInt { .. }));
    }

    #[test]
    fn default_options_match_controller_timings() {
        let options = SessionOptions::default();
        assert_eq!(options.connect_retries, 3);
        assert_eq!(options.restart_attempts, 30);
        assert_eq!(options.halt_timeout, Duration::from_millis(500));
    }
}

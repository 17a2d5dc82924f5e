//! Inbound telnet filtering.
//!
//! The controller's command port speaks plain telnet. Negotiation requests are
//! refused (`DO`/`DONT` get `WONT`, `WILL`/`WONT` get `DONT`), subnegotiation
//! blocks are skipped, and NUL/XON bytes are dropped so only text reaches the
//! reply parser.

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;
const NUL: u8 = 0x00;
const XON: u8 = 0x11;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum State {
    #[default]
    Data,
    Iac,
    Option(u8),
    Sub,
    SubIac,
}

/// Stateful filter; sequences may be split across reads.
#[derive(Debug, Clone, Default)]
pub struct TelnetFilter {
    state: State,
}

impl TelnetFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends payload bytes to `data` and negotiation answers to `replies`.
    pub fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match self.state {
                State::Data => match byte {
                    IAC => State::Iac,
                    NUL | XON => State::Data,
                    _ => {
                        data.push(byte);
                        State::Data
                    }
                },
                State::Iac => match byte {
                    IAC => {
                        data.push(IAC);
                        State::Data
                    }
                    DO | DONT | WILL | WONT => State::Option(byte),
                    SB => State::Sub,
                    _ => State::Data,
                },
                State::Option(verb) => {
                    let answer = if matches!(verb, DO | DONT) { WONT } else { DONT };
                    replies.extend_from_slice(&[IAC, answer, byte]);
                    State::Data
                }
                State::Sub => {
                    if byte == IAC {
                        State::SubIac
                    } else {
                        State::Sub
                    }
                }
                State::SubIac => {
                    if byte == SE {
                        State::Data
                    } else {
                        State::Sub
                    }
                }
            };
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Data;
    }
}

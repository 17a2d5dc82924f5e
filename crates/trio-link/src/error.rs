//! Controller, protocol and workspace errors.

#![allow(missing_docs)]

use std::num::{ParseFloatError, ParseIntError};

use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised while talking to a controller or reconciling a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrioError {
    /// Handshake failed or the controller is locked by another session.
    #[error("could not connect to {endpoint}: {reason}")]
    Connection { endpoint: SmolStr, reason: SmolStr },

    /// Nothing came back before the timeout expired.
    #[error("no response to '{command}'")]
    NoResponse { command: SmolStr },

    /// Bytes came back but they never completed a reply frame.
    #[error("cannot parse answer to '{command}': {unmatched:?}")]
    ProtocolParse { command: SmolStr, unmatched: String },

    /// The controller reported an inline `%[COMMAND...` error.
    #[error("command error for '{command}': {marker}")]
    Command { command: SmolStr, marker: SmolStr },

    /// The reply frame ended with an unexpected control token.
    #[error("bad return code {code} for '{command}' (reply: {reply:?})")]
    BadReturnCode {
        command: SmolStr,
        code: SmolStr,
        reply: String,
    },

    /// Reply body is not an integer.
    #[error("reply to '{command}' is not an integer: {reply:?}")]
    InvalidInt {
        command: SmolStr,
        reply: String,
        #[source]
        source: ParseIntError,
    },

    /// Reply body is not a number.
    #[error("reply to '{command}' is not a number: {reply:?}")]
    InvalidFloat {
        command: SmolStr,
        reply: String,
        #[source]
        source: ParseFloatError,
    },

    /// Reply parsed but holds a value outside the expected range.
    #[error("unexpected value {value} in reply to '{command}'")]
    UnexpectedValue { command: SmolStr, value: i64 },

    /// Only ASCII can be sent on the command channel.
    #[error("command contains non-ASCII characters: {0:?}")]
    NonAsciiCommand(String),

    /// `FLASH_STATUS` never cleared after committing a program.
    #[error("flash status never cleared for {program}, program might be corrupted")]
    FlashCommitTimeout { program: SmolStr },

    /// The controller did not come back after `EX`.
    #[error("controller did not come back after restart ({attempts} attempts)")]
    RestartTimeout { attempts: u32 },

    /// A directory listing row did not match the table layout.
    #[error("could not parse dir line: {line:?}")]
    DirectoryParse { line: String },

    /// Reconciliation was requested before loading a manifest.
    #[error("workspace is empty, please load a workspace")]
    EmptyWorkspace,

    /// File extension does not map to a program type.
    #[error("file {0} extension is unknown")]
    UnknownExtension(SmolStr),

    /// Numeric program type does not map to a known extension.
    #[error("unknown program type {0}")]
    UnknownProgramType(i64),

    /// The controller has no program of that name.
    #[error("controller is missing program {0}")]
    MissingProgram(SmolStr),

    /// The program on the controller is not of the requested type.
    #[error("remote program {program} is of wrong type {found}")]
    WrongRemoteType { program: SmolStr, found: i64 },

    /// A step of a program upload failed.
    #[error("error writing {program} program: {source}")]
    WriteProgram {
        program: SmolStr,
        #[source]
        source: Box<TrioError>,
    },

    /// Endpoint string cannot be resolved.
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(SmolStr),

    /// Configuration file error.
    #[error("invalid config '{0}'")]
    InvalidConfig(SmolStr),

    /// Manifest read/write or decode error.
    #[error("invalid workspace manifest '{0}'")]
    Manifest(SmolStr),

    /// File system or socket error.
    #[error("i/o error '{0}'")]
    Io(SmolStr),
}

impl TrioError {
    /// Errors that leave the command channel usable for a retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoResponse { .. } | Self::ProtocolParse { .. })
    }
}

impl From<std::io::Error> for TrioError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_program_error_keeps_inner_message() {
        let err = TrioError::WriteProgram {
            program: "MAIN".into(),
            source: Box::new(TrioError::NoResponse {
                command: "COMPILE".into(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "error writing MAIN program: no response to 'COMPILE'"
        );
    }

    #[test]
    fn only_exchange_failures_are_retryable() {
        assert!(TrioError::NoResponse {
            command: "?1".into()
        }
        .is_retryable());
        assert!(!TrioError::EmptyWorkspace.is_retryable());
    }
}

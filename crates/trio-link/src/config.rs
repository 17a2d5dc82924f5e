//! `trio.toml` configuration: named controllers and protocol tuning.

#![allow(missing_docs)]

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use smol_str::SmolStr;

use crate::controller::WriteOptions;
use crate::error::TrioError;
use crate::session::{SessionOptions, TcpConnector};

/// Environment variable naming the controller endpoint.
pub const ENDPOINT_ENV: &str = "TRIO_LINK_IP";

pub const DEFAULT_CONFIG_FILE: &str = "trio.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerProfile {
    pub name: SmolStr,
    pub endpoint: SmolStr,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrioConfig {
    pub session: SessionOptions,
    pub write: WriteOptions,
    pub controllers: IndexMap<SmolStr, ControllerProfile>,
    /// Controller used when none is named on the command line.
    pub default_controller: Option<SmolStr>,
}

impl TrioConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrioError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| TrioError::InvalidConfig(format!("{}: {err}", path.display()).into()))?;
        Self::from_toml(&text)
            .map_err(|err| match err {
                TrioError::InvalidConfig(reason) => {
                    TrioError::InvalidConfig(format!("{}: {reason}", path.display()).into())
                }
                other => other,
            })
    }

    pub fn from_toml(text: &str) -> Result<Self, TrioError> {
        let raw: TrioToml =
            toml::from_str(text).map_err(|err| TrioError::InvalidConfig(err.to_string().into()))?;
        raw.into_config()
    }

    /// Loads `path` when given, else `trio.toml` from the working directory
    /// if there is one.
    pub fn discover(path: Option<&Path>) -> Result<Self, TrioError> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::load(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    /// Picks the endpoint: an explicit address, then a named controller,
    /// then the environment, then the configured default.
    pub fn resolve_endpoint(
        &self,
        ip: Option<&str>,
        controller: Option<&str>,
        env: Option<&str>,
    ) -> Result<TcpConnector, TrioError> {
        if let Some(ip) = ip {
            return TcpConnector::parse(ip);
        }
        if let Some(name) = controller {
            return self.named(name);
        }
        if let Some(endpoint) = env.filter(|value| !value.trim().is_empty()) {
            return TcpConnector::parse(endpoint);
        }
        if let Some(name) = &self.default_controller {
            return self.named(name);
        }
        Err(TrioError::InvalidConfig(
            format!(
                "no controller given (use --ip, --controller or {ENDPOINT_ENV})"
            )
            .into(),
        ))
    }

    fn named(&self, name: &str) -> Result<TcpConnector, TrioError> {
        let profile = self.controllers.get(name).ok_or_else(|| {
            TrioError::InvalidConfig(format!("unknown controller '{name}'").into())
        })?;
        TcpConnector::parse(&profile.endpoint)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TrioToml {
    #[serde(default)]
    session: SessionSection,
    #[serde(default)]
    controllers: IndexMap<String, ControllerSection>,
    default_controller: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionSection {
    connect_timeout_ms: Option<u64>,
    command_timeout_ms: Option<u64>,
    connect_retries: Option<u32>,
    restart_attempts: Option<u32>,
    restart_interval_ms: Option<u64>,
    halt_timeout_ms: Option<u64>,
    flash_poll_attempts: Option<u32>,
    flash_poll_interval_ms: Option<u64>,
    compile_timeout_ms: Option<u64>,
    compile_all_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControllerSection {
    endpoint: String,
}

fn millis(value: Option<u64>, default: Duration, key: &str) -> Result<Duration, TrioError> {
    match value {
        Some(0) => Err(TrioError::InvalidConfig(
            format!("session.{key} must be greater than zero").into(),
        )),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}

impl TrioToml {
    fn into_config(self) -> Result<TrioConfig, TrioError> {
        let session_defaults = SessionOptions::default();
        let write_defaults = WriteOptions::default();
        let section = self.session;
        let session = SessionOptions {
            connect_timeout: millis(
                section.connect_timeout_ms,
                session_defaults.connect_timeout,
                "connect_timeout_ms",
            )?,
            command_timeout: millis(
                section.command_timeout_ms,
                session_defaults.command_timeout,
                "command_timeout_ms",
            )?,
            connect_retries: section
                .connect_retries
                .unwrap_or(session_defaults.connect_retries),
            restart_attempts: section
                .restart_attempts
                .unwrap_or(session_defaults.restart_attempts),
            restart_interval: millis(
                section.restart_interval_ms,
                session_defaults.restart_interval,
                "restart_interval_ms",
            )?,
            halt_timeout: millis(
                section.halt_timeout_ms,
                session_defaults.halt_timeout,
                "halt_timeout_ms",
            )?,
            exit_timeout: session_defaults.exit_timeout,
        };
        let flash_poll_attempts = section
            .flash_poll_attempts
            .unwrap_or(write_defaults.flash_poll_attempts);
        if flash_poll_attempts == 0 {
            return Err(TrioError::InvalidConfig(
                "session.flash_poll_attempts must be greater than zero".into(),
            ));
        }
        let write = WriteOptions {
            flash_poll_attempts,
            flash_poll_interval: section
                .flash_poll_interval_ms
                .map_or(write_defaults.flash_poll_interval, Duration::from_millis),
            compile_timeout: millis(
                section.compile_timeout_ms,
                write_defaults.compile_timeout,
                "compile_timeout_ms",
            )?,
            compile_all_timeout: millis(
                section.compile_all_timeout_ms,
                write_defaults.compile_all_timeout,
                "compile_all_timeout_ms",
            )?,
        };

        let mut controllers = IndexMap::new();
        for (name, controller) in self.controllers {
            TcpConnector::parse(&controller.endpoint).map_err(|_| {
                TrioError::InvalidConfig(
                    format!(
                        "controllers.{name}.endpoint is invalid: '{}'",
                        controller.endpoint
                    )
                    .into(),
                )
            })?;
            let name = SmolStr::new(name);
            controllers.insert(
                name.clone(),
                ControllerProfile {
                    name,
                    endpoint: SmolStr::new(controller.endpoint),
                },
            );
        }
        let default_controller = self.default_controller.map(SmolStr::new);
        if let Some(name) = &default_controller {
            if !controllers.contains_key(name) {
                return Err(TrioError::InvalidConfig(
                    format!("default_controller '{name}' is not defined").into(),
                ));
            }
        }
        Ok(TrioConfig {
            session,
            write,
            controllers,
            default_controller,
        })
    }
}

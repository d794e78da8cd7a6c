use std::path::PathBuf;
use thiserror::Error;

use crate::devices::DeviceType;

/// Failures of a single exchange with the backend engine.
///
/// None of these is fatal to the controller; callers log them and keep the
/// last known state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("backend unreachable: {0}")]
    Transport(String),

    #[error("malformed response to {command}: {reason}")]
    Decode { command: String, reason: String },

    #[error("backend rejected {command}: {reason}")]
    Command { command: String, reason: String },

    #[error("a {0} selection is already in flight")]
    Busy(DeviceType),

    #[error("a session transition is already in flight")]
    TransitionBusy,
}

impl ChannelError {
    pub fn transport(reason: impl ToString) -> Self {
        ChannelError::Transport(reason.to_string())
    }

    pub fn decode(command: impl ToString, reason: impl ToString) -> Self {
        ChannelError::Decode {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn command(command: impl ToString, reason: impl ToString) -> Self {
        ChannelError::Command {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Transport(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode config: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),

    #[error("no config directory available on this platform")]
    NoConfigDir,
}

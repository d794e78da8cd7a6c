//! Newline-delimited JSON envelopes spoken between controller and engine.
//!
//! Request  (controller → engine): `{"id": 7, "cmd": "set_device", "args": {...}}`
//! Response (engine → controller): `{"id": 7, "ok": null}` or `{"id": 7, "error": "..."}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Args, Command};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub cmd: Command,
    #[serde(default)]
    pub args: Args,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Value),
    Error(String),
}

impl Response {
    pub fn ok(id: u64, value: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Ok(value),
        }
    }

    pub fn error(id: u64, reason: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Error(reason.into()),
        }
    }
}

/// Encodes one envelope as a single line, terminator included.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

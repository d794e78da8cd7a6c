//! Typed request/response transport to the backend audio engine.
//!
//! Every call may mutate real hardware state on the backend, so nothing in
//! this module retries. Callers decide what to do with a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ChannelError;

pub mod memory;
pub mod protocol;
pub mod server;
pub mod tcp;

pub use memory::InMemoryBackend;
pub use server::serve;
pub use tcp::TcpChannel;

/// Flat key/value arguments of one command.
pub type Args = Map<String, Value>;

/// The fixed command taxonomy understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    GetDevices,
    SetDevice,
    Start,
    Stop,
    IsRunning,
    ManageWindow,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::GetDevices,
        Command::SetDevice,
        Command::Start,
        Command::Stop,
        Command::IsRunning,
        Command::ManageWindow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::GetDevices => "get_devices",
            Command::SetDevice => "set_device",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::IsRunning => "is_running",
            Command::ManageWindow => "manage_window",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport seam between the controller and the backend process.
///
/// Implementations return the raw response payload; schema checks happen in
/// [`crate::client::BackendClient`].
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn invoke(&self, command: Command, args: Args) -> Result<Value, ChannelError>;
}

#[async_trait]
impl<T: CommandChannel + ?Sized> CommandChannel for std::sync::Arc<T> {
    async fn invoke(&self, command: Command, args: Args) -> Result<Value, ChannelError> {
        (**self).invoke(command, args).await
    }
}

/// Builds an [`Args`] map from `key => value` pairs.
#[macro_export]
macro_rules! args {
    () => { $crate::channel::Args::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::channel::Args::new();
        $( map.insert(($key).to_string(), ::serde_json::json!($value)); )+
        map
    }};
}

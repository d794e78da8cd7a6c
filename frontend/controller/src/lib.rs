//! Device and session controller for the Voice backend audio engine.
//!
//! The engine process owns the audio devices; this crate keeps a UI-facing
//! view of "which devices are active" and "is the session running" in step
//! with it, and forwards user intents as typed commands.

pub mod channel;
pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod devices;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod registry;
pub mod scheduler;
pub mod selection;

pub use channel::{Args, Command, CommandChannel, InMemoryBackend, TcpChannel};
pub use client::BackendClient;
pub use config::ControllerConfig;
pub use controller::{Controller, ControllerView};
pub use devices::{DeviceDescriptor, DeviceSnapshot, DeviceType, SessionState, WindowState};
pub use error::{ChannelError, ConfigError};
pub use selection::derive_active;

/// Entry point of the `voice-ctl` binary.
pub fn run() -> anyhow::Result<()> {
    cli::run()
}

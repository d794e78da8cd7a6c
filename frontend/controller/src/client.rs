//! Typed view of the command taxonomy.
//!
//! Each method sends exactly one command and validates the reply against the
//! schema for that command. Anything unexpected becomes a
//! [`ChannelError::Decode`] instead of leaking loosely-typed JSON upwards.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::args;
use crate::channel::{Command, CommandChannel};
use crate::devices::{DeviceDescriptor, DeviceSnapshot, DeviceType, WindowState};
use crate::error::ChannelError;

#[derive(Clone)]
pub struct BackendClient {
    channel: Arc<dyn CommandChannel>,
}

impl BackendClient {
    pub fn new(channel: Arc<dyn CommandChannel>) -> Self {
        Self { channel }
    }

    pub async fn get_devices(&self) -> Result<DeviceSnapshot, ChannelError> {
        let value = self.channel.invoke(Command::GetDevices, args!()).await?;
        let devices: Vec<DeviceDescriptor> = decode_payload(Command::GetDevices, value)?;
        let snapshot = DeviceSnapshot::new(devices);
        snapshot.warn_on_violations();
        Ok(snapshot)
    }

    pub async fn set_device(&self, device_type: DeviceType, device_name: &str) -> Result<(), ChannelError> {
        let value = self
            .channel
            .invoke(
                Command::SetDevice,
                args! { "device_type" => device_type.as_str(), "device_name" => device_name },
            )
            .await?;
        decode_ack(Command::SetDevice, value)
    }

    pub async fn start(&self) -> Result<(), ChannelError> {
        let value = self.channel.invoke(Command::Start, args!()).await?;
        decode_ack(Command::Start, value)
    }

    pub async fn stop(&self) -> Result<(), ChannelError> {
        let value = self.channel.invoke(Command::Stop, args!()).await?;
        decode_ack(Command::Stop, value)
    }

    pub async fn is_running(&self) -> Result<bool, ChannelError> {
        let value = self.channel.invoke(Command::IsRunning, args!()).await?;
        decode_payload(Command::IsRunning, value)
    }

    pub async fn manage_window(&self, state: WindowState) -> Result<(), ChannelError> {
        let value = self
            .channel
            .invoke(Command::ManageWindow, args! { "state" => state.as_str() })
            .await?;
        decode_ack(Command::ManageWindow, value)
    }
}

/// Decodes a payload into `T`.
///
/// Older engines answer with the JSON document serialized into a string; such
/// a payload is parsed once and then held to the same schema.
pub fn decode_payload<T: DeserializeOwned>(command: Command, value: Value) -> Result<T, ChannelError> {
    let value = match value {
        Value::String(encoded) => serde_json::from_str::<Value>(&encoded)
            .map_err(|e| ChannelError::decode(command, format!("string payload is not JSON: {}", e)))?,
        other => other,
    };
    serde_json::from_value(value).map_err(|e| ChannelError::decode(command, e))
}

/// An acknowledgement carries no data; only `null` is accepted.
pub fn decode_ack(command: Command, value: Value) -> Result<(), ChannelError> {
    match value {
        Value::Null => Ok(()),
        other => Err(ChannelError::decode(
            command,
            format!("expected acknowledgement, got {}", other),
        )),
    }
}

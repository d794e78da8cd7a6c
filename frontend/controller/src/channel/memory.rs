//! Simulated backend engine kept entirely in memory.
//!
//! Behaves like the real engine from the controller's point of view: it owns
//! the device table and the session flag, enforces one active device per type
//! and rejects commands it cannot honour. It is what the engine helper serves
//! and what the controller tests run against.

use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Args, Command, CommandChannel};
use crate::devices::{DeviceDescriptor, DeviceType, WindowState};
use crate::error::ChannelError;

#[derive(Debug, Default)]
struct EngineState {
    devices: Vec<DeviceDescriptor>,
    running: bool,
    last_window_state: Option<WindowState>,
    calls: HashMap<Command, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<EngineState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryBackend {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        let backend = Self::default();
        backend.lock().devices = devices;
        backend
    }

    /// A small device table resembling a laptop with a USB headset plugged in.
    pub fn with_demo_devices() -> Self {
        Self::new(vec![
            DeviceDescriptor::new("Built-in Microphone", DeviceType::Input)
                .active(true)
                .default_device(true),
            DeviceDescriptor::new("USB Headset Microphone", DeviceType::Input),
            DeviceDescriptor::new("Built-in Speakers", DeviceType::Output)
                .active(true)
                .default_device(true),
            DeviceDescriptor::new("USB Headset", DeviceType::Output),
        ])
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // A poisoned table is still a consistent table for a simulation.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Inspection and fault injection
    // ------------------------------------------------------------------

    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.lock().devices.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn last_window_state(&self) -> Option<WindowState> {
        self.lock().last_window_state
    }

    /// Number of invocations received for `command`, including failed ones.
    pub fn calls(&self, command: Command) -> usize {
        self.lock().calls.get(&command).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// While offline every invocation fails with a transport error, as if the
    /// engine process were gone.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Flips the session flag behind the controller's back (external stop,
    /// crash and restart).
    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    pub fn plug(&self, device: DeviceDescriptor) {
        self.lock().devices.push(device);
    }

    /// Removes a device. When it was active, the default device of the same
    /// type (if any remains) takes over.
    pub fn unplug(&self, device_type: DeviceType, name: &str) {
        let mut state = self.lock();
        let removed_active = state
            .devices
            .iter()
            .any(|d| d.device_type == device_type && d.name == name && d.active);
        state
            .devices
            .retain(|d| !(d.device_type == device_type && d.name == name));

        if removed_active {
            if let Some(fallback) = state
                .devices
                .iter_mut()
                .find(|d| d.device_type == device_type && d.default)
            {
                info!("Engine: {} '{}' unplugged, falling back to '{}'", device_type, name, fallback.name);
                fallback.active = true;
            }
        }
    }

    // ------------------------------------------------------------------
    // Command handlers
    // ------------------------------------------------------------------

    fn handle(&self, command: Command, args: &Args) -> Result<Value, ChannelError> {
        let mut state = self.lock();
        *state.calls.entry(command).or_insert(0) += 1;

        if self.offline.load(Ordering::SeqCst) {
            return Err(ChannelError::transport("engine is not running"));
        }

        match command {
            Command::GetDevices => {
                serde_json::to_value(&state.devices).map_err(|e| ChannelError::decode(command, e))
            }
            Command::SetDevice => {
                let device_type: DeviceType = required_arg(command, args, "device_type")?;
                let device_name: String = required_arg(command, args, "device_name")?;

                if !state
                    .devices
                    .iter()
                    .any(|d| d.device_type == device_type && d.name == device_name)
                {
                    return Err(ChannelError::command(
                        command,
                        format!("device not found: {}", device_name),
                    ));
                }

                for device in state.devices.iter_mut().filter(|d| d.device_type == device_type) {
                    device.active = device.name == device_name;
                }
                debug!("Engine: active {} is now '{}'", device_type, device_name);
                Ok(Value::Null)
            }
            Command::Start => {
                if state.running {
                    return Err(ChannelError::command(command, "session already running"));
                }
                for device_type in DeviceType::ALL {
                    if !state.devices.iter().any(|d| d.device_type == device_type && d.active) {
                        return Err(ChannelError::command(
                            command,
                            format!("no active {} device", device_type),
                        ));
                    }
                }
                state.running = true;
                info!("Engine: session started");
                Ok(Value::Null)
            }
            Command::Stop => {
                if !state.running {
                    return Err(ChannelError::command(command, "session not running"));
                }
                state.running = false;
                info!("Engine: session stopped");
                Ok(Value::Null)
            }
            Command::IsRunning => Ok(Value::Bool(state.running)),
            Command::ManageWindow => {
                let window_state: WindowState = required_arg(command, args, "state")?;
                state.last_window_state = Some(window_state);
                Ok(Value::Null)
            }
        }
    }
}

fn required_arg<T: serde::de::DeserializeOwned>(
    command: Command,
    args: &Args,
    key: &str,
) -> Result<T, ChannelError> {
    let value = args
        .get(key)
        .cloned()
        .ok_or_else(|| ChannelError::command(command, format!("missing argument '{}'", key)))?;
    serde_json::from_value(value)
        .map_err(|e| ChannelError::command(command, format!("invalid argument '{}': {}", key, e)))
}

#[async_trait]
impl CommandChannel for InMemoryBackend {
    async fn invoke(&self, command: Command, args: Args) -> Result<Value, ChannelError> {
        self.handle(command, &args)
    }
}

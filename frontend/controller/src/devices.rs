use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Classification of an audio device as seen by the backend engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Input,
    Output,
}

impl DeviceType {
    pub const ALL: [DeviceType; 2] = [DeviceType::Input, DeviceType::Output];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Input => "Input",
            DeviceType::Output => "Output",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device as reported by a single `get_devices` fetch.
///
/// Descriptors are never mutated after decoding; every fetch replaces them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub device_type: DeviceType,
    /// Currently in use by the backend for its type
    pub active: bool,
    /// OS-designated default for its type
    pub default: bool,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            name: name.into(),
            device_type,
            active: false,
            default: false,
        }
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn default_device(mut self, default: bool) -> Self {
        self.default = default;
        self
    }
}

/// Ordered device list returned by one fetch. Order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeviceSnapshot {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceSnapshot {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter()
    }

    pub fn devices_of(&self, device_type: DeviceType) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices
            .iter()
            .filter(move |device| device.device_type == device_type)
    }

    pub fn find(&self, device_type: DeviceType, name: &str) -> Option<&DeviceDescriptor> {
        self.devices_of(device_type).find(|device| device.name == name)
    }

    /// Returns the descriptors that break the per-type invariants (more than
    /// one active device, or a repeated name). Empty for a well-formed snapshot.
    pub fn violations(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for device_type in DeviceType::ALL {
            let active: Vec<&str> = self
                .devices_of(device_type)
                .filter(|device| device.active)
                .map(|device| device.name.as_str())
                .collect();
            if active.len() > 1 {
                problems.push(format!(
                    "{} {} devices marked active: {:?}",
                    active.len(),
                    device_type,
                    active
                ));
            }

            let mut seen = HashSet::new();
            for device in self.devices_of(device_type) {
                if !seen.insert(device.name.as_str()) {
                    problems.push(format!("duplicate {} device name '{}'", device_type, device.name));
                }
            }
        }

        problems
    }

    /// Logs every invariant violation. The snapshot is kept as-is either way.
    pub(crate) fn warn_on_violations(&self) {
        for problem in self.violations() {
            warn!("Device snapshot from backend is inconsistent: {}", problem);
        }
    }
}

impl From<Vec<DeviceDescriptor>> for DeviceSnapshot {
    fn from(devices: Vec<DeviceDescriptor>) -> Self {
        Self::new(devices)
    }
}

impl IntoIterator for DeviceSnapshot {
    type Item = DeviceDescriptor;
    type IntoIter = std::vec::IntoIter<DeviceDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

/// Backend-owned audio routing session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Stopped,
    Running,
}

impl SessionState {
    pub fn from_running(running: bool) -> Self {
        if running {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Stopped => f.write_str("stopped"),
            SessionState::Running => f.write_str("running"),
        }
    }
}

/// Window action forwarded to the backend by the window-chrome buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowState {
    Minimize,
    Close,
}

impl WindowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowState::Minimize => "Minimize",
            WindowState::Close => "Close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_wire_format() {
        let device = DeviceDescriptor::new("Mic1", DeviceType::Input)
            .active(true)
            .default_device(true);
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "Mic1",
                "device_type": "Input",
                "active": true,
                "default": true
            })
        );
    }

    #[test]
    fn test_unknown_device_type_is_rejected() {
        let raw = r#"{"name":"X","device_type":"Loopback","active":false,"default":false}"#;
        assert!(serde_json::from_str::<DeviceDescriptor>(raw).is_err());
    }

    #[test]
    fn test_violations_detects_two_actives_and_duplicates() {
        let snapshot = DeviceSnapshot::new(vec![
            DeviceDescriptor::new("Mic1", DeviceType::Input).active(true),
            DeviceDescriptor::new("Mic2", DeviceType::Input).active(true),
            DeviceDescriptor::new("Spk1", DeviceType::Output),
            DeviceDescriptor::new("Spk1", DeviceType::Output),
        ]);
        let problems = snapshot.violations();
        assert_eq!(problems.len(), 2, "{:?}", problems);
    }

    #[test]
    fn test_same_name_across_types_is_fine() {
        let snapshot = DeviceSnapshot::new(vec![
            DeviceDescriptor::new("Headset", DeviceType::Input).active(true),
            DeviceDescriptor::new("Headset", DeviceType::Output).active(true),
        ]);
        assert!(snapshot.violations().is_empty());
    }

    #[test]
    fn test_session_state_from_running() {
        assert_eq!(SessionState::from_running(true), SessionState::Running);
        assert_eq!(SessionState::from_running(false), SessionState::Stopped);
        assert_eq!(SessionState::default(), SessionState::Stopped);
    }
}

//! Active selection tracker.
//!
//! The active device shown for a type is always derived from the latest
//! registry snapshot. A requested name is only ever used to build the
//! `set_device` command; it is never displayed.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::client::BackendClient;
use crate::devices::{DeviceDescriptor, DeviceSnapshot, DeviceType};
use crate::error::ChannelError;
use crate::registry::DeviceRegistry;

/// Returns the first descriptor of `device_type` marked active.
pub fn derive_active(snapshot: &DeviceSnapshot, device_type: DeviceType) -> Option<DeviceDescriptor> {
    snapshot
        .devices_of(device_type)
        .find(|device| device.active)
        .cloned()
}

/// An in-flight `set_device` for one device type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub device_name: String,
    pub started_at: Instant,
}

type PendingSlots = Arc<Mutex<HashMap<DeviceType, PendingOperation>>>;

/// Frees the pending slot for its type when dropped, whether the commit
/// finished, timed out or was cancelled.
struct PendingGuard {
    slots: PendingSlots,
    device_type: DeviceType,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock_slots(&self.slots).remove(&self.device_type);
    }
}

fn lock_slots(slots: &PendingSlots) -> MutexGuard<'_, HashMap<DeviceType, PendingOperation>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SelectionTracker {
    client: BackendClient,
    registry: Arc<DeviceRegistry>,
    pending: PendingSlots,
    commit_timeout: Duration,
}

impl SelectionTracker {
    pub fn new(client: BackendClient, registry: Arc<DeviceRegistry>, commit_timeout: Duration) -> Self {
        Self {
            client,
            registry,
            pending: Arc::new(Mutex::new(HashMap::new())),
            commit_timeout,
        }
    }

    /// The device the backend reports as active for `device_type`.
    pub fn selected(&self, device_type: DeviceType) -> Option<DeviceDescriptor> {
        derive_active(&self.registry.latest(), device_type)
    }

    pub fn pending(&self, device_type: DeviceType) -> Option<PendingOperation> {
        lock_slots(&self.pending).get(&device_type).cloned()
    }

    pub fn is_pending(&self, device_type: DeviceType) -> bool {
        lock_slots(&self.pending).contains_key(&device_type)
    }

    /// Registers a selection for `device_type` without contacting the backend.
    ///
    /// Fails with [`ChannelError::Busy`] when one is already in flight for
    /// that type. The returned handle keeps the slot until it is committed or
    /// dropped.
    pub fn begin(&self, device_type: DeviceType, device_name: &str) -> Result<PendingSelection, ChannelError> {
        let mut slots = lock_slots(&self.pending);
        if let Some(existing) = slots.get(&device_type) {
            debug!(
                "Selection of {} '{}' dropped: '{}' still in flight",
                device_type, device_name, existing.device_name
            );
            return Err(ChannelError::Busy(device_type));
        }
        slots.insert(
            device_type,
            PendingOperation {
                device_name: device_name.to_string(),
                started_at: Instant::now(),
            },
        );
        Ok(PendingSelection {
            device_type,
            device_name: device_name.to_string(),
            _guard: PendingGuard {
                slots: self.pending.clone(),
                device_type,
            },
        })
    }

    /// Sends `set_device` for a registered selection, then refreshes the
    /// registry whatever the outcome so the displayed selection reflects what
    /// the backend actually did. Returns the `set_device` result.
    pub async fn commit(&self, selection: PendingSelection) -> Result<(), ChannelError> {
        let PendingSelection {
            device_type,
            device_name,
            _guard: guard,
        } = selection;

        info!("Selecting {} device '{}'", device_type, device_name);
        let commit = match tokio::time::timeout(
            self.commit_timeout,
            self.client.set_device(device_type, &device_name),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ChannelError::transport(format!(
                "set_device timed out after {}ms",
                self.commit_timeout.as_millis()
            ))),
        };
        drop(guard);

        if let Err(e) = &commit {
            warn!("Selecting {} device '{}' failed: {}", device_type, device_name, e);
        }

        if self.registry.list_devices().await.is_ok() {
            match self.selected(device_type) {
                Some(active) if active.name == device_name => {
                    debug!("Backend confirmed {} device '{}'", device_type, active.name);
                }
                Some(active) => {
                    info!(
                        "Backend kept {} device '{}' instead of requested '{}'",
                        device_type, active.name, device_name
                    );
                }
                None => info!("Backend reports no active {} device", device_type),
            }
        }

        commit
    }

    /// Asks the backend to make `device_name` the active device of its type.
    ///
    /// A second request for the same type while one is in flight fails with
    /// [`ChannelError::Busy`] without reaching the backend.
    pub async fn select(&self, device_type: DeviceType, device_name: &str) -> Result<(), ChannelError> {
        let selection = self.begin(device_type, device_name)?;
        self.commit(selection).await
    }
}

/// A registered, not yet committed selection.
pub struct PendingSelection {
    device_type: DeviceType,
    device_name: String,
    _guard: PendingGuard,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Args, Command, CommandChannel, InMemoryBackend};
    use async_trait::async_trait;
    use serde_json::Value;

    fn tracker_for(engine: &InMemoryBackend) -> SelectionTracker {
        let client = BackendClient::new(Arc::new(engine.clone()));
        let registry = Arc::new(DeviceRegistry::new(client.clone()));
        SelectionTracker::new(client, registry, Duration::from_secs(2))
    }

    #[test]
    fn test_derive_active_picks_first_match() {
        let snapshot = DeviceSnapshot::new(vec![
            DeviceDescriptor::new("Spk0", DeviceType::Output),
            DeviceDescriptor::new("Mic1", DeviceType::Input).active(true),
            DeviceDescriptor::new("Mic2", DeviceType::Input).active(true),
        ]);
        assert_eq!(
            derive_active(&snapshot, DeviceType::Input).map(|d| d.name),
            Some("Mic1".to_string())
        );
        assert_eq!(derive_active(&snapshot, DeviceType::Output), None);
    }

    #[test]
    fn test_derive_active_ignores_default_flag() {
        let snapshot = DeviceSnapshot::new(vec![
            DeviceDescriptor::new("Spk1", DeviceType::Output).default_device(true),
        ]);
        assert_eq!(derive_active(&snapshot, DeviceType::Output), None);
    }

    #[tokio::test]
    async fn test_select_confirmed_by_refresh() {
        let engine = InMemoryBackend::new(vec![
            DeviceDescriptor::new("Mic1", DeviceType::Input).active(true).default_device(true),
            DeviceDescriptor::new("Spk1", DeviceType::Output).default_device(true),
        ]);
        let tracker = tracker_for(&engine);

        tracker.select(DeviceType::Output, "Spk1").await.unwrap();

        assert_eq!(tracker.selected(DeviceType::Output).map(|d| d.name), Some("Spk1".to_string()));
        assert_eq!(tracker.selected(DeviceType::Input).map(|d| d.name), Some("Mic1".to_string()));
        assert!(!tracker.is_pending(DeviceType::Output));
    }

    #[tokio::test]
    async fn test_rejected_select_still_refreshes() {
        let engine = InMemoryBackend::with_demo_devices();
        let tracker = tracker_for(&engine);

        let err = tracker.select(DeviceType::Input, "Ghost Mic").await.unwrap_err();
        assert!(matches!(err, ChannelError::Command { .. }));
        assert_eq!(engine.calls(Command::GetDevices), 1);
        assert_eq!(
            tracker.selected(DeviceType::Input).map(|d| d.name),
            Some("Built-in Microphone".to_string())
        );
    }

    #[tokio::test]
    async fn test_pending_slot_is_per_type() {
        let engine = InMemoryBackend::with_demo_devices();
        let tracker = tracker_for(&engine);

        let _input = tracker.begin(DeviceType::Input, "USB Headset Microphone").unwrap();
        assert_eq!(
            tracker.begin(DeviceType::Input, "Built-in Microphone").err(),
            Some(ChannelError::Busy(DeviceType::Input))
        );
        assert!(tracker.begin(DeviceType::Output, "USB Headset").is_ok());
        assert_eq!(
            tracker.pending(DeviceType::Input).map(|p| p.device_name),
            Some("USB Headset Microphone".to_string())
        );
    }

    /// Never answers `set_device`; everything else goes to the engine.
    struct StalledSetDevice(InMemoryBackend);

    #[async_trait]
    impl CommandChannel for StalledSetDevice {
        async fn invoke(&self, command: Command, args: Args) -> Result<Value, ChannelError> {
            if command == Command::SetDevice {
                std::future::pending::<()>().await;
            }
            self.0.invoke(command, args).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_commit_clears_slot_and_refreshes() {
        let engine = InMemoryBackend::with_demo_devices();
        let client = BackendClient::new(Arc::new(StalledSetDevice(engine.clone())));
        let registry = Arc::new(DeviceRegistry::new(client.clone()));
        let tracker = SelectionTracker::new(client, registry.clone(), Duration::from_millis(100));

        let err = tracker.select(DeviceType::Output, "USB Headset").await.unwrap_err();

        assert!(matches!(err, ChannelError::Transport(_)), "{:?}", err);
        assert!(!tracker.is_pending(DeviceType::Output));
        assert_eq!(engine.calls(Command::GetDevices), 1);
        assert_eq!(registry.latest().len(), 4);
        assert_eq!(
            tracker.selected(DeviceType::Output).map(|d| d.name),
            Some("Built-in Speakers".to_string())
        );

        // The slot is free again.
        assert!(tracker.begin(DeviceType::Output, "USB Headset").is_ok());
    }

    #[tokio::test]
    async fn test_busy_select_sends_nothing() {
        let engine = InMemoryBackend::with_demo_devices();
        let tracker = tracker_for(&engine);

        let _held = tracker.begin(DeviceType::Input, "USB Headset Microphone").unwrap();
        let err = tracker.select(DeviceType::Input, "Built-in Microphone").await.unwrap_err();
        assert_eq!(err, ChannelError::Busy(DeviceType::Input));
        assert_eq!(engine.total_calls(), 0);
    }
}

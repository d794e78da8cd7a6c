//! Device registry client: fetches the backend's device list and keeps the
//! latest snapshot.
//!
//! A failed fetch never clears what we already know; the cached snapshot is
//! only ever replaced by a newer successful one. Fetches are numbered when
//! issued, so a slow reply cannot overwrite the result of a later fetch.

use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::client::BackendClient;
use crate::devices::{DeviceDescriptor, DeviceSnapshot, DeviceType};
use crate::error::ChannelError;

struct Cached {
    seq: u64,
    snapshot: Arc<DeviceSnapshot>,
}

pub struct DeviceRegistry {
    client: BackendClient,
    issued: AtomicU64,
    latest: Mutex<Cached>,
}

impl DeviceRegistry {
    pub fn new(client: BackendClient) -> Self {
        Self {
            client,
            issued: AtomicU64::new(0),
            latest: Mutex::new(Cached {
                seq: 0,
                snapshot: Arc::new(DeviceSnapshot::default()),
            }),
        }
    }

    /// Fetches a fresh snapshot and caches it on success.
    ///
    /// Returns the snapshot this fetch produced, even if a later fetch has
    /// already replaced it in the cache.
    pub async fn list_devices(&self) -> Result<Arc<DeviceSnapshot>, ChannelError> {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        match self.client.get_devices().await {
            Ok(snapshot) => {
                debug!("Device registry: fetch #{} returned {} devices", seq, snapshot.len());
                let snapshot = Arc::new(snapshot);
                let mut cached = self.lock();
                if seq > cached.seq {
                    *cached = Cached {
                        seq,
                        snapshot: snapshot.clone(),
                    };
                } else {
                    debug!("Device registry: fetch #{} superseded by #{}", seq, cached.seq);
                }
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Device registry: fetch failed, keeping previous snapshot: {}", e);
                Err(e)
            }
        }
    }

    pub fn latest(&self) -> Arc<DeviceSnapshot> {
        self.lock().snapshot.clone()
    }

    pub fn devices_of(&self, device_type: DeviceType) -> Vec<DeviceDescriptor> {
        self.latest().devices_of(device_type).cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cached> {
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

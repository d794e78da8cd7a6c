//! UI-facing controller.
//!
//! Composes the registry, selection tracker, session controller and
//! reconciliation timer, and publishes a [`ControllerView`] for the
//! presentation layer to render. Everything in the view comes from the last
//! authoritative backend answers; requested values never appear in it.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::channel::{Args, Command, CommandChannel};
use crate::client::BackendClient;
use crate::config::ControllerConfig;
use crate::devices::{DeviceDescriptor, DeviceSnapshot, DeviceType, SessionState, WindowState};
use crate::error::{ChannelError, ConfigError};
use crate::lifecycle::SessionController;
use crate::registry::DeviceRegistry;
use crate::scheduler::ReconciliationScheduler;
use crate::selection::{derive_active, SelectionTracker};

/// Everything the presentation layer needs to render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerView {
    pub devices: Arc<DeviceSnapshot>,
    pub input: Option<DeviceDescriptor>,
    pub output: Option<DeviceDescriptor>,
    pub session: SessionState,
    pub backend_reachable: bool,
    pub pending_input: bool,
    pub pending_output: bool,
}

impl ControllerView {
    pub fn active(&self, device_type: DeviceType) -> Option<&DeviceDescriptor> {
        match device_type {
            DeviceType::Input => self.input.as_ref(),
            DeviceType::Output => self.output.as_ref(),
        }
    }

    pub fn is_pending(&self, device_type: DeviceType) -> bool {
        match device_type {
            DeviceType::Input => self.pending_input,
            DeviceType::Output => self.pending_output,
        }
    }
}

/// Refuses every call once the controller's lifetime has ended, so nothing
/// can reach the backend after teardown.
struct LifetimeChannel {
    inner: Arc<dyn CommandChannel>,
    lifetime: CancellationToken,
}

#[async_trait]
impl CommandChannel for LifetimeChannel {
    async fn invoke(&self, command: Command, args: Args) -> Result<Value, ChannelError> {
        if self.lifetime.is_cancelled() {
            return Err(ChannelError::transport(format!(
                "controller torn down, {} not sent",
                command
            )));
        }
        self.inner.invoke(command, args).await
    }
}

struct Shared {
    client: BackendClient,
    registry: Arc<DeviceRegistry>,
    tracker: SelectionTracker,
    session: SessionController,
    view_tx: watch::Sender<ControllerView>,
    lifetime: CancellationToken,
}

impl Shared {
    fn current_view(&self) -> ControllerView {
        let devices = self.registry.latest();
        let status = self.session.status();
        ControllerView {
            input: derive_active(&devices, DeviceType::Input),
            output: derive_active(&devices, DeviceType::Output),
            devices,
            session: status.state,
            backend_reachable: status.reachable,
            pending_input: self.tracker.is_pending(DeviceType::Input),
            pending_output: self.tracker.is_pending(DeviceType::Output),
        }
    }

    fn publish(&self) {
        let view = self.current_view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    async fn refresh_devices(&self) -> Result<Arc<DeviceSnapshot>, ChannelError> {
        let result = self.registry.list_devices().await;
        self.publish();
        result
    }

    async fn poll_session(&self) -> Result<SessionState, ChannelError> {
        let result = self.session.poll().await;
        self.publish();
        result
    }

    async fn reconcile(&self, tick: u64, device_refresh_ticks: u32) {
        let _ = self.session.poll().await;
        if device_refresh_ticks > 0 && tick % u64::from(device_refresh_ticks) == 0 {
            debug!("Reconciliation tick {}: refreshing devices", tick);
            let _ = self.registry.list_devices().await;
        }
        self.publish();
    }
}

pub struct Controller {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<ReconciliationScheduler>>,
}

impl Controller {
    /// Fetches devices and session state once, then starts the
    /// reconciliation timer.
    ///
    /// Backend failures during the initial sync are logged, not returned: the
    /// controller starts with an empty view and the timer keeps trying.
    pub async fn start(channel: Arc<dyn CommandChannel>, config: &ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let lifetime = CancellationToken::new();
        let guarded: Arc<dyn CommandChannel> = Arc::new(LifetimeChannel {
            inner: channel,
            lifetime: lifetime.clone(),
        });
        let client = BackendClient::new(guarded);
        let registry = Arc::new(DeviceRegistry::new(client.clone()));
        let tracker = SelectionTracker::new(client.clone(), registry.clone(), config.request_timeout());
        let session = SessionController::new(client.clone());
        let (view_tx, _) = watch::channel(ControllerView::default());

        let shared = Arc::new(Shared {
            client,
            registry,
            tracker,
            session,
            view_tx,
            lifetime,
        });

        info!("Controller starting, initial sync with backend");
        if let Err(e) = shared.refresh_devices().await {
            warn!("Initial device fetch failed: {}", e);
        }
        if let Err(e) = shared.poll_session().await {
            warn!("Initial session poll failed: {}", e);
        }

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let device_refresh_ticks = config.device_refresh_ticks;
        let scheduler = ReconciliationScheduler::spawn(config.poll_interval(), move |tick| {
            let weak = weak.clone();
            async move {
                if let Some(shared) = weak.upgrade() {
                    shared.reconcile(tick, device_refresh_ticks).await;
                }
            }
        });

        Ok(Self {
            shared,
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    pub fn view(&self) -> ControllerView {
        self.shared.view_tx.borrow().clone()
    }

    /// Receives every change of the view.
    pub fn subscribe(&self) -> watch::Receiver<ControllerView> {
        self.shared.view_tx.subscribe()
    }

    pub fn selected(&self, device_type: DeviceType) -> Option<DeviceDescriptor> {
        self.shared.tracker.selected(device_type)
    }

    pub fn session_state(&self) -> SessionState {
        self.shared.session.state()
    }

    pub fn is_torn_down(&self) -> bool {
        self.shared.lifetime.is_cancelled()
    }

    /// Explicit user refresh of the device list.
    pub async fn refresh(&self) -> Result<Arc<DeviceSnapshot>, ChannelError> {
        self.shared.refresh_devices().await
    }

    /// Re-queries the session state outside the timer.
    pub async fn poll_session(&self) -> Result<SessionState, ChannelError> {
        self.shared.poll_session().await
    }

    pub async fn select(&self, device_type: DeviceType, device_name: &str) -> Result<(), ChannelError> {
        let selection = self.shared.tracker.begin(device_type, device_name)?;
        self.shared.publish();

        let result = self.shared.tracker.commit(selection).await;
        self.shared.publish();
        result
    }

    /// Returns `Ok(false)` when the last polled state is already `Running`.
    pub async fn start_session(&self) -> Result<bool, ChannelError> {
        let result = self.shared.session.start().await;
        self.shared.publish();
        result
    }

    /// Returns `Ok(false)` when the last polled state is already `Stopped`.
    pub async fn stop_session(&self) -> Result<bool, ChannelError> {
        let result = self.shared.session.stop().await;
        self.shared.publish();
        result
    }

    pub async fn manage_window(&self, state: WindowState) -> Result<(), ChannelError> {
        self.shared.client.manage_window(state).await
    }

    /// Stops the timer and closes the backend channel for this controller.
    ///
    /// Returns once the timer task has finished; no command is sent after
    /// that, including from calls still holding a reference to `self`.
    pub async fn teardown(&self) {
        if self.shared.lifetime.is_cancelled() {
            return;
        }
        info!("Controller teardown");
        self.shared.lifetime.cancel();

        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // The scheduler's own Drop aborts the timer task.
        self.shared.lifetime.cancel();
    }
}

//! Session lifecycle controller.
//!
//! The session flag belongs to the backend. This side only remembers the last
//! polled value and uses it to decide whether a `start` or `stop` makes sense;
//! it never records its own transition as the new state.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::client::BackendClient;
use crate::devices::SessionState;
use crate::error::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStatus {
    pub state: SessionState,
    /// Whether the most recent poll got an answer from the backend
    pub reachable: bool,
    pub polled_at: Option<Instant>,
}

impl Default for PollStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Stopped,
            reachable: false,
            polled_at: None,
        }
    }
}

/// Clears the transition flag when the command future completes or is
/// dropped.
struct TransitionGuard(Arc<AtomicBool>);

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SessionController {
    client: BackendClient,
    status: Mutex<PollStatus>,
    transition: Arc<AtomicBool>,
}

impl SessionController {
    pub fn new(client: BackendClient) -> Self {
        Self {
            client,
            status: Mutex::new(PollStatus::default()),
            transition: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Last polled session state; `Stopped` until the first poll answers.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn status(&self) -> PollStatus {
        *self.lock()
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.load(Ordering::SeqCst)
    }

    /// Queries `is_running` and records the answer.
    ///
    /// On failure the previous state is kept. Only a transport failure marks
    /// the backend unreachable; a malformed answer still came from it.
    pub async fn poll(&self) -> Result<SessionState, ChannelError> {
        match self.client.is_running().await {
            Ok(running) => {
                let state = SessionState::from_running(running);
                let mut status = self.lock();
                if status.state != state {
                    info!("Session state changed: {} -> {}", status.state, state);
                }
                *status = PollStatus {
                    state,
                    reachable: true,
                    polled_at: Some(Instant::now()),
                };
                Ok(state)
            }
            Err(e @ ChannelError::Transport(_)) => {
                let mut status = self.lock();
                if status.reachable {
                    warn!("Session status poll failed, keeping '{}': {}", status.state, e);
                } else {
                    debug!("Session status poll failed again: {}", e);
                }
                status.reachable = false;
                Err(e)
            }
            Err(e) => {
                warn!("Session status poll got an unusable answer, keeping '{}': {}", self.state(), e);
                Err(e)
            }
        }
    }

    /// Sends `start` unless the last polled state is already `Running`.
    ///
    /// Returns `Ok(false)` when nothing was sent.
    pub async fn start(&self) -> Result<bool, ChannelError> {
        self.transition_to(SessionState::Running).await
    }

    /// Sends `stop` unless the last polled state is already `Stopped`.
    ///
    /// Returns `Ok(false)` when nothing was sent.
    pub async fn stop(&self) -> Result<bool, ChannelError> {
        self.transition_to(SessionState::Stopped).await
    }

    async fn transition_to(&self, target: SessionState) -> Result<bool, ChannelError> {
        let current = self.state();
        if current == target {
            debug!("Session already {}, not sending a command", current);
            return Ok(false);
        }

        if self
            .transition
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Session transition to {} dropped: another one is in flight", target);
            return Err(ChannelError::TransitionBusy);
        }
        let guard = TransitionGuard(self.transition.clone());

        let sent = match target {
            SessionState::Running => self.client.start().await,
            SessionState::Stopped => self.client.stop().await,
        };
        drop(guard);

        if let Err(e) = &sent {
            warn!("Session transition to {} failed: {}", target, e);
        }

        // The state shown comes from this poll, not from the command's outcome.
        let _ = self.poll().await;

        sent.map(|_| true)
    }

    fn lock(&self) -> MutexGuard<'_, PollStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

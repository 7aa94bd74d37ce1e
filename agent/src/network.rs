//! Network monitor: a binary online/offline edge detector.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::remote::RemoteApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub fn from_online(online: bool) -> Self {
        if online {
            NetworkState::Online
        } else {
            NetworkState::Offline
        }
    }
}

/// Current connectivity. Subscribers only wake on transitions.
#[derive(Debug)]
pub struct NetworkMonitor {
    state: watch::Sender<NetworkState>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn state(&self) -> NetworkState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == NetworkState::Online
    }

    /// Report connectivity. Returns true on an edge.
    pub fn set(&self, next: NetworkState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            tracing::info!(state = ?next, "Network state changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state.subscribe()
    }

    /// Periodically probe the remote API and report reachability.
    pub fn spawn_probe(
        self: &Arc<Self>,
        remote: Arc<dyn RemoteApi>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let reachable = tokio::select! {
                    _ = token.cancelled() => break,
                    result = remote.health() => result.is_ok(),
                };
                monitor.set(NetworkState::from_online(reachable));
            }

            tracing::debug!("Connectivity probe stopped");
        })
    }
}

//! Fieldsync Agent - offline-first store and sync engine for delivery devices.
//!
//! Delivery completions, route transitions, order edits, GPS breadcrumbs
//! and photo evidence are written to a local SQLite store whether or not
//! the device is online. A [`SyncEngine`] replays that log against the
//! remote delivery API once connectivity returns, using the deterministic
//! queue logic from `fieldsync-engine`.

pub mod config;
pub mod db;
pub mod error;
pub mod network;
pub mod photos;
pub mod progress;
pub mod quota;
pub mod remote;
pub mod resolver;
pub mod routes;
pub mod sync;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError};
pub use db::LocalStore;
pub use error::{AppError, StorageError};
pub use network::{NetworkMonitor, NetworkState};
pub use progress::ProgressHub;
pub use remote::{HttpRemote, RemoteApi, RemoteError};
pub use sync::{CycleOutcome, EvidencePolicy, SyncEngine, SyncOptions};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

/// Build the status surface router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

//! Loopback status surface for the manual-review UI.

mod health;
mod progress;
mod status;

pub use progress::stream_progress;

use crate::AppState;
use axum::Router;

/// Create all status routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(status::routes())
        .merge(progress::routes())
}

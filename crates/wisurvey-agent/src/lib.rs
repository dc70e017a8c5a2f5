//! Wi-Fi survey agent library.
//!
//! Re-exports the API router and shared state so they can be used by
//! integration tests, and assembles the full application router.

pub mod api;
pub mod state;

use std::path::Path;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The complete application: `/api` plus the static frontend when a public
/// directory is given.
pub fn app(state: AppState, public_dir: Option<&Path>) -> Router {
    let mut router = Router::new().nest("/api", api::router());

    if let Some(dir) = public_dir {
        let index = ServeFile::new(dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(dir).not_found_service(index));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

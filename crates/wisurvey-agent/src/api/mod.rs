//! REST API route tree.

pub mod error;
pub mod points;
pub mod sessions;

use axum::Router;

use crate::state::AppState;

pub use error::ApiError;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(sessions::router())
        .merge(points::router())
}

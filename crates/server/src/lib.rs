//! Depot server: revision resolution, block lists, tiered archive storage and
//! the HTTP front end.
//!
//! - `resolver`: resolve an import path to a commit and cache its archive
//! - `blocking`: exact-path and regex block lists, package purges
//! - `tiering`: hot to cold uploads and retention expiry
//! - `stats` / `scheduler`: periodic background work
//! - `routes` / `handlers`: the HTTP surface

pub mod auth;
pub mod blocking;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod resolver;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod tiering;

pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

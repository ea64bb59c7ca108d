use crate::state::AppState;
use axum::{extract::DefaultBodyLimit, Router};

mod claims;
pub mod cookies;
mod dto;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod session;
pub mod tokens;

/// Account routes, mounted under `/users`.
pub fn router(state: AppState) -> Router<AppState> {
    let upload_limit = state.config.upload_max_bytes;
    Router::new()
        .merge(handlers::public_routes())
        .merge(handlers::protected_routes(state))
        .layer(DefaultBodyLimit::max(upload_limit))
}

use crate::state::AppState;
use axum::Router;

mod dto;
pub mod entity;
pub mod forms;
pub mod handlers;
mod password;
pub mod store;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::user_routes())
}

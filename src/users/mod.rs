mod dto;
pub mod handlers;
#[cfg(test)]
mod tests;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::user_routes())
}

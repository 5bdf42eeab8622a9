pub mod agents;
pub mod gateway;
pub mod mock_agent;
pub mod threads;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

pub fn configure(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(gateway::routes(state.clone()))
        .merge(agents::routes(state.clone()))
        .merge(threads::routes(state))
        .merge(mock_agent::routes())
}

use crate::handlers;
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/connectors", get(handlers::connector_status))
        .route(
            "/investigations",
            post(handlers::submit_investigation).get(handlers::list_investigations),
        )
        .route(
            "/investigations/:id",
            get(handlers::get_investigation).delete(handlers::delete_investigation),
        )
        .route("/investigations/:id/report", get(handlers::get_report))
        .route(
            "/investigations/:id/cancel",
            post(handlers::cancel_investigation),
        )
        .route(
            "/investigations/:id/events",
            get(handlers::investigation_events),
        )
        .with_state(state)
}

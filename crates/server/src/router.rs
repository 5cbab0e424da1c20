use super::{handlers, state::AppState};
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

/// Creates the Axum router with all the application routes.
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/guides/stream", post(handlers::guide_stream_handler))
        .route("/guides", get(handlers::list_guides_handler))
        .route(
            "/guides/{id}",
            get(handlers::get_guide_handler).delete(handlers::delete_guide_handler),
        )
        .route("/guides/{id}/saved", put(handlers::set_saved_handler))
        .route("/account", get(handlers::account_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

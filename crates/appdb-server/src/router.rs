use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use appdb_docs::DocumentStore;

use crate::auth::SharedAuth;
use crate::handler;

/// Everything a request handler needs.
#[derive(Clone)]
pub struct AppState {
    pub store: DocumentStore,
    pub auth: SharedAuth,
}

/// Build the axum router with all appdb endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/events/:app", get(handler::stream_events))
        .route(
            "/v1/apps/:app/:model",
            get(handler::list_items).post(handler::add_item),
        )
        .route(
            "/v1/apps/:app/:model/:key",
            get(handler::get_item)
                .put(handler::set_item)
                .patch(handler::update_item)
                .delete(handler::delete_item),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// [`build_router`] answering CORS preflights for any origin.
pub fn build_router_with_cors(state: AppState) -> Router {
    build_router(state).layer(CorsLayer::permissive())
}

//! Route definitions for the inventory ledger service

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - ledger reconstruction
        .nest("/ledger", ledger_routes(state.clone()))
        // Protected routes - freeze lookups
        .nest("/freeze", freeze_routes(state.clone()))
        // Protected routes - physical counts
        .nest("/counts", count_routes(state.clone()))
        // Protected routes - stock mutations
        .nest("/stock", stock_routes(state))
}

fn ledger_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/batches/:id", get(handlers::get_batch_ledger))
        .route("/items/:id", get(handlers::get_item_ledger))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

fn freeze_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/batches/:id", get(handlers::get_batch_freeze))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

fn count_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_count).get(handlers::list_counts))
        .route("/:id", get(handlers::get_count))
        .route("/:id/items", put(handlers::update_count_items))
        .route("/:id/transitions", post(handlers::transition_count))
        .route("/:id/review", get(handlers::review_count))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

fn stock_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/transactions", post(handlers::record_transaction))
        .route(
            "/transactions/:id",
            get(handlers::get_transaction).delete(handlers::purge_transaction),
        )
        .route(
            "/transfers/:id/acknowledge",
            post(handlers::acknowledge_transfer),
        )
        .route("/batches/:id", delete(handlers::purge_batch))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

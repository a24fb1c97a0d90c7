//! Route definitions for the stock ledger API

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/lots", lot_routes())
        .nest("/movements", movement_routes())
        .nest("/allocations", allocation_routes())
        .nest("/alerts", alert_routes())
        .nest("/positions", position_routes())
        .nest("/counts", count_routes())
        .nest("/sync", sync_routes())
}

/// Lot store, reservations, and quarantine
fn lot_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_lots).post(handlers::create_lot))
        .route("/:lot_id", get(handlers::get_lot))
        .route("/:lot_id/position", put(handlers::set_lot_position))
        .route("/:lot_id/movements", get(handlers::get_lot_movements))
        .route("/:lot_id/verify", get(handlers::verify_lot_chain))
        .route("/:lot_id/quarantine", post(handlers::quarantine_lot))
        .route("/:lot_id/release", post(handlers::release_lot))
        .route("/:lot_id/reserve", post(handlers::reserve_lot))
        .route(
            "/:lot_id/release-reservation",
            post(handlers::release_lot_reservation),
        )
}

/// Movement ledger
fn movement_routes() -> Router<AppState> {
    Router::new().route(
        "/",
        get(handlers::list_movements).post(handlers::apply_movement),
    )
}

/// FEFO allocation
fn allocation_routes() -> Router<AppState> {
    Router::new().route("/", post(handlers::allocate))
}

/// Expiry alerts
fn alert_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_alerts))
        .route("/scan", post(handlers::scan_alerts))
        .route("/compute", get(handlers::compute_alerts))
        .route("/:alert_id/acknowledge", post(handlers::acknowledge_alert))
}

/// Storage position catalog
fn position_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_positions).post(handlers::create_position),
        )
        .route(
            "/:position_id",
            get(handlers::get_position)
                .put(handlers::update_position)
                .delete(handlers::deactivate_position),
        )
}

/// Cycle counts
fn count_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_counts).post(handlers::start_count))
        .route("/:count_id", get(handlers::get_count))
        .route(
            "/:count_id/items/:lot_id",
            put(handlers::record_count_item),
        )
        .route("/:count_id/complete", post(handlers::complete_count))
        .route("/:count_id/cancel", post(handlers::cancel_count))
}

/// Sync surface for the replication collaborator
fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/changes", get(handlers::get_changes))
        .route("/ack", post(handlers::acknowledge_sync))
}

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::payment_request_handlers;
use crate::state::AppState;

pub fn payment_request_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(payment_request_handlers::create_payment_request)
                .get(payment_request_handlers::list_payment_requests),
        )
        .route(
            "/:id/reject",
            post(payment_request_handlers::reject_payment_request),
        )
        .route(
            "/:id/pay",
            post(payment_request_handlers::pay_payment_request),
        )
}

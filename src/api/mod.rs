mod handlers;

pub use handlers::*;

use axum::{
    routing::{get, post, put},
    Router,
};

/// 全部路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/invoices", get(list_invoices).post(ingest_invoice))
        .route("/api/invoices/:id", get(get_invoice).delete(cancel_invoice))
        .route("/api/invoices/:id/allocation", put(set_allocation))
        .route("/api/invoices/:id/price-review", get(price_review))
        .route("/api/invoices/:id/commit", post(commit_invoice))
        .route("/api/invoices/:id/revert", post(revert_invoice))
        .route(
            "/api/invoices/:id/items/:item_id/link",
            post(link_item).delete(unlink_item),
        )
        .route(
            "/api/invoices/:id/items/:item_id/code-suggestion",
            get(suggest_code),
        )
        .route("/api/invoices/:id/items/:item_id/product", post(create_product))
        .route("/api/invoices/:id/items/:item_id/designation", put(set_designation))
        .route("/api/batches", get(list_batches).post(submit_batch))
        .route("/api/batches/:id", get(get_batch))
        .route("/api/batches/:id/csv", get(batch_csv))
        .with_state(state)
}

use crate::db::batch_csv_bytes;
use crate::error::{EngineError, ErrorKind};
use crate::models::{
    AllocationMode, BatchId, InvoiceId, ItemId, NewProductForm, PriceOverride, ProductId,
    RawInvoice,
};
use crate::service::{BatchCoordinator, InvoiceLifecycle, RetryPolicy};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 共享状态
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<InvoiceLifecycle>,
    pub batches: Arc<BatchCoordinator>,
    pub retry: RetryPolicy,
}

/// 统一响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

fn respond<T: Serialize>(status: StatusCode, message: impl Into<String>, data: T) -> Response {
    let body = ApiResponse {
        success: true,
        message: message.into(),
        data: Some(data),
    };
    (status, Json(body)).into_response()
}

/// 引擎错误 -> HTTP 响应
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Precondition | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Transaction => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        let data = match &self.0 {
            EngineError::Validation(errors) => serde_json::to_value(errors.fields()).ok(),
            _ => None,
        };
        let body = ApiResponse {
            success: false,
            message: format!("Error: {}", self.0),
            data,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub access_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub product_id: ProductId,
}

#[derive(Debug, Deserialize)]
pub struct AllocationRequest {
    pub mode: AllocationMode,
}

#[derive(Debug, Deserialize)]
pub struct DesignationRequest {
    pub quantity: BigDecimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommitRequest {
    #[serde(default)]
    pub overrides: Vec<PriceOverride>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub invoices: Vec<RawInvoice>,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 发票列表; 带 access_key 时只返回该密钥对应的发票
pub async fn list_invoices(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult {
    let invoices = match query.access_key.as_deref() {
        Some(key) => match state.lifecycle.find_by_access_key(key.trim()) {
            Some(id) => vec![state.lifecycle.get(id)?.summary()],
            None => Vec::new(),
        },
        None => state.lifecycle.list(),
    };
    Ok(respond(StatusCode::OK, format!("{} invoices", invoices.len()), invoices))
}

/// 导入单张发票
pub async fn ingest_invoice(State(state): State<AppState>, Json(raw): Json<RawInvoice>) -> ApiResult {
    let invoice = state.lifecycle.ingest(raw).await?;
    Ok(respond(
        StatusCode::CREATED,
        format!(
            "Ingested invoice {} with {} items, {} auto-linked",
            invoice.id,
            invoice.items.len(),
            invoice.linked_count()
        ),
        invoice,
    ))
}

pub async fn get_invoice(State(state): State<AppState>, Path(id): Path<InvoiceId>) -> ApiResult {
    let view = state.lifecycle.get_view(id).await?;
    Ok(respond(StatusCode::OK, "OK", view))
}

pub async fn link_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(InvoiceId, ItemId)>,
    Json(req): Json<LinkRequest>,
) -> ApiResult {
    let invoice = state.lifecycle.link(id, item_id, req.product_id).await?;
    Ok(respond(
        StatusCode::OK,
        format!("Item {} linked to product {}", item_id, req.product_id),
        invoice,
    ))
}

pub async fn unlink_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(InvoiceId, ItemId)>,
) -> ApiResult {
    let invoice = state.lifecycle.unlink(id, item_id).await?;
    Ok(respond(StatusCode::OK, format!("Item {} unlinked", item_id), invoice))
}

pub async fn suggest_code(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(InvoiceId, ItemId)>,
) -> ApiResult {
    let suggestion = state.lifecycle.suggest_code(id, item_id).await?;
    Ok(respond(StatusCode::OK, "OK", suggestion))
}

pub async fn create_product(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(InvoiceId, ItemId)>,
    Json(form): Json<NewProductForm>,
) -> ApiResult {
    let (product, invoice) = state
        .lifecycle
        .create_product_from_item(id, item_id, form)
        .await?;
    Ok(respond(
        StatusCode::CREATED,
        format!("Created product {} ({})", product.id, product.code),
        serde_json::json!({ "product": product, "invoice": invoice }),
    ))
}

pub async fn set_allocation(
    State(state): State<AppState>,
    Path(id): Path<InvoiceId>,
    Json(req): Json<AllocationRequest>,
) -> ApiResult {
    let invoice = state.lifecycle.set_allocation(id, req.mode).await?;
    Ok(respond(
        StatusCode::OK,
        format!("{}% online", invoice.online_percentage),
        invoice,
    ))
}

pub async fn set_designation(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(InvoiceId, ItemId)>,
    Json(req): Json<DesignationRequest>,
) -> ApiResult {
    let invoice = state
        .lifecycle
        .set_item_designation(id, item_id, req.quantity)
        .await?;
    Ok(respond(
        StatusCode::OK,
        format!("{}% online", invoice.online_percentage),
        invoice,
    ))
}

pub async fn price_review(State(state): State<AppState>, Path(id): Path<InvoiceId>) -> ApiResult {
    let revisions = state.lifecycle.enter_price_review(id).await?;
    Ok(respond(
        StatusCode::OK,
        format!("{} products to review", revisions.len()),
        revisions,
    ))
}

/// 入库提交, 事务失败按退避策略重试
pub async fn commit_invoice(
    State(state): State<AppState>,
    Path(id): Path<InvoiceId>,
    body: Option<Json<CommitRequest>>,
) -> ApiResult {
    let overrides = body.map(|Json(req)| req.overrides).unwrap_or_default();
    let lifecycle = state.lifecycle.clone();
    let invoice = state
        .retry
        .run("commit", || lifecycle.commit(id, &overrides))
        .await?;
    Ok(respond(StatusCode::OK, format!("Invoice {} committed", id), invoice))
}

pub async fn revert_invoice(State(state): State<AppState>, Path(id): Path<InvoiceId>) -> ApiResult {
    let lifecycle = state.lifecycle.clone();
    let invoice = state.retry.run("revert", || lifecycle.revert(id)).await?;
    Ok(respond(StatusCode::OK, format!("Invoice {} reverted", id), invoice))
}

pub async fn cancel_invoice(State(state): State<AppState>, Path(id): Path<InvoiceId>) -> ApiResult {
    let summary = state.lifecycle.cancel(id).await?;
    Ok(respond(StatusCode::OK, format!("Invoice {} cancelled", id), summary))
}

/// 批量导入
pub async fn submit_batch(State(state): State<AppState>, Json(req): Json<BatchRequest>) -> ApiResult {
    let run = state.batches.submit(req.invoices).await;
    Ok(respond(
        StatusCode::OK,
        format!(
            "Batch {}: {} of {} invoices ingested, {} failed",
            run.id, run.succeeded, run.total, run.failed
        ),
        run,
    ))
}

pub async fn list_batches(State(state): State<AppState>) -> ApiResult {
    let runs = state.batches.list();
    Ok(respond(StatusCode::OK, format!("{} batches", runs.len()), runs))
}

fn batch_not_found(id: BatchId) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        message: format!("Error: batch {} not found", id),
        data: None,
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

pub async fn get_batch(State(state): State<AppState>, Path(id): Path<BatchId>) -> Response {
    match state.batches.get(id) {
        Some(run) => respond(StatusCode::OK, "OK", run),
        None => batch_not_found(id),
    }
}

/// 批处理报告 CSV 下载
pub async fn batch_csv(State(state): State<AppState>, Path(id): Path<BatchId>) -> Response {
    let Some(run) = state.batches.get(id) else {
        return batch_not_found(id);
    };
    match batch_csv_bytes(&run) {
        Ok(bytes) => ([(header::CONTENT_TYPE, "text/csv")], bytes).into_response(),
        Err(e) => {
            tracing::error!("batch {} csv export failed: {}", id, e);
            let body = ApiResponse::<()> {
                success: false,
                message: format!("Error: {}", e),
                data: None,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

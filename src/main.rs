use nfe_intake_rust::config::StorageBackend;
use nfe_intake_rust::db::{CatalogStore, InventoryStore};
use nfe_intake_rust::{
    api, create_pool, AppConfig, BatchCoordinator, InvoiceLifecycle, MemoryStore, PgStore,
    RetryPolicy,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    // 选择存储后端
    let (catalog, inventory): (Arc<dyn CatalogStore>, Arc<dyn InventoryStore>) =
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory store");
                let store = MemoryStore::new();
                (Arc::new(store.clone()), Arc::new(store))
            }
            StorageBackend::Postgres => {
                let pool = create_pool(&config.database).await?;
                info!("Database pool created");
                let store = PgStore::new(pool);
                (Arc::new(store.clone()), Arc::new(store))
            }
        };

    let lifecycle = InvoiceLifecycle::new(catalog, inventory, config.engine.clone());
    let restored = lifecycle.restore().await?;
    info!("Restored {} invoices", restored);
    let lifecycle = Arc::new(lifecycle);
    let batches = Arc::new(BatchCoordinator::new(lifecycle.clone(), config.batch.workers));
    let state = api::AppState {
        lifecycle,
        batches,
        retry: RetryPolicy::from_config(&config.retry),
    };

    let app = api::router(state).layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST   /api/invoices                              - ingest invoice");
    info!("  GET    /api/invoices?access_key=...               - find invoice by access key");
    info!("  GET    /api/invoices/:id                          - invoice with annotations");
    info!("  POST   /api/invoices/:id/items/:item_id/link      - link item");
    info!("  POST   /api/invoices/:id/items/:item_id/product   - create product from item");
    info!("  PUT    /api/invoices/:id/allocation               - set channel allocation");
    info!("  GET    /api/invoices/:id/price-review             - price review");
    info!("  POST   /api/invoices/:id/commit                   - commit stock entry");
    info!("  POST   /api/invoices/:id/revert                   - revert stock entry");
    info!("  DELETE /api/invoices/:id                          - cancel pending invoice");
    info!("  POST   /api/batches                               - batch ingestion");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

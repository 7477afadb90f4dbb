use crate::models::{
    Invoice, InvoiceId, LotId, NewLot, NewPayable, NewProduct, PayableId, Pricing, Product,
    ProductId,
};
use bigdecimal::BigDecimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor, PgPool};

const PRODUCT_COLUMNS: &str = "id, code, name, barcode, cost_price, sale_price, margin";

/// 按ID查询商品
pub async fn get_product(pool: &PgPool, product_id: ProductId) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
    ))
    .bind(product_id)
    .fetch_optional(pool)
    .await
}

/// 按供应商编码映射查询商品
pub async fn find_by_supplier_code(
    pool: &PgPool,
    supplier_tax_id: &str,
    supplier_code: &str,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(
        r#"
        SELECT p.id, p.code, p.name, p.barcode, p.cost_price, p.sale_price, p.margin
        FROM supplier_product_codes spc
        INNER JOIN products p ON p.id = spc.product_id
        WHERE spc.supplier_tax_id = $1
          AND spc.supplier_code = $2
        "#,
    )
    .bind(supplier_tax_id)
    .bind(supplier_code)
    .fetch_optional(pool)
    .await
}

/// 按条码查询商品
pub async fn find_by_barcode(pool: &PgPool, barcode: &str) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE barcode = $1 ORDER BY id LIMIT 1"
    ))
    .bind(barcode)
    .fetch_optional(pool)
    .await
}

/// 模糊匹配候选池: 名称 (小写去重音) 包含任一 token, 命中 token 多者优先
pub async fn search_by_tokens(
    pool: &PgPool,
    tokens: &[String],
    limit: i64,
) -> Result<Vec<Product>, sqlx::Error> {
    let patterns: Vec<String> = tokens.iter().map(|t| format!("%{}%", t)).collect();
    sqlx::query_as::<_, Product>(&format!(
        r#"
        SELECT {PRODUCT_COLUMNS}
        FROM products
        WHERE search_name LIKE ANY($1)
        ORDER BY (SELECT COUNT(*) FROM unnest($1::text[]) AS pattern WHERE search_name LIKE pattern) DESC,
                 id
        LIMIT $2
        "#
    ))
    .bind(patterns.as_slice())
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// 查询以 prefix 开头的全部编码
pub async fn codes_with_prefix(pool: &PgPool, prefix: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT code FROM products WHERE code LIKE $1 || '%'")
        .bind(prefix)
        .fetch_all(pool)
        .await
}

/// 新建商品; search_name 由调用方传入归一化后的名称
pub async fn insert_product(
    pool: &PgPool,
    product: &NewProduct,
    search_name: &str,
) -> Result<Product, sqlx::Error> {
    sqlx::query_as::<_, Product>(&format!(
        r#"
        INSERT INTO products (code, name, search_name, barcode, cost_price, sale_price, margin)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {PRODUCT_COLUMNS}
        "#
    ))
    .bind(&product.code)
    .bind(&product.name)
    .bind(search_name)
    .bind(&product.barcode)
    .bind(product.cost_price.clone())
    .bind(product.sale_price.clone())
    .bind(product.margin.clone())
    .fetch_one(pool)
    .await
}

/// 事务内: 锁定并读取商品价格
pub async fn lock_pricing(conn: &mut PgConnection, product_id: ProductId) -> Result<Option<Pricing>, sqlx::Error> {
    sqlx::query_as::<_, Pricing>(
        "SELECT cost_price, sale_price, margin FROM products WHERE id = $1 FOR UPDATE",
    )
    .bind(product_id)
    .fetch_optional(conn)
    .await
}

pub async fn update_pricing(
    conn: &mut PgConnection,
    product_id: ProductId,
    pricing: &Pricing,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE products SET cost_price = $2, sale_price = $3, margin = $4 WHERE id = $1",
    )
    .bind(product_id)
    .bind(pricing.cost_price.clone())
    .bind(pricing.sale_price.clone())
    .bind(pricing.margin.clone())
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// 统一库存数量 (线上线下共用一个库存池)
pub async fn stock_quantity(conn: &mut PgConnection, product_id: ProductId) -> Result<Option<BigDecimal>, sqlx::Error> {
    sqlx::query_scalar::<_, BigDecimal>(
        "SELECT stock_quantity FROM products WHERE id = $1 FOR UPDATE",
    )
    .bind(product_id)
    .fetch_optional(conn)
    .await
}

pub async fn adjust_stock(
    conn: &mut PgConnection,
    product_id: ProductId,
    delta: &BigDecimal,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE products SET stock_quantity = stock_quantity + $2 WHERE id = $1")
        .bind(product_id)
        .bind(delta.clone())
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_lot(conn: &mut PgConnection, lot: &NewLot) -> Result<LotId, sqlx::Error> {
    sqlx::query_scalar::<_, LotId>(
        r#"
        INSERT INTO stock_lots (product_id, invoice_id, lot_number, quantity, expiry)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(lot.product_id)
    .bind(lot.invoice_id)
    .bind(&lot.lot_number)
    .bind(lot.quantity.clone())
    .bind(lot.expiry)
    .fetch_one(conn)
    .await
}

pub async fn delete_lot(conn: &mut PgConnection, lot_id: LotId) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM stock_lots WHERE id = $1")
        .bind(lot_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_payable(conn: &mut PgConnection, payable: &NewPayable) -> Result<PayableId, sqlx::Error> {
    sqlx::query_scalar::<_, PayableId>(
        r#"
        INSERT INTO payables (invoice_id, supplier_tax_id, amount, due_date, status)
        VALUES ($1, $2, $3, $4, 'open')
        RETURNING id
        "#,
    )
    .bind(payable.invoice_id)
    .bind(&payable.supplier_tax_id)
    .bind(payable.amount.clone())
    .bind(payable.due_date)
    .fetch_one(conn)
    .await
}

/// 只能取消未结清的应付
pub async fn cancel_payable(conn: &mut PgConnection, payable_id: PayableId) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE payables SET status = 'cancelled', cancelled_at = now() WHERE id = $1 AND status = 'open'",
    )
    .bind(payable_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn current_supplier_code(
    conn: &mut PgConnection,
    supplier_tax_id: &str,
    supplier_code: &str,
) -> Result<Option<ProductId>, sqlx::Error> {
    sqlx::query_scalar::<_, ProductId>(
        "SELECT product_id FROM supplier_product_codes WHERE supplier_tax_id = $1 AND supplier_code = $2 FOR UPDATE",
    )
    .bind(supplier_tax_id)
    .bind(supplier_code)
    .fetch_optional(conn)
    .await
}

pub async fn upsert_supplier_code(
    conn: &mut PgConnection,
    supplier_tax_id: &str,
    supplier_code: &str,
    product_id: ProductId,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO supplier_product_codes (supplier_tax_id, supplier_code, product_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (supplier_tax_id, supplier_code) DO UPDATE SET product_id = EXCLUDED.product_id
        "#,
    )
    .bind(supplier_tax_id)
    .bind(supplier_code)
    .bind(product_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn delete_supplier_code(
    conn: &mut PgConnection,
    supplier_tax_id: &str,
    supplier_code: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM supplier_product_codes WHERE supplier_tax_id = $1 AND supplier_code = $2")
        .bind(supplier_tax_id)
        .bind(supplier_code)
        .execute(conn)
        .await?;
    Ok(())
}

/// 全部发票文档, 按ID排序
pub async fn load_invoices(pool: &PgPool) -> Result<Vec<Invoice>, sqlx::Error> {
    let rows = sqlx::query_scalar::<_, Json<Invoice>>("SELECT document FROM invoices ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|Json(invoice)| invoice).collect())
}

pub async fn insert_invoice(pool: &PgPool, invoice: &Invoice) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO invoices (id, access_key, status, stock_entry_applied, document, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(invoice.id)
    .bind(&invoice.access_key)
    .bind(invoice.status.to_string())
    .bind(invoice.stock_entry_applied)
    .bind(Json(invoice))
    .bind(invoice.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// 连接池或事务内均可调用
pub async fn update_invoice<'e, E: PgExecutor<'e>>(
    executor: E,
    invoice: &Invoice,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE invoices
        SET status = $2, stock_entry_applied = $3, document = $4, updated_at = $5
        WHERE id = $1
        "#,
    )
    .bind(invoice.id)
    .bind(invoice.status.to_string())
    .bind(invoice.stock_entry_applied)
    .bind(Json(invoice))
    .bind(invoice.updated_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// 已入库的发票不删除
pub async fn delete_invoice(pool: &PgPool, invoice_id: InvoiceId) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM invoices WHERE id = $1 AND NOT stock_entry_applied")
        .bind(invoice_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

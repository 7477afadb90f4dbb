//! 发票生命周期控制器
//!
//! 唯一修改发票的组件。每张发票同一时刻只有一个写者: 抢不到锁的调用立即得到
//! `EngineError::Conflict`。变更在发票副本上进行, 先落库再写回内存 arena;
//! 提交与撤销的库存/价格/应付写操作和发票状态在同一个存储事务内完成。
//! 进程重启后用 `restore` 从存储载入发票。

use bigdecimal::{BigDecimal, Zero};
use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::allocation;
use super::code_suggester;
use super::divergence::DivergenceDetector;
use super::intake::{self, ParsedItem};
use super::matcher::{MatchCandidates, Matcher};
use super::pricing::{self, round2};
use super::text;
use crate::config::EngineConfig;
use crate::db::{CatalogStore, InventoryStore, InventoryTx, StoreError};
use crate::error::{EngineError, EngineResult, ValidationErrors};
use crate::models::{
    AllocationMode, CodeSuggestion, CommitReceipt, Invoice, InvoiceId, InvoiceItem, InvoiceStatus,
    InvoiceSummary, InvoiceView, ItemId, ItemView, MatchMethod, NewLot, NewPayable, NewProduct,
    NewProductForm, PriceOverride, PriceRevision, PricingChange, Product, ProductId, ProductLink,
    RawInvoice, StatusChange, StockEntry, SupplierCodeChange, Transition,
};

/// 编码冲突 (并发建商品) 时重新建议的次数
const CODE_ATTEMPTS: usize = 3;

/// 发票生命周期控制器
pub struct InvoiceLifecycle {
    catalog: Arc<dyn CatalogStore>,
    inventory: Arc<dyn InventoryStore>,
    matcher: Matcher,
    detector: DivergenceDetector,
    config: EngineConfig,
    invoices: DashMap<InvoiceId, Invoice>,
    by_access_key: DashMap<String, InvoiceId>,
    locks: DashMap<InvoiceId, Arc<Mutex<()>>>,
    next_invoice_id: AtomicI64,
    next_item_id: AtomicI64,
}

fn transaction_failure(invoice_id: InvoiceId, transition: Transition, source: StoreError) -> EngineError {
    EngineError::Transaction {
        invoice_id,
        transition,
        source,
    }
}

/// 记录一次状态转换
fn record(invoice: &mut Invoice, transition: Transition, to: InvoiceStatus) {
    let now = Utc::now();
    invoice.history.push(StatusChange {
        from: Some(invoice.status),
        to,
        transition,
        at: now,
    });
    invoice.status = to;
    invoice.version += 1;
    invoice.updated_at = now;
}

/// 转换表守卫: 非法转换返回 Precondition, 不改变任何状态
fn guard(invoice: &Invoice, transition: Transition) -> EngineResult<InvoiceStatus> {
    invoice.status.next(transition).ok_or_else(|| {
        EngineError::precondition(
            invoice.id,
            transition,
            format!("invoice is {}", invoice.status),
        )
    })
}

fn find_item(invoice: &Invoice, item_id: ItemId) -> EngineResult<&InvoiceItem> {
    invoice.item(item_id).ok_or(EngineError::ItemNotFound {
        invoice_id: invoice.id,
        item_id,
    })
}

fn find_item_mut(invoice: &mut Invoice, item_id: ItemId) -> EngineResult<&mut InvoiceItem> {
    let invoice_id = invoice.id;
    invoice
        .items
        .get_mut(&item_id)
        .ok_or(EngineError::ItemNotFound { invoice_id, item_id })
}

fn refresh_allocation(invoice: &mut Invoice) {
    let summary = allocation::summarize(invoice.allocation, invoice.items.values());
    invoice.online_percentage = summary.online_percentage;
    invoice.store_percentage = summary.store_percentage;
}

/// 已关联明细按商品分组 (数量, 单价), 保持首次出现顺序
fn lines_by_product(invoice: &Invoice) -> IndexMap<ProductId, Vec<(BigDecimal, BigDecimal)>> {
    let mut grouped: IndexMap<ProductId, Vec<(BigDecimal, BigDecimal)>> = IndexMap::new();
    for item in invoice.linked_items() {
        if let Some(link) = &item.link {
            grouped
                .entry(link.product_id)
                .or_default()
                .push((item.quantity.clone(), item.unit_value.clone()));
        }
    }
    grouped
}

impl InvoiceLifecycle {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        inventory: Arc<dyn InventoryStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            inventory,
            matcher: Matcher::new(config.fuzzy_floor),
            detector: DivergenceDetector::default(),
            config,
            invoices: DashMap::new(),
            by_access_key: DashMap::new(),
            locks: DashMap::new(),
            next_invoice_id: AtomicI64::new(1),
            next_item_id: AtomicI64::new(1),
        }
    }

    /// 载入已保存的发票, 并把ID计数器推进到已用最大值之后
    pub async fn restore(&self) -> EngineResult<usize> {
        let saved = self.inventory.load_invoices().await?;
        let count = saved.len();
        for invoice in saved {
            let max_item = invoice.items.keys().copied().max().unwrap_or(0);
            self.next_item_id.fetch_max(max_item + 1, Ordering::SeqCst);
            self.next_invoice_id.fetch_max(invoice.id + 1, Ordering::SeqCst);
            self.by_access_key.insert(invoice.access_key.clone(), invoice.id);
            self.locks.insert(invoice.id, Arc::new(Mutex::new(())));
            self.invoices.insert(invoice.id, invoice);
        }
        tracing::info!("restored {} invoices from store", count);
        Ok(count)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---------------------------------------------------------------
    // 读取
    // ---------------------------------------------------------------

    /// 发票副本
    pub fn get(&self, invoice_id: InvoiceId) -> EngineResult<Invoice> {
        self.invoices
            .get(&invoice_id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::InvoiceNotFound(invoice_id))
    }

    pub fn find_by_access_key(&self, access_key: &str) -> Option<InvoiceId> {
        self.by_access_key.get(access_key).map(|entry| *entry.value())
    }

    pub fn list(&self) -> Vec<InvoiceSummary> {
        let mut summaries: Vec<InvoiceSummary> = self
            .invoices
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    /// 发票详情: 每行附带置信度分档、关联商品和差异提示
    pub async fn get_view(&self, invoice_id: InvoiceId) -> EngineResult<InvoiceView> {
        let invoice = self.get(invoice_id)?;

        let mut products: HashMap<ProductId, Option<Product>> = HashMap::new();
        let mut items = Vec::with_capacity(invoice.items.len());
        for item in invoice.items.values() {
            let Some(link) = &item.link else {
                items.push(ItemView {
                    item_id: item.id,
                    band: None,
                    product: None,
                    divergences: Vec::new(),
                });
                continue;
            };

            if !products.contains_key(&link.product_id) {
                let product = self.catalog.get_product(link.product_id).await?;
                products.insert(link.product_id, product);
            }
            let product = products.get(&link.product_id).and_then(Option::as_ref);
            if product.is_none() {
                tracing::warn!(
                    "invoice {} item {} links to missing product {}",
                    invoice.id,
                    item.id,
                    link.product_id
                );
            }

            items.push(ItemView {
                item_id: item.id,
                band: Some(link.band()),
                product: product.map(Product::summary),
                divergences: product
                    .map(|p| self.detector.detect(&item.description, &p.name))
                    .unwrap_or_default(),
            });
        }

        Ok(InvoiceView {
            allocation: allocation::summarize(invoice.allocation, invoice.items.values()),
            channels: allocation::channel_breakdown(invoice.allocation, invoice.items.values()),
            items,
            invoice,
        })
    }

    // ---------------------------------------------------------------
    // 并发控制
    // ---------------------------------------------------------------

    /// 非阻塞获取单张发票的写锁
    fn lock(&self, invoice_id: InvoiceId) -> EngineResult<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .get(&invoice_id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::InvoiceNotFound(invoice_id))?;
        lock.try_lock_owned().map_err(|_| {
            tracing::warn!("invoice {} is locked by another operation", invoice_id);
            EngineError::Conflict(invoice_id)
        })
    }

    /// 先落库, 成功后更新内存副本
    async fn save(&self, invoice: &Invoice) -> EngineResult<()> {
        self.inventory.save_invoice(invoice).await?;
        self.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    // ---------------------------------------------------------------
    // 导入
    // ---------------------------------------------------------------

    /// 导入一张发票: 校验 -> 去重 -> 逐行匹配 -> 写入 arena
    ///
    /// 置信度达到自动关联阈值的行直接关联, 其余留空等人工处理。
    /// 失败时不会留下任何发票。
    pub async fn ingest(&self, raw: RawInvoice) -> EngineResult<Invoice> {
        let parsed = intake::validate(&raw).map_err(EngineError::Validation)?;

        if self.by_access_key.contains_key(&parsed.access_key) {
            return Err(EngineError::DuplicateInvoice {
                access_key: parsed.access_key,
            });
        }

        let mut items = IndexMap::with_capacity(parsed.items.len());
        for line in parsed.items {
            let link = self.auto_link(&parsed.supplier.tax_id, &line).await?;
            let id = self.next_item_id.fetch_add(1, Ordering::SeqCst);
            items.insert(
                id,
                InvoiceItem {
                    id,
                    line_number: line.line_number,
                    description: line.description,
                    supplier_code: line.supplier_code,
                    barcode: line.barcode,
                    quantity: line.quantity,
                    unit_value: line.unit_value,
                    lot: line.lot,
                    expiry: line.expiry,
                    link,
                    designated_quantity: None,
                },
            );
        }

        let now = Utc::now();
        let id = self.next_invoice_id.fetch_add(1, Ordering::SeqCst);
        let mut invoice = Invoice {
            id,
            access_key: parsed.access_key,
            supplier: parsed.supplier,
            issue_date: parsed.issue_date,
            total_value: parsed.total_value,
            status: InvoiceStatus::Pending,
            stock_entry_applied: false,
            allocation: AllocationMode::default(),
            online_percentage: BigDecimal::zero(),
            store_percentage: BigDecimal::zero(),
            items,
            version: 1,
            history: vec![StatusChange {
                from: None,
                to: InvoiceStatus::Pending,
                transition: Transition::Ingest,
                at: now,
            }],
            receipt: None,
            created_at: now,
            updated_at: now,
        };
        refresh_allocation(&mut invoice);

        // 匹配期间可能有同一密钥的并发导入, 这里以索引占位为准
        match self.by_access_key.entry(invoice.access_key.clone()) {
            Entry::Occupied(_) => {
                return Err(EngineError::DuplicateInvoice {
                    access_key: invoice.access_key,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        if let Err(e) = self.inventory.insert_invoice(&invoice).await {
            self.by_access_key.remove(&invoice.access_key);
            return Err(match e {
                StoreError::DuplicateAccessKey(access_key) => {
                    EngineError::DuplicateInvoice { access_key }
                }
                other => other.into(),
            });
        }
        self.locks.insert(id, Arc::new(Mutex::new(())));
        self.invoices.insert(id, invoice.clone());

        tracing::info!(
            "ingested invoice {} ({}) from {}: {} items, {} auto-linked",
            invoice.id,
            invoice.access_key,
            invoice.supplier.name,
            invoice.items.len(),
            invoice.linked_count()
        );
        Ok(invoice)
    }

    /// 从商品目录取候选; 供应商编码或条码命中时不再做文本检索
    async fn candidates(&self, supplier_tax_id: &str, line: &ParsedItem) -> EngineResult<MatchCandidates> {
        if let Some(code) = &line.supplier_code {
            if let Some(product) = self.catalog.find_by_supplier_code(supplier_tax_id, code).await? {
                return Ok(MatchCandidates {
                    by_supplier_code: Some(product),
                    ..Default::default()
                });
            }
        }

        if let Some(barcode) = &line.barcode {
            if let Some(product) = self.catalog.find_by_barcode(barcode).await? {
                return Ok(MatchCandidates {
                    by_barcode: Some(product),
                    ..Default::default()
                });
            }
        }

        let tokens = text::significant_tokens(&line.description);
        let by_text = self
            .catalog
            .search_by_tokens(&tokens, self.config.candidate_limit)
            .await?;
        Ok(MatchCandidates {
            by_text,
            ..Default::default()
        })
    }

    async fn auto_link(&self, supplier_tax_id: &str, line: &ParsedItem) -> EngineResult<Option<ProductLink>> {
        let candidates = self.candidates(supplier_tax_id, line).await?;
        let proposed = self.matcher.best_match(&line.description, &candidates);
        Ok(match proposed {
            Some(link) if link.confidence >= self.config.auto_link_threshold => Some(link),
            Some(link) => {
                tracing::debug!(
                    "line {} '{}' best candidate {} at {} below auto-link threshold",
                    line.line_number,
                    line.description,
                    link.product_id,
                    link.confidence
                );
                None
            }
            None => None,
        })
    }

    // ---------------------------------------------------------------
    // 待处理阶段编辑
    // ---------------------------------------------------------------

    /// 人工关联 (置信度 100), 覆盖原有关联
    pub async fn link(&self, invoice_id: InvoiceId, item_id: ItemId, product_id: ProductId) -> EngineResult<Invoice> {
        let _guard = self.lock(invoice_id)?;
        let mut invoice = self.get(invoice_id)?;
        let next = guard(&invoice, Transition::Link)?;
        find_item(&invoice, item_id)?;

        if self.catalog.get_product(product_id).await?.is_none() {
            return Err(EngineError::ProductNotFound(product_id));
        }

        find_item_mut(&mut invoice, item_id)?.link = Some(ProductLink::manual(product_id));
        record(&mut invoice, Transition::Link, next);
        self.save(&invoice).await?;

        tracing::info!("invoice {} item {} linked to product {}", invoice_id, item_id, product_id);
        Ok(invoice)
    }

    pub async fn unlink(&self, invoice_id: InvoiceId, item_id: ItemId) -> EngineResult<Invoice> {
        let _guard = self.lock(invoice_id)?;
        let mut invoice = self.get(invoice_id)?;
        let next = guard(&invoice, Transition::Unlink)?;

        let previous = find_item_mut(&mut invoice, item_id)?.link.take();
        record(&mut invoice, Transition::Unlink, next);
        self.save(&invoice).await?;

        if let Some(link) = previous {
            tracing::info!(
                "invoice {} item {} unlinked from product {}",
                invoice_id,
                item_id,
                link.product_id
            );
        }
        Ok(invoice)
    }

    /// 明细行的编码建议 (只读)
    pub async fn suggest_code(&self, invoice_id: InvoiceId, item_id: ItemId) -> EngineResult<CodeSuggestion> {
        let invoice = self.get(invoice_id)?;
        let item = find_item(&invoice, item_id)?;
        self.suggestion_for(&invoice, item).await
    }

    async fn suggestion_for(&self, invoice: &Invoice, item: &InvoiceItem) -> EngineResult<CodeSuggestion> {
        let primary = code_suggester::primary_code(item.supplier_code.as_deref(), &item.description);
        let existing = self.catalog.codes_with_prefix(&primary).await?;
        let qualifier = code_suggester::supplier_qualifier(&invoice.supplier.name);
        Ok(code_suggester::suggest(&primary, &qualifier, &existing))
    }

    /// 由明细行新建商品并关联
    ///
    /// 表单未给编码时使用建议编码; 与并发建商品撞码时重新建议。
    pub async fn create_product_from_item(
        &self,
        invoice_id: InvoiceId,
        item_id: ItemId,
        form: NewProductForm,
    ) -> EngineResult<(Product, Invoice)> {
        let _guard = self.lock(invoice_id)?;
        let mut invoice = self.get(invoice_id)?;
        let next = guard(&invoice, Transition::CreateProduct)?;
        let item = find_item(&invoice, item_id)?.clone();

        let mut errors = ValidationErrors::new();
        let name = form
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(item.description.as_str())
            .to_string();
        let cost = round2(&item.unit_value);
        let pricing = match (&form.sale_price, &form.margin) {
            (Some(price), _) if *price < BigDecimal::zero() => {
                errors.push("sale_price", "must not be negative");
                None
            }
            (Some(price), _) => Some(pricing::pricing_from_price(&cost, price)),
            (None, Some(margin)) => Some(pricing::pricing_from_margin(&cost, margin)),
            (None, None) => Some(pricing::pricing_from_margin(&cost, &self.config.default_margin)),
        };
        let requested_code = match form.code.as_deref() {
            None => None,
            Some(raw) => {
                let code = code_suggester::normalize_code(raw);
                if code.is_empty() {
                    errors.push("code", "must contain letters or digits");
                }
                Some(code)
            }
        };
        let pricing = match pricing {
            Some(p) if errors.is_empty() => p,
            _ => return Err(EngineError::Validation(errors)),
        };

        let new_product = |code: String| NewProduct {
            code,
            name: name.clone(),
            barcode: item.barcode.clone(),
            cost_price: pricing.cost_price.clone(),
            sale_price: pricing.sale_price.clone(),
            margin: pricing.margin.clone(),
        };

        let product = match requested_code {
            Some(code) => match self.catalog.create_product(new_product(code)).await {
                Ok(product) => product,
                Err(StoreError::DuplicateCode(code)) => {
                    return Err(EngineError::Validation(ValidationErrors::single(
                        "code",
                        format!("'{}' is already in use", code),
                    )))
                }
                Err(e) => return Err(e.into()),
            },
            None => self.create_with_suggested_code(&invoice, &item, new_product).await?,
        };

        find_item_mut(&mut invoice, item_id)?.link = Some(ProductLink {
            product_id: product.id,
            confidence: 100,
            method: MatchMethod::CreatedFromItem,
        });
        record(&mut invoice, Transition::CreateProduct, next);
        self.save(&invoice).await?;

        tracing::info!(
            "invoice {} item {} created product {} ({})",
            invoice_id,
            item_id,
            product.id,
            product.code
        );
        Ok((product, invoice))
    }

    async fn create_with_suggested_code<F>(
        &self,
        invoice: &Invoice,
        item: &InvoiceItem,
        new_product: F,
    ) -> EngineResult<Product>
    where
        F: Fn(String) -> NewProduct + Send + Sync,
    {
        let mut last_code = String::new();
        for attempt in 1..=CODE_ATTEMPTS {
            let suggestion = self.suggestion_for(invoice, item).await?;
            let code = suggestion.recommended_code().to_string();
            match self.catalog.create_product(new_product(code.clone())).await {
                Ok(product) => return Ok(product),
                Err(StoreError::DuplicateCode(_)) => {
                    tracing::warn!(
                        "code {} taken concurrently (attempt {}/{}), suggesting again",
                        code,
                        attempt,
                        CODE_ATTEMPTS
                    );
                    last_code = code;
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::error!("could not reserve a product code near {}", last_code);
        Err(EngineError::Conflict(invoice.id))
    }

    /// 切换分配模式; 离开 partial 时清空各行指定数量
    pub async fn set_allocation(&self, invoice_id: InvoiceId, mode: AllocationMode) -> EngineResult<Invoice> {
        let _guard = self.lock(invoice_id)?;
        let mut invoice = self.get(invoice_id)?;
        let next = guard(&invoice, Transition::SetAllocation)?;

        invoice.allocation = mode;
        if mode != AllocationMode::Partial {
            for item in invoice.items.values_mut() {
                item.designated_quantity = None;
            }
        }
        refresh_allocation(&mut invoice);
        record(&mut invoice, Transition::SetAllocation, next);
        self.save(&invoice).await?;

        tracing::info!(
            "invoice {} allocation set to {:?} ({}% online)",
            invoice_id,
            mode,
            invoice.online_percentage
        );
        Ok(invoice)
    }

    /// 设置单行线上数量, 仅 partial 模式
    pub async fn set_item_designation(
        &self,
        invoice_id: InvoiceId,
        item_id: ItemId,
        designated: BigDecimal,
    ) -> EngineResult<Invoice> {
        let _guard = self.lock(invoice_id)?;
        let mut invoice = self.get(invoice_id)?;
        let next = guard(&invoice, Transition::SetAllocation)?;
        if invoice.allocation != AllocationMode::Partial {
            return Err(EngineError::precondition(
                invoice_id,
                Transition::SetAllocation,
                "item designation requires partial allocation",
            ));
        }

        let item = find_item_mut(&mut invoice, item_id)?;
        allocation::validate_designation(item, &designated).map_err(EngineError::Validation)?;
        item.designated_quantity = Some(designated);

        refresh_allocation(&mut invoice);
        record(&mut invoice, Transition::SetAllocation, next);
        self.save(&invoice).await?;
        Ok(invoice)
    }

    // ---------------------------------------------------------------
    // 价格复核
    // ---------------------------------------------------------------

    /// 每个已关联商品一条价格复核, 不修改任何状态
    pub async fn enter_price_review(&self, invoice_id: InvoiceId) -> EngineResult<Vec<PriceRevision>> {
        let invoice = self.get(invoice_id)?;
        guard(&invoice, Transition::EnterPriceReview)?;
        if invoice.linked_count() == 0 {
            return Err(EngineError::precondition(
                invoice_id,
                Transition::EnterPriceReview,
                "no linked items",
            ));
        }
        self.revisions(&invoice).await
    }

    async fn revisions(&self, invoice: &Invoice) -> EngineResult<Vec<PriceRevision>> {
        let mut revisions = Vec::new();
        for (product_id, lines) in lines_by_product(invoice) {
            let product = self
                .catalog
                .get_product(product_id)
                .await?
                .ok_or(EngineError::ProductNotFound(product_id))?;
            revisions.push(pricing::propose_revision(
                &product,
                &lines,
                &self.config.default_margin,
            ));
        }
        Ok(revisions)
    }

    // ---------------------------------------------------------------
    // 提交 / 撤销
    // ---------------------------------------------------------------

    /// 入库提交: 写价格、加库存、建批次、记供应商编码、建应付, 全部在一个事务内
    ///
    /// 未关联的行跳过。任何一步失败都回滚, 发票保持 pending。
    pub async fn commit(&self, invoice_id: InvoiceId, overrides: &[PriceOverride]) -> EngineResult<Invoice> {
        let _guard = self.lock(invoice_id)?;
        let mut invoice = self.get(invoice_id)?;
        let next = guard(&invoice, Transition::Commit)?;
        if invoice.linked_count() == 0 {
            return Err(EngineError::precondition(
                invoice_id,
                Transition::Commit,
                "no linked items",
            ));
        }

        let revisions = self.revisions(&invoice).await?;
        let revisions = apply_overrides(revisions, overrides)?;

        for item in invoice.items.values().filter(|i| i.link.is_none()) {
            tracing::warn!(
                "invoice {} line {} '{}' is not linked, skipping stock entry",
                invoice_id,
                item.line_number,
                item.description
            );
        }

        let payable = NewPayable {
            invoice_id,
            supplier_tax_id: invoice.supplier.tax_id.clone(),
            amount: round2(&invoice.total_value),
            due_date: invoice.issue_date + Duration::days(self.config.payable_term_days),
        };

        let mut tx = self
            .inventory
            .begin()
            .await
            .map_err(|e| transaction_failure(invoice_id, Transition::Commit, e))?;
        let steps = match commit_steps(tx.as_mut(), &invoice, &revisions, payable).await {
            Ok(receipt) => {
                invoice.stock_entry_applied = true;
                invoice.receipt = Some(receipt);
                record(&mut invoice, Transition::Commit, next);
                tx.save_invoice(&invoice).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = steps {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!("rollback of invoice {} commit failed: {}", invoice_id, rollback);
            }
            tracing::error!("commit of invoice {} rolled back: {}", invoice_id, e);
            return Err(transaction_failure(invoice_id, Transition::Commit, e));
        }
        if let Err(e) = tx.commit().await {
            tracing::error!("commit of invoice {} rolled back: {}", invoice_id, e);
            return Err(transaction_failure(invoice_id, Transition::Commit, e));
        }
        self.invoices.insert(invoice_id, invoice.clone());

        tracing::info!(
            "invoice {} committed: {} products repriced, {} lines stocked",
            invoice_id,
            revisions.len(),
            invoice.linked_count()
        );
        Ok(invoice)
    }

    /// 撤销入库: 按提交回执冲回库存、批次、应付、价格和供应商编码
    pub async fn revert(&self, invoice_id: InvoiceId) -> EngineResult<Invoice> {
        let _guard = self.lock(invoice_id)?;
        let mut invoice = self.get(invoice_id)?;
        let next = guard(&invoice, Transition::Revert)?;
        let receipt = invoice.receipt.clone().ok_or_else(|| {
            EngineError::precondition(invoice_id, Transition::Revert, "no commit receipt recorded")
        })?;

        let mut tx = self
            .inventory
            .begin()
            .await
            .map_err(|e| transaction_failure(invoice_id, Transition::Revert, e))?;
        let steps = match revert_steps(tx.as_mut(), &invoice, &receipt).await {
            Ok(()) => {
                invoice.stock_entry_applied = false;
                invoice.receipt = None;
                record(&mut invoice, Transition::Revert, next);
                tx.save_invoice(&invoice).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = steps {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!("rollback of invoice {} revert failed: {}", invoice_id, rollback);
            }
            tracing::error!("revert of invoice {} rolled back: {}", invoice_id, e);
            return Err(transaction_failure(invoice_id, Transition::Revert, e));
        }
        if let Err(e) = tx.commit().await {
            tracing::error!("revert of invoice {} rolled back: {}", invoice_id, e);
            return Err(transaction_failure(invoice_id, Transition::Revert, e));
        }
        self.invoices.insert(invoice_id, invoice.clone());

        tracing::info!("invoice {} reverted to pending", invoice_id);
        Ok(invoice)
    }

    /// 取消 (删除) 从未入库的待处理发票
    pub async fn cancel(&self, invoice_id: InvoiceId) -> EngineResult<InvoiceSummary> {
        let _guard = self.lock(invoice_id)?;
        let mut invoice = self.get(invoice_id)?;
        let next = guard(&invoice, Transition::Cancel)?;
        if invoice.stock_entry_applied || invoice.was_ever_committed() {
            return Err(EngineError::precondition(
                invoice_id,
                Transition::Cancel,
                "stock was applied to this invoice",
            ));
        }

        record(&mut invoice, Transition::Cancel, next);
        self.inventory.delete_invoice(invoice_id).await?;
        self.invoices.remove(&invoice_id);
        self.by_access_key.remove(&invoice.access_key);
        self.locks.remove(&invoice_id);

        tracing::info!("invoice {} ({}) cancelled", invoice_id, invoice.access_key);
        Ok(invoice.summary())
    }
}

/// 复核人覆盖价格; 覆盖的商品必须在本发票上有关联
fn apply_overrides(
    revisions: Vec<PriceRevision>,
    overrides: &[PriceOverride],
) -> EngineResult<Vec<PriceRevision>> {
    let mut errors = ValidationErrors::new();
    for (index, o) in overrides.iter().enumerate() {
        if !revisions.iter().any(|r| r.product_id == o.product_id) {
            errors.push(
                format!("overrides[{}].product_id", index),
                format!("product {} is not linked on this invoice", o.product_id),
            );
        }
        if matches!(&o.sale_price, Some(p) if *p < BigDecimal::zero()) {
            errors.push(format!("overrides[{}].sale_price", index), "must not be negative");
        }
    }
    if !errors.is_empty() {
        return Err(EngineError::Validation(errors));
    }

    Ok(revisions
        .into_iter()
        .map(|revision| {
            match overrides.iter().find(|o| o.product_id == revision.product_id) {
                Some(o) => revision.apply_override(o),
                None => revision,
            }
        })
        .collect())
}

async fn commit_steps(
    tx: &mut dyn InventoryTx,
    invoice: &Invoice,
    revisions: &[PriceRevision],
    payable: NewPayable,
) -> Result<CommitReceipt, StoreError> {
    let mut pricing = Vec::with_capacity(revisions.len());
    for revision in revisions {
        let applied = revision.new_pricing();
        let previous = tx.update_pricing(revision.product_id, &applied).await?;
        pricing.push(PricingChange {
            product_id: revision.product_id,
            previous,
            applied,
        });
    }

    // 线上线下共用一个库存数, 分配模式不影响入库数量
    let mut quantities: IndexMap<ProductId, BigDecimal> = IndexMap::new();
    for item in invoice.linked_items() {
        if let Some(link) = &item.link {
            *quantities.entry(link.product_id).or_insert_with(BigDecimal::zero) += &item.quantity;
        }
    }
    let mut stock = Vec::with_capacity(quantities.len());
    for (product_id, quantity) in quantities {
        tx.add_stock(product_id, &quantity).await?;
        stock.push(StockEntry {
            product_id,
            quantity,
        });
    }

    let mut lots = Vec::new();
    for item in invoice.linked_items() {
        let Some(link) = &item.link else { continue };
        let lot_number = item
            .lot
            .clone()
            .unwrap_or_else(|| format!("{}-{}", invoice.access_key, item.line_number));
        let lot_id = tx
            .create_lot(NewLot {
                product_id: link.product_id,
                invoice_id: invoice.id,
                lot_number,
                quantity: item.quantity.clone(),
                expiry: item.expiry,
            })
            .await?;
        lots.push(lot_id);
    }

    let mut learned: IndexMap<&str, ProductId> = IndexMap::new();
    for item in invoice.linked_items() {
        if let (Some(code), Some(link)) = (item.supplier_code.as_deref(), &item.link) {
            learned.insert(code, link.product_id);
        }
    }
    let mut supplier_codes = Vec::with_capacity(learned.len());
    for (code, product_id) in learned {
        let previous = tx
            .set_supplier_code(&invoice.supplier.tax_id, code, Some(product_id))
            .await?;
        supplier_codes.push(SupplierCodeChange {
            supplier_tax_id: invoice.supplier.tax_id.clone(),
            supplier_code: code.to_string(),
            product_id,
            previous,
        });
    }

    let payable_id = tx.create_payable(payable).await?;

    Ok(CommitReceipt {
        committed_at: Utc::now(),
        stock,
        lots,
        payable_id,
        pricing,
        supplier_codes,
    })
}

async fn revert_steps(
    tx: &mut dyn InventoryTx,
    invoice: &Invoice,
    receipt: &CommitReceipt,
) -> Result<(), StoreError> {
    for lot_id in &receipt.lots {
        tx.delete_lot(*lot_id).await?;
    }
    for entry in &receipt.stock {
        tx.remove_stock(entry.product_id, &entry.quantity).await?;
    }
    tx.cancel_payable(receipt.payable_id).await?;

    for change in &receipt.pricing {
        let current = tx.pricing(change.product_id).await?;
        if current == change.applied {
            tx.update_pricing(change.product_id, &change.previous).await?;
        } else {
            tracing::warn!(
                "product {} was repriced after invoice {} was committed, keeping current pricing",
                change.product_id,
                invoice.id
            );
        }
    }

    for change in receipt.supplier_codes.iter().rev() {
        tx.set_supplier_code(&change.supplier_tax_id, &change.supplier_code, change.previous)
            .await?;
    }
    Ok(())
}

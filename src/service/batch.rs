//! 批量导入: 每张发票独立导入, 单张失败不影响其他; 结果保持提交顺序。

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::lifecycle::InvoiceLifecycle;
use crate::error::ErrorKind;
use crate::models::{BatchId, BatchItemResult, BatchOutcome, BatchRun, RawInvoice};

/// 批次取消标记: 置位后尚未开始的条目记为 skipped, 已完成的不回滚
#[derive(Debug, Clone, Default)]
pub struct BatchCancellation(Arc<AtomicBool>);

impl BatchCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 批量导入协调器
pub struct BatchCoordinator {
    lifecycle: Arc<InvoiceLifecycle>,
    workers: usize,
    runs: DashMap<BatchId, BatchRun>,
    next_id: AtomicU64,
}

impl BatchCoordinator {
    pub fn new(lifecycle: Arc<InvoiceLifecycle>, workers: usize) -> Self {
        Self {
            lifecycle,
            workers: workers.max(1),
            runs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn submit(&self, invoices: Vec<RawInvoice>) -> BatchRun {
        self.submit_with_cancellation(invoices, &BatchCancellation::new())
            .await
    }

    /// 最多 workers 张发票并发导入; 返回的 outcomes 与输入顺序一致
    pub async fn submit_with_cancellation(
        &self,
        invoices: Vec<RawInvoice>,
        cancellation: &BatchCancellation,
    ) -> BatchRun {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let started_at = Utc::now();
        let total = invoices.len();
        tracing::info!("batch {} started: {} invoices, {} workers", id, total, self.workers);

        let outcomes: Vec<BatchOutcome> = stream::iter(invoices.into_iter().enumerate())
            .map(|(position, raw)| {
                let lifecycle = self.lifecycle.clone();
                let cancellation = cancellation.clone();
                async move { run_one(lifecycle, cancellation, position, raw).await }
            })
            .buffered(self.workers)
            .collect()
            .await;

        let mut run = BatchRun {
            id,
            started_at,
            finished_at: Utc::now(),
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            outcomes,
        };
        for outcome in &run.outcomes {
            match outcome.result {
                BatchItemResult::Succeeded { .. } => run.succeeded += 1,
                BatchItemResult::Failed { .. } => run.failed += 1,
                BatchItemResult::Skipped => run.skipped += 1,
            }
        }

        tracing::info!(
            "batch {} finished: {} succeeded, {} failed, {} skipped",
            id,
            run.succeeded,
            run.failed,
            run.skipped
        );
        self.runs.insert(id, run.clone());
        run
    }

    pub fn get(&self, id: BatchId) -> Option<BatchRun> {
        self.runs.get(&id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<BatchRun> {
        let mut runs: Vec<BatchRun> = self.runs.iter().map(|e| e.value().clone()).collect();
        runs.sort_by_key(|r| r.id);
        runs
    }
}

async fn run_one(
    lifecycle: Arc<InvoiceLifecycle>,
    cancellation: BatchCancellation,
    position: usize,
    raw: RawInvoice,
) -> BatchOutcome {
    let access_key = raw.access_key.clone();
    if cancellation.is_cancelled() {
        return BatchOutcome {
            position,
            access_key,
            result: BatchItemResult::Skipped,
        };
    }

    let handle = tokio::spawn(async move { lifecycle.ingest(raw).await });
    let result = match handle.await {
        Ok(Ok(invoice)) => BatchItemResult::Succeeded {
            invoice: invoice.summary(),
        },
        Ok(Err(e)) => {
            tracing::warn!("batch item {} failed: {}", position, e);
            BatchItemResult::Failed {
                kind: e.kind(),
                reason: e.to_string(),
            }
        }
        Err(join) => {
            tracing::error!("batch item {} worker aborted: {}", position, join);
            BatchItemResult::Failed {
                kind: ErrorKind::Store,
                reason: format!("worker aborted: {}", join),
            }
        }
    };

    BatchOutcome {
        position,
        access_key,
        result,
    }
}

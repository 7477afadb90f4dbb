use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::invoice::InvoiceSummary;
use crate::error::ErrorKind;

pub type BatchId = u64;

/// 单张发票的批处理结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItemResult {
    Succeeded { invoice: InvoiceSummary },
    Failed { kind: ErrorKind, reason: String },
    /// 批次被取消时尚未开始的条目
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// 在提交列表中的原始序号 (从 0 开始)
    pub position: usize,
    pub access_key: Option<String>,
    pub result: BatchItemResult,
}

/// 批量导入结果, 完成后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: BatchId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<BatchOutcome>,
}

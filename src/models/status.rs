use serde::{Deserialize, Serialize};
use std::fmt;

/// 发票生命周期状态
///
/// `Cancelled` 只出现在历史与转换表中: 取消即从仓库删除发票。
/// 撤销 (revert) 回到 `Pending`, 不单独成为持久状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Processed,
    Cancelled,
}

/// 状态机上的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Ingest,
    Link,
    Unlink,
    CreateProduct,
    SetAllocation,
    EnterPriceReview,
    Commit,
    Revert,
    Cancel,
}

impl Transition {
    /// 是否为待处理阶段的编辑操作 (不改变状态)
    pub fn is_pending_edit(self) -> bool {
        matches!(
            self,
            Transition::Link
                | Transition::Unlink
                | Transition::CreateProduct
                | Transition::SetAllocation
                | Transition::EnterPriceReview
        )
    }
}

impl InvoiceStatus {
    /// 唯一的转换表: 返回目标状态, 非法转换返回 None
    pub fn next(self, transition: Transition) -> Option<InvoiceStatus> {
        use InvoiceStatus::*;
        match (self, transition) {
            (Pending, t) if t.is_pending_edit() => Some(Pending),
            (Pending, Transition::Commit) => Some(Processed),
            (Pending, Transition::Cancel) => Some(Cancelled),
            (Processed, Transition::Revert) => Some(Pending),
            _ => None,
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Processed => "processed",
            InvoiceStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transition::Ingest => "ingest",
            Transition::Link => "link",
            Transition::Unlink => "unlink",
            Transition::CreateProduct => "create product from",
            Transition::SetAllocation => "set allocation of",
            Transition::EnterPriceReview => "review prices of",
            Transition::Commit => "commit",
            Transition::Revert => "revert",
            Transition::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::StoreError;
use crate::models::{InvoiceId, ItemId, ProductId, Transition};

/// 错误大类, 对外 (HTTP / 批处理报告) 只暴露这一层
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Precondition,
    Conflict,
    Transaction,
    Store,
}

/// 单个字段校验错误, field 形如 `items[2].quantity`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// 一次校验收集到的全部字段错误
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// 引擎错误
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("invoice with access key {access_key} already exists")]
    DuplicateInvoice { access_key: String },

    #[error("invoice {0} not found")]
    InvoiceNotFound(InvoiceId),

    #[error("item {item_id} not found on invoice {invoice_id}")]
    ItemNotFound { invoice_id: InvoiceId, item_id: ItemId },

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("cannot {transition} invoice {invoice_id}: {reason}")]
    Precondition {
        invoice_id: InvoiceId,
        transition: Transition,
        reason: String,
    },

    #[error("invoice {0} is being modified by another operation, reload and retry")]
    Conflict(InvoiceId),

    #[error("{transition} of invoice {invoice_id} rolled back: {source}")]
    Transaction {
        invoice_id: InvoiceId,
        transition: Transition,
        #[source]
        source: StoreError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::DuplicateInvoice { .. } => {
                ErrorKind::Validation
            }
            EngineError::InvoiceNotFound(_)
            | EngineError::ItemNotFound { .. }
            | EngineError::ProductNotFound(_) => ErrorKind::NotFound,
            EngineError::Precondition { .. } => ErrorKind::Precondition,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Transaction { .. } => ErrorKind::Transaction,
            EngineError::Store(_) => ErrorKind::Store,
        }
    }

    /// 只有事务失败且底层错误为瞬时错误时才值得自动重试
    pub fn is_retriable(&self) -> bool {
        match self {
            EngineError::Transaction { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn precondition(
        invoice_id: InvoiceId,
        transition: Transition,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::Precondition {
            invoice_id,
            transition,
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_render_every_field() {
        let mut errors = ValidationErrors::new();
        errors.push("access_key", "is required");
        errors.push("items[1].quantity", "must be positive");
        assert_eq!(
            errors.to_string(),
            "access_key: is required; items[1].quantity: must be positive"
        );
        assert!(errors.has_field("items[1].quantity"));
    }

    #[test]
    fn only_transient_transaction_failures_retry() {
        let transient = EngineError::Transaction {
            invoice_id: 1,
            transition: Transition::Commit,
            source: StoreError::Unavailable("payables".into()),
        };
        assert!(transient.is_retriable());
        assert_eq!(transient.kind(), ErrorKind::Transaction);

        let permanent = EngineError::Transaction {
            invoice_id: 1,
            transition: Transition::Revert,
            source: StoreError::NotFound {
                entity: "lot",
                id: 3,
            },
        };
        assert!(!permanent.is_retriable());

        assert!(!EngineError::Conflict(1).is_retriable());
    }

    #[test]
    fn precondition_message_names_the_operation() {
        let err = EngineError::precondition(4, Transition::Commit, "no linked items");
        assert_eq!(err.to_string(), "cannot commit invoice 4: no linked items");
    }
}

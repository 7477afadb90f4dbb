pub mod allocation;
pub mod batch;
pub mod divergence;
pub mod invoice;
pub mod pricing;
pub mod product;
pub mod status;
pub mod stock;
pub mod suggestion;
pub mod view;

pub use allocation::{AllocationMode, AllocationSummary, ChannelLine};
pub use batch::{BatchId, BatchItemResult, BatchOutcome, BatchRun};
pub use divergence::{Divergence, DivergenceCategory, Severity};
pub use invoice::{
    Invoice, InvoiceId, InvoiceItem, InvoiceSummary, ItemId, RawInvoice, RawInvoiceItem,
    RawSupplier, StatusChange, Supplier,
};
pub use pricing::{PriceOverride, PriceRevision};
pub use product::{
    ConfidenceBand, MatchMethod, NewProduct, NewProductForm, Pricing, Product, ProductId,
    ProductLink, ProductSummary,
};
pub use status::{InvoiceStatus, Transition};
pub use stock::{
    CommitReceipt, LotId, NewLot, NewPayable, Payable, PayableId, PricingChange, StockEntry,
    StockLot, SupplierCodeChange,
};
pub use suggestion::{CodeCandidate, CodeSuggestion};
pub use view::{InvoiceView, ItemView};

pub mod allocation;
pub mod batch;
pub mod code_suggester;
pub mod divergence;
pub mod intake;
pub mod lifecycle;
pub mod matcher;
pub mod pricing;
pub mod retry;
pub mod text;

pub use batch::{BatchCancellation, BatchCoordinator};
pub use divergence::{DivergenceDetector, TokenExtractor, Vocabulary, VocabularyExtractor};
pub use lifecycle::InvoiceLifecycle;
pub use matcher::{MatchCandidates, Matcher, TextScorer, TokenEditScorer};
pub use retry::RetryPolicy;

pub mod collector;
pub mod config;
pub mod database;
pub mod enricher;
pub mod extractor;
pub mod fetcher;
pub mod ledger;
pub mod llm_adapter;
pub mod parser;
pub mod pipeline;
pub mod publish;
pub mod selector;
pub mod sources;
pub mod store;
pub mod summarizer;
pub mod types;
pub mod utils;

pub use collector::{CandidateCollector, Collection};
pub use config::{AppConfig, SeedFile};
pub use enricher::{ContentEnricher, EnrichConfig, Enrichment};
pub use extractor::HtmlExtractor;
pub use fetcher::Fetcher;
pub use ledger::HistoryLedger;
pub use llm_adapter::{GeminiAdapter, GeminiConfig, MockLlmAdapter};
pub use parser::FeedParser;
pub use pipeline::{Delivery, DeliveryStatus, DigestPipeline, RunOutcome, RunSettings};
pub use publish::{Artifacts, AssemblyConfig, DocumentAssembler, Edition};
pub use selector::{RelevanceSelector, Selection, SelectionDecode};
pub use sources::RssFeedSource;
pub use store::{ReaderStore, ReaderSummary};
pub use summarizer::Summarizer;
pub use types::*;

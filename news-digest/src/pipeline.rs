use crate::collector::CandidateCollector;
use crate::enricher::ContentEnricher;
use crate::ledger::HistoryLedger;
use crate::publish::{Artifacts, DocumentAssembler};
use crate::selector::RelevanceSelector;
use crate::store::ReaderStore;
use crate::summarizer::Summarizer;
use crate::types::Result;
use chrono::NaiveDate;
use interfaces::{DeliveredItem, MailTransport, Reader, ReaderId, Source};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Per-invocation knobs. The selection limit is not fixed anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    pub selection_limit: usize,
    pub per_source_limit: usize,
    pub send: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            selection_limit: 2,
            per_source_limit: 5,
            send: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent { destination: String },
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub reader_id: ReaderId,
    pub collected: usize,
    pub selected: usize,
    pub published_titles: Vec<String>,
    pub failed_urls: Vec<String>,
    pub artifacts: Option<Artifacts>,
    pub recorded: u64,
    pub delivery: DeliveryStatus,
}

impl RunOutcome {
    fn empty(reader_id: ReaderId) -> Self {
        Self {
            reader_id,
            collected: 0,
            selected: 0,
            published_titles: Vec::new(),
            failed_urls: Vec::new(),
            artifacts: None,
            recorded: 0,
            delivery: DeliveryStatus::Skipped,
        }
    }

    pub fn published(&self) -> bool {
        self.artifacts.is_some()
    }
}

/// Where a finished edition goes once it is on disk.
pub struct Delivery {
    pub mailer: Arc<dyn MailTransport>,
    /// Used when the reader has no device address of their own.
    pub fallback_destination: Option<String>,
}

/// One reader's run, stage by stage: collect, select, enrich, summarize,
/// assemble, record, deliver. Every stage before assembly degrades instead
/// of failing; an assembly error ends the run before the ledger is touched.
pub struct DigestPipeline {
    store: ReaderStore,
    ledger: HistoryLedger,
    collector: CandidateCollector,
    selector: RelevanceSelector,
    enricher: ContentEnricher,
    summarizer: Summarizer,
    assembler: DocumentAssembler,
    delivery: Option<Delivery>,
}

impl DigestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ReaderStore,
        ledger: HistoryLedger,
        collector: CandidateCollector,
        selector: RelevanceSelector,
        enricher: ContentEnricher,
        summarizer: Summarizer,
        assembler: DocumentAssembler,
    ) -> Self {
        Self {
            store,
            ledger,
            collector,
            selector,
            enricher,
            summarizer,
            assembler,
            delivery: None,
        }
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub async fn run_for_reader(
        &self,
        reader_id: ReaderId,
        settings: RunSettings,
        date: NaiveDate,
    ) -> Result<RunOutcome> {
        let reader = self.store.get_reader(reader_id).await?;
        let sources = self.store.active_sources(reader_id).await?;
        let interests: Vec<String> = self
            .store
            .interests(reader_id)
            .await?
            .into_iter()
            .map(|interest| interest.keyword)
            .collect();
        self.run_with(&reader, &sources, &interests, settings, date).await
    }

    pub async fn run_with(
        &self,
        reader: &Reader,
        sources: &[Source],
        interests: &[String],
        settings: RunSettings,
        date: NaiveDate,
    ) -> Result<RunOutcome> {
        info!("Starting digest for {} <{}>", reader.name, reader.email);
        let mut outcome = RunOutcome::empty(reader.id);

        let collection = self.collector.collect(sources, settings.per_source_limit).await;
        outcome.collected = collection.candidates.len();
        if collection.candidates.is_empty() {
            warn!("No candidates collected for reader {}", reader.id);
            return Ok(outcome);
        }

        let delivered = self.ledger.delivered_urls(reader.id).await?;
        let selection = self
            .selector
            .select(&collection.candidates, interests, settings.selection_limit, &delivered)
            .await;
        outcome.selected = selection.selected.len();
        if selection.selected.is_empty() {
            info!("Nothing new to publish for reader {}", reader.id);
            return Ok(outcome);
        }

        let enrichment = self.enricher.enrich_all(&selection.selected).await;
        outcome.failed_urls = enrichment.failed_urls;
        let mut articles = enrichment.articles;
        if articles.is_empty() {
            warn!("Every selected article failed enrichment for reader {}", reader.id);
            return Ok(outcome);
        }

        let briefing = self.summarizer.summarize_all(&mut articles).await;

        let artifacts = self
            .assembler
            .assemble(date, &briefing, &articles, &selection.unselected)
            .inspect_err(|e| error!("Assembly failed for reader {}: {}", reader.id, e))?;

        let items: Vec<DeliveredItem> = articles.iter().map(|a| DeliveredItem::from(&a.candidate)).collect();
        outcome.recorded = self.ledger.record_all(reader.id, &items).await?;
        outcome.published_titles = artifacts.titles.clone();

        outcome.delivery = if settings.send {
            self.deliver(reader, &artifacts).await
        } else {
            DeliveryStatus::Skipped
        };
        outcome.artifacts = Some(artifacts);

        log_outcome(&outcome);
        Ok(outcome)
    }

    async fn deliver(&self, reader: &Reader, artifacts: &Artifacts) -> DeliveryStatus {
        let Some(delivery) = &self.delivery else {
            info!("No mail transport configured, edition left on disk");
            return DeliveryStatus::Skipped;
        };
        let Some(artifact) = artifacts.primary() else {
            return DeliveryStatus::Failed("no artifact to send".to_string());
        };

        let destination = Some(reader.device_email.trim())
            .filter(|d| !d.is_empty())
            .or(delivery.fallback_destination.as_deref().map(str::trim).filter(|d| !d.is_empty()));
        let Some(destination) = destination else {
            warn!("Reader {} has no delivery address", reader.id);
            return DeliveryStatus::Failed("no destination address".to_string());
        };

        match delivery.mailer.send(artifact, destination).await {
            Ok(()) => {
                info!("Sent {} to {}", artifact.display(), destination);
                DeliveryStatus::Sent {
                    destination: destination.to_string(),
                }
            }
            Err(e) => {
                warn!("Delivery to {} failed: {:#}", destination, e);
                DeliveryStatus::Failed(e.to_string())
            }
        }
    }
}

fn log_outcome(outcome: &RunOutcome) {
    info!(
        "Reader {}: collected {}, selected {}, published {}, failed {}, recorded {}, delivery {:?}",
        outcome.reader_id,
        outcome.collected,
        outcome.selected,
        outcome.published_titles.len(),
        outcome.failed_urls.len(),
        outcome.recorded,
        outcome.delivery
    );
    for url in &outcome.failed_urls {
        warn!("  not published: {}", url);
    }
}

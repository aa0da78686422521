use chrono::Local;
use clap::{Parser, Subcommand};
use digest_delivery::SmtpMailer;
use interfaces::{ReaderId, ReasoningService};
use news_digest::config::redact_url;
use news_digest::{
    database, AppConfig, AssemblyConfig, CandidateCollector, ContentEnricher, Delivery, DigestError,
    DigestPipeline, DocumentAssembler, EnrichConfig, FetchConfig, Fetcher, GeminiAdapter, GeminiConfig,
    HistoryLedger, HtmlExtractor, ReaderStore, RelevanceSelector, RssFeedSource, RunSettings, SeedFile,
    Summarizer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "news-digest", about = "Personal news digest: collect, select, summarize, publish")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build and deliver today's edition
    Run {
        /// Only this reader (default: every active reader)
        #[arg(long)]
        reader: Option<ReaderId>,
        /// Maximum number of articles selected
        #[arg(long)]
        limit: Option<usize>,
        /// Maximum number of entries read from each feed
        #[arg(long)]
        per_source: Option<usize>,
        /// Write the documents but do not mail them
        #[arg(long)]
        no_send: bool,
        #[arg(long)]
        no_images: bool,
    },
    /// Inspect or reset the delivery history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Load a reader, their feeds and topics from a YAML file
    Seed { file: PathBuf },
    /// List readers with their feeds and topics
    Readers,
}

#[derive(Subcommand)]
enum HistoryAction {
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    Clear {
        #[arg(long)]
        reader: Option<ReaderId>,
        /// Required: confirms the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    info!("Connecting to database: {}", redact_url(&config.database_url));
    let pool = database::connect(&config.database_url).await?;
    let store = ReaderStore::new(pool.clone());
    let ledger = HistoryLedger::new(pool);

    match cli.command {
        Command::Run {
            reader,
            limit,
            per_source,
            no_send,
            no_images,
        } => {
            let settings = RunSettings {
                selection_limit: limit.unwrap_or(config.selection_limit),
                per_source_limit: per_source.unwrap_or(config.per_source_limit),
                send: !no_send,
            };
            run(&config, store, ledger, reader, settings, !no_images).await?;
        }
        Command::History { action } => match action {
            HistoryAction::List { limit } => {
                let total = ledger.count().await?;
                println!("{} delivered articles in history", total);
                for entry in ledger.recent(limit).await? {
                    println!(
                        "{}  reader {}  {}\n    {}",
                        entry.processed_at.format("%Y-%m-%d %H:%M"),
                        entry.reader_id,
                        entry.title,
                        entry.url
                    );
                }
            }
            HistoryAction::Clear { reader, yes } => {
                if !yes {
                    return Err("refusing to clear history without --yes".into());
                }
                let removed = ledger.clear(reader).await?;
                println!("Removed {} history entries", removed);
            }
        },
        Command::Seed { file } => seed(&store, SeedFile::load(&file)?).await?,
        Command::Readers => {
            for summary in store.reader_summary().await? {
                let reader = &summary.reader;
                println!(
                    "#{} {} <{}> device: {} {}",
                    reader.id,
                    reader.name,
                    reader.email,
                    if reader.device_email.is_empty() { "-" } else { reader.device_email.as_str() },
                    if reader.is_active { "" } else { "(inactive)" }
                );
                println!("    sources: {}", summary.source_count);
                println!("    topics: {}", summary.topics.join(", "));
            }
        }
    }

    Ok(())
}

async fn seed(store: &ReaderStore, seed: SeedFile) -> Result<(), DigestError> {
    let reader = store
        .upsert_reader(&seed.reader.name, &seed.reader.email, &seed.reader.device_email)
        .await?;
    let mut added = 0;
    for source in &seed.sources {
        if store.add_source(reader.id, &source.name, &source.url).await? {
            added += 1;
        }
    }
    store.replace_interests(reader.id, &seed.preferences.topics).await?;
    println!(
        "Reader #{} {}: {} new sources, {} topics",
        reader.id,
        reader.email,
        added,
        seed.preferences.topics.len()
    );
    Ok(())
}

async fn run(
    config: &AppConfig,
    store: ReaderStore,
    ledger: HistoryLedger,
    reader: Option<ReaderId>,
    settings: RunSettings,
    include_images: bool,
) -> Result<(), DigestError> {
    let fetcher = Arc::new(Fetcher::new(FetchConfig::default())?);
    let reasoner: Arc<dyn ReasoningService> = Arc::new(GeminiAdapter::new(GeminiConfig::new(
        config.require_gemini_key()?,
        config.gemini_model.clone(),
    ))?);

    let mut pipeline = DigestPipeline::new(
        store.clone(),
        ledger,
        CandidateCollector::new(Arc::new(RssFeedSource::new(fetcher.clone()))),
        RelevanceSelector::new(reasoner.clone()),
        ContentEnricher::new(
            Arc::new(HtmlExtractor::new(fetcher)),
            EnrichConfig {
                include_images: include_images && config.include_images,
                images_dir: config.images_dir.clone(),
            },
        ),
        Summarizer::new(reasoner, config.summary_language.clone()),
        DocumentAssembler::new(AssemblyConfig {
            output_dir: config.output_dir.clone(),
            language: config.language.clone(),
            include_unselected: config.include_unselected,
        }),
    );

    if settings.send {
        match config.smtp() {
            Some(smtp) => {
                pipeline = pipeline.with_delivery(Delivery {
                    mailer: Arc::new(SmtpMailer::new(smtp)),
                    fallback_destination: config.fallback_destination.clone(),
                });
            }
            None => warn!("SENDER_EMAIL/EMAIL_PASSWORD not set, editions will not be mailed"),
        }
    }

    let readers = match reader {
        Some(id) => vec![store.get_reader(id).await?],
        None => store.list_active_readers().await?,
    };
    if readers.is_empty() {
        warn!("No active readers, run `news-digest seed <file>` first");
        return Ok(());
    }

    let today = Local::now().date_naive();
    let mut failure = None;
    for reader in readers {
        match pipeline.run_for_reader(reader.id, settings, today).await {
            Ok(outcome) if outcome.published() => {
                for title in &outcome.published_titles {
                    info!("  published: {}", title);
                }
            }
            Ok(_) => info!("No edition for reader {}", reader.id),
            Err(e) => {
                error!("Run for reader {} failed: {}", reader.id, e);
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

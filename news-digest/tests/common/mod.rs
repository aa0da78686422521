#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use interfaces::{ArticleExtractor, Extraction, FeedEntry, FeedSource, MailTransport, ReasoningService};
use lopdf::{Document, Object};
use news_digest::{
    database, AssemblyConfig, CandidateCollector, ContentEnricher, Delivery, DigestPipeline,
    DocumentAssembler, EnrichConfig, HistoryLedger, MockLlmAdapter, ReaderStore, RelevanceSelector,
    Summarizer,
};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// 2x2 red PNG
pub const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x02, 0x08, 0x02, 0x00, 0x00, 0x00, 0xFD, 0xD4, 0x9A,
    0x73, 0x00, 0x00, 0x00, 0x10, 0x49, 0x44, 0x41, 0x54, 0x78, 0xDA, 0x63, 0xF8, 0xCF, 0xC0, 0x00,
    0x44, 0x0C, 0x10, 0x0A, 0x00, 0x1F, 0xEE, 0x03, 0xFD, 0x63, 0x5E, 0xBB, 0x5B, 0x00, 0x00, 0x00,
    0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

pub fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 6).unwrap_or_default()
}

/// Feeds served from memory. Unknown URLs fail like a refused connection.
#[derive(Default)]
pub struct StaticFeeds {
    feeds: HashMap<String, Vec<FeedEntry>>,
}

impl StaticFeeds {
    pub fn with_feed(mut self, url: &str, links: &[(&str, &str)]) -> Self {
        let entries = links
            .iter()
            .map(|(title, link)| FeedEntry {
                title: title.to_string(),
                link: link.to_string(),
                published: None,
            })
            .collect();
        self.feeds.insert(url.to_string(), entries);
        self
    }

    /// `count` stories named "`prefix` story n" linking to `https://<prefix>.test/n`.
    pub fn with_generated(self, url: &str, prefix: &str, count: usize) -> Self {
        let links: Vec<(String, String)> = (1..=count)
            .map(|i| (format!("{prefix} story {i}"), format!("https://{prefix}.test/{i}")))
            .collect();
        let borrowed: Vec<(&str, &str)> = links.iter().map(|(t, l)| (t.as_str(), l.as_str())).collect();
        self.with_feed(url, &borrowed)
    }
}

#[async_trait]
impl FeedSource for StaticFeeds {
    async fn entries(&self, url: &str) -> Result<Vec<FeedEntry>> {
        self.feeds
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("connection refused: {url}"))
    }
}

/// Article pages served from memory. Every page offers a lead image at
/// `<url>/lead.png`.
#[derive(Default)]
pub struct StaticExtractor {
    failing_pages: HashSet<String>,
    failing_images: HashSet<String>,
}

impl StaticExtractor {
    pub fn failing_page(mut self, url: &str) -> Self {
        self.failing_pages.insert(url.to_string());
        self
    }

    pub fn failing_image(mut self, page_url: &str) -> Self {
        self.failing_images.insert(format!("{page_url}/lead.png"));
        self
    }
}

#[async_trait]
impl ArticleExtractor for StaticExtractor {
    async fn extract(&self, url: &str) -> Result<Extraction> {
        if self.failing_pages.contains(url) {
            anyhow::bail!("HTTP 404 from {url}");
        }
        Ok(Extraction {
            body: format!("Full text of the article at {url}.\n\nSecond paragraph."),
            lead_image_url: Some(format!("{url}/lead.png")),
            authors: vec!["Staff Reporter".to_string()],
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if self.failing_images.contains(url) {
            anyhow::bail!("image timed out: {url}");
        }
        Ok(PNG.to_vec())
    }
}

/// Answers selection prompts by picking candidate ids by position (in the
/// order the prompt lists them). `None` makes the call fail.
pub struct PositionalPicker {
    positions: Option<Vec<usize>>,
    extra_ids: Vec<String>,
    prompts: Mutex<Vec<String>>,
}

impl PositionalPicker {
    pub fn picking(positions: &[usize]) -> Self {
        Self {
            positions: Some(positions.to_vec()),
            extra_ids: Vec::new(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            positions: None,
            extra_ids: Vec::new(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Adds ids that match no candidate to every answer.
    pub fn with_hallucinated(mut self, id: &str) -> Self {
        self.extra_ids.push(id.to_string());
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

pub fn prompt_ids(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|line| line.strip_prefix("ID: "))
        .filter_map(|rest| rest.split(" | ").next())
        .map(|id| id.trim().to_string())
        .collect()
}

#[async_trait]
impl ReasoningService for PositionalPicker {
    fn name(&self) -> String {
        "positional picker".to_string()
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        anyhow::bail!("text generation is not scripted")
    }

    async fn generate_json(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let Some(positions) = &self.positions else {
            anyhow::bail!("deadline exceeded");
        };
        let ids = prompt_ids(prompt);
        let mut picked: Vec<String> = positions.iter().filter_map(|&i| ids.get(i).cloned()).collect();
        picked.extend(self.extra_ids.iter().cloned());
        Ok(serde_json::to_string(&picked)?)
    }
}

/// Records every send; optionally fails them all.
#[derive(Default)]
pub struct RecordingMailer {
    pub fail: bool,
    sent: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(PathBuf, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, artifact: &Path, destination: &str) -> Result<()> {
        if self.fail {
            anyhow::bail!("535 authentication failed");
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((artifact.to_path_buf(), destination.to_string()));
        }
        Ok(())
    }
}

pub struct Harness {
    pub store: ReaderStore,
    pub ledger: HistoryLedger,
    pub mailer: Arc<RecordingMailer>,
    pub picker: Arc<PositionalPicker>,
    pub output_dir: PathBuf,
    pub pipeline: DigestPipeline,
    _dir: tempfile::TempDir,
}

pub struct HarnessBuilder {
    feeds: StaticFeeds,
    extractor: StaticExtractor,
    picker: PositionalPicker,
    mailer: RecordingMailer,
    fallback_destination: Option<String>,
    unwritable_output: bool,
}

impl HarnessBuilder {
    pub fn new(feeds: StaticFeeds, picker: PositionalPicker) -> Self {
        Self {
            feeds,
            extractor: StaticExtractor::default(),
            picker,
            mailer: RecordingMailer::default(),
            fallback_destination: None,
            unwritable_output: false,
        }
    }

    pub fn extractor(mut self, extractor: StaticExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn mailer(mut self, mailer: RecordingMailer) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn fallback_destination(mut self, destination: &str) -> Self {
        self.fallback_destination = Some(destination.to_string());
        self
    }

    /// Points the output directory at a regular file so it cannot be created.
    pub fn unwritable_output(mut self) -> Self {
        self.unwritable_output = true;
        self
    }

    pub async fn build(self) -> Result<Harness> {
        init_tracing();
        let dir = tempfile::tempdir()?;
        let output_dir = if self.unwritable_output {
            let blocker = dir.path().join("not-a-directory");
            std::fs::write(&blocker, b"occupied")?;
            blocker.join("output")
        } else {
            dir.path().join("output")
        };

        let pool = database::in_memory().await?;
        let store = ReaderStore::new(pool.clone());
        let ledger = HistoryLedger::new(pool);
        let mailer = Arc::new(self.mailer);
        let picker = Arc::new(self.picker);

        let pipeline = DigestPipeline::new(
            store.clone(),
            ledger.clone(),
            CandidateCollector::new(Arc::new(self.feeds)),
            RelevanceSelector::new(picker.clone()),
            ContentEnricher::new(
                Arc::new(self.extractor),
                EnrichConfig {
                    include_images: true,
                    images_dir: dir.path().join("images"),
                },
            ),
            Summarizer::new(Arc::new(MockLlmAdapter::new("summaries")), "English"),
            DocumentAssembler::new(AssemblyConfig {
                output_dir: output_dir.clone(),
                ..AssemblyConfig::default()
            }),
        )
        .with_delivery(Delivery {
            mailer: mailer.clone(),
            fallback_destination: self.fallback_destination,
        });

        Ok(Harness {
            store,
            ledger,
            mailer,
            picker,
            output_dir,
            pipeline,
            _dir: dir,
        })
    }
}

fn zip_entry(path: &Path, name: &str) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path)?)?;
    let mut entry = archive.by_name(name)?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

pub fn epub_entry_names(path: &Path) -> Result<Vec<String>> {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path)?)?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        names.push(archive.by_index(i)?.name().to_string());
    }
    Ok(names)
}

pub fn epub_text(path: &Path, name: &str) -> Result<String> {
    zip_entry(path, &format!("OEBPS/{name}"))
}

/// Article titles of an EPUB, read from the `<h1>` of each article chapter.
pub fn epub_article_titles(path: &Path) -> Result<Vec<String>> {
    let mut titles = Vec::new();
    for name in epub_entry_names(path)? {
        let Some(file) = name.strip_prefix("OEBPS/article_") else {
            continue;
        };
        let Some(index) = file.strip_suffix(".xhtml").and_then(|i| i.parse::<usize>().ok()) else {
            continue;
        };
        let page = zip_entry(path, &name)?;
        let title = page
            .split("<h1>")
            .nth(1)
            .and_then(|rest| rest.split("</h1>").next())
            .unwrap_or_default()
            .to_string();
        titles.push((index, title));
    }
    titles.sort();
    Ok(titles.into_iter().map(|(_, title)| title).collect())
}

pub fn epub_image_count(path: &Path) -> Result<usize> {
    Ok(epub_entry_names(path)?
        .iter()
        .filter(|name| name.starts_with("OEBPS/images/"))
        .count())
}

fn pdf_title(doc: &Document, id: lopdf::ObjectId) -> Result<(String, Option<lopdf::ObjectId>, Option<lopdf::ObjectId>)> {
    let item = doc.get_dictionary(id)?;
    let title = match item.get(b"Title")? {
        Object::String(bytes, _) => String::from_utf8_lossy(bytes).into_owned(),
        other => anyhow::bail!("unexpected outline title {other:?}"),
    };
    let first = item.get(b"First").and_then(Object::as_reference).ok();
    let next = item.get(b"Next").and_then(Object::as_reference).ok();
    Ok((title, first, next))
}

/// The outline root title and its children, in order.
pub fn pdf_outline(path: &Path) -> Result<(String, Vec<String>)> {
    let doc = Document::load(path)?;
    let catalog = doc.catalog()?;
    let outlines = doc.get_dictionary(catalog.get(b"Outlines")?.as_reference()?)?;
    let root_id = outlines.get(b"First")?.as_reference()?;

    let (root_title, mut child, _) = pdf_title(&doc, root_id)?;
    let mut children = Vec::new();
    while let Some(id) = child {
        let (title, _, next) = pdf_title(&doc, id)?;
        children.push(title);
        child = next;
    }
    Ok((root_title, children))
}

pub fn pdf_image_count(path: &Path) -> Result<usize> {
    let doc = Document::load(path)?;
    Ok(doc
        .objects
        .values()
        .filter(|object| match object {
            Object::Stream(stream) => matches!(
                stream.dict.get(b"Subtype"),
                Ok(Object::Name(name)) if name.as_slice() == b"Image"
            ),
            _ => false,
        })
        .count())
}

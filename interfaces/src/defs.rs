use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ReaderId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reader {
    pub id: ReaderId,
    pub name: String,
    pub email: String,
    /// Address of the reading device the edition is mailed to.
    pub device_email: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub feed_url: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub reader_id: ReaderId,
    pub keyword: String,
}

/// A headline produced by collection. Lives for one run only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedArticle {
    pub candidate: Candidate,
    pub body: String,
    pub image: Option<PathBuf>,
    pub summary: Option<String>,
    pub authors: Vec<String>,
}

impl EnrichedArticle {
    pub fn new(candidate: Candidate, body: String) -> Self {
        Self {
            candidate,
            body,
            image: None,
            summary: None,
            authors: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.candidate.title
    }

    pub fn url(&self) -> &str {
        &self.candidate.url
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Briefing {
    pub text: String,
}

/// What the ledger needs to remember about a delivered article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredItem {
    pub title: String,
    pub url: String,
    pub published: Option<DateTime<Utc>>,
}

impl From<&Candidate> for DeliveredItem {
    fn from(candidate: &Candidate) -> Self {
        Self {
            title: candidate.title.clone(),
            url: candidate.url.clone(),
            published: candidate.published,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub reader_id: ReaderId,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
}

/// One entry as handed back by a feed source, in feed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
}

/// Result of pulling the full text out of an article page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub body: String,
    pub lead_image_url: Option<String>,
    pub authors: Vec<String>,
}

// Collaborators at the edge of the pipeline, held as trait objects.

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Entries of the feed at `url`, newest first. A malformed feed yields an
    /// empty list; only transport failures are errors.
    async fn entries(&self, url: &str) -> Result<Vec<FeedEntry>>;
}

#[async_trait]
pub trait ArticleExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<Extraction>;

    /// Raw bytes behind `url`, used for lead images.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    fn name(&self) -> String;

    /// Free text answer to `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Answer that the service was asked to format as JSON. The text is
    /// returned untouched; callers decode it themselves.
    async fn generate_json(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, artifact: &Path, destination: &str) -> Result<()>;
}

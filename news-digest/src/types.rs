use chrono::{DateTime, Utc};
use interfaces::ReaderId;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_body_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "News-Digest/1.0".to_string(),
            timeout_seconds: 30,
            max_body_size_mb: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Reader not found: {id}")]
    ReaderNotFound { id: ReaderId },

    #[error("Response size exceeds limit: {size_mb}MB")]
    ResponseTooLarge { size_mb: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("EPUB packaging error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Document assembly failed: {0}")]
    Assembly(#[source] Box<DigestError>),

    #[error("Reasoning service error: {0}")]
    Reasoning(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("General error: {0}")]
    General(String),
}

impl DigestError {
    pub fn assembly(cause: DigestError) -> Self {
        match cause {
            already @ DigestError::Assembly(_) => already,
            other => DigestError::Assembly(Box::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, DigestError>;

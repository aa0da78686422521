use crate::types::{DigestError, FetchConfig, Result};
use reqwest::{Client, Response};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

/// Thin HTTP client shared by the feed source, the article extractor and the
/// image download. Every call is bounded by the configured timeout and is
/// attempted exactly once.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let start_time = Instant::now();
        let response = self.get(url).await?;
        let content = response.text().await?;
        self.check_size(content.len())?;

        info!(
            "Fetched {} ({} bytes in {}ms)",
            url,
            content.len(),
            start_time.elapsed().as_millis()
        );
        Ok(content)
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url).await?;
        let bytes = response.bytes().await?;
        self.check_size(bytes.len())?;

        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let parsed_url = Url::parse(url)?;
        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(DigestError::General(format!("Unsupported scheme in {}", url)));
        }

        debug!("GET {}", url);
        let response = self.client.get(parsed_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(content_length) = response.content_length() {
            self.check_size(content_length as usize)?;
        }

        Ok(response)
    }

    fn check_size(&self, size_bytes: usize) -> Result<()> {
        let size_mb = size_bytes / (1024 * 1024);
        if size_mb > self.config.max_body_size_mb {
            return Err(DigestError::ResponseTooLarge { size_mb });
        }
        Ok(())
    }
}

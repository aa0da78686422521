use crate::fetcher::Fetcher;
use crate::parser::FeedParser;
use async_trait::async_trait;
use interfaces::{FeedEntry, FeedSource};
use std::sync::Arc;
use tracing::{info, warn};

/// Feed source backed by HTTP and `feed-rs`. Transport failures surface as
/// errors; a document that does not parse as a feed yields no entries.
pub struct RssFeedSource {
    fetcher: Arc<Fetcher>,
}

impl RssFeedSource {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn entries(&self, url: &str) -> anyhow::Result<Vec<FeedEntry>> {
        info!("Pulling RSS feed: {}", url);
        let content = self.fetcher.fetch_text(url).await?;

        let mut parser = FeedParser::new();
        match parser.parse_feed(&content) {
            Ok(parsed_feed) => Ok(FeedParser::to_feed_entries(&parsed_feed)),
            Err(e) => {
                warn!("Feed at {} could not be parsed: {}", url, e);
                Ok(Vec::new())
            }
        }
    }
}

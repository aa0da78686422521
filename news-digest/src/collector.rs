use interfaces::{Candidate, FeedSource, Source};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Outcome of one collection pass. Failing sources are listed, never fatal.
#[derive(Debug, Default)]
pub struct Collection {
    pub candidates: Vec<Candidate>,
    pub failed_sources: Vec<String>,
}

pub struct CandidateCollector {
    feeds: Arc<dyn FeedSource>,
}

impl CandidateCollector {
    pub fn new(feeds: Arc<dyn FeedSource>) -> Self {
        Self { feeds }
    }

    /// Up to `per_source_limit` candidates from each active source, in source
    /// order and then feed order. Every candidate gets a fresh id.
    pub async fn collect(&self, sources: &[Source], per_source_limit: usize) -> Collection {
        let active: Vec<&Source> = sources.iter().filter(|s| s.is_active).collect();
        let mut collection = Collection::default();

        info!("Collecting from {} sources", active.len());

        for source in active {
            match self.feeds.entries(&source.feed_url).await {
                Ok(entries) => {
                    let before = collection.candidates.len();
                    collection.candidates.extend(
                        entries
                            .into_iter()
                            .filter(|entry| !entry.link.trim().is_empty())
                            .take(per_source_limit)
                            .map(|entry| Candidate {
                                id: Uuid::new_v4().to_string(),
                                title: entry.title.trim().to_string(),
                                url: entry.link.trim().to_string(),
                                source: source.name.clone(),
                                published: entry.published,
                            }),
                    );
                    debug!(
                        "{} contributed {} candidates",
                        source.name,
                        collection.candidates.len() - before
                    );
                }
                Err(e) => {
                    error!("Failed to read feed {} ({}): {}", source.name, source.feed_url, e);
                    collection.failed_sources.push(source.name.clone());
                }
            }
        }

        info!(
            "Collected {} candidates ({} sources failed)",
            collection.candidates.len(),
            collection.failed_sources.len()
        );
        collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use interfaces::FeedEntry;
    use std::collections::HashSet;

    struct FakeFeeds;

    #[async_trait]
    impl FeedSource for FakeFeeds {
        async fn entries(&self, url: &str) -> anyhow::Result<Vec<FeedEntry>> {
            if url.contains("down") {
                anyhow::bail!("connection refused");
            }
            Ok((0..8)
                .map(|i| FeedEntry {
                    title: format!("  {url} story {i} "),
                    link: format!(" {url}/{i} "),
                    published: None,
                })
                .collect())
        }
    }

    fn source(name: &str, url: &str, is_active: bool) -> Source {
        Source {
            name: name.to_string(),
            feed_url: url.to_string(),
            is_active,
        }
    }

    #[tokio::test]
    async fn caps_each_source_and_skips_failures() {
        let collector = CandidateCollector::new(Arc::new(FakeFeeds));
        let sources = vec![
            source("A", "https://a.test", true),
            source("Down", "https://down.test", true),
            source("B", "https://b.test", true),
            source("Off", "https://off.test", false),
        ];

        let collection = collector.collect(&sources, 3).await;

        assert_eq!(collection.candidates.len(), 6);
        assert_eq!(collection.failed_sources, vec!["Down".to_string()]);
        assert_eq!(collection.candidates[0].url, "https://a.test/0");
        assert_eq!(collection.candidates[0].title, "https://a.test story 0");
        assert_eq!(collection.candidates[3].source, "B");
        assert!(collection.candidates.iter().all(|c| c.source != "Off"));

        let ids: HashSet<&str> = collection.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 6);
    }

    #[tokio::test]
    async fn no_sources_yields_nothing() {
        let collector = CandidateCollector::new(Arc::new(FakeFeeds));
        let collection = collector.collect(&[], 5).await;
        assert!(collection.candidates.is_empty());
        assert!(collection.failed_sources.is_empty());
    }
}

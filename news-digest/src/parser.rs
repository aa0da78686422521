use crate::types::{DigestError, ParsedEntry, ParsedFeed, Result};
use chrono::Utc;
use feed_rs::parser;
use interfaces::FeedEntry;
use std::collections::HashSet;
use tracing::{debug, info};

/// Turns RSS/Atom documents into entries in feed order. Repeated GUIDs or
/// links inside one document are dropped.
pub struct FeedParser {
    seen_guids: HashSet<String>,
    seen_urls: HashSet<String>,
}

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedParser {
    pub fn new() -> Self {
        Self {
            seen_guids: HashSet::new(),
            seen_urls: HashSet::new(),
        }
    }

    pub fn parse_feed(&mut self, content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| DigestError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let entries: Vec<ParsedEntry> = feed
            .entries
            .into_iter()
            .filter_map(|entry| self.parse_entry(entry))
            .collect();

        info!("Parsed feed with {} entries", entries.len());
        Ok(ParsedFeed { title, entries })
    }

    fn parse_entry(&mut self, entry: feed_rs::model::Entry) -> Option<ParsedEntry> {
        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let url = entry.links.first()?.href.trim().to_string();
        if url.is_empty() {
            return None;
        }

        if !entry.id.is_empty() && !self.seen_guids.insert(entry.id.clone()) {
            debug!("Skipping duplicate entry with GUID: {}", entry.id);
            return None;
        }
        if !self.seen_urls.insert(url.clone()) {
            debug!("Skipping duplicate entry with URL: {}", url);
            return None;
        }

        let author = entry.authors.first().map(|a| a.name.clone());
        let published_at = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc));

        Some(ParsedEntry {
            url,
            title,
            author,
            published_at,
        })
    }

    pub fn to_feed_entries(parsed_feed: &ParsedFeed) -> Vec<FeedEntry> {
        parsed_feed
            .entries
            .iter()
            .map(|entry| FeedEntry {
                title: entry.title.clone(),
                link: entry.url.clone(),
                published: entry.published_at,
            })
            .collect()
    }
}

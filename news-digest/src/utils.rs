/// Text processing utilities
pub mod text {
    /// At most `max_chars` characters of `text`, cut on a char boundary.
    pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((byte_index, _)) => &text[..byte_index],
            None => text,
        }
    }

    /// First non-empty line with any heading markers removed.
    pub fn headline_of(markup: &str) -> Option<String> {
        markup
            .lines()
            .map(|line| line.trim().trim_start_matches('#').trim())
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }

    /// Collapses every run of whitespace into a single space.
    pub fn normalize_text(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// URL utilities
pub mod url {
    use url::Url;

    /// Only http(s) URLs can be fetched as feeds.
    pub fn is_valid_feed_url(url_str: &str) -> bool {
        Url::parse(url_str)
            .map(|url| url.scheme() == "http" || url.scheme() == "https")
            .unwrap_or(false)
    }
}

/// Time utilities
pub mod time {
    use chrono::{DateTime, Utc};

    /// Publication stamp as shown in article metadata lines.
    pub fn format_published(published: Option<DateTime<Utc>>) -> String {
        published
            .map(|dt| dt.format("%d/%m/%Y %H:%M").to_string())
            .unwrap_or_else(|| "date unknown".to_string())
    }
}

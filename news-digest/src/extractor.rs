use crate::fetcher::Fetcher;
use crate::utils::text::normalize_text;
use async_trait::async_trait;
use interfaces::{ArticleExtractor, Extraction};
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Article extractor over plain HTML pages.
pub struct HtmlExtractor {
    fetcher: Arc<Fetcher>,
}

impl HtmlExtractor {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ArticleExtractor for HtmlExtractor {
    async fn extract(&self, url: &str) -> anyhow::Result<Extraction> {
        let html = self.fetcher.fetch_text(url).await?;
        let extraction = extract_from_html(&html, url);
        if extraction.body.trim().is_empty() {
            anyhow::bail!("no article text found at {}", url);
        }
        debug!(
            "Extracted {} chars from {} (image: {})",
            extraction.body.len(),
            url,
            extraction.lead_image_url.is_some()
        );
        Ok(extraction)
    }

    async fn fetch_bytes(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        Ok(self.fetcher.fetch_bytes(url).await?)
    }
}

/// Body, lead image and authors of an HTML page. The body is built from the
/// paragraphs inside `<article>`, or from every paragraph when the page has
/// no article element. Relative image URLs are resolved against `page_url`.
pub fn extract_from_html(html: &str, page_url: &str) -> Extraction {
    let document = Html::parse_document(html);

    let mut paragraphs = paragraph_texts(&document, "article p");
    if paragraphs.is_empty() {
        paragraphs = paragraph_texts(&document, "p");
    }

    Extraction {
        body: paragraphs.join("\n\n"),
        lead_image_url: lead_image(&document, page_url),
        authors: extract_authors(&document),
    }
}

fn paragraph_texts(document: &Html, css: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(css) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|p| normalize_text(&p.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .collect()
}

fn meta_content(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

fn lead_image(document: &Html, page_url: &str) -> Option<String> {
    let raw = meta_content(document, "meta[property='og:image']")
        .or_else(|| meta_content(document, "meta[name='twitter:image']"))?;

    match Url::parse(page_url).and_then(|base| base.join(&raw)) {
        Ok(resolved) => Some(resolved.to_string()),
        Err(_) => Some(raw),
    }
}

/// Author names from JSON-LD metadata, falling back to `<meta name="author">`.
pub fn extract_authors(document: &Html) -> Vec<String> {
    let mut authors = Vec::new();

    if let Ok(script_selector) = Selector::parse("script[type='application/ld+json']") {
        for script in document.select(&script_selector) {
            let Ok(json) =
                serde_json::from_str::<serde_json::Value>(script.text().collect::<String>().trim())
            else {
                continue;
            };
            match json.get("author") {
                Some(serde_json::Value::Array(arr)) => {
                    for author_obj in arr {
                        if let Some(name) = author_obj.get("name").and_then(|n| n.as_str()) {
                            authors.push(name.trim().to_string());
                        } else if let Some(name) = author_obj.as_str() {
                            authors.push(name.trim().to_string());
                        }
                    }
                }
                Some(serde_json::Value::Object(obj)) => {
                    if let Some(name) = obj.get("name").and_then(|n| n.as_str()) {
                        authors.push(name.trim().to_string());
                    }
                }
                Some(serde_json::Value::String(s)) => authors.push(s.trim().to_string()),
                _ => {}
            }
        }
    }

    if authors.is_empty() {
        if let Some(name) = meta_content(document, "meta[name='author']") {
            authors.push(name);
        }
    }

    authors.retain(|a| !a.is_empty());
    authors.dedup();
    authors
}

use interfaces::{ArticleExtractor, Candidate, EnrichedArticle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EnrichConfig {
    pub include_images: bool,
    pub images_dir: PathBuf,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            include_images: true,
            images_dir: PathBuf::from("data/images"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Enrichment {
    pub articles: Vec<EnrichedArticle>,
    pub failed_urls: Vec<String>,
}

/// Second, expensive pass over the selected candidates: full text and lead
/// image. Each article is attempted once; failures drop that article only.
pub struct ContentEnricher {
    extractor: Arc<dyn ArticleExtractor>,
    config: EnrichConfig,
    run_tag: String,
}

impl ContentEnricher {
    pub fn new(extractor: Arc<dyn ArticleExtractor>, config: EnrichConfig) -> Self {
        Self {
            extractor,
            config,
            run_tag: Uuid::new_v4().simple().to_string(),
        }
    }

    pub async fn enrich_all(&self, selected: &[Candidate]) -> Enrichment {
        let mut enrichment = Enrichment::default();
        for candidate in selected {
            match self.enrich(candidate).await {
                Some(article) => enrichment.articles.push(article),
                None => enrichment.failed_urls.push(candidate.url.clone()),
            }
        }
        info!(
            "Enriched {}/{} selected articles",
            enrichment.articles.len(),
            selected.len()
        );
        enrichment
    }

    pub async fn enrich(&self, candidate: &Candidate) -> Option<EnrichedArticle> {
        let extraction = match self.extractor.extract(&candidate.url).await {
            Ok(extraction) if !extraction.body.trim().is_empty() => extraction,
            Ok(_) => {
                warn!("Dropping {}: no article text", candidate.url);
                return None;
            }
            Err(e) => {
                warn!("Dropping {}: {}", candidate.url, e);
                return None;
            }
        };

        let mut article = EnrichedArticle::new(candidate.clone(), extraction.body);
        article.authors = extraction.authors;

        if self.config.include_images {
            if let Some(image_url) = extraction.lead_image_url.as_deref() {
                article.image = self.download_image(image_url).await;
            }
        }

        Some(article)
    }

    async fn download_image(&self, url: &str) -> Option<PathBuf> {
        let bytes = match self.extractor.fetch_bytes(url).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                warn!("Image at {} is empty, continuing without it", url);
                return None;
            }
            Err(e) => {
                warn!("Image download failed for {}: {}", url, e);
                return None;
            }
        };

        let extension = match image::guess_format(&bytes) {
            Ok(format) => format.extensions_str().first().copied().unwrap_or("img"),
            Err(_) => {
                warn!("Unrecognised image data at {}, continuing without it", url);
                return None;
            }
        };

        let path = self.config.images_dir.join(format!(
            "{}_{}.{}",
            self.run_tag,
            Uuid::new_v4().simple(),
            extension
        ));

        if let Err(e) = tokio::fs::create_dir_all(&self.config.images_dir).await {
            warn!("Cannot create {}: {}", self.config.images_dir.display(), e);
            return None;
        }
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Cannot store image {}: {}", path.display(), e);
                None
            }
        }
    }
}

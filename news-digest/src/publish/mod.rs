pub mod epub;
pub mod markup;
pub mod pdf;

use crate::types::{DigestError, Result};
use crate::utils::time::format_published;
use chrono::NaiveDate;
use interfaces::{Briefing, Candidate, EnrichedArticle};
use markup::{parse_markup, Block};
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub use epub::EpubRenderer;
pub use pdf::PdfRenderer;

/// Everything one edition shows, in reading order. Both renderers consume
/// this model, so their content cannot drift apart.
#[derive(Debug, Clone)]
pub struct Edition {
    pub title: String,
    pub date: NaiveDate,
    pub language: String,
    pub briefing: Vec<Block>,
    pub articles: Vec<ArticleSection>,
    pub other_headlines: Vec<HeadlineLink>,
}

#[derive(Debug, Clone)]
pub struct ArticleSection {
    pub title: String,
    pub url: String,
    pub source: String,
    pub published: String,
    pub authors: Vec<String>,
    /// Lead image (if any) followed by the rendered summary.
    pub blocks: Vec<Block>,
}

impl ArticleSection {
    pub fn meta_line(&self) -> String {
        let mut line = format!("Source: {} | {}", self.source, self.published);
        if !self.authors.is_empty() {
            line.push_str(&format!(" | By {}", self.authors.join(", ")));
        }
        line
    }
}

#[derive(Debug, Clone)]
pub struct HeadlineLink {
    pub source: String,
    pub title: String,
    pub url: String,
}

impl Edition {
    pub fn build(
        date: NaiveDate,
        language: &str,
        briefing: &Briefing,
        articles: &[EnrichedArticle],
        unselected: &[Candidate],
    ) -> Self {
        let articles = articles
            .iter()
            .map(|article| {
                let mut blocks = Vec::new();
                if let Some(path) = &article.image {
                    blocks.push(Block::Image {
                        path: path.clone(),
                        alt: article.title().to_string(),
                    });
                }
                let text = article.summary.as_deref().unwrap_or(&article.body);
                blocks.extend(parse_markup(text));

                ArticleSection {
                    title: article.title().to_string(),
                    url: article.url().to_string(),
                    source: article.candidate.source.clone(),
                    published: format_published(article.candidate.published),
                    authors: article.authors.clone(),
                    blocks,
                }
            })
            .collect();

        let other_headlines = unselected
            .iter()
            .map(|c| HeadlineLink {
                source: c.source.clone(),
                title: c.title.clone(),
                url: c.url.clone(),
            })
            .collect();

        Self {
            title: format!("News Digest - {}", date.format("%d/%m/%Y")),
            date,
            language: language.to_string(),
            briefing: parse_markup(&briefing.text),
            articles,
            other_headlines,
        }
    }

    pub fn article_titles(&self) -> Vec<String> {
        self.articles.iter().map(|a| a.title.clone()).collect()
    }
}

/// A backend that writes an [`Edition`] to a file.
pub trait Renderer: Send + Sync {
    fn extension(&self) -> &'static str;

    fn render(&self, edition: &Edition, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    pub output_dir: PathBuf,
    pub language: String,
    pub include_unselected: bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/output"),
            language: "en".to_string(),
            include_unselected: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub epub: Option<PathBuf>,
    pub pdf: Option<PathBuf>,
    pub titles: Vec<String>,
}

impl Artifacts {
    /// The file handed to delivery: the e-book when there is one.
    pub fn primary(&self) -> Option<&Path> {
        self.epub.as_deref().or(self.pdf.as_deref())
    }
}

pub struct DocumentAssembler {
    config: AssemblyConfig,
    epub: EpubRenderer,
    pdf: PdfRenderer,
}

impl DocumentAssembler {
    pub fn new(config: AssemblyConfig) -> Self {
        Self {
            config,
            epub: EpubRenderer::new(),
            pdf: PdfRenderer::new(),
        }
    }

    pub fn artifact_path(&self, date: NaiveDate, extension: &str) -> PathBuf {
        self.config
            .output_dir
            .join(format!("digest_{}.{}", date.format("%Y-%m-%d"), extension))
    }

    /// Renders the edition as EPUB and PDF. A renderer that fails leaves no
    /// file behind; the run fails only when neither artifact was produced.
    pub fn assemble(
        &self,
        date: NaiveDate,
        briefing: &Briefing,
        articles: &[EnrichedArticle],
        unselected: &[Candidate],
    ) -> Result<Artifacts> {
        if articles.is_empty() {
            return Err(DigestError::assembly(DigestError::General(
                "no articles to publish".to_string(),
            )));
        }

        std::fs::create_dir_all(&self.config.output_dir).map_err(|e| DigestError::assembly(e.into()))?;

        let unselected = if self.config.include_unselected {
            unselected
        } else {
            &[]
        };
        let edition = Edition::build(date, &self.config.language, briefing, articles, unselected);

        let epub = self.render_with(&self.epub, &edition);
        let pdf = self.render_with(&self.pdf, &edition);

        match (epub, pdf) {
            (Err(e), Err(_)) => Err(DigestError::assembly(e)),
            (epub, pdf) => {
                let artifacts = Artifacts {
                    epub: epub.ok(),
                    pdf: pdf.ok(),
                    titles: edition.article_titles(),
                };
                info!(
                    "Assembled {} articles (epub: {:?}, pdf: {:?})",
                    artifacts.titles.len(),
                    artifacts.epub,
                    artifacts.pdf
                );
                Ok(artifacts)
            }
        }
    }

    fn render_with(&self, renderer: &dyn Renderer, edition: &Edition) -> Result<PathBuf> {
        let path = self.artifact_path(edition.date, renderer.extension());
        match renderer.render(edition, &path) {
            Ok(()) => Ok(path),
            Err(e) => {
                error!("Failed to write {}: {}", path.display(), e);
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }
}

/// Escapes text for XML content and attribute values.
pub(crate) fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str, summary: &str, image: Option<PathBuf>) -> EnrichedArticle {
        let mut article = EnrichedArticle::new(
            Candidate {
                id: title.into(),
                title: title.into(),
                url: format!("https://n.test/{title}"),
                source: "Wire".into(),
                published: None,
            },
            "body".into(),
        );
        article.summary = Some(summary.into());
        article.image = image;
        article
    }

    #[test]
    fn edition_places_image_before_summary() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap_or_default();
        let articles = vec![
            article("One", "## One\n\nText", Some(PathBuf::from("/tmp/x.png"))),
            article("Two", "Plain", None),
        ];
        let edition = Edition::build(date, "en", &Briefing { text: "# B".into() }, &articles, &[]);

        assert_eq!(edition.title, "News Digest - 06/01/2025");
        assert!(matches!(edition.articles[0].blocks[0], Block::Image { .. }));
        assert!(matches!(edition.articles[1].blocks[0], Block::Paragraph(_)));
        assert_eq!(edition.articles[0].meta_line(), "Source: Wire | date unknown");
        assert_eq!(edition.article_titles(), vec!["One", "Two"]);
    }

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(xml_escape(r#"A & B <c> "d" 'e'"#), "A &amp; B &lt;c&gt; &quot;d&quot; &apos;e&apos;");
    }

    #[test]
    fn assembling_nothing_is_an_error() {
        let dir = std::env::temp_dir();
        let assembler = DocumentAssembler::new(AssemblyConfig {
            output_dir: dir,
            ..AssemblyConfig::default()
        });
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap_or_default();
        let result = assembler.assemble(date, &Briefing { text: String::new() }, &[], &[]);
        assert!(matches!(result, Err(DigestError::Assembly(_))));
    }
}

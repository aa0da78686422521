use crate::utils::text::{headline_of, truncate_chars};
use interfaces::baseline::{fallback_briefing, fallback_summary};
use interfaces::{Briefing, EnrichedArticle, ReasoningService};
use std::sync::Arc;
use tracing::{info, warn};

/// Body text beyond this many characters is not sent to the reasoning service.
pub const MAX_BODY_CHARS: usize = 10_000;

pub struct Summarizer {
    reasoner: Arc<dyn ReasoningService>,
    language: String,
}

impl Summarizer {
    pub fn new(reasoner: Arc<dyn ReasoningService>, language: impl Into<String>) -> Self {
        Self {
            reasoner,
            language: language.into(),
        }
    }

    /// Markdown summary of one article. Service failures produce a fallback
    /// summary that names the article and carries an error marker.
    pub async fn summarize(&self, article: &EnrichedArticle) -> String {
        let prompt = self.summary_prompt(article);
        match self.reasoner.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Empty summary for {}", article.url());
                fallback_summary(article.title(), "empty response")
            }
            Err(e) => {
                warn!("Summary failed for {}: {}", article.url(), e);
                fallback_summary(article.title(), &e.to_string())
            }
        }
    }

    /// Executive briefing spanning every summary of the run.
    pub async fn synthesize(&self, summaries: &[String]) -> Briefing {
        let headlines: Vec<String> = summaries.iter().filter_map(|s| headline_of(s)).collect();
        let titles: Vec<&str> = headlines.iter().map(String::as_str).collect();

        if summaries.is_empty() {
            return Briefing {
                text: fallback_briefing(&titles),
            };
        }

        let prompt = self.briefing_prompt(summaries);
        let text = match self.reasoner.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Empty briefing from {}", self.reasoner.name());
                fallback_briefing(&titles)
            }
            Err(e) => {
                warn!("Briefing failed: {}", e);
                fallback_briefing(&titles)
            }
        };

        info!("Briefing ready ({} chars)", text.len());
        Briefing { text }
    }

    /// Summarizes every article in place, then synthesizes the briefing.
    pub async fn summarize_all(&self, articles: &mut [EnrichedArticle]) -> Briefing {
        let mut summaries = Vec::with_capacity(articles.len());
        for article in articles.iter_mut() {
            let summary = self.summarize(article).await;
            summaries.push(summary.clone());
            article.summary = Some(summary);
        }
        self.synthesize(&summaries).await
    }

    fn summary_prompt(&self, article: &EnrichedArticle) -> String {
        format!(
            "You are a senior news analyst. Write in {language}.\n\n\
             Article title: {title}\n\
             Source: {source}\n\n\
             Article text:\n{body}\n\n\
             Produce a Markdown analysis with:\n\
             ## A clear headline\n\
             A summary of two or three paragraphs.\n\
             ### Key points\n\
             Three bullet points starting with \"- \".\n\
             ### Context\n\
             One short paragraph on why this matters.\n\
             Use **bold** for names and figures. Do not add any text before the headline.",
            language = self.language,
            title = article.title(),
            source = article.candidate.source,
            body = truncate_chars(&article.body, MAX_BODY_CHARS),
        )
    }

    fn briefing_prompt(&self, summaries: &[String]) -> String {
        format!(
            "You are the chief editor of a daily news briefing. Write in {language}.\n\n\
             Below are the analyses of today's selected articles, separated by ---.\n\n\
             {joined}\n\n\
             Write a Markdown executive briefing with:\n\
             # A title for today's edition\n\
             ## Overview\n\
             One paragraph connecting the stories.\n\
             ## Highlights\n\
             One bullet per story starting with \"- \".\n\
             ## What to watch\n\
             One short paragraph.",
            language = self.language,
            joined = summaries.join("\n\n---\n\n"),
        )
    }
}

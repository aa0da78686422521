//! Deterministic answers used whenever the reasoning service cannot be
//! trusted: no call is made, nothing can fail.

use crate::defs::Candidate;

/// Topics used for readers that have not configured any interest.
pub const DEFAULT_TOPICS: &[&str] = &["General News"];

/// Marker that every fallback summary carries, so readers and tests can tell
/// a degraded summary from a real one.
pub const SUMMARY_ERROR_MARKER: &str = "Summary unavailable";

pub const BRIEFING_ERROR_MARKER: &str = "Briefing unavailable";

pub fn topics_or_default(keywords: &[String]) -> Vec<String> {
    let topics: Vec<String> = keywords
        .iter()
        .map(|keyword| keyword.trim())
        .filter(|keyword| !keyword.is_empty())
        .map(str::to_owned)
        .collect();
    if topics.is_empty() {
        DEFAULT_TOPICS.iter().map(|topic| (*topic).to_owned()).collect()
    } else {
        topics
    }
}

/// The first `limit` candidates, in collection order.
pub fn select_first(candidates: &[Candidate], limit: usize) -> Vec<Candidate> {
    candidates.iter().take(limit).cloned().collect()
}

pub fn fallback_summary(title: &str, error: &str) -> String {
    format!("## {title}\n\n{SUMMARY_ERROR_MARKER}: {error}")
}

pub fn fallback_briefing(titles: &[&str]) -> String {
    let mut text = format!("# Briefing\n\n{BRIEFING_ERROR_MARKER}.\n");
    if !titles.is_empty() {
        text.push_str("\n## Today's articles\n");
        for title in titles {
            text.push_str("- ");
            text.push_str(title);
            text.push('\n');
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str) -> Candidate {
        Candidate {
            id: id.to_owned(),
            title: format!("Title {id}"),
            url: format!("https://example.com/{id}"),
            source: "Example".to_owned(),
            published: None,
        }
    }

    #[test]
    fn empty_interests_fall_back_to_default_topics() {
        assert_eq!(topics_or_default(&[]), vec!["General News".to_owned()]);
        assert_eq!(topics_or_default(&["  ".to_owned()]), vec!["General News".to_owned()]);
        assert_eq!(topics_or_default(&["Rust".to_owned()]), vec!["Rust".to_owned()]);
    }

    #[test]
    fn select_first_keeps_collection_order() {
        let pool = vec![candidate("a"), candidate("b"), candidate("c")];
        let picked: Vec<String> = select_first(&pool, 2).into_iter().map(|c| c.id).collect();
        assert_eq!(picked, vec!["a", "b"]);
        assert_eq!(select_first(&pool, 10).len(), 3);
    }

    #[test]
    fn fallback_texts_carry_markers() {
        let summary = fallback_summary("Rates rise", "timeout");
        assert!(summary.contains("Rates rise"));
        assert!(summary.contains(SUMMARY_ERROR_MARKER));

        let briefing = fallback_briefing(&["Rates rise"]);
        assert!(briefing.contains(BRIEFING_ERROR_MARKER));
        assert!(briefing.contains("- Rates rise"));
    }
}

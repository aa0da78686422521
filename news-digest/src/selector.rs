use interfaces::baseline::{select_first, topics_or_default};
use interfaces::{Candidate, ReasoningService};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the reasoning service's selection answer turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionDecode {
    Ids(Vec<String>),
    FallbackRequired(String),
}

/// Decodes a selection answer without trusting its shape. A JSON array of
/// ids is used as is; an object contributes its first list-valued field.
pub fn decode_selection(raw: &str) -> SelectionDecode {
    let text = strip_code_fence(raw.trim());
    if text.is_empty() {
        return SelectionDecode::FallbackRequired("empty response".to_string());
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return SelectionDecode::FallbackRequired(format!("not JSON: {}", e)),
    };

    let list = match value {
        Value::Array(items) => items,
        Value::Object(fields) => match fields.into_iter().find_map(|(_, v)| match v {
            Value::Array(items) => Some(items),
            _ => None,
        }) {
            Some(items) => items,
            None => {
                return SelectionDecode::FallbackRequired("object without a list field".to_string())
            }
        },
        other => {
            return SelectionDecode::FallbackRequired(format!("unexpected JSON value: {}", other))
        }
    };

    let ids: Vec<String> = list
        .into_iter()
        .filter_map(|item| match item {
            Value::String(id) => Some(id.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|id| !id.is_empty())
        .collect();

    if ids.is_empty() {
        SelectionDecode::FallbackRequired("no ids in response".to_string())
    } else {
        SelectionDecode::Ids(ids)
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = match inner.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &inner[4..],
        _ => inner,
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// At most `limit` candidates, in the order the service ranked them.
    pub selected: Vec<Candidate>,
    /// Eligible candidates that were not selected, in collection order.
    pub unselected: Vec<Candidate>,
    pub used_fallback: bool,
}

pub struct RelevanceSelector {
    reasoner: Arc<dyn ReasoningService>,
}

impl RelevanceSelector {
    pub fn new(reasoner: Arc<dyn ReasoningService>) -> Self {
        Self { reasoner }
    }

    /// Narrows `candidates` to at most `limit` items for a reader. Anything in
    /// `delivered`, and any repeat of a URL already seen earlier in
    /// `candidates`, is removed before the service is consulted. Never fails: a
    /// service error or an unusable answer selects the first `limit` eligible
    /// candidates instead.
    pub async fn select(
        &self,
        candidates: &[Candidate],
        interests: &[String],
        limit: usize,
        delivered: &HashSet<String>,
    ) -> Selection {
        let mut seen_urls: HashSet<&str> = HashSet::new();
        let mut already_delivered = 0;
        let mut repeated = 0;
        let mut eligible: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if delivered.contains(&candidate.url) {
                already_delivered += 1;
            } else if !seen_urls.insert(candidate.url.as_str()) {
                repeated += 1;
            } else {
                eligible.push(candidate.clone());
            }
        }

        if already_delivered > 0 {
            info!("Excluded {} already delivered candidates", already_delivered);
        }
        if repeated > 0 {
            debug!("Dropped {} candidates repeating a URL from another feed", repeated);
        }

        if eligible.is_empty() || limit == 0 {
            return Selection {
                unselected: eligible,
                ..Selection::default()
            };
        }

        let topics = topics_or_default(interests);
        let prompt = build_selection_prompt(&eligible, &topics, limit);

        let decoded = match self.reasoner.generate_json(&prompt).await {
            Ok(raw) => {
                debug!("Selection answer from {}: {}", self.reasoner.name(), raw);
                decode_selection(&raw)
            }
            Err(e) => SelectionDecode::FallbackRequired(format!("service error: {}", e)),
        };

        let (selected, used_fallback) = match decoded {
            SelectionDecode::Ids(ids) => {
                let picked = pick_by_id(&eligible, &ids, limit);
                if picked.is_empty() {
                    warn!("Selection named no known candidates, using first {}", limit);
                    (select_first(&eligible, limit), true)
                } else {
                    (picked, false)
                }
            }
            SelectionDecode::FallbackRequired(reason) => {
                warn!("Selection fell back to first {} candidates: {}", limit, reason);
                (select_first(&eligible, limit), true)
            }
        };

        let chosen: HashSet<&str> = selected.iter().map(|c| c.id.as_str()).collect();
        let unselected = eligible
            .iter()
            .filter(|c| !chosen.contains(c.id.as_str()))
            .cloned()
            .collect();

        info!(
            "Selected {} of {} eligible candidates{}",
            selected.len(),
            eligible.len(),
            if used_fallback { " (fallback)" } else { "" }
        );

        Selection {
            selected,
            unselected,
            used_fallback,
        }
    }
}

/// Resolves ids against the pool. Unknown and repeated ids are dropped.
fn pick_by_id(pool: &[Candidate], ids: &[String], limit: usize) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .filter_map(|id| pool.iter().find(|c| c.id == id))
        .take(limit)
        .cloned()
        .collect()
}

pub fn build_selection_prompt(candidates: &[Candidate], topics: &[String], limit: usize) -> String {
    let listing: String = candidates
        .iter()
        .map(|c| format!("ID: {} | Title: {} | Source: {}\n", c.id, c.title, c.source))
        .collect();

    format!(
        "You are the editor of a personal news digest.\n\
         The reader is interested in: {topics}.\n\n\
         From the headlines below, choose the {limit} most relevant and important ones for this reader. \
         Prefer substantial reporting over minor updates and avoid picking two stories about the same event.\n\n\
         {listing}\n\
         Answer with only a JSON array containing the IDs of the chosen headlines, most relevant first. \
         Return at most {limit} IDs.",
        topics = topics.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_adapter::MockLlmAdapter;

    fn pool(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate {
                id: format!("c{i}"),
                title: format!("Story {i}"),
                url: format!("https://x/{i}"),
                source: "Wire".to_string(),
                published: None,
            })
            .collect()
    }

    fn ids(selection: &Selection) -> Vec<&str> {
        selection.selected.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn decodes_plain_arrays_and_list_fields() {
        assert_eq!(
            decode_selection(r#"["a", "b"]"#),
            SelectionDecode::Ids(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            decode_selection(r#"{"note": "x", "selected_ids": ["b"], "other": ["c"]}"#),
            SelectionDecode::Ids(vec!["b".into()])
        );
        assert_eq!(
            decode_selection("```json\n[\"a\"]\n```"),
            SelectionDecode::Ids(vec!["a".into()])
        );
        assert_eq!(
            decode_selection("```JSON\n[\"a\"]\n```"),
            SelectionDecode::Ids(vec!["a".into()])
        );
    }

    #[test]
    fn unusable_answers_require_fallback() {
        for raw in ["", "   ", "I picked a and b", "42", r#"{"ids": "a"}"#, "[]", "[null, {}]"] {
            assert!(
                matches!(decode_selection(raw), SelectionDecode::FallbackRequired(_)),
                "expected fallback for {raw:?}"
            );
        }
    }

    #[tokio::test]
    async fn follows_service_ranking_and_drops_unknown_ids() {
        let mock = MockLlmAdapter::new("selector").with_json_response(r#"["c3", "ghost", "c1", "c3"]"#);
        let selector = RelevanceSelector::new(Arc::new(mock));

        let selection = selector.select(&pool(5), &[], 2, &HashSet::new()).await;

        assert_eq!(ids(&selection), vec!["c3", "c1"]);
        assert!(!selection.used_fallback);
        assert_eq!(selection.unselected.len(), 3);
    }

    #[tokio::test]
    async fn service_failure_selects_first_n_in_order() {
        let mock = MockLlmAdapter::new("selector").with_json_failure("timeout");
        let selector = RelevanceSelector::new(Arc::new(mock));

        let selection = selector.select(&pool(6), &["Rust".into()], 3, &HashSet::new()).await;

        assert_eq!(ids(&selection), vec!["c0", "c1", "c2"]);
        assert!(selection.used_fallback);
    }

    #[tokio::test]
    async fn never_exceeds_the_limit() {
        let mock = MockLlmAdapter::new("selector").with_json_response(r#"["c0","c1","c2","c3","c4"]"#);
        let selector = RelevanceSelector::new(Arc::new(mock));

        let selection = selector.select(&pool(5), &[], 2, &HashSet::new()).await;
        assert_eq!(selection.selected.len(), 2);
    }

    #[tokio::test]
    async fn delivered_urls_are_excluded_before_asking() {
        let mock = Arc::new(MockLlmAdapter::new("selector").with_json_response(r#"["c1"]"#));
        let selector = RelevanceSelector::new(mock.clone());
        let delivered: HashSet<String> = ["https://x/1".to_string()].into();

        let selection = selector.select(&pool(3), &[], 2, &delivered).await;

        assert!(selection.selected.iter().all(|c| c.url != "https://x/1"));
        assert!(selection.unselected.iter().all(|c| c.url != "https://x/1"));
        let prompts = mock.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(!prompts[0].contains("https://x/1"));
        assert!(!prompts[0].contains("ID: c1 "));
        assert!(prompts[0].contains("General News"));
    }

    #[tokio::test]
    async fn repeated_urls_are_offered_once() {
        let mut candidates = pool(3);
        candidates.push(Candidate {
            id: "dup".to_string(),
            title: "Story 0 elsewhere".to_string(),
            url: "https://x/0".to_string(),
            source: "Other wire".to_string(),
            published: None,
        });
        candidates.rotate_right(1);
        let mock = Arc::new(MockLlmAdapter::new("selector").with_json_failure("down"));
        let selector = RelevanceSelector::new(mock.clone());

        let selection = selector.select(&candidates, &[], 2, &HashSet::new()).await;

        assert_eq!(ids(&selection), vec!["dup", "c1"]);
        let urls: HashSet<&str> = selection
            .selected
            .iter()
            .chain(&selection.unselected)
            .map(|c| c.url.as_str())
            .collect();
        assert_eq!(urls.len(), selection.selected.len() + selection.unselected.len());
        assert!(!mock.prompts()[0].contains("ID: c0 "));
    }

    #[tokio::test]
    async fn nothing_eligible_means_no_service_call() {
        let mock = Arc::new(MockLlmAdapter::new("selector"));
        let selector = RelevanceSelector::new(mock.clone());
        let delivered: HashSet<String> = pool(2).into_iter().map(|c| c.url).collect();

        let selection = selector.select(&pool(2), &[], 2, &delivered).await;

        assert!(selection.selected.is_empty());
        assert!(mock.prompts().is_empty());
    }
}

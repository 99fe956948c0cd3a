//! External background-reading search.
//!
//! Best-effort enrichment over Google Custom Search. Any failure (missing
//! credentials, network, malformed payload) degrades to an empty result
//! set; chat never fails because of this path.

use serde_json::Value;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::models::ExternalLink;

const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Search the web for reading related to the session. The note attached to
/// each link names what the query was anchored to.
pub async fn search_external_reading(
    config: &SearchConfig,
    query: &str,
    topic_context: Option<&str>,
    session_title: Option<&str>,
) -> Vec<ExternalLink> {
    let Some((api_key, cx)) = config.resolved() else {
        return Vec::new();
    };

    let note = match (topic_context, session_title) {
        (Some(topic), _) if !topic.trim().is_empty() => format!(
            "Background reading related to the session topic \"{}\".",
            topic.trim()
        ),
        (_, Some(title)) if !title.trim().is_empty() => format!(
            "Background reading related to the session \"{}\".",
            title.trim()
        ),
        _ => "Background reading related to the session discussion.".to_string(),
    };

    let client = reqwest::Client::new();
    let response = client
        .get(SEARCH_ENDPOINT)
        .timeout(SEARCH_TIMEOUT)
        .query(&[
            ("key", api_key.as_str()),
            ("cx", cx.as_str()),
            ("q", query),
        ])
        .send()
        .await;

    let body: Value = match response {
        Ok(resp) if resp.status().is_success() => match resp.json().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!("External search returned invalid JSON: {}", err);
                return Vec::new();
            }
        },
        Ok(resp) => {
            tracing::warn!("External search failed with status {}", resp.status());
            return Vec::new();
        }
        Err(err) => {
            tracing::warn!("External search request failed: {}", err);
            return Vec::new();
        }
    };

    extract_links(&body, &note, config.max_results)
}

fn extract_links(body: &Value, note: &str, max_results: usize) -> Vec<ExternalLink> {
    let Some(items) = body.get("items").and_then(|i| i.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let title = item.get("title")?.as_str()?.trim();
            let url = item.get("link")?.as_str()?.trim();
            if title.is_empty() || url.is_empty() {
                return None;
            }
            Some(ExternalLink {
                title: title.to_string(),
                url: url.to_string(),
                note: Some(note.to_string()),
            })
        })
        .take(max_results)
        .collect()
}

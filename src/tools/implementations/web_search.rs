// Web search via the Google Custom Search JSON API

use super::http::{build_client, normalize_base_url};
use crate::tools::registry::Collaborator;
use crate::tools::types::{Capability, RecordKind, SourceRecord, ToolOutput};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const GOOGLE_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
const RESULT_COUNT: u32 = 5;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchItem {
    #[serde(default = "no_title")]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default = "no_link")]
    pub link: String,
}

fn no_title() -> String {
    "No Title".to_string()
}

fn no_link() -> String {
    "#".to_string()
}

pub struct GoogleSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    cse_id: String,
}

impl GoogleSearch {
    pub fn new(api_key: &str, cse_id: &str) -> Result<Self> {
        Self::with_endpoint(GOOGLE_SEARCH_URL, api_key, cse_id)
    }

    pub fn with_endpoint(endpoint: &str, api_key: &str, cse_id: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            endpoint: normalize_base_url(endpoint),
            api_key: api_key.to_string(),
            cse_id: cse_id.to_string(),
        })
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchItem>> {
        let num = RESULT_COUNT.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cse_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .context("Failed to connect to Google Search")?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let details = body["error"]["message"].as_str().unwrap_or("no details");
            match status {
                StatusCode::BAD_REQUEST => bail!("Bad request during search (check CSE ID?). Details: {}", details),
                StatusCode::FORBIDDEN => bail!("Permission denied (check API key/permissions?). Details: {}", details),
                _ => bail!("Search failed with HTTP {}: {}", status, details),
            }
        }

        let parsed: SearchResponse = response.json().await.context("Invalid search response")?;
        Ok(parsed.items)
    }
}

#[async_trait]
impl Collaborator for GoogleSearch {
    fn capability(&self) -> Capability {
        Capability::WebSearch
    }

    async fn invoke(&self, tool_name: &str, input: &Value) -> Result<ToolOutput> {
        if tool_name != "perform_google_search" {
            bail!("Unsupported tool '{}'", tool_name);
        }
        let query = input["query"].as_str().map(str::trim).unwrap_or_default();
        if query.is_empty() {
            bail!("Search query cannot be empty.");
        }

        let items = self.search(query).await?;
        if items.is_empty() {
            return Ok(ToolOutput::report(format!("No results found for '{}'.", query)));
        }

        let mut lines = vec![format!("Search results for '{}':", query)];
        let mut records = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let snippet = item.snippet.replace('\n', " ");
            lines.push(format!("  {}. {}: {} ({})", i + 1, item.title, snippet, item.link));
            records.push(SourceRecord::new(
                &item.link,
                RecordKind::SearchResult,
                format!("{}: {}", item.title, snippet),
            ));
        }
        Ok(ToolOutput::report(lines.join("\n"))
            .with_data(serde_json::to_value(&items)?)
            .with_records(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_report_lists_top_results() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/customsearch/v1")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "rust async".into()),
                Matcher::UrlEncoded("num".into(), "5".into()),
                Matcher::UrlEncoded("cx".into(), "cse".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({"items": [
                    {"title": "Async Book", "snippet": "Asynchronous\nprogramming", "link": "https://a.example"},
                    {"title": "Tokio", "snippet": "Runtime", "link": "https://b.example"}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let search =
            GoogleSearch::with_endpoint(&format!("{}/customsearch/v1", server.url()), "key", "cse").unwrap();
        let output = search
            .invoke("perform_google_search", &json!({"query": "rust async"}))
            .await
            .unwrap();
        mock.assert_async().await;
        assert!(output
            .report
            .starts_with("Search results for 'rust async':\n  1. Async Book: Asynchronous programming (https://a.example)"));
        assert_eq!(output.records.len(), 2);
        assert_eq!(output.records[1].id, "https://b.example");
    }

    #[tokio::test]
    async fn test_permission_denied_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/customsearch/v1")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(json!({"error": {"message": "API key invalid"}}).to_string())
            .create_async()
            .await;

        let search =
            GoogleSearch::with_endpoint(&format!("{}/customsearch/v1", server.url()), "key", "cse").unwrap();
        let err = search
            .invoke("perform_google_search", &json!({"query": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
        assert!(err.to_string().contains("API key invalid"));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let search = GoogleSearch::new("key", "cse").unwrap();
        let err = search
            .invoke("perform_google_search", &json!({"query": "  "}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Search query cannot be empty.");
    }
}

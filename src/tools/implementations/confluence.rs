// Confluence Cloud collaborator (content REST API, storage format bodies)

use super::http::{build_client, ensure_success, normalize_base_url, open_in_browser};
use crate::tools::registry::Collaborator;
use crate::tools::types::{Capability, RecordKind, SourceRecord, ToolOutput};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

const SERVICE: &str = "Confluence";
const DEFAULT_SEARCH_LIMIT: u64 = 10;
const CONTENT_PREVIEW_CHARS: usize = 2000;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
static BLOCK_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(p|h[1-6]|li|tr|div)>|<br\s*/?>").expect("valid block regex"));

pub struct ConfluenceClient {
    client: reqwest::Client,
    /// Wiki root, e.g. https://example.atlassian.net/wiki
    base_url: String,
    email: String,
    api_token: String,
    open_in_browser: bool,
}

impl ConfluenceClient {
    pub fn new(base_url: &str, email: &str, api_token: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: normalize_base_url(base_url),
            email: email.to_string(),
            api_token: api_token.to_string(),
            open_in_browser: false,
        })
    }

    pub fn with_browser(mut self, enabled: bool) -> Self {
        self.open_in_browser = enabled;
        self
    }

    pub fn page_url(&self, page_id: &str) -> String {
        format!("{}/pages/viewpage.action?pageId={}", self.base_url, page_id)
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/{}", self.base_url, path)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        subject: &str,
    ) -> Result<Value> {
        let mut request = self
            .client
            .request(method, self.api(path))
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.context("Failed to connect to Confluence")?;
        let response = ensure_success(response, SERVICE, subject).await?;
        let text = response.text().await.unwrap_or_default();
        if text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(&text).context("Invalid JSON from Confluence")
        }
    }

    async fn fetch_page(&self, page_id: &str) -> Result<Value> {
        self.request(
            reqwest::Method::GET,
            &format!("content/{}", page_id),
            &[("expand", "body.storage,version,space,ancestors".to_string())],
            None,
            &format!("page '{}'", page_id),
        )
        .await
    }

    async fn get_page(&self, page_id: &str) -> Result<ToolOutput> {
        let page = self.fetch_page(page_id).await?;
        let title = page["title"].as_str().unwrap_or("Untitled");
        let space = page["space"]["key"].as_str().unwrap_or("?");
        let version = page["version"]["number"].as_u64().unwrap_or(0);
        let content = storage_to_text(page["body"]["storage"]["value"].as_str().unwrap_or_default());

        let report = format!(
            "Page {}: {}\n  Space: {}\n  Version: {}\n  Content: {}",
            page_id,
            title,
            space,
            version,
            truncate_chars(&content, CONTENT_PREVIEW_CHARS)
        );
        Ok(ToolOutput::report(report.clone())
            .with_data(page.clone())
            .with_record(SourceRecord::new(page_id, RecordKind::Page, report)))
    }

    async fn child_pages(&self, page_id: &str) -> Result<ToolOutput> {
        let body = self
            .request(
                reqwest::Method::GET,
                &format!("content/{}/child/page", page_id),
                &[],
                None,
                &format!("page '{}'", page_id),
            )
            .await?;
        let children = body["results"].as_array().cloned().unwrap_or_default();
        if children.is_empty() {
            return Ok(ToolOutput::report(format!("Page {} has no child pages.", page_id)));
        }
        Ok(page_list(format!("Child pages of {}:", page_id), children))
    }

    async fn search(&self, cql: &str, limit: u64) -> Result<ToolOutput> {
        let body = self
            .request(
                reqwest::Method::GET,
                "content/search",
                &[("cql", cql.to_string()), ("limit", limit.to_string())],
                None,
                "search",
            )
            .await?;
        let results = body["results"].as_array().cloned().unwrap_or_default();
        if results.is_empty() {
            return Ok(ToolOutput::report(format!("No pages match '{}'.", cql)));
        }
        Ok(page_list(format!("Pages matching '{}':", cql), results))
    }

    fn show(&self, page_id: &str) -> ToolOutput {
        let url = self.page_url(page_id);
        if self.open_in_browser {
            if let Err(e) = open_in_browser(&url) {
                warn!("{:#}", e);
            }
        }
        ToolOutput::report(format!("Page {}: {}", page_id, url)).with_data(json!({ "url": url }))
    }

    async fn create_page(&self, input: &Value) -> Result<ToolOutput> {
        let space = required(input, "space_key")?;
        let title = required(input, "title")?;
        let body = required(input, "body")?;

        let mut payload = json!({
            "type": "page",
            "title": title,
            "space": { "key": space },
            "body": { "storage": { "value": to_storage(body), "representation": "storage" } }
        });
        if let Some(parent) = optional(input, "parent_id") {
            payload["ancestors"] = json!([{ "id": parent }]);
        }

        let created = self
            .request(reqwest::Method::POST, "content", &[], Some(payload), &format!("space '{}'", space))
            .await?;
        let id = created["id"]
            .as_str()
            .context("Confluence response did not contain the new page id")?
            .to_string();
        info!(page = %id, "Created page");
        Ok(ToolOutput::report(format!("Page '{}' created with id {}.", title, id))
            .with_data(created.clone())
            .affecting(id))
    }

    async fn update_page(&self, page_id: &str, input: &Value) -> Result<ToolOutput> {
        let new_title = optional(input, "title");
        let new_body = optional(input, "body");
        let new_parent = optional(input, "parent_id");
        if new_title.is_none() && new_body.is_none() && new_parent.is_none() {
            bail!("No changes provided for page '{}'.", page_id);
        }

        let current = self.fetch_page(page_id).await?;
        let version = current["version"]["number"]
            .as_u64()
            .context("Confluence page has no version number")?;
        let title = new_title
            .or_else(|| current["title"].as_str())
            .unwrap_or_default()
            .to_string();
        let storage = match new_body {
            Some(body) => to_storage(body),
            None => current["body"]["storage"]["value"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        };
        let message = optional(input, "version_comment").unwrap_or("Updated via API");

        let mut payload = json!({
            "id": page_id,
            "type": "page",
            "title": title,
            "version": { "number": version + 1, "message": message },
            "body": { "storage": { "value": storage, "representation": "storage" } }
        });
        if let Some(parent) = new_parent {
            payload["ancestors"] = json!([{ "id": parent }]);
        }

        self.request(
            reqwest::Method::PUT,
            &format!("content/{}", page_id),
            &[],
            Some(payload),
            &format!("page '{}'", page_id),
        )
        .await?;
        Ok(ToolOutput::report(format!("Page {} updated to version {}.", page_id, version + 1)).affecting(page_id))
    }

    async fn delete_page(&self, page_id: &str) -> Result<ToolOutput> {
        self.request(
            reqwest::Method::DELETE,
            &format!("content/{}", page_id),
            &[],
            None,
            &format!("page '{}'", page_id),
        )
        .await?;
        Ok(ToolOutput::report(format!("Page {} deleted.", page_id)).affecting(page_id))
    }
}

fn page_list(heading: String, pages: Vec<Value>) -> ToolOutput {
    let mut lines = vec![heading];
    let mut records = Vec::new();
    for page in &pages {
        let id = page["id"].as_str().unwrap_or("?");
        let title = page["title"].as_str().unwrap_or("Untitled");
        lines.push(format!("  - {} (id {})", title, id));
        records.push(SourceRecord::new(id, RecordKind::Page, format!("Page {}: {}", id, title)));
    }
    ToolOutput::report(lines.join("\n"))
        .with_data(Value::Array(pages))
        .with_records(records)
}

fn required<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    optional(input, key).with_context(|| format!("Missing {} parameter", key))
}

fn optional<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input[key].as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Plain text to storage format; markup passes through unchanged
pub fn to_storage(body: &str) -> String {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        return body.to_string();
    }
    body.split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| format!("<p>{}</p>", escape_html(p.trim()).replace('\n', "<br/>")))
        .collect()
}

/// Storage format to readable text
pub fn storage_to_text(storage: &str) -> String {
    let with_breaks = BLOCK_END.replace_all(storage, "\n");
    let stripped = TAG.replace_all(&with_breaks, "");
    stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max).collect::<String>())
    }
}

#[async_trait]
impl Collaborator for ConfluenceClient {
    fn capability(&self) -> Capability {
        Capability::DocumentSpace
    }

    async fn invoke(&self, tool_name: &str, input: &Value) -> Result<ToolOutput> {
        match tool_name {
            "get_confluence_page" => self.get_page(required(input, "page_id")?).await,
            "get_confluence_child_pages" => self.child_pages(required(input, "page_id")?).await,
            "search_confluence_pages" => {
                let cql = required(input, "cql")?;
                let limit = input["limit"].as_u64().unwrap_or(DEFAULT_SEARCH_LIMIT);
                self.search(cql, limit).await
            }
            "show_confluence_page" => Ok(self.show(required(input, "page_id")?)),
            "create_confluence_page" => self.create_page(input).await,
            "update_confluence_page" => self.update_page(required(input, "page_id")?, input).await,
            "delete_confluence_page" => self.delete_page(required(input, "page_id")?).await,
            other => bail!("Unsupported tool '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> ConfluenceClient {
        ConfluenceClient::new(&format!("{}/wiki", server.url()), "me@example.com", "token").unwrap()
    }

    #[test]
    fn test_storage_conversion() {
        assert_eq!(to_storage("a < b\n\nsecond"), "<p>a &lt; b</p><p>second</p>");
        assert_eq!(to_storage("<h1>Kept</h1>"), "<h1>Kept</h1>");
        assert_eq!(storage_to_text("<h1>Title</h1><p>Body &amp; more</p>"), "Title\nBody & more");
    }

    #[tokio::test]
    async fn test_get_page_report() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/wiki/rest/api/content/123")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "id": "123",
                    "title": "Release notes",
                    "space": {"key": "DOC"},
                    "version": {"number": 4},
                    "body": {"storage": {"value": "<p>Version 2.0 ships in May</p>"}}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let output = client(&server)
            .invoke("get_confluence_page", &json!({"page_id": "123"}))
            .await
            .unwrap();
        assert!(output.report.contains("Release notes"));
        assert!(output.report.contains("Version 2.0 ships in May"));
        assert_eq!(output.records[0].kind, RecordKind::Page);
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/wiki/rest/api/content/123")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "id": "123",
                    "title": "Release notes",
                    "version": {"number": 4},
                    "body": {"storage": {"value": "<p>Old</p>"}}
                })
                .to_string(),
            )
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/wiki/rest/api/content/123")
            .match_body(Matcher::PartialJson(json!({
                "title": "Release notes",
                "version": {"number": 5},
                "body": {"storage": {"value": "<p>New</p>"}}
            })))
            .with_status(200)
            .with_body(json!({"id": "123"}).to_string())
            .create_async()
            .await;

        let output = client(&server)
            .invoke("update_confluence_page", &json!({"page_id": "123", "body": "New"}))
            .await
            .unwrap();
        put.assert_async().await;
        assert_eq!(output.affected_record.as_deref(), Some("123"));
    }

    #[tokio::test]
    async fn test_update_requires_a_change() {
        let server = mockito::Server::new_async().await;
        let err = client(&server)
            .invoke("update_confluence_page", &json!({"page_id": "123"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No changes"));
    }

    #[tokio::test]
    async fn test_search_lists_pages() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/wiki/rest/api/content/search")
            .match_query(Matcher::UrlEncoded("cql".into(), "title ~ \"release\"".into()))
            .with_status(200)
            .with_body(json!({"results": [{"id": "123", "title": "Release notes"}]}).to_string())
            .create_async()
            .await;

        let output = client(&server)
            .invoke("search_confluence_pages", &json!({"cql": "title ~ \"release\""}))
            .await
            .unwrap();
        assert_eq!(output.records.len(), 1);
        assert!(output.report.contains("Release notes (id 123)"));
    }
}

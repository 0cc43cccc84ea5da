// Jira Cloud collaborator (REST API v3, basic auth with email + API token)

use super::http::{build_client, ensure_success, normalize_base_url, open_in_browser};
use crate::tools::registry::Collaborator;
use crate::tools::types::{Capability, RecordKind, SourceRecord, ToolOutput};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

const SERVICE: &str = "Jira";

pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    email: String,
    api_token: String,
    open_in_browser: bool,
}

impl JiraClient {
    pub fn new(base_url: &str, email: &str, api_token: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: normalize_base_url(base_url),
            email: email.to_string(),
            api_token: api_token.to_string(),
            open_in_browser: false,
        })
    }

    /// Launch the system browser for `show_jira_issue`
    pub fn with_browser(mut self, enabled: bool) -> Self {
        self.open_in_browser = enabled;
        self
    }

    pub fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.base_url, key)
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/3/{}", self.base_url, path)
    }

    async fn get(&self, path: &str, subject: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.api(path))
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to connect to Jira")?;
        let response = ensure_success(response, SERVICE, subject).await?;
        response.json().await.context("Invalid JSON from Jira")
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Option<Value>, subject: &str) -> Result<Value> {
        let mut request = self
            .client
            .request(method, self.api(path))
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.context("Failed to connect to Jira")?;
        let response = ensure_success(response, SERVICE, subject).await?;
        // 204 responses carry no body
        let text = response.text().await.unwrap_or_default();
        if text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(&text).context("Invalid JSON from Jira")
        }
    }

    async fn issue_details(&self, key: &str) -> Result<ToolOutput> {
        let issue = self.get(&format!("issue/{}", key), &format!("issue '{}'", key)).await?;
        let fields = &issue["fields"];
        let summary = fields["summary"].as_str().unwrap_or("N/A");
        let status = fields["status"]["name"].as_str().unwrap_or("N/A");
        let assignee = fields["assignee"]["displayName"].as_str().unwrap_or("Unassigned");
        let description = match &fields["description"] {
            Value::Null => "No description provided.".to_string(),
            Value::String(s) => s.clone(),
            adf => adf_to_text(adf),
        };

        let report = format!(
            "Issue {}:\n  Summary: {}\n  Status: {}\n  Assignee: {}\n  Description: {}",
            key, summary, status, assignee, description
        );
        Ok(ToolOutput::report(report.clone())
            .with_data(issue.clone())
            .with_record(SourceRecord::new(key, RecordKind::Issue, report)))
    }

    async fn comments(&self, key: &str) -> Result<ToolOutput> {
        let body = self
            .get(&format!("issue/{}/comment", key), &format!("issue '{}'", key))
            .await?;
        let comments = body["comments"].as_array().cloned().unwrap_or_default();
        if comments.is_empty() {
            return Ok(ToolOutput::report(format!("Issue {} has no comments.", key)));
        }

        let mut lines = vec![format!("Comments on {}:", key)];
        let mut records = Vec::new();
        for comment in &comments {
            let id = comment["id"].as_str().unwrap_or("?");
            let author = comment["author"]["displayName"].as_str().unwrap_or("Unknown");
            let text = adf_to_text(&comment["body"]);
            lines.push(format!("  [{}] {}: {}", id, author, text));
            records.push(SourceRecord::new(
                format!("{}#comment-{}", key, id),
                RecordKind::Comment,
                format!("{} on {}: {}", author, key, text),
            ));
        }
        Ok(ToolOutput::report(lines.join("\n"))
            .with_data(Value::Array(comments))
            .with_records(records))
    }

    async fn subtasks(&self, key: &str) -> Result<ToolOutput> {
        let issue = self
            .get(&format!("issue/{}?fields=subtasks", key), &format!("issue '{}'", key))
            .await?;
        let subtasks = issue["fields"]["subtasks"].as_array().cloned().unwrap_or_default();
        if subtasks.is_empty() {
            return Ok(ToolOutput::report(format!("Issue {} has no subtasks.", key)));
        }

        let mut lines = vec![format!("Subtasks of {}:", key)];
        let mut records = Vec::new();
        for sub in &subtasks {
            let sub_key = sub["key"].as_str().unwrap_or("?");
            let summary = sub["fields"]["summary"].as_str().unwrap_or("N/A");
            let status = sub["fields"]["status"]["name"].as_str().unwrap_or("N/A");
            let line = format!("{}: {} ({})", sub_key, summary, status);
            lines.push(format!("  - {}", line));
            records.push(SourceRecord::new(sub_key, RecordKind::Issue, line));
        }
        Ok(ToolOutput::report(lines.join("\n"))
            .with_data(Value::Array(subtasks))
            .with_records(records))
    }

    async fn transitions(&self, key: &str) -> Result<Vec<Value>> {
        let body = self
            .get(&format!("issue/{}/transitions", key), &format!("issue '{}'", key))
            .await?;
        Ok(body["transitions"].as_array().cloned().unwrap_or_default())
    }

    async fn list_transitions(&self, key: &str) -> Result<ToolOutput> {
        let transitions = self.transitions(key).await?;
        if transitions.is_empty() {
            return Ok(ToolOutput::report(format!("No transitions available for {}.", key)));
        }
        let mut lines = vec![format!("Available transitions for {}:", key)];
        for t in &transitions {
            lines.push(format!(
                "  - {} (id {}) -> {}",
                t["name"].as_str().unwrap_or("?"),
                t["id"].as_str().unwrap_or("?"),
                t["to"]["name"].as_str().unwrap_or("?")
            ));
        }
        let report = lines.join("\n");
        Ok(ToolOutput::report(report.clone())
            .with_data(Value::Array(transitions))
            .with_record(SourceRecord::new(
                format!("{}#transitions", key),
                RecordKind::Transition,
                report,
            )))
    }

    async fn issue_links(&self, key: &str) -> Result<ToolOutput> {
        let issue = self
            .get(&format!("issue/{}?fields=issuelinks", key), &format!("issue '{}'", key))
            .await?;
        let links = issue["fields"]["issuelinks"].as_array().cloned().unwrap_or_default();
        if links.is_empty() {
            return Ok(ToolOutput::report(format!("Issue {} has no links.", key)));
        }

        let mut lines = vec![format!("Links of {}:", key)];
        let mut records = Vec::new();
        for link in &links {
            let (relation, other) = if link["outwardIssue"].is_object() {
                (&link["type"]["outward"], &link["outwardIssue"])
            } else {
                (&link["type"]["inward"], &link["inwardIssue"])
            };
            let other_key = other["key"].as_str().unwrap_or("?");
            let line = format!(
                "{} {} {} ({})",
                key,
                relation.as_str().unwrap_or("relates to"),
                other_key,
                other["fields"]["summary"].as_str().unwrap_or("N/A")
            );
            lines.push(format!("  - {}", line));
            records.push(SourceRecord::new(other_key, RecordKind::Issue, line));
        }
        Ok(ToolOutput::report(lines.join("\n"))
            .with_data(Value::Array(links))
            .with_records(records))
    }

    fn show(&self, key: &str) -> ToolOutput {
        let url = self.browse_url(key);
        if self.open_in_browser {
            if let Err(e) = open_in_browser(&url) {
                warn!("{:#}", e);
            }
        }
        ToolOutput::report(format!("Issue {}: {}", key, url)).with_data(json!({ "url": url }))
    }

    async fn update_issue(&self, key: &str, input: &Value) -> Result<ToolOutput> {
        let mut fields = Map::new();
        if let Some(summary) = input["summary"].as_str() {
            fields.insert("summary".into(), json!(summary));
        }
        if let Some(description) = input["description"].as_str() {
            fields.insert("description".into(), text_to_adf(description));
        }
        if let Some(assignee) = input.get("assignee_account_id").filter(|v| !v.is_null()) {
            // Empty account id unassigns
            let value = match assignee.as_str() {
                Some("") | None => Value::Null,
                Some(id) => json!({ "id": id }),
            };
            fields.insert("assignee".into(), value);
        }
        if fields.is_empty() {
            bail!("No fields provided to update.");
        }

        let changed: Vec<String> = fields.keys().cloned().collect();
        self.send(
            reqwest::Method::PUT,
            &format!("issue/{}", key),
            Some(json!({ "fields": fields })),
            &format!("issue '{}'", key),
        )
        .await?;
        info!(issue = key, "Updated fields: {}", changed.join(", "));
        Ok(ToolOutput::report(format!(
            "Issue {} updated ({}).",
            key,
            changed.join(", ")
        ))
        .affecting(key))
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<ToolOutput> {
        let created = self
            .send(
                reqwest::Method::POST,
                &format!("issue/{}/comment", key),
                Some(json!({ "body": text_to_adf(body) })),
                &format!("issue '{}'", key),
            )
            .await?;
        let comment_id = created["id"].as_str().unwrap_or("?");
        Ok(ToolOutput::report(format!("Comment {} added to {}.", comment_id, key))
            .with_data(created.clone())
            .affecting(key))
    }

    async fn transition(&self, key: &str, requested: &str) -> Result<ToolOutput> {
        let transitions = self.transitions(key).await?;
        let wanted = requested.trim().to_lowercase();
        let chosen = transitions
            .iter()
            .find(|t| {
                t["id"].as_str() == Some(requested.trim())
                    || t["name"].as_str().map(|n| n.to_lowercase()) == Some(wanted.clone())
            })
            .with_context(|| {
                let names: Vec<&str> = transitions.iter().filter_map(|t| t["name"].as_str()).collect();
                format!(
                    "Transition '{}' not available for {}. Available: {}",
                    requested,
                    key,
                    names.join(", ")
                )
            })?;
        let id = chosen["id"].as_str().unwrap_or_default().to_string();
        let name = chosen["name"].as_str().unwrap_or(requested).to_string();
        debug!(issue = key, transition = %id, "Applying transition");

        self.send(
            reqwest::Method::POST,
            &format!("issue/{}/transitions", key),
            Some(json!({ "transition": { "id": id } })),
            &format!("issue '{}'", key),
        )
        .await?;
        Ok(ToolOutput::report(format!("Issue {} transitioned via '{}'.", key, name)).affecting(key))
    }

    async fn create_issue(&self, fields: Map<String, Value>, subject: &str) -> Result<ToolOutput> {
        let created = self
            .send(
                reqwest::Method::POST,
                "issue",
                Some(json!({ "fields": fields })),
                subject,
            )
            .await?;
        let key = created["key"]
            .as_str()
            .context("Jira response did not contain the new issue key")?
            .to_string();
        info!(issue = %key, "Created issue");
        Ok(ToolOutput::report(format!("Issue {} created.", key))
            .with_data(created.clone())
            .affecting(key))
    }

    async fn delete_issue(&self, key: &str) -> Result<ToolOutput> {
        self.send(
            reqwest::Method::DELETE,
            &format!("issue/{}", key),
            None,
            &format!("issue '{}'", key),
        )
        .await?;
        Ok(ToolOutput::report(format!("Issue {} deleted.", key)).affecting(key))
    }
}

fn issue_key<'a>(input: &'a Value, param: &str) -> Result<&'a str> {
    input[param]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .with_context(|| format!("Missing {} parameter", param))
}

fn new_issue_fields(input: &Value) -> Result<Map<String, Value>> {
    let project = issue_key(input, "project_key")?;
    let summary = issue_key(input, "summary")?;
    let issue_type = input["issue_type"].as_str().unwrap_or("Story");

    let mut fields = Map::new();
    fields.insert("project".into(), json!({ "key": project }));
    fields.insert("summary".into(), json!(summary));
    fields.insert("issuetype".into(), json!({ "name": issue_type }));
    if let Some(description) = input["description"].as_str() {
        fields.insert("description".into(), text_to_adf(description));
    }
    Ok(fields)
}

fn new_subtask_fields(input: &Value) -> Result<Map<String, Value>> {
    let parent = issue_key(input, "parent_issue_id")?;
    let summary = issue_key(input, "summary")?;
    let project = parent
        .split_once('-')
        .map(|(p, _)| p)
        .with_context(|| format!("'{}' is not an issue key", parent))?;

    let mut fields = Map::new();
    fields.insert("project".into(), json!({ "key": project }));
    fields.insert("parent".into(), json!({ "key": parent }));
    fields.insert("summary".into(), json!(summary));
    fields.insert("issuetype".into(), json!({ "name": "Sub-task" }));
    if let Some(description) = input["description"].as_str() {
        fields.insert("description".into(), text_to_adf(description));
    }
    Ok(fields)
}

/// Plain text to an Atlassian Document Format doc, one paragraph per line
pub fn text_to_adf(text: &str) -> Value {
    let paragraphs: Vec<Value> = text
        .lines()
        .map(|line| {
            if line.is_empty() {
                json!({ "type": "paragraph", "content": [] })
            } else {
                json!({ "type": "paragraph", "content": [{ "type": "text", "text": line }] })
            }
        })
        .collect();
    json!({ "type": "doc", "version": 1, "content": paragraphs })
}

/// Extract plain text from an ADF node; block nodes become lines
pub fn adf_to_text(node: &Value) -> String {
    fn collect(node: &Value, out: &mut Vec<String>, line: &mut String) {
        match node["type"].as_str() {
            Some("text") => line.push_str(node["text"].as_str().unwrap_or_default()),
            Some("hardBreak") => out.push(std::mem::take(line)),
            _ => {
                if let Some(children) = node["content"].as_array() {
                    for child in children {
                        collect(child, out, line);
                    }
                }
                if matches!(
                    node["type"].as_str(),
                    Some("paragraph") | Some("heading") | Some("listItem") | Some("codeBlock")
                ) {
                    out.push(std::mem::take(line));
                }
            }
        }
    }

    if let Value::String(s) = node {
        return s.clone();
    }
    let mut lines = Vec::new();
    let mut line = String::new();
    collect(node, &mut lines, &mut line);
    if !line.is_empty() {
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

#[async_trait]
impl Collaborator for JiraClient {
    fn capability(&self) -> Capability {
        Capability::IssueTracker
    }

    async fn invoke(&self, tool_name: &str, input: &Value) -> Result<ToolOutput> {
        match tool_name {
            "get_jira_issue_details" => self.issue_details(issue_key(input, "issue_id")?).await,
            "get_jira_comments" => self.comments(issue_key(input, "issue_id")?).await,
            "get_jira_subtasks" => self.subtasks(issue_key(input, "issue_id")?).await,
            "get_jira_transitions" => self.list_transitions(issue_key(input, "issue_id")?).await,
            "get_jira_issue_links" => self.issue_links(issue_key(input, "issue_id")?).await,
            "show_jira_issue" => Ok(self.show(issue_key(input, "issue_id")?)),
            "update_jira_issue" => self.update_issue(issue_key(input, "issue_id")?, input).await,
            "add_jira_comment" => {
                let key = issue_key(input, "issue_id")?;
                let body = issue_key(input, "body")?;
                self.add_comment(key, body).await
            }
            "transition_jira_issue" => {
                let key = issue_key(input, "issue_id")?;
                let transition = issue_key(input, "transition")?;
                self.transition(key, transition).await
            }
            "create_jira_issue" => {
                let fields = new_issue_fields(input)?;
                self.create_issue(fields, "project").await
            }
            "create_jira_subtask" => {
                let fields = new_subtask_fields(input)?;
                let parent = issue_key(input, "parent_issue_id")?;
                self.create_issue(fields, &format!("parent issue '{}'", parent)).await
            }
            "delete_jira_issue" => self.delete_issue(issue_key(input, "issue_id")?).await,
            other => bail!("Unsupported tool '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> JiraClient {
        JiraClient::new(&server.url(), "me@example.com", "token").unwrap()
    }

    #[test]
    fn test_adf_round_trip_keeps_lines() {
        let adf = text_to_adf("First line\nSecond line");
        assert_eq!(adf["type"], "doc");
        assert_eq!(adf_to_text(&adf), "First line\nSecond line");
    }

    #[tokio::test]
    async fn test_issue_details_report() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/api/3/issue/PROJ-1")
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "key": "PROJ-1",
                    "fields": {
                        "summary": "Login page",
                        "status": {"name": "Open"},
                        "assignee": null,
                        "description": text_to_adf("Users log in with email")
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let output = client(&server)
            .invoke("get_jira_issue_details", &json!({"issue_id": "PROJ-1"}))
            .await
            .unwrap();
        mock.assert_async().await;
        assert!(output.report.contains("Summary: Login page"));
        assert!(output.report.contains("Assignee: Unassigned"));
        assert!(output.report.contains("Users log in with email"));
        assert_eq!(output.records[0].id, "PROJ-1");
    }

    #[tokio::test]
    async fn test_not_found_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/api/3/issue/PROJ-404")
            .with_status(404)
            .create_async()
            .await;

        let err = client(&server)
            .invoke("get_jira_issue_details", &json!({"issue_id": "PROJ-404"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Jira issue 'PROJ-404' not found.");
    }

    #[tokio::test]
    async fn test_update_sends_adf_description() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/rest/api/3/issue/PROJ-1")
            .match_body(Matcher::PartialJson(json!({
                "fields": {"summary": "X", "description": {"type": "doc"}}
            })))
            .with_status(204)
            .create_async()
            .await;

        let output = client(&server)
            .invoke(
                "update_jira_issue",
                &json!({"issue_id": "PROJ-1", "summary": "X", "description": "New text"}),
            )
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(output.affected_record.as_deref(), Some("PROJ-1"));
    }

    #[tokio::test]
    async fn test_update_without_fields_fails_before_request() {
        let server = mockito::Server::new_async().await;
        let err = client(&server)
            .invoke("update_jira_issue", &json!({"issue_id": "PROJ-1"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No fields provided"));
    }

    #[tokio::test]
    async fn test_transition_by_name() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/api/3/issue/PROJ-1/transitions")
            .with_status(200)
            .with_body(
                json!({"transitions": [
                    {"id": "11", "name": "To Do", "to": {"name": "To Do"}},
                    {"id": "21", "name": "In Progress", "to": {"name": "In Progress"}}
                ]})
                .to_string(),
            )
            .create_async()
            .await;
        let post = server
            .mock("POST", "/rest/api/3/issue/PROJ-1/transitions")
            .match_body(Matcher::Json(json!({"transition": {"id": "21"}})))
            .with_status(204)
            .create_async()
            .await;

        let output = client(&server)
            .invoke(
                "transition_jira_issue",
                &json!({"issue_id": "PROJ-1", "transition": "in progress"}),
            )
            .await
            .unwrap();
        post.assert_async().await;
        assert!(output.report.contains("In Progress"));
    }

    #[tokio::test]
    async fn test_create_subtask_uses_parent_project() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/api/3/issue")
            .match_body(Matcher::PartialJson(json!({
                "fields": {"project": {"key": "PROJ"}, "parent": {"key": "PROJ-7"}}
            })))
            .with_status(201)
            .with_body(json!({"id": "10042", "key": "PROJ-42"}).to_string())
            .create_async()
            .await;

        let output = client(&server)
            .invoke(
                "create_jira_subtask",
                &json!({"parent_issue_id": "PROJ-7", "summary": "Write tests"}),
            )
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(output.affected_record.as_deref(), Some("PROJ-42"));
    }

    #[tokio::test]
    async fn test_show_returns_browse_url() {
        let server = mockito::Server::new_async().await;
        let jira = client(&server);
        let output = jira
            .invoke("show_jira_issue", &json!({"issue_id": "PROJ-1"}))
            .await
            .unwrap();
        assert_eq!(output.data["url"], format!("{}/browse/PROJ-1", server.url()));
    }
}

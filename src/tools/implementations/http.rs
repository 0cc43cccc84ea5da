// Shared HTTP plumbing for the REST collaborators

use anyhow::{Context, Result};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Client with the timeout and user agent every collaborator uses
pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("cerebra/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Trim the trailing slash so paths can be appended with `format!`
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Map a non-success response to a readable error
///
/// `service` names the remote system, `subject` the addressed record
/// (used for 404s).
pub async fn ensure_success(response: Response, service: &str, subject: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match status {
        StatusCode::UNAUTHORIZED => format!("{} authentication failed. Check email/API key.", service),
        StatusCode::FORBIDDEN => format!("{} permission denied.", service),
        StatusCode::NOT_FOUND => format!("{} {} not found.", service, subject),
        _ => match serde_json::from_str::<Value>(&body).ok().and_then(|v| error_messages(&v)) {
            Some(details) => format!("{} returned {}: {}", service, status, details),
            None => format!("{} returned {}", service, status),
        },
    };
    anyhow::bail!(message)
}

/// Collect `errorMessages`, `errors` and `message` fields from an error body
pub fn error_messages(body: &Value) -> Option<String> {
    let mut messages: Vec<String> = Vec::new();
    if let Some(list) = body["errorMessages"].as_array() {
        messages.extend(list.iter().filter_map(|m| m.as_str()).map(String::from));
    }
    if let Some(map) = body["errors"].as_object() {
        for (field, msg) in map {
            if let Some(msg) = msg.as_str() {
                messages.push(format!("{}: {}", field, msg));
            }
        }
    }
    if let Some(msg) = body["message"].as_str() {
        messages.push(msg.to_string());
    }
    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}

/// Open a URL with the platform's default handler
pub fn open_in_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    let mut command = std::process::Command::new("open");
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut command = std::process::Command::new("xdg-open");

    command
        .arg(url)
        .spawn()
        .with_context(|| format!("Failed to open browser for {}", url))?;
    Ok(())
}

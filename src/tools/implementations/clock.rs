// Clock collaborator - current local date and time

use crate::tools::registry::Collaborator;
use crate::tools::types::{Capability, RecordKind, SourceRecord, ToolOutput};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{json, Value};

/// Source of the current time
pub struct SystemClock {
    fixed: Option<DateTime<Local>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { fixed: None }
    }

    /// Clock that always reports `at`
    pub fn fixed(at: DateTime<Local>) -> Self {
        Self { fixed: Some(at) }
    }

    fn now(&self) -> DateTime<Local> {
        self.fixed.unwrap_or_else(Local::now)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collaborator for SystemClock {
    fn capability(&self) -> Capability {
        Capability::Clock
    }

    async fn invoke(&self, tool_name: &str, _input: &Value) -> Result<ToolOutput> {
        if tool_name != "get_current_time" {
            bail!("Unsupported tool '{}'", tool_name);
        }
        let now = self.now();
        let report = format!("The current time is {}", now.format("%Y-%m-%d %H:%M:%S %Z"));
        Ok(ToolOutput::report(report.clone())
            .with_data(json!({ "iso": now.to_rfc3339() }))
            .with_record(SourceRecord::new("clock", RecordKind::Clock, report)))
    }
}

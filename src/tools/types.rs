// Core types for the tool-call pipeline
//
// ToolSpec describes an operation, ToolCall is a planned invocation,
// ToolOutput is what a collaborator hands back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// External capability that owns a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    IssueTracker,
    DocumentSpace,
    RequirementStore,
    RequirementGraph,
    WebSearch,
    Clock,
    /// The assistant's own tool catalog and role profiles
    ToolCatalog,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::IssueTracker => "issue tracker",
            Capability::DocumentSpace => "document space",
            Capability::RequirementStore => "requirement store",
            Capability::RequirementGraph => "requirement graph",
            Capability::WebSearch => "web search",
            Capability::Clock => "clock",
            Capability::ToolCatalog => "tool catalog",
        }
    }
}

/// JSON Schema for tool input parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub schema_type: String, // Usually "object"
    pub properties: Value,
    pub required: Vec<String>,
}

impl ToolInputSchema {
    /// Create a simple schema with required string parameters
    pub fn simple(params: Vec<(&str, &str)>) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for (param_name, param_desc) in params.iter() {
            properties.insert(
                param_name.to_string(),
                serde_json::json!({
                    "type": "string",
                    "description": param_desc
                }),
            );
            required.push(param_name.to_string());
        }

        Self {
            schema_type: "object".to_string(),
            properties: Value::Object(properties),
            required,
        }
    }

    /// Add an optional parameter of the given JSON type
    pub fn optional(mut self, name: &str, json_type: &str, description: &str) -> Self {
        if let Value::Object(ref mut props) = self.properties {
            props.insert(
                name.to_string(),
                serde_json::json!({
                    "type": json_type,
                    "description": description
                }),
            );
        }
        self
    }

    /// Add a required parameter of the given JSON type
    pub fn with_required(mut self, name: &str, json_type: &str, description: &str) -> Self {
        self = self.optional(name, json_type, description);
        if !self.required.iter().any(|r| r == name) {
            self.required.push(name.to_string());
        }
        self
    }

    /// Names of all declared parameters
    pub fn parameter_names(&self) -> Vec<String> {
        match &self.properties {
            Value::Object(props) => props.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Required parameters absent (or blank) in `params`, in declaration order
    pub fn missing_required(&self, params: &Map<String, Value>) -> Vec<String> {
        self.required
            .iter()
            .filter(|name| match params.get(name.as_str()) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .cloned()
            .collect()
    }
}

/// Follow-up viewer call issued after a successful mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAction {
    /// Read-only tool that opens the record
    pub tool: String,
    /// Parameter that receives the affected record id
    pub param: String,
}

/// Static declaration of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: ToolInputSchema,
    pub mutating: bool,
    pub capability: Capability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_action: Option<PostAction>,
}

impl ToolSpec {
    pub fn read_only(
        name: &str,
        capability: Capability,
        description: &str,
        input_schema: ToolInputSchema,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            mutating: false,
            capability,
            post_action: None,
        }
    }

    pub fn mutating(
        name: &str,
        capability: Capability,
        description: &str,
        input_schema: ToolInputSchema,
    ) -> Self {
        Self {
            mutating: true,
            ..Self::read_only(name, capability, description, input_schema)
        }
    }

    /// Open the affected record with `tool` once the mutation succeeded
    pub fn with_viewer(mut self, tool: &str, param: &str) -> Self {
        self.post_action = Some(PostAction {
            tool: tool.to_string(),
            param: param.to_string(),
        });
        self
    }

    pub fn kind_label(&self) -> &'static str {
        if self.mutating {
            "mutating"
        } else {
            "read-only"
        }
    }
}

/// A planned invocation of a registered tool
///
/// `mutating` is copied from the registry when the call is built and never
/// recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub parameters: Map<String, Value>,
    pub mutating: bool,
}

impl ToolCall {
    /// Deterministic id from session turn and position in the plan
    pub fn call_id(turn: usize, index: usize) -> String {
        format!("call_{}_{}", turn, index)
    }

    pub fn new(id: String, spec: &ToolSpec, parameters: Map<String, Value>) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            parameters,
            mutating: spec.mutating,
        }
    }

    /// String parameter accessor
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Parameters as a JSON object (what collaborators receive)
    pub fn input(&self) -> Value {
        Value::Object(self.parameters.clone())
    }

    /// Same tool with the same parameters (ids ignored)
    pub fn same_request(&self, other: &ToolCall) -> bool {
        self.name == other.name && self.parameters == other.parameters
    }
}

impl fmt::Display for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut keys: Vec<&String> = self.parameters.keys().collect();
        keys.sort();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &self.parameters[key.as_str()] {
                Value::String(s) => write!(f, "{}: {}", key, s)?,
                other => write!(f, "{}: {}", key, other)?,
            }
        }
        write!(f, ")")
    }
}

/// Kind of record a tool result was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Issue,
    Comment,
    Transition,
    Page,
    Requirement,
    AcceptanceCriterion,
    TestCase,
    Relationship,
    SearchResult,
    Clock,
    /// A tool report without finer-grained records
    ToolReport,
}

/// A record consulted while producing a tool output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub kind: RecordKind,
    pub text: String,
}

impl SourceRecord {
    pub fn new(id: impl Into<String>, kind: RecordKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
        }
    }
}

/// Structured result of a collaborator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub call_id: String,
    pub tool_name: String,
    /// Human-readable report
    pub report: String,
    /// Raw structured payload
    #[serde(default)]
    pub data: Value,
    /// Records the report was derived from
    #[serde(default)]
    pub records: Vec<SourceRecord>,
    /// Created/updated record id (mutating calls)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_record: Option<String>,
}

impl ToolOutput {
    /// Output not yet bound to a call; the engine fills call id and tool name
    pub fn report(report: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            tool_name: String::new(),
            report: report.into(),
            data: Value::Null,
            records: Vec::new(),
            affected_record: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_record(mut self, record: SourceRecord) -> Self {
        self.records.push(record);
        self
    }

    pub fn with_records(mut self, records: impl IntoIterator<Item = SourceRecord>) -> Self {
        self.records.extend(records);
        self
    }

    pub fn affecting(mut self, record_id: impl Into<String>) -> Self {
        self.affected_record = Some(record_id.into());
        self
    }

    /// Records to attribute against
    ///
    /// A report without records stands for itself, identified by the
    /// affected record (mutations) or the call id.
    pub fn consulted_records(&self) -> Vec<SourceRecord> {
        if !self.records.is_empty() {
            return self.records.clone();
        }
        let id = self.affected_record.as_deref().unwrap_or(&self.call_id);
        vec![SourceRecord::new(id, RecordKind::ToolReport, &self.report)]
    }

    pub(crate) fn bind(mut self, call: &ToolCall) -> Self {
        self.call_id = call.id.clone();
        self.tool_name = call.name.clone();
        self
    }
}

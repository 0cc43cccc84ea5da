// Intent rule table
//
// Ordered (name, pattern, builder) entries; the first rule whose pattern
// matches and whose builder accepts the captures wins. Patterns are
// anchored and case-insensitive. Builders only draft parameters; required
// fields are validated against the registry afterwards.

use crate::tools::implementations::requirements::RecordCollection;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Issue key or a pronoun pointing at the last referenced issue
const ISSUE: &str = r"(?P<issue>[a-z][a-z0-9]*-\d+|this issue|that issue|the issue|this ticket|that ticket|the ticket|it|this|that)";
/// Page id or a pronoun pointing at the last referenced page
const PAGE: &str = r"(?:page\s+(?P<page>\d+)|(?P<pageref>this page|that page|the page))";
/// Optional surrounding quote
const Q: &str = r#"['"‘’“”]?"#;
const COLL_ONE: &str = r"(?P<coll>requirement|acceptance criterion|test case)";
const COLL_MANY: &str = r"(?P<coll>requirements|acceptance criteria|test cases)";
const RECORD_ID: &str = r"(?P<id>(?:req|ac|tc)-\d+)";
/// Catalog tool name, e.g. get_jira_comments
const TOOL: &str = r"(?P<tool>[a-z]+(?:_[a-z]+)+)";

static ISSUE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[a-z][a-z0-9]*-\d+$").expect("valid issue key regex"));
static KEY_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[a-z][a-z0-9]*-\d+\b").expect("valid issue key regex"));

/// One drafted tool call
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub tool: String,
    pub params: Map<String, Value>,
}

impl Draft {
    fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: Map::new(),
        }
    }

    /// Set a string parameter; `None` leaves it absent
    fn with(mut self, key: &str, value: Option<String>) -> Self {
        if let Some(v) = value {
            self.params.insert(key.to_string(), json!(v));
        }
        self
    }

    fn with_value(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

/// What an utterance asks for
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Calls(Vec<Draft>),
    Protocol,
    StartInterview { project: Option<String> },
}

/// History the rules may consult
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanContext<'a> {
    pub last_issue: Option<&'a str>,
    pub last_page: Option<&'a str>,
}

type Builder = fn(&Captures, &PlanContext) -> Option<Intent>;

struct Rule {
    name: &'static str,
    pattern: Regex,
    build: Builder,
}

fn rule(name: &'static str, pattern: &str, build: Builder) -> Rule {
    let pattern = format!("(?i)^{}$", pattern);
    Rule {
        name,
        pattern: Regex::new(&pattern).unwrap_or_else(|e| panic!("invalid rule '{}': {}", name, e)),
        build,
    }
}

fn text(caps: &Captures, name: &str) -> Option<String> {
    caps.name(name)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn issue(caps: &Captures, ctx: &PlanContext) -> Option<String> {
    let raw = text(caps, "issue")?;
    if ISSUE_KEY.is_match(&raw) {
        Some(raw.to_uppercase())
    } else {
        ctx.last_issue.map(String::from)
    }
}

fn page(caps: &Captures, ctx: &PlanContext) -> Option<String> {
    text(caps, "page").or_else(|| {
        caps.name("pageref")
            .and_then(|_| ctx.last_page.map(String::from))
    })
}

fn single(draft: Draft) -> Option<Intent> {
    Some(Intent::Calls(vec![draft]))
}

fn collection(caps: &Captures) -> Option<RecordCollection> {
    caps.name("coll")
        .and_then(|m| RecordCollection::from_phrase(m.as_str()))
}

/// Relationship phrase to an UPPER_SNAKE type ("depends on" -> DEPENDS_ON)
fn relationship_type(phrase: &str) -> String {
    phrase
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_uppercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Free text becomes a CQL text search; CQL passes through
fn cql_from(query: &str) -> String {
    if query.contains('=') || query.contains('~') {
        query.to_string()
    } else {
        format!("text ~ \"{}\"", query.replace('"', "\\\""))
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            "protocol",
            r"(?:show |give me |create |write )?(?:the |a )?(?:session )?protocol(?: please)?",
            |_, _| Some(Intent::Protocol),
        ),
        rule(
            "user_story_interview",
            r"(?:create|write|start|new)(?: an?| the)? user story(?: (?:in|for) (?:project )?(?P<project>[a-z][a-z0-9]*))?",
            |c, _| Some(Intent::StartInterview { project: text(c, "project").map(|p| p.to_uppercase()) }),
        ),
        // Requirement store
        rule(
            "add_record",
            &format!(r"(?:add|create|store|save) (?:an? )?(?:new )?{}\s*[:,]?\s+{}(?P<value>.+?){}", COLL_ONE, Q, Q),
            |c, _| {
                let coll = collection(c)?;
                single(Draft::new(format!("add_{}", coll.tool_suffix(false))).with("text", text(c, "value")))
            },
        ),
        rule(
            "update_record",
            &format!(r"(?:update|change|set) (?:the )?(?:text of )?{} {}(?: text)? to {}(?P<value>.+?){}", COLL_ONE, RECORD_ID, Q, Q),
            |c, _| {
                let coll = collection(c)?;
                single(
                    Draft::new(format!("update_{}", coll.tool_suffix(false)))
                        .with(coll.id_param(), text(c, "id").map(|s| s.to_uppercase()))
                        .with("text", text(c, "value")),
                )
            },
        ),
        rule(
            "delete_record",
            &format!(r"(?:delete|remove) (?:the )?{} {}", COLL_ONE, RECORD_ID),
            |c, _| {
                let coll = collection(c)?;
                single(
                    Draft::new(format!("delete_{}", coll.tool_suffix(false)))
                        .with(coll.id_param(), text(c, "id").map(|s| s.to_uppercase())),
                )
            },
        ),
        rule(
            "similar_records",
            &format!(r"(?:find|search|retrieve|show)(?: for)?(?: similar)? {} (?:similar to|like|about|matching|for) {}(?P<value>.+?){}", COLL_MANY, Q, Q),
            |c, _| {
                let coll = collection(c)?;
                single(
                    Draft::new(format!("retrieve_similar_{}", coll.tool_suffix(true)))
                        .with("query", text(c, "value")),
                )
            },
        ),
        rule(
            "list_records",
            &format!(r"(?:list|show|get)(?: me)?(?: all)?(?: the)?(?: stored)? {}", COLL_MANY),
            |c, _| {
                let coll = collection(c)?;
                single(Draft::new(format!("get_all_{}", coll.tool_suffix(true))))
            },
        ),
        // Requirement graph
        rule(
            "graph_node",
            &format!(r"add (?P<id>req-\d+) to the graph(?:\s*(?:[:,]|with text)\s*{}(?P<value>.+?){})?", Q, Q),
            |c, _| {
                single(
                    Draft::new("add_or_update_requirement_node")
                        .with("requirement_id", text(c, "id").map(|s| s.to_uppercase()))
                        .with("text", text(c, "value")),
                )
            },
        ),
        rule(
            "graph_link",
            r"link (?P<start>req-\d+) (?:to|with) (?P<end>req-\d+)(?: (?:as|via|using|with type) (?P<kind>[a-z_ -]+))?",
            |c, _| {
                single(
                    Draft::new("add_requirement_relationship")
                        .with("start_id", text(c, "start").map(|s| s.to_uppercase()))
                        .with("end_id", text(c, "end").map(|s| s.to_uppercase()))
                        .with("relationship_type", text(c, "kind").map(|k| relationship_type(&k))),
                )
            },
        ),
        rule(
            "graph_relationships",
            r"(?:show |get |list )?(?:the )?relationships (?:of|for) (?P<id>req-\d+)",
            |c, _| {
                single(
                    Draft::new("get_requirement_relationships")
                        .with("requirement_id", text(c, "id").map(|s| s.to_uppercase())),
                )
            },
        ),
        // Issue tracker, mutating
        rule(
            "update_issue_field",
            &format!(r"(?:update|change|set) (?:the )?(?P<field>summary|title|description) (?:of|for|on) {} to {}(?P<value>.+?){}", ISSUE, Q, Q),
            |c, ctx| {
                let field = match text(c, "field")?.to_lowercase().as_str() {
                    "description" => "description",
                    _ => "summary",
                };
                single(
                    Draft::new("update_jira_issue")
                        .with("issue_id", issue(c, ctx))
                        .with(field, text(c, "value")),
                )
            },
        ),
        rule(
            "assign_issue",
            &format!(r"assign {} to (?P<value>\S+)", ISSUE),
            |c, ctx| {
                single(
                    Draft::new("update_jira_issue")
                        .with("issue_id", issue(c, ctx))
                        .with("assignee_account_id", text(c, "value")),
                )
            },
        ),
        rule(
            "unassign_issue",
            &format!(r"unassign {}", ISSUE),
            |c, ctx| {
                single(
                    Draft::new("update_jira_issue")
                        .with("issue_id", issue(c, ctx))
                        .with("assignee_account_id", Some(String::new())),
                )
            },
        ),
        rule(
            "add_comment",
            &format!(r"(?:add (?:a )?)?comment (?:on|to) {}\s*(?:[:,]|saying|with)\s*{}(?P<value>.+?){}", ISSUE, Q, Q),
            |c, ctx| {
                single(
                    Draft::new("add_jira_comment")
                        .with("issue_id", issue(c, ctx))
                        .with("body", text(c, "value")),
                )
            },
        ),
        rule(
            "transition_issue",
            &format!(r"(?:move|transition) {} to {}(?P<value>.+?){}", ISSUE, Q, Q),
            |c, ctx| {
                single(
                    Draft::new("transition_jira_issue")
                        .with("issue_id", issue(c, ctx))
                        .with("transition", text(c, "value")),
                )
            },
        ),
        rule(
            "create_subtask",
            &format!(r"(?:create|add) (?:a )?sub-?task (?:for|under|of|to) {}(?:\s*(?:[:,]|called|titled|named)\s*{}(?P<value>.+?){})?", ISSUE, Q, Q),
            |c, ctx| {
                single(
                    Draft::new("create_jira_subtask")
                        .with("parent_issue_id", issue(c, ctx))
                        .with("summary", text(c, "value")),
                )
            },
        ),
        rule(
            "create_issue",
            &format!(r"(?:create|open|file) (?:an? |new )*(?P<kind>story|bug|task|epic|issue|ticket)(?: in (?:project )?(?P<project>[a-z][a-z0-9]*))?(?:\s*(?:[:,]|called|titled|named)\s*{}(?P<value>.+?){})?", Q, Q),
            |c, _| {
                let kind = match text(c, "kind")?.to_lowercase().as_str() {
                    "bug" => "Bug",
                    "task" => "Task",
                    "epic" => "Epic",
                    _ => "Story",
                };
                single(
                    Draft::new("create_jira_issue")
                        .with("project_key", text(c, "project").map(|p| p.to_uppercase()))
                        .with("summary", text(c, "value"))
                        .with("issue_type", Some(kind.to_string())),
                )
            },
        ),
        rule(
            "delete_issue",
            &format!(r"delete (?:issue |ticket )?{}", ISSUE),
            |c, ctx| single(Draft::new("delete_jira_issue").with("issue_id", issue(c, ctx))),
        ),
        // Issue tracker, read-only
        rule(
            "issue_comments",
            &format!(r"(?:show |get |list |read )?(?:me )?(?:the )?comments (?:on|of|for) {}", ISSUE),
            |c, ctx| single(Draft::new("get_jira_comments").with("issue_id", issue(c, ctx))),
        ),
        rule(
            "issue_subtasks",
            &format!(r"(?:show |get |list )?(?:me )?(?:the )?sub-?tasks (?:of|for) {}", ISSUE),
            |c, ctx| single(Draft::new("get_jira_subtasks").with("issue_id", issue(c, ctx))),
        ),
        rule(
            "issue_transitions",
            &format!(r"(?:show |get |list |what are )?(?:me )?(?:the )?(?:available )?transitions (?:of|for) {}", ISSUE),
            |c, ctx| single(Draft::new("get_jira_transitions").with("issue_id", issue(c, ctx))),
        ),
        rule(
            "issue_links",
            &format!(r"(?:show |get |list )?(?:me )?(?:the )?(?:issue )?links (?:of|for) {}", ISSUE),
            |c, ctx| single(Draft::new("get_jira_issue_links").with("issue_id", issue(c, ctx))),
        ),
        rule(
            "open_issue",
            &format!(r"open (?:issue |ticket )?{}(?: in (?:the )?browser)?", ISSUE),
            |c, ctx| single(Draft::new("show_jira_issue").with("issue_id", issue(c, ctx))),
        ),
        // Document space
        rule(
            "update_page",
            &format!(r"(?:update|change|set) (?:the )?(?P<field>title|body|content) of (?:the )?(?:confluence )?{} to {}(?P<value>.+?){}", PAGE, Q, Q),
            |c, ctx| {
                let field = match text(c, "field")?.to_lowercase().as_str() {
                    "title" => "title",
                    _ => "body",
                };
                single(
                    Draft::new("update_confluence_page")
                        .with("page_id", page(c, ctx))
                        .with(field, text(c, "value")),
                )
            },
        ),
        rule(
            "create_page",
            &format!(r"create (?:a )?(?:confluence )?page in (?:space )?(?P<space>[a-z][a-z0-9]*)(?: (?:titled|called|named) {}(?P<title>.+?){})?(?:\s*(?:with (?:body|content)|:)\s*{}(?P<body>.+?){})?", Q, Q, Q, Q),
            |c, _| {
                single(
                    Draft::new("create_confluence_page")
                        .with("space_key", text(c, "space").map(|s| s.to_uppercase()))
                        .with("title", text(c, "title"))
                        .with("body", text(c, "body")),
                )
            },
        ),
        rule(
            "delete_page",
            &format!(r"delete (?:the )?(?:confluence )?{}", PAGE),
            |c, ctx| single(Draft::new("delete_confluence_page").with("page_id", page(c, ctx))),
        ),
        rule(
            "child_pages",
            &format!(r"(?:show |get |list )?(?:me )?(?:the )?(?:child pages|children) (?:of|for|under) (?:the )?(?:confluence )?{}", PAGE),
            |c, ctx| single(Draft::new("get_confluence_child_pages").with("page_id", page(c, ctx))),
        ),
        rule(
            "search_pages",
            &format!(r"search (?:confluence|the wiki|pages|the documentation)(?: for)? {}(?P<value>.+?){}", Q, Q),
            |c, _| {
                let query = text(c, "value")?;
                single(
                    Draft::new("search_confluence_pages")
                        .with_value("cql", json!(cql_from(&query))),
                )
            },
        ),
        rule(
            "open_page",
            &format!(r"open (?:the )?(?:confluence )?{}(?: in (?:the )?browser)?", PAGE),
            |c, ctx| single(Draft::new("show_confluence_page").with("page_id", page(c, ctx))),
        ),
        rule(
            "show_page",
            &format!(r"(?:show|get|read|display)(?: me)? (?:the )?(?:confluence )?{}", PAGE),
            |c, ctx| single(Draft::new("get_confluence_page").with("page_id", page(c, ctx))),
        ),
        // Utilities
        rule(
            "web_search",
            &format!(r"(?:google|search the web for|search google for|web search(?: for)?|look up) {}(?P<value>.+?){}", Q, Q),
            |c, _| single(Draft::new("perform_google_search").with("query", text(c, "value"))),
        ),
        rule(
            "current_time",
            r"(?:what(?:'s| is) the (?:current )?(?:time|date)(?: now)?|what time is it|current time|what day is (?:it|today))",
            |_, _| single(Draft::new("get_current_time")),
        ),
        // Tool catalog and role availability
        rule(
            "tool_description",
            &format!(r"(?:describe|explain|what does)(?: the)? tool {}{}{}(?: do)?\??", Q, TOOL, Q),
            |c, _| {
                single(Draft::new("get_tool_description").with("tool_name", text(c, "tool").map(|t| t.to_lowercase())))
            },
        ),
        rule(
            "update_tool_description",
            &format!(
                r"(?:set|change|update) (?:the )?description of (?:the )?tool {}{}{} to {}(?P<value>.+?){}",
                Q, TOOL, Q, Q, Q
            ),
            |c, _| {
                single(
                    Draft::new("update_tool_description")
                        .with("tool_name", text(c, "tool").map(|t| t.to_lowercase()))
                        .with("description", text(c, "value")),
                )
            },
        ),
        rule(
            "list_tools",
            r"(?:(?:list|show)(?: me)? (?:the |all )?(?:available|enabled) tools|which tools (?:are|can i) (?:available|enabled|use))\??",
            |_, _| single(Draft::new("list_available_tools")),
        ),
        rule(
            "tool_availability",
            &format!(r"(?P<verb>enable|disable) (?:the )?(?:tool )?{}{}{}(?: tool)?", Q, TOOL, Q),
            |c, _| {
                let enable = text(c, "verb")?.eq_ignore_ascii_case("enable");
                single(
                    Draft::new("set_tool_availability")
                        .with("tool_name", text(c, "tool").map(|t| t.to_lowercase()))
                        .with_value("enable", json!(enable)),
                )
            },
        ),
        // Issue details for one or more keys; kept last, it is the broadest
        rule(
            "issue_details",
            r"(?:show|get|display|fetch|describe|details (?:of|for)|what(?:'s| is) the status of)(?: me)?(?: the)?(?: (?:details|status) (?:of|for))?(?: issues?| tickets?)? (?P<keys>.+)",
            |c, ctx| {
                let keys_text = text(c, "keys")?;
                let mut seen = HashSet::new();
                let keys: Vec<String> = KEY_IN_TEXT
                    .find_iter(&keys_text)
                    .map(|m| m.as_str().to_uppercase())
                    .filter(|key| seen.insert(key.clone()))
                    .collect();
                if keys.is_empty() {
                    let pronoun = keys_text.to_lowercase();
                    let is_ref = matches!(
                        pronoun.as_str(),
                        "it" | "this" | "that" | "this issue" | "that issue" | "the issue" | "this ticket" | "that ticket" | "the ticket"
                    );
                    if !is_ref {
                        return None;
                    }
                    return single(
                        Draft::new("get_jira_issue_details")
                            .with("issue_id", ctx.last_issue.map(String::from)),
                    );
                }
                Some(Intent::Calls(
                    keys.into_iter()
                        .map(|k| Draft::new("get_jira_issue_details").with("issue_id", Some(k)))
                        .collect(),
                ))
            },
        ),
    ]
});

/// Trim whitespace and trailing sentence punctuation
pub fn normalize(utterance: &str) -> &str {
    utterance
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | '?' | '!'))
        .trim()
}

/// First matching rule and its intent
pub fn match_intent(utterance: &str, ctx: &PlanContext) -> Option<(&'static str, Intent)> {
    let utterance = normalize(utterance);
    RULES.iter().find_map(|rule| {
        let caps = rule.pattern.captures(utterance)?;
        (rule.build)(&caps, ctx).map(|intent| (rule.name, intent))
    })
}

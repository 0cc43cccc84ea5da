// Built-in tool catalog
//
// Every operation the assistant can perform, with its mutating flag fixed
// here. Profiles pick subsets of this catalog.

use crate::errors::OrchestratorResult;
use crate::tools::registry::ToolRegistry;
use crate::tools::types::{Capability, ToolInputSchema, ToolSpec};

const ISSUE_VIEWER: (&str, &str) = ("show_jira_issue", "issue_id");
const PAGE_VIEWER: (&str, &str) = ("show_confluence_page", "page_id");

fn issue_key_schema() -> ToolInputSchema {
    ToolInputSchema::simple(vec![("issue_id", "Jira issue key, e.g. PROJ-123")])
}

fn page_id_schema() -> ToolInputSchema {
    ToolInputSchema::simple(vec![("page_id", "Confluence page id")])
}

/// Issue tracker operations
pub fn issue_tracker_specs() -> Vec<ToolSpec> {
    use Capability::IssueTracker as Cap;
    vec![
        ToolSpec::read_only(
            "get_jira_issue_details",
            Cap,
            "Retrieve summary, status, assignee and description of an issue",
            issue_key_schema(),
        ),
        ToolSpec::read_only("get_jira_comments", Cap, "Retrieve the comments of an issue", issue_key_schema()),
        ToolSpec::read_only("get_jira_subtasks", Cap, "List the subtasks of an issue", issue_key_schema()),
        ToolSpec::read_only(
            "get_jira_transitions",
            Cap,
            "List the workflow transitions available for an issue",
            issue_key_schema(),
        ),
        ToolSpec::read_only("get_jira_issue_links", Cap, "List the links of an issue", issue_key_schema()),
        ToolSpec::read_only("show_jira_issue", Cap, "Open an issue in the viewer", issue_key_schema()),
        ToolSpec::mutating(
            "update_jira_issue",
            Cap,
            "Update summary, description or assignee of an issue",
            issue_key_schema()
                .optional("summary", "string", "New summary")
                .optional("description", "string", "New description (wiki markup)")
                .optional("assignee_account_id", "string", "Atlassian account id of the new assignee"),
        )
        .with_viewer(ISSUE_VIEWER.0, ISSUE_VIEWER.1),
        ToolSpec::mutating(
            "add_jira_comment",
            Cap,
            "Add a comment to an issue",
            ToolInputSchema::simple(vec![
                ("issue_id", "Jira issue key"),
                ("body", "Comment text"),
            ]),
        )
        .with_viewer(ISSUE_VIEWER.0, ISSUE_VIEWER.1),
        ToolSpec::mutating(
            "transition_jira_issue",
            Cap,
            "Execute a workflow transition on an issue",
            ToolInputSchema::simple(vec![
                ("issue_id", "Jira issue key"),
                ("transition", "Transition id or name, e.g. 'In Progress'"),
            ]),
        )
        .with_viewer(ISSUE_VIEWER.0, ISSUE_VIEWER.1),
        ToolSpec::mutating(
            "create_jira_issue",
            Cap,
            "Create a new issue in a project",
            ToolInputSchema::simple(vec![
                ("project_key", "Project key, e.g. PROJ"),
                ("summary", "Issue summary"),
            ])
            .optional("description", "string", "Description (wiki markup)")
            .optional("issue_type", "string", "Issue type name (default Story)"),
        )
        .with_viewer(ISSUE_VIEWER.0, ISSUE_VIEWER.1),
        ToolSpec::mutating(
            "create_jira_subtask",
            Cap,
            "Create a subtask below an issue",
            ToolInputSchema::simple(vec![
                ("parent_issue_id", "Parent issue key"),
                ("summary", "Subtask summary"),
            ])
            .optional("description", "string", "Description (wiki markup)"),
        )
        .with_viewer(ISSUE_VIEWER.0, ISSUE_VIEWER.1),
        ToolSpec::mutating("delete_jira_issue", Cap, "Delete an issue", issue_key_schema()),
    ]
}

/// Document space operations
pub fn document_space_specs() -> Vec<ToolSpec> {
    use Capability::DocumentSpace as Cap;
    vec![
        ToolSpec::read_only("get_confluence_page", Cap, "Retrieve a page by id", page_id_schema()),
        ToolSpec::read_only(
            "get_confluence_child_pages",
            Cap,
            "List the child pages of a page",
            page_id_schema(),
        ),
        ToolSpec::read_only(
            "search_confluence_pages",
            Cap,
            "Search pages with a CQL query",
            ToolInputSchema::simple(vec![("cql", "CQL query, e.g. text ~ \"login\"")])
                .optional("limit", "integer", "Maximum number of results (default 10)"),
        ),
        ToolSpec::read_only("show_confluence_page", Cap, "Open a page in the viewer", page_id_schema()),
        ToolSpec::mutating(
            "create_confluence_page",
            Cap,
            "Create a page in a space",
            ToolInputSchema::simple(vec![
                ("space_key", "Space key"),
                ("title", "Page title"),
                ("body", "Page content (wiki markup)"),
            ])
            .optional("parent_id", "string", "Parent page id"),
        )
        .with_viewer(PAGE_VIEWER.0, PAGE_VIEWER.1),
        ToolSpec::mutating(
            "update_confluence_page",
            Cap,
            "Update title, content or parent of a page",
            page_id_schema()
                .optional("title", "string", "New title")
                .optional("body", "string", "New content (wiki markup)")
                .optional("parent_id", "string", "New parent page id")
                .optional("version_comment", "string", "Comment for the new version"),
        )
        .with_viewer(PAGE_VIEWER.0, PAGE_VIEWER.1),
        ToolSpec::mutating("delete_confluence_page", Cap, "Delete a page", page_id_schema()),
    ]
}

fn store_specs(singular: &str, plural: &str, id_param: &str) -> Vec<ToolSpec> {
    use Capability::RequirementStore as Cap;
    let text_schema = || {
        ToolInputSchema::simple(vec![("text", "Full text of the record")])
            .optional("metadata", "object", "Metadata object, e.g. {\"source_jira_ticket\": \"PROJ-1\"}")
    };
    vec![
        ToolSpec::mutating(
            &format!("add_{}", singular),
            Cap,
            &format!("Store a new {} with a generated id", singular.replace('_', " ")),
            text_schema(),
        ),
        ToolSpec::mutating(
            &format!("update_{}", singular),
            Cap,
            &format!("Update text or metadata of a stored {}", singular.replace('_', " ")),
            ToolInputSchema::simple(vec![(id_param, "Record id")])
                .optional("text", "string", "New text")
                .optional("metadata", "object", "Metadata to merge"),
        ),
        ToolSpec::mutating(
            &format!("delete_{}", singular),
            Cap,
            &format!("Delete a stored {}", singular.replace('_', " ")),
            ToolInputSchema::simple(vec![(id_param, "Record id")]),
        ),
        ToolSpec::read_only(
            &format!("retrieve_similar_{}", plural),
            Cap,
            &format!("Find stored {} similar to a query", plural.replace('_', " ")),
            ToolInputSchema::simple(vec![("query", "Query text")])
                .optional("n_results", "integer", "Maximum number of results (default 3)")
                .optional("filter", "object", "Exact metadata matches"),
        ),
        ToolSpec::read_only(
            &format!("get_all_{}", plural),
            Cap,
            &format!("List all stored {}", plural.replace('_', " ")),
            ToolInputSchema::simple(vec![]),
        ),
    ]
}

/// Requirement store operations (requirements, acceptance criteria, test cases)
pub fn requirement_store_specs() -> Vec<ToolSpec> {
    let mut specs = store_specs("requirement", "requirements", "requirement_id");
    specs.extend(store_specs("acceptance_criterion", "acceptance_criteria", "criterion_id"));
    specs.extend(store_specs("test_case", "test_cases", "test_case_id"));
    specs
}

/// Requirement graph operations
pub fn requirement_graph_specs() -> Vec<ToolSpec> {
    use Capability::RequirementGraph as Cap;
    vec![
        ToolSpec::mutating(
            "add_or_update_requirement_node",
            Cap,
            "Add a requirement node or update the existing node with that id",
            ToolInputSchema::simple(vec![
                ("requirement_id", "Requirement id, e.g. REQ-12"),
                ("text", "Requirement text"),
            ])
            .optional("properties", "object", "Additional node properties"),
        ),
        ToolSpec::mutating(
            "add_requirement_relationship",
            Cap,
            "Add a typed relationship between two requirement nodes",
            ToolInputSchema::simple(vec![
                ("start_id", "Requirement id the relationship starts at"),
                ("end_id", "Requirement id the relationship points to"),
                ("relationship_type", "UPPER_SNAKE_CASE type, e.g. DEPENDS_ON"),
            ]),
        ),
        ToolSpec::read_only(
            "get_requirement_relationships",
            Cap,
            "List the relationships of a requirement node",
            ToolInputSchema::simple(vec![("requirement_id", "Requirement id")]),
        ),
    ]
}

/// Web search and clock
pub fn utility_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::read_only(
            "perform_google_search",
            Capability::WebSearch,
            "Search the web and return the top results",
            ToolInputSchema::simple(vec![("query", "Search query")]),
        ),
        ToolSpec::read_only(
            "get_current_time",
            Capability::Clock,
            "Current date and time",
            ToolInputSchema::simple(vec![]),
        ),
    ]
}

/// Tool catalog introspection and role profile changes
pub fn tool_catalog_specs() -> Vec<ToolSpec> {
    use Capability::ToolCatalog as Cap;
    let tool_name = || ToolInputSchema::simple(vec![("tool_name", "Name of a catalog tool")]);
    vec![
        ToolSpec::read_only(
            "get_tool_description",
            Cap,
            "Show the description and kind of a tool",
            tool_name(),
        ),
        ToolSpec::mutating(
            "update_tool_description",
            Cap,
            "Replace the description of a tool",
            ToolInputSchema::simple(vec![
                ("tool_name", "Name of a catalog tool"),
                ("description", "New description"),
            ]),
        ),
        ToolSpec::read_only(
            "list_available_tools",
            Cap,
            "List the tools enabled for the active role and those that could be enabled",
            ToolInputSchema::simple(vec![]),
        ),
        ToolSpec::mutating(
            "set_tool_availability",
            Cap,
            "Enable or disable a catalog tool for the active role",
            tool_name().with_required("enable", "boolean", "true to enable, false to disable"),
        ),
    ]
}

/// Every built-in tool spec
pub fn builtin_specs() -> Vec<ToolSpec> {
    let mut specs = issue_tracker_specs();
    specs.extend(document_space_specs());
    specs.extend(requirement_store_specs());
    specs.extend(requirement_graph_specs());
    specs.extend(utility_specs());
    specs.extend(tool_catalog_specs());
    specs
}

/// Registry pre-populated with the full catalog
pub fn builtin_registry() -> OrchestratorResult<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for spec in builtin_specs() {
        registry.register(spec)?;
    }
    Ok(registry)
}

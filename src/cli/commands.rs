// Slash command handling

use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Tools,
    Protocol,
    Pending,
    /// Attribute a statement against the records consulted so far
    Verify(String),
    /// Enabled and enable-able tools of the active profile
    Available,
    Enable(String),
    Disable(String),
}

impl Command {
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();

        match trimmed {
            "/help" => return Some(Command::Help),
            "/quit" | "/exit" => return Some(Command::Quit),
            "/tools" => return Some(Command::Tools),
            "/protocol" | "/history" => return Some(Command::Protocol),
            "/pending" => return Some(Command::Pending),
            "/available" => return Some(Command::Available),
            _ => {}
        }

        let (name, rest) = trimmed.split_once(char::is_whitespace)?;
        let rest = rest.trim();
        if rest.is_empty() {
            return None;
        }
        match name {
            "/verify" => Some(Command::Verify(rest.to_string())),
            "/enable" => Some(Command::Enable(rest.to_lowercase())),
            "/disable" => Some(Command::Disable(rest.to_lowercase())),
            _ => None,
        }
    }
}

/// Text output of a command (Quit is handled by the REPL)
pub async fn handle_command(command: &Command, orchestrator: &mut Orchestrator) -> String {
    match command {
        Command::Help => help_text(),
        Command::Quit => String::new(),
        Command::Tools => tool_listing(orchestrator),
        Command::Protocol => orchestrator.session().protocol(),
        Command::Pending => match orchestrator.pending() {
            Some(pending) => {
                let mut text = format!(
                    "Awaiting confirmation since {}:\n{}",
                    pending.created_at.format("%H:%M:%S"),
                    pending.preview_text
                );
                if orchestrator.queued_calls() > 0 {
                    text.push_str(&format!("\n({} more change(s) queued)", orchestrator.queued_calls()));
                }
                text
            }
            None => "Nothing is waiting for confirmation.".to_string(),
        },
        Command::Verify(statement) => {
            let attributed = orchestrator.attribute(statement);
            let mut text = attributed.render();
            if attributed.has_gaps() {
                text.push_str(&format!("\n({} unsupported clause(s))", attributed.gaps.len()));
            }
            text
        }
        Command::Available => {
            let (enabled, available) = orchestrator.tool_availability().await;
            let mut lines = vec![format!("Enabled for '{}' ({}):", orchestrator.profile(), enabled.len())];
            lines.extend(enabled.iter().map(|t| format!("  {}", t)));
            lines.push(format!("Available to enable ({}):", available.len()));
            lines.extend(available.iter().map(|t| format!("  {}", t)));
            lines.join("\n")
        }
        Command::Enable(tool) | Command::Disable(tool) => {
            let enable = matches!(command, Command::Enable(_));
            match orchestrator.set_tool_availability(tool, enable).await {
                Ok(change) => change.describe(tool, orchestrator.profile()),
                Err(e) => format!("Cannot change '{}': {}", tool, e),
            }
        }
    }
}

/// Enabled tools grouped by kind
pub fn tool_listing(orchestrator: &Orchestrator) -> String {
    let specs = orchestrator.registry().specs();
    let mut lines = vec![format!(
        "Tools for profile '{}' ({}):",
        orchestrator.profile(),
        specs.len()
    )];
    for mutating in [false, true] {
        lines.push(if mutating {
            "  Mutating (ask for confirmation):".to_string()
        } else {
            "  Read-only:".to_string()
        });
        for spec in specs.iter().filter(|s| s.mutating == mutating) {
            lines.push(format!("    {:<40} {}", spec.name, spec.description));
        }
    }
    lines.join("\n")
}

fn help_text() -> String {
    [
        "Commands:",
        "  /help             Show this help",
        "  /tools            List tools enabled for the active profile",
        "  /protocol         Show the session protocol",
        "  /pending          Show the change awaiting confirmation",
        "  /verify <text>    Check which sources support a statement",
        "  /available        List enabled tools and tools that can be enabled",
        "  /enable <tool>    Enable a catalog tool for the active profile",
        "  /disable <tool>   Disable a tool for the active profile",
        "  /exit             End the session (pending changes are discarded)",
        "",
        "Changes to Jira, Confluence or the requirement store are previewed",
        "and only run after you answer yes.",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::implementations::RequirementStore;
    use std::sync::Arc;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("/help"), Some(Command::Help));
        assert_eq!(Command::parse(" /exit "), Some(Command::Quit));
        assert_eq!(Command::parse("/history"), Some(Command::Protocol));
        assert_eq!(Command::parse("/tools"), Some(Command::Tools));
        assert_eq!(Command::parse("show PROJ-1"), None);
    }

    #[test]
    fn test_parse_verify() {
        assert_eq!(
            Command::parse("/verify PROJ-1 is done"),
            Some(Command::Verify("PROJ-1 is done".to_string()))
        );
        assert_eq!(Command::parse("/verify   "), None);
    }

    #[test]
    fn test_tool_listing_splits_kinds() {
        let orchestrator = Orchestrator::builder().unwrap().build();
        let listing = tool_listing(&orchestrator);
        assert!(listing.starts_with("Tools for profile 'requirements-engineer'"));
        let mutating_at = listing.find("Mutating").unwrap();
        assert!(listing.find("get_confluence_page").unwrap() < mutating_at);
        assert!(listing.find("create_confluence_page").unwrap() > mutating_at);
    }

    #[test]
    fn test_parse_profile_commands() {
        assert_eq!(Command::parse("/available"), Some(Command::Available));
        assert_eq!(
            Command::parse("/enable Add_Jira_Comment"),
            Some(Command::Enable("add_jira_comment".to_string()))
        );
        assert_eq!(
            Command::parse("/disable  get_jira_comments "),
            Some(Command::Disable("get_jira_comments".to_string()))
        );
        assert_eq!(Command::parse("/enable"), None);
        assert_eq!(Command::parse("/frobnicate x"), None);
    }

    #[tokio::test]
    async fn test_pending_without_proposal() {
        let mut orchestrator = Orchestrator::builder().unwrap().build();
        assert_eq!(
            handle_command(&Command::Pending, &mut orchestrator).await,
            "Nothing is waiting for confirmation."
        );
    }

    #[tokio::test]
    async fn test_verify_contradicted_statement() {
        let mut orchestrator = Orchestrator::builder()
            .unwrap()
            .collaborator(Arc::new(RequirementStore::in_memory()))
            .build();
        orchestrator.handle("add requirement: 'Users can export reports as CSV'").await;
        orchestrator.handle("yes").await;
        orchestrator.handle("list all requirements").await;

        let supported = handle_command(
            &Command::Verify("REQ-1: Users can export reports as CSV".to_string()),
            &mut orchestrator,
        )
        .await;
        assert_eq!(supported, "REQ-1: Users can export reports as CSV [REQ-1]");

        let contradicted = handle_command(
            &Command::Verify("REQ-1 was deleted by the CEO yesterday".to_string()),
            &mut orchestrator,
        )
        .await;
        assert_eq!(
            contradicted,
            "[unverified] REQ-1 was deleted by the CEO yesterday\n(1 unsupported clause(s))"
        );
    }

    #[tokio::test]
    async fn test_disable_and_enable_reach_planner() {
        let mut orchestrator = Orchestrator::builder().unwrap().build();

        let text = handle_command(&Command::Disable("get_current_time".to_string()), &mut orchestrator).await;
        assert_eq!(text, "Tool 'get_current_time' disabled for requirements-engineer.");
        assert!(!orchestrator.registry().has_tool("get_current_time"));
        let response = orchestrator.handle("what time is it").await;
        assert_eq!(
            response.text,
            "'get_current_time' is not available for the requirements-engineer profile."
        );

        let available = handle_command(&Command::Available, &mut orchestrator).await;
        let (enabled_part, available_part) = available.split_once("Available to enable").unwrap();
        assert!(!enabled_part.contains("get_current_time"));
        assert!(available_part.contains("  get_current_time"));

        let text = handle_command(&Command::Enable("get_current_time".to_string()), &mut orchestrator).await;
        assert_eq!(text, "Tool 'get_current_time' enabled for requirements-engineer.");
        assert!(orchestrator.registry().has_tool("get_current_time"));

        let unknown = handle_command(&Command::Enable("format_disk".to_string()), &mut orchestrator).await;
        assert_eq!(unknown, "Cannot change 'format_disk': unknown tool 'format_disk'");
    }
}

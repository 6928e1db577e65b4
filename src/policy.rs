//! Per-call policy decisions.
//!
//! The orchestrator consults the policy engine before every tool execution.
//! Rules are ordered; the first rule whose tool name matches wins, and an
//! unmatched tool defaults to *confirm*.

use crate::config::AgentMode;
use crate::session::AgentSession;
use crate::tools::ArgMap;

/// What the orchestrator should do with one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Execute immediately.
    Allow,
    /// Pause for user confirmation.
    Confirm,
    /// Refuse.
    Deny,
}

/// Command substrings that escalate `run_command` gating. Kept as data so
/// the set stays testable and tunable.
pub const DANGEROUS_COMMAND_PATTERNS: &[&str] = &[
    "rm -rf",
    "rm /",
    "mkfs",
    "dd if=",
    ":(){:|:&};:",
    "chmod 777",
    "chown ",
    "curl ",
    "wget ",
    "> /dev/",
];

/// One ordered rule: a tool name plus a predicate over session and arguments.
pub struct PolicyRule {
    /// Rule name, for diagnostics.
    pub name: &'static str,
    /// Tool this rule applies to.
    pub tool_name: &'static str,
    /// Decision function.
    pub decide: fn(&AgentSession, &ArgMap) -> PolicyDecision,
}

/// Ordered first-match policy table.
pub struct PolicyEngine {
    rules: Vec<PolicyRule>,
}

impl PolicyEngine {
    /// Engine with the default rule set: reads are allowed, writes and
    /// commands confirm, dangerous commands deny in safe mode.
    pub fn new() -> Self {
        Self {
            rules: vec![
                PolicyRule {
                    name: "read_file_default",
                    tool_name: "read_file",
                    decide: |_, _| PolicyDecision::Allow,
                },
                PolicyRule {
                    name: "list_dir_default",
                    tool_name: "list_dir",
                    decide: |_, _| PolicyDecision::Allow,
                },
                PolicyRule {
                    name: "search_in_files_default",
                    tool_name: "search_in_files",
                    decide: |_, _| PolicyDecision::Allow,
                },
                PolicyRule {
                    name: "get_command_output_default",
                    tool_name: "get_command_output",
                    decide: |_, _| PolicyDecision::Allow,
                },
                PolicyRule {
                    name: "cancel_command_default",
                    tool_name: "cancel_command",
                    decide: |_, _| PolicyDecision::Allow,
                },
                PolicyRule {
                    name: "apply_patch_default",
                    tool_name: "apply_patch",
                    decide: |_, _| PolicyDecision::Confirm,
                },
                PolicyRule {
                    name: "run_command_default",
                    tool_name: "run_command",
                    decide: |session, args| {
                        let Some(cmd) = args.get("cmd").and_then(|v| v.as_str()) else {
                            return PolicyDecision::Deny;
                        };
                        if is_dangerous_command(cmd) && session.mode() == AgentMode::Safe {
                            return PolicyDecision::Deny;
                        }
                        PolicyDecision::Confirm
                    },
                },
            ],
        }
    }

    /// Append a custom rule. Earlier rules still win on name collision.
    pub fn add_rule(&mut self, rule: PolicyRule) {
        self.rules.push(rule);
    }

    /// Decide what to do with one tool call.
    pub fn decide(&self, tool_name: &str, session: &AgentSession, args: &ArgMap) -> PolicyDecision {
        for rule in &self.rules {
            if rule.tool_name == tool_name {
                return (rule.decide)(session, args);
            }
        }
        PolicyDecision::Confirm
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Substring scan of the lowercased command against the dangerous set.
pub fn is_dangerous_command(cmd: &str) -> bool {
    let lowered = cmd.to_lowercase();
    DANGEROUS_COMMAND_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Short human sentence describing a tool call, used in approval events.
pub fn summarize_call(tool_name: &str, args: &ArgMap) -> String {
    let str_arg = |key: &str| args.get(key).and_then(|v| v.as_str()).unwrap_or_default();
    match tool_name {
        "read_file" => format!("Read file: {}", str_arg("path")),
        "list_dir" => {
            let path = str_arg("path");
            if path.is_empty() || path == "." {
                "List directory contents".to_string()
            } else {
                format!("List directory: {path}")
            }
        }
        "search_in_files" => format!("Search for: {}", str_arg("query")),
        "apply_patch" => "Apply code changes".to_string(),
        "run_command" => format!("Run command: {}", truncate_chars(str_arg("cmd"), 50)),
        other => format!("Tool: {other}"),
    }
}

/// Char-safe prefix truncation with an ellipsis marker.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

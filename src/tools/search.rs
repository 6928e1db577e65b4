//! Literal substring search across the project tree.

use super::{codes, ArgMap, Tool, ToolContext, ToolPolicy, ToolResult};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use walkdir::WalkDir;

/// Preview window width in bytes around a match.
const PREVIEW_WIDTH: usize = 200;
/// Default result cap when the caller does not pass one.
const DEFAULT_MAX_RESULTS: usize = 50;

/// Tool that searches file contents for a case-insensitive literal query.
pub struct SearchInFilesTool;

#[derive(Default, Deserialize)]
#[serde(default)]
struct Args {
    query: String,
    globs: Vec<String>,
    max_results: Option<usize>,
}

/// One match location with a preview window centered on the hit.
#[derive(Debug, Serialize)]
struct SearchMatch {
    path: String,
    line: usize,
    col: usize,
    preview: String,
}

#[async_trait]
impl Tool for SearchInFilesTool {
    fn name(&self) -> &'static str {
        "search_in_files"
    }

    fn description(&self) -> &'static str {
        "Search for text patterns in files with optional glob filtering"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "globs": { "type": "array", "items": { "type": "string" } },
                "max_results": { "type": "integer", "default": 50, "minimum": 1, "maximum": 200 }
            },
            "required": ["query"]
        })
    }

    fn policy_hint(&self) -> ToolPolicy {
        ToolPolicy::Allow
    }

    async fn execute(&self, args: &ArgMap, ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(Value::Object(args.clone())) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(codes::VALIDATION_ERROR, e.to_string()),
        };
        if args.query.is_empty() {
            return ToolResult::error(codes::VALIDATION_ERROR, "query is required");
        }
        let max_results = args
            .max_results
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .min(ctx.limits.max_search_results)
            .max(1);

        // Case-insensitive literal: the query is escaped, never interpreted.
        let pattern = match Regex::new(&format!("(?i){}", regex::escape(&args.query))) {
            Ok(pattern) => pattern,
            Err(e) => return ToolResult::error(codes::VALIDATION_ERROR, e.to_string()),
        };

        let globs: Vec<glob::Pattern> = args
            .globs
            .iter()
            .filter_map(|g| glob::Pattern::new(g).ok())
            .collect();

        let (matches, truncated) = search_tree(&ctx.project_root, &pattern, &globs, max_results);

        ToolResult::success(json!({
            "query": args.query,
            "matches": matches,
            "truncated": truncated,
        }))
    }
}

/// Walk the project tree collecting matches until the cap is reached.
fn search_tree(
    root: &Path,
    pattern: &Regex,
    globs: &[glob::Pattern],
    max_results: usize,
) -> (Vec<SearchMatch>, bool) {
    let mut matches = Vec::new();
    let mut truncated = false;

    for entry in WalkDir::new(root).sort_by_file_name().into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !globs.is_empty() && !matches_any_glob(path, globs) {
            continue;
        }

        let Ok(raw) = std::fs::read(path) else { continue };
        let content = String::from_utf8_lossy(&raw);
        let rel = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        for (line_idx, line) in content.lines().enumerate() {
            for found in pattern.find_iter(line) {
                if matches.len() >= max_results {
                    truncated = true;
                    return (matches, truncated);
                }
                matches.push(SearchMatch {
                    path: rel.clone(),
                    line: line_idx + 1,
                    col: found.start() + 1,
                    preview: preview_window(line, found.start()),
                });
            }
        }
    }

    // Exactly filling the cap also reports truncation.
    if matches.len() >= max_results {
        truncated = true;
    }
    (matches, truncated)
}

/// Shell-style patterns match against the basename or the full path.
fn matches_any_glob(path: &Path, globs: &[glob::Pattern]) -> bool {
    let full = path.to_string_lossy();
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    globs.iter().any(|g| g.matches(&base) || g.matches(&full))
}

/// A ≤ 200-byte window centered on the match, ellipsized when cut.
fn preview_window(line: &str, match_start: usize) -> String {
    if line.len() <= PREVIEW_WIDTH {
        return line.to_string();
    }
    let mut start = match_start.saturating_sub(PREVIEW_WIDTH / 2);
    while start > 0 && !line.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (start + PREVIEW_WIDTH).min(line.len());
    while end < line.len() && !line.is_char_boundary(end) {
        end += 1;
    }
    format!("...{}...", &line[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentMode, Limits};
    use crate::testsupport::TestTempDir;
    use crate::tools::CommandTable;
    use std::sync::Arc;
    use uuid::Uuid;

    fn context_for(fixture: &TestTempDir) -> ToolContext {
        ToolContext::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            fixture.path().to_path_buf(),
            AgentMode::Safe,
            Limits::default(),
            Arc::new(CommandTable::new()),
        )
    }

    fn args(value: Value) -> ArgMap {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn finds_case_insensitive_literal_matches() {
        let fixture = TestTempDir::new("search-basic");
        fixture.write("src/main.rs", "fn main() {\n    println!(\"MAIN\");\n}\n");
        let result = SearchInFilesTool
            .execute(&args(json!({"query": "main"})), &context_for(&fixture))
            .await;
        assert!(result.ok);
        let data = result.data.unwrap();
        let matches = data["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["path"], "src/main.rs");
        assert_eq!(matches[0]["line"], 1);
        assert_eq!(matches[0]["col"], 4);
        assert_eq!(data["truncated"], false);
    }

    // Verifies regex metacharacters in the query are treated literally.
    #[tokio::test]
    async fn query_is_literal_not_regex() {
        let fixture = TestTempDir::new("search-literal");
        fixture.write("a.txt", "price is $4.99 (sale)\nnothing here\n");
        let result = SearchInFilesTool
            .execute(&args(json!({"query": "$4.99 ("})), &context_for(&fixture))
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["matches"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_query_is_a_validation_error() {
        let fixture = TestTempDir::new("search-empty");
        let result = SearchInFilesTool
            .execute(&args(json!({"query": ""})), &context_for(&fixture))
            .await;
        assert_eq!(result.error.unwrap().code, codes::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn globs_filter_by_basename_or_path() {
        let fixture = TestTempDir::new("search-globs");
        fixture.write("src/lib.rs", "target phrase\n");
        fixture.write("docs/readme.md", "target phrase\n");
        let result = SearchInFilesTool
            .execute(
                &args(json!({"query": "target", "globs": ["*.rs"]})),
                &context_for(&fixture),
            )
            .await;
        let data = result.data.unwrap();
        let matches = data["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["path"], "src/lib.rs");
    }

    // Verifies hitting the cap exactly still reports truncated=true.
    #[tokio::test]
    async fn reaching_the_cap_sets_truncated() {
        let fixture = TestTempDir::new("search-cap");
        fixture.write("many.txt", &"needle\n".repeat(10));
        let result = SearchInFilesTool
            .execute(
                &args(json!({"query": "needle", "max_results": 10})),
                &context_for(&fixture),
            )
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["matches"].as_array().unwrap().len(), 10);
        assert_eq!(data["truncated"], true);
    }

    #[tokio::test]
    async fn cap_is_bounded_by_session_limit() {
        let fixture = TestTempDir::new("search-limit");
        fixture.write("many.txt", &"needle\n".repeat(10));
        let mut ctx = context_for(&fixture);
        ctx.limits.max_search_results = 3;
        let result = SearchInFilesTool
            .execute(&args(json!({"query": "needle", "max_results": 50})), &ctx)
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["matches"].as_array().unwrap().len(), 3);
        assert_eq!(data["truncated"], true);
    }

    #[test]
    fn long_lines_get_centered_preview() {
        let line = format!("{}needle{}", "a".repeat(300), "b".repeat(300));
        let preview = preview_window(&line, 300);
        assert!(preview.starts_with("..."));
        assert!(preview.ends_with("..."));
        assert!(preview.contains("needle"));
        assert!(preview.len() <= PREVIEW_WIDTH + 6);
    }

    #[test]
    fn short_lines_preview_whole_line() {
        assert_eq!(preview_window("short needle line", 6), "short needle line");
    }
}

//! File reading tool with byte and line windows.

use super::{codes, guard_error_result, ArgMap, Tool, ToolContext, ToolPolicy, ToolResult};
use super::envelope::ResultMeta;
use crate::pathguard::PathGuard;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Default read window in bytes.
const DEFAULT_MAX_BYTES: usize = 65_536;
/// Hard ceiling for the read window.
const MAX_MAX_BYTES: usize = 262_144;

/// Tool that reads file contents, optionally windowed by line range.
pub struct ReadFileTool;

#[derive(Default, Deserialize)]
#[serde(default)]
struct Args {
    path: String,
    max_bytes: Option<usize>,
    start_line: Option<i64>,
    end_line: Option<i64>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read file contents with optional line range and size limits"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "max_bytes": { "type": "integer", "default": 65536, "minimum": 1, "maximum": 262144 },
                "start_line": { "type": "integer" },
                "end_line": { "type": "integer" }
            },
            "required": ["path"]
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
        if args.path.is_empty() {
            return ToolResult::error(codes::VALIDATION_ERROR, "path is required");
        }
        let max_bytes = args
            .max_bytes
            .unwrap_or(DEFAULT_MAX_BYTES)
            .clamp(1, MAX_MAX_BYTES);

        let guard = PathGuard::new(&ctx.project_root, ctx.limits.clone());
        let abs = match guard.resolve(&args.path) {
            Ok(abs) => abs,
            Err(err) => return guard_error_result(err),
        };
        if let Err(err) = guard.validate_file_access(&abs) {
            return guard_error_result(err);
        }

        let raw = match tokio::fs::read(&abs).await {
            Ok(raw) => raw,
            Err(e) => {
                return ToolResult::error(
                    codes::FILE_NOT_FOUND,
                    format!("file not found: {}: {e}", abs.display()),
                )
            }
        };
        let sha = sha_string(&raw);
        let full = String::from_utf8_lossy(&raw).into_owned();

        let windowed = args.start_line.is_some() || args.end_line.is_some();
        let (content, truncated, line_window) = if windowed {
            let (content, truncated, start, end) = slice_lines(
                &full,
                args.start_line.unwrap_or(0),
                args.end_line.unwrap_or(0),
                max_bytes,
            );
            (content, truncated, Some((start, end)))
        } else {
            let (content, truncated) = take_prefix_bytes(&full, max_bytes);
            (content, truncated, None)
        };

        let rel = abs
            .strip_prefix(&ctx.project_root)
            .unwrap_or(&abs)
            .to_string_lossy()
            .to_string();

        let mut data = json!({
            "path": rel,
            "sha": sha,
            "content": content,
            "truncated": truncated,
        });
        if let Some((start, end)) = line_window {
            data["line_start"] = json!(start);
            data["line_end"] = json!(end);
        }

        let sha_meta = data["sha"].as_str().map(ToString::to_string);
        ToolResult::success_with_meta(
            data,
            ResultMeta {
                duration_ms: 0,
                truncated,
                sha: sha_meta,
            },
        )
    }
}

/// Hex-encoded SHA-256 of the full file contents.
fn sha_string(raw: &[u8]) -> String {
    let digest = Sha256::digest(raw);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Take up to `max_bytes` of the content on a char boundary.
fn take_prefix_bytes(content: &str, max_bytes: usize) -> (String, bool) {
    if content.len() <= max_bytes {
        return (content.to_string(), false);
    }
    let mut cut = max_bytes;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    (content[..cut].to_string(), true)
}

/// Inclusive 1-based line slice, clamped to the file and the byte budget.
///
/// `start_line <= 0` is treated as 1; `end_line <= 0` or past EOF clamps to
/// the last line; `start_line > end_line` collapses to the single `end_line`.
fn slice_lines(content: &str, start_line: i64, end_line: i64, max_bytes: usize) -> (String, bool, usize, usize) {
    let lines: Vec<&str> = content.split('\n').collect();
    let total = lines.len();

    let mut start = if start_line <= 0 { 1 } else { start_line as usize };
    let mut end = if end_line <= 0 || end_line as usize > total {
        total
    } else {
        end_line as usize
    };
    if start > total {
        start = total;
    }
    if start > end {
        start = end;
    }

    let mut out = String::new();
    let mut byte_cut = false;
    for (i, line) in lines[start - 1..end].iter().enumerate() {
        if out.len() + line.len() > max_bytes && !out.is_empty() {
            byte_cut = true;
            end = start + i - 1;
            break;
        }
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line);
        if out.len() > max_bytes {
            byte_cut = true;
            let (cut, _) = take_prefix_bytes(&out, max_bytes);
            out = cut;
            end = start + i;
            break;
        }
    }

    let truncated = byte_cut || end < total;
    (out, truncated, start, end)
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
    async fn reads_whole_file_with_sha() {
        let fixture = TestTempDir::new("readfile-basic");
        fixture.write("hello.txt", "hi\n");
        let result = ReadFileTool
            .execute(&args(json!({"path": "hello.txt"})), &context_for(&fixture))
            .await;
        assert!(result.ok, "result: {result:?}");
        let data = result.data.unwrap();
        assert_eq!(data["content"], "hi\n");
        assert_eq!(data["truncated"], false);
        // SHA256("hi\n")
        assert_eq!(
            data["sha"],
            "98ea6e4f216f2fb4b69fff9b3a44842c38686ca685f3f55dc48c5d3fb1107be4"
        );
    }

    #[tokio::test]
    async fn missing_path_argument_is_a_validation_error() {
        let fixture = TestTempDir::new("readfile-nopath");
        let result = ReadFileTool
            .execute(&args(json!({})), &context_for(&fixture))
            .await;
        assert_eq!(result.error.unwrap().code, codes::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn missing_file_reports_not_found() {
        let fixture = TestTempDir::new("readfile-missing");
        let result = ReadFileTool
            .execute(&args(json!({"path": "ghost.txt"})), &context_for(&fixture))
            .await;
        assert_eq!(result.error.unwrap().code, codes::FILE_NOT_FOUND);
    }

    #[tokio::test]
    async fn escape_attempt_reports_invalid_path() {
        let fixture = TestTempDir::new("readfile-escape");
        let result = ReadFileTool
            .execute(&args(json!({"path": "../etc/passwd"})), &context_for(&fixture))
            .await;
        assert_eq!(result.error.unwrap().code, codes::INVALID_PATH);
    }

    #[tokio::test]
    async fn oversized_file_reports_size_limit() {
        let fixture = TestTempDir::new("readfile-toolarge");
        fixture.write("big.txt", &"x".repeat(128));
        let mut ctx = context_for(&fixture);
        ctx.limits.max_file_bytes = 64;
        let result = ReadFileTool
            .execute(&args(json!({"path": "big.txt"})), &ctx)
            .await;
        let error = result.error.unwrap();
        assert_eq!(error.code, codes::SIZE_LIMIT_EXCEEDED);
        assert_eq!(error.details.unwrap()["max_size"], 64);
    }

    #[tokio::test]
    async fn byte_window_truncates_and_flags() {
        let fixture = TestTempDir::new("readfile-window");
        fixture.write("long.txt", &"abcdef".repeat(100));
        let result = ReadFileTool
            .execute(
                &args(json!({"path": "long.txt", "max_bytes": 12})),
                &context_for(&fixture),
            )
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["content"], "abcdefabcdef");
        assert_eq!(data["truncated"], true);
    }

    #[tokio::test]
    async fn line_window_returns_inclusive_slice() {
        let fixture = TestTempDir::new("readfile-lines");
        fixture.write("lines.txt", "one\ntwo\nthree\nfour\n");
        let result = ReadFileTool
            .execute(
                &args(json!({"path": "lines.txt", "start_line": 2, "end_line": 3})),
                &context_for(&fixture),
            )
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["content"], "two\nthree");
        assert_eq!(data["line_start"], 2);
        assert_eq!(data["line_end"], 3);
        assert_eq!(data["truncated"], true);
    }

    // Verifies the boundary clamps: start 0 → 1, end past EOF → EOF.
    #[tokio::test]
    async fn line_window_clamps_bounds() {
        let fixture = TestTempDir::new("readfile-clamp");
        fixture.write("lines.txt", "one\ntwo");
        let result = ReadFileTool
            .execute(
                &args(json!({"path": "lines.txt", "start_line": 0, "end_line": 99})),
                &context_for(&fixture),
            )
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["line_start"], 1);
        assert_eq!(data["line_end"], 2);
        assert_eq!(data["content"], "one\ntwo");
        assert_eq!(data["truncated"], false);
    }

    // Verifies an inverted range collapses to a single-line slice.
    #[tokio::test]
    async fn inverted_line_range_yields_single_line() {
        let fixture = TestTempDir::new("readfile-inverted");
        fixture.write("lines.txt", "one\ntwo\nthree");
        let result = ReadFileTool
            .execute(
                &args(json!({"path": "lines.txt", "start_line": 3, "end_line": 2})),
                &context_for(&fixture),
            )
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["content"], "two");
        assert_eq!(data["line_start"], 2);
        assert_eq!(data["line_end"], 2);
    }

    #[test]
    fn prefix_cut_lands_on_char_boundary() {
        let (cut, truncated) = take_prefix_bytes("héllo", 3);
        assert!(truncated);
        assert_eq!(cut, "hé");
    }
}

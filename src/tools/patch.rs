//! Unified-diff application tool.
//!
//! Parses one or more file-scoped diffs, applies hunks with context
//! verification, and either previews (dry run) or writes atomically. A hunk
//! that fails to match produces a reject entry for its file and never a
//! partial write.

use super::{codes, guard_error_result, ArgMap, Tool, ToolContext, ToolPolicy, ToolResult};
use crate::pathguard::PathGuard;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Tool that creates or modifies files from unified-diff text.
pub struct ApplyPatchTool;

#[derive(Deserialize)]
#[serde(default)]
struct Args {
    patch: String,
    dry_run: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            patch: String::new(),
            dry_run: true,
        }
    }
}

/// Per-file outcome of a successful application.
#[derive(Debug, Serialize)]
struct AppliedChange {
    path: String,
    sha_before: String,
    sha_after: String,
    /// Patched content, present on dry runs so callers can preview.
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    /// The normalized diff block for this file, present on dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    diff: Option<String>,
}

/// Per-file failure record. The original hunk text travels with the reject
/// so the model can correct and retry.
#[derive(Debug, Serialize)]
struct Reject {
    path: String,
    reason: String,
    hunk: String,
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &'static str {
        "apply_patch"
    }

    fn description(&self) -> &'static str {
        "Apply a unified diff patch to create or modify files"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patch": { "type": "string" },
                "dry_run": { "type": "boolean", "default": true }
            },
            "required": ["patch"]
        })
    }

    fn policy_hint(&self) -> ToolPolicy {
        ToolPolicy::Confirm
    }

    async fn execute(&self, args: &ArgMap, ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(Value::Object(args.clone())) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(codes::VALIDATION_ERROR, e.to_string()),
        };
        if args.patch.is_empty() {
            return ToolResult::error(codes::VALIDATION_ERROR, "patch is required");
        }

        let patches = match parse_patch(&args.patch) {
            Ok(patches) => patches,
            Err(reason) => {
                return ToolResult::error_with_details(
                    codes::VALIDATION_ERROR,
                    "invalid patch format",
                    Some(json!(reason)),
                )
            }
        };

        if patches.len() > ctx.limits.max_patch_files {
            return ToolResult::error_with_details(
                codes::SIZE_LIMIT_EXCEEDED,
                "too many files in patch",
                Some(json!({
                    "files": patches.len(),
                    "max": ctx.limits.max_patch_files,
                })),
            );
        }

        let guard = PathGuard::new(&ctx.project_root, ctx.limits.clone());
        let mut applied = Vec::new();
        let mut rejects = Vec::new();
        let mut hunks_applied = 0usize;

        for patch in &patches {
            let abs = match guard.resolve(&patch.file) {
                Ok(abs) => abs,
                Err(err) => {
                    rejects.push(Reject {
                        path: patch.file.clone(),
                        reason: guard_error_result(err)
                            .error
                            .map(|e| e.message)
                            .unwrap_or_default(),
                        hunk: patch.original.clone(),
                    });
                    continue;
                }
            };

            let disk = match std::fs::read(&abs) {
                Ok(raw) => Some(String::from_utf8_lossy(&raw).into_owned()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    rejects.push(Reject {
                        path: patch.file.clone(),
                        reason: format!("cannot read file: {e}"),
                        hunk: patch.original.clone(),
                    });
                    continue;
                }
            };

            // `--- /dev/null` declares an empty base even when the target
            // exists: the file is overwritten with the hunk content.
            let base = if patch.old_is_dev_null {
                String::new()
            } else {
                disk.clone().unwrap_or_default()
            };
            let sha_before = sha_hex(disk.as_deref().unwrap_or(""));

            let patched = match apply_hunks(&base, &patch.hunks) {
                Ok(patched) => patched,
                Err(reason) => {
                    rejects.push(Reject {
                        path: patch.file.clone(),
                        reason,
                        hunk: patch.original.clone(),
                    });
                    continue;
                }
            };
            let sha_after = sha_hex(&patched);
            hunks_applied += patch.hunks.len();

            if args.dry_run {
                applied.push(AppliedChange {
                    path: patch.file.clone(),
                    sha_before,
                    sha_after,
                    content: Some(patched),
                    diff: Some(patch.original.clone()),
                });
                continue;
            }

            if let Err(e) = write_atomic(&abs, &patched) {
                rejects.push(Reject {
                    path: patch.file.clone(),
                    reason: e.to_string(),
                    hunk: patch.original.clone(),
                });
                continue;
            }
            applied.push(AppliedChange {
                path: patch.file.clone(),
                sha_before,
                sha_after,
                content: None,
                diff: None,
            });
        }

        let mut data = json!({ "applied": applied, "rejects": rejects });
        if args.dry_run {
            data["preview_summary"] = json!(format!(
                "Would modify {} files, {} hunks",
                data["applied"].as_array().map(Vec::len).unwrap_or(0),
                hunks_applied
            ));
        }
        ToolResult::success(data)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// One file-scoped diff.
#[derive(Debug)]
struct FilePatch {
    /// Target path from the `+++` header, `b/` prefix stripped.
    file: String,
    /// True when the old-side header is `/dev/null`.
    old_is_dev_null: bool,
    /// The raw diff block for this file, used in rejects and previews.
    original: String,
    hunks: Vec<Hunk>,
}

#[derive(Debug)]
struct Hunk {
    orig_start: usize,
    lines: Vec<String>,
}

/// Split unified-diff text into per-file patches.
fn parse_patch(text: &str) -> Result<Vec<FilePatch>, String> {
    let mut patches: Vec<FilePatch> = Vec::new();
    let mut current: Option<FilePatch> = None;

    for line in text.lines() {
        if let Some(old_target) = line.strip_prefix("--- ") {
            if let Some(done) = current.take() {
                patches.push(done);
            }
            current = Some(FilePatch {
                file: String::new(),
                old_is_dev_null: old_target.trim() == "/dev/null",
                original: format!("{line}\n"),
                hunks: Vec::new(),
            });
            continue;
        }

        let Some(patch) = current.as_mut() else {
            // Preamble before the first file header is ignored.
            continue;
        };
        patch.original.push_str(line);
        patch.original.push('\n');

        if let Some(new_target) = line.strip_prefix("+++ ") {
            let file = new_target.trim();
            patch.file = file.strip_prefix("b/").unwrap_or(file).to_string();
            continue;
        }

        if line.starts_with("@@") {
            let (orig_start, _orig_count) = parse_hunk_header(line)
                .ok_or_else(|| format!("malformed hunk header: {line}"))?;
            patch.hunks.push(Hunk {
                orig_start,
                lines: Vec::new(),
            });
            continue;
        }

        if let Some(hunk) = patch.hunks.last_mut() {
            hunk.lines.push(line.to_string());
        }
    }

    if let Some(done) = current.take() {
        patches.push(done);
    }

    if patches.is_empty() {
        return Err("no file headers found".to_string());
    }
    for patch in &patches {
        if patch.file.is_empty() || patch.file == "/dev/null" {
            return Err("missing +++ target header".to_string());
        }
        if patch.hunks.is_empty() {
            return Err(format!("no hunks for file {}", patch.file));
        }
    }
    Ok(patches)
}

/// Parse `@@ -a[,b] +c[,d] @@`, returning the old-side start and count.
fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let rest = line.strip_prefix("@@ -")?;
    let end = rest.find(" +")?;
    let old_side = &rest[..end];
    let mut parts = old_side.splitn(2, ',');
    let start: usize = parts.next()?.trim().parse().ok()?;
    let count: usize = match parts.next() {
        Some(count) => count.trim().parse().ok()?,
        None => 1,
    };
    Some((start, count))
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Apply hunks in order over the base content.
///
/// Deletion and context lines are verified against the base; any mismatch
/// fails the whole file so callers record a reject instead of a bad write.
fn apply_hunks(base: &str, hunks: &[Hunk]) -> Result<String, String> {
    let lines: Vec<&str> = base.split('\n').collect();
    let mut result: Vec<String> = Vec::new();
    let mut cursor = 0usize;

    for hunk in hunks {
        let target = hunk.orig_start.saturating_sub(1);
        if target > lines.len() {
            return Err(format!(
                "hunk start {} is beyond end of file ({} lines)",
                hunk.orig_start,
                lines.len()
            ));
        }
        while cursor < target {
            result.push(lines[cursor].to_string());
            cursor += 1;
        }

        for hunk_line in &hunk.lines {
            if let Some(deleted) = hunk_line.strip_prefix('-') {
                if cursor >= lines.len() || lines[cursor] != deleted {
                    return Err(mismatch_reason(deleted, lines.get(cursor), cursor));
                }
                cursor += 1;
            } else if let Some(added) = hunk_line.strip_prefix('+') {
                result.push(added.to_string());
            } else if hunk_line.starts_with('\\') {
                // "\ No newline at end of file" markers carry no content.
            } else {
                let context = hunk_line.strip_prefix(' ').unwrap_or(hunk_line);
                if cursor >= lines.len() || lines[cursor] != context {
                    return Err(mismatch_reason(context, lines.get(cursor), cursor));
                }
                result.push(lines[cursor].to_string());
                cursor += 1;
            }
        }
    }

    while cursor < lines.len() {
        result.push(lines[cursor].to_string());
        cursor += 1;
    }

    Ok(result.join("\n"))
}

fn mismatch_reason(expected: &str, actual: Option<&&str>, cursor: usize) -> String {
    match actual {
        Some(actual) => format!(
            "hunk does not match at line {}: expected {expected:?}, found {actual:?}",
            cursor + 1
        ),
        None => format!("hunk does not match: expected {expected:?} past end of file"),
    }
}

/// Write through a temp file in the same directory, then rename into place.
fn write_atomic(path: &std::path::Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".webforge-patch-{}", Uuid::new_v4()));
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

/// Hex-encoded SHA-256.
fn sha_hex(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentMode, Limits};
    use crate::testsupport::TestTempDir;
    use crate::tools::CommandTable;
    use std::sync::Arc;
    use uuid::Uuid;

    const NEW_FILE_PATCH: &str = "--- /dev/null\n+++ new.txt\n@@ -0,0 +1,1 @@\n+hi\n";

    fn context_for(fixture: &TestTempDir) -> ToolContext {
        ToolContext::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            fixture.path().to_path_buf(),
            AgentMode::Write,
            Limits::default(),
            Arc::new(CommandTable::new()),
        )
    }

    fn args(value: Value) -> ArgMap {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn missing_patch_is_a_validation_error() {
        let fixture = TestTempDir::new("patch-nopatch");
        let result = ApplyPatchTool
            .execute(&args(json!({})), &context_for(&fixture))
            .await;
        assert_eq!(result.error.unwrap().code, codes::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn creates_new_file_with_shas() {
        let fixture = TestTempDir::new("patch-create");
        let result = ApplyPatchTool
            .execute(
                &args(json!({"patch": NEW_FILE_PATCH, "dry_run": false})),
                &context_for(&fixture),
            )
            .await;
        assert!(result.ok, "result: {result:?}");
        let data = result.data.unwrap();
        let applied = &data["applied"][0];
        assert_eq!(applied["path"], "new.txt");
        // SHA256("") and SHA256("hi\n")
        assert_eq!(
            applied["sha_before"],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            applied["sha_after"],
            "98ea6e4f216f2fb4b69fff9b3a44842c38686ca685f3f55dc48c5d3fb1107be4"
        );
        let written = std::fs::read_to_string(fixture.path().join("new.txt")).unwrap();
        assert_eq!(written, "hi\n");
    }

    #[tokio::test]
    async fn dry_run_previews_without_writing() {
        let fixture = TestTempDir::new("patch-dryrun");
        let result = ApplyPatchTool
            .execute(&args(json!({"patch": NEW_FILE_PATCH})), &context_for(&fixture))
            .await;
        assert!(result.ok);
        let data = result.data.unwrap();
        assert_eq!(data["applied"][0]["content"], "hi\n");
        assert!(data["preview_summary"]
            .as_str()
            .unwrap()
            .contains("1 files"));
        assert!(!fixture.path().join("new.txt").exists());
    }

    // Verifies the §8 equivalence: dry-run preview content equals the file
    // content after a real apply.
    #[tokio::test]
    async fn dry_run_preview_matches_real_apply() {
        let fixture = TestTempDir::new("patch-equivalence");
        fixture.write("code.txt", "alpha\nbeta\ngamma\n");
        let patch =
            "--- a/code.txt\n+++ b/code.txt\n@@ -1,3 +1,3 @@\n alpha\n-beta\n+BETA\n gamma\n";
        let ctx = context_for(&fixture);

        let preview = ApplyPatchTool
            .execute(&args(json!({"patch": patch, "dry_run": true})), &ctx)
            .await;
        let preview_content = preview.data.unwrap()["applied"][0]["content"]
            .as_str()
            .unwrap()
            .to_string();

        let apply = ApplyPatchTool
            .execute(&args(json!({"patch": patch, "dry_run": false})), &ctx)
            .await;
        assert!(apply.ok);
        let on_disk = std::fs::read_to_string(fixture.path().join("code.txt")).unwrap();
        assert_eq!(on_disk, preview_content);
        assert_eq!(on_disk, "alpha\nBETA\ngamma\n");
    }

    #[tokio::test]
    async fn dev_null_base_overwrites_existing_file() {
        let fixture = TestTempDir::new("patch-overwrite");
        fixture.write("new.txt", "old content that must vanish\n");
        let result = ApplyPatchTool
            .execute(
                &args(json!({"patch": NEW_FILE_PATCH, "dry_run": false})),
                &context_for(&fixture),
            )
            .await;
        assert!(result.ok);
        let data = result.data.unwrap();
        assert_eq!(data["rejects"].as_array().unwrap().len(), 0);
        let written = std::fs::read_to_string(fixture.path().join("new.txt")).unwrap();
        assert_eq!(written, "hi\n");
    }

    #[tokio::test]
    async fn mismatched_hunk_records_reject_and_leaves_file_alone() {
        let fixture = TestTempDir::new("patch-reject");
        fixture.write("code.txt", "actual content\n");
        let patch =
            "--- a/code.txt\n+++ b/code.txt\n@@ -1,1 +1,1 @@\n-expected content\n+replacement\n";
        let result = ApplyPatchTool
            .execute(
                &args(json!({"patch": patch, "dry_run": false})),
                &context_for(&fixture),
            )
            .await;
        assert!(result.ok);
        let data = result.data.unwrap();
        assert_eq!(data["applied"].as_array().unwrap().len(), 0);
        let reject = &data["rejects"][0];
        assert_eq!(reject["path"], "code.txt");
        assert!(reject["reason"].as_str().unwrap().contains("does not match"));
        assert!(reject["hunk"].as_str().unwrap().contains("@@ -1,1 +1,1 @@"));
        let untouched = std::fs::read_to_string(fixture.path().join("code.txt")).unwrap();
        assert_eq!(untouched, "actual content\n");
    }

    #[tokio::test]
    async fn multi_file_patch_applies_good_files_despite_bad_ones() {
        let fixture = TestTempDir::new("patch-multi");
        fixture.write("good.txt", "keep\n");
        let patch = concat!(
            "--- a/good.txt\n+++ b/good.txt\n@@ -1,1 +1,2 @@\n keep\n+added\n",
            "--- a/bad.txt\n+++ b/bad.txt\n@@ -1,1 +1,1 @@\n-not there\n+nope\n",
        );
        let result = ApplyPatchTool
            .execute(
                &args(json!({"patch": patch, "dry_run": false})),
                &context_for(&fixture),
            )
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["applied"].as_array().unwrap().len(), 1);
        assert_eq!(data["rejects"].as_array().unwrap().len(), 1);
        let written = std::fs::read_to_string(fixture.path().join("good.txt")).unwrap();
        assert_eq!(written, "keep\nadded\n");
    }

    #[tokio::test]
    async fn file_cap_reports_size_limit() {
        let fixture = TestTempDir::new("patch-cap");
        let mut ctx = context_for(&fixture);
        ctx.limits.max_patch_files = 1;
        let patch = concat!(
            "--- /dev/null\n+++ one.txt\n@@ -0,0 +1,1 @@\n+1\n",
            "--- /dev/null\n+++ two.txt\n@@ -0,0 +1,1 @@\n+2\n",
        );
        let result = ApplyPatchTool
            .execute(&args(json!({"patch": patch})), &ctx)
            .await;
        let error = result.error.unwrap();
        assert_eq!(error.code, codes::SIZE_LIMIT_EXCEEDED);
        assert_eq!(error.details.unwrap()["files"], 2);
    }

    #[tokio::test]
    async fn escaping_target_path_is_rejected_per_file() {
        let fixture = TestTempDir::new("patch-escape");
        let patch = "--- /dev/null\n+++ ../outside.txt\n@@ -0,0 +1,1 @@\n+bad\n";
        let result = ApplyPatchTool
            .execute(
                &args(json!({"patch": patch, "dry_run": false})),
                &context_for(&fixture),
            )
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["rejects"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_header_is_a_validation_error() {
        let fixture = TestTempDir::new("patch-malformed");
        let patch = "--- /dev/null\n+++ x.txt\n@@ not a header @@\n+line\n";
        let result = ApplyPatchTool
            .execute(&args(json!({"patch": patch})), &context_for(&fixture))
            .await;
        assert_eq!(result.error.unwrap().code, codes::VALIDATION_ERROR);
    }

    #[test]
    fn hunk_header_parses_with_and_without_counts() {
        assert_eq!(parse_hunk_header("@@ -1,3 +1,4 @@"), Some((1, 3)));
        assert_eq!(parse_hunk_header("@@ -7 +7 @@"), Some((7, 1)));
        assert_eq!(parse_hunk_header("@@ -0,0 +1,2 @@ trailing"), Some((0, 0)));
        assert_eq!(parse_hunk_header("@@ garbage @@"), None);
    }

    #[test]
    fn apply_hunks_preserves_unchanged_suffix() {
        let base = "one\ntwo\nthree\nfour\n";
        let hunks = vec![Hunk {
            orig_start: 2,
            lines: vec!["-two".into(), "+TWO".into()],
        }];
        let patched = apply_hunks(base, &hunks).unwrap();
        assert_eq!(patched, "one\nTWO\nthree\nfour\n");
    }
}

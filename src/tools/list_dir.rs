//! Directory listing tool.

use super::{guard_error_result, ArgMap, Tool, ToolContext, ToolPolicy, ToolResult};
use crate::pathguard::PathGuard;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Depth ceiling for recursive listings.
const MAX_DEPTH: u32 = 5;

/// Tool that lists directory contents to a bounded depth.
pub struct ListDirTool;

#[derive(Deserialize)]
#[serde(default)]
struct Args {
    path: String,
    depth: u32,
    include_hidden: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            path: ".".to_string(),
            depth: 1,
            include_hidden: false,
        }
    }
}

/// One listed entry. `name` is the slash-joined path relative to the listed
/// directory.
#[derive(Debug, Serialize)]
struct DirEntry {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    size: u64,
    mtime: i64,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &'static str {
        "list_dir"
    }

    fn description(&self) -> &'static str {
        "List directory contents with optional depth and hidden files"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "default": "." },
                "depth": { "type": "integer", "default": 1, "minimum": 1, "maximum": 5 },
                "include_hidden": { "type": "boolean", "default": false }
            },
            "required": []
        })
    }

    fn policy_hint(&self) -> ToolPolicy {
        ToolPolicy::Allow
    }

    async fn execute(&self, args: &ArgMap, ctx: &ToolContext) -> ToolResult {
        let args: Args =
            serde_json::from_value(Value::Object(args.clone())).unwrap_or_default();
        let depth = args.depth.clamp(1, MAX_DEPTH);

        let guard = PathGuard::new(&ctx.project_root, ctx.limits.clone());
        let abs = match guard.resolve(&args.path) {
            Ok(abs) => abs,
            Err(err) => return guard_error_result(err),
        };
        if let Err(err) = guard.validate_dir_access(&abs) {
            return guard_error_result(err);
        }

        let mut entries = Vec::new();
        if let Err(e) = list_recursive(&abs, depth, args.include_hidden, "", &mut entries) {
            return ToolResult::error(super::codes::FILE_NOT_FOUND, e.to_string());
        }

        let rel = abs
            .strip_prefix(&ctx.project_root)
            .unwrap_or(&abs)
            .to_string_lossy()
            .to_string();
        let rel = if rel.is_empty() { ".".to_string() } else { rel };

        ToolResult::success(json!({ "path": rel, "entries": entries }))
    }
}

/// Depth-first enumeration. Children of a directory at depth d are visited
/// only while d < requested depth; entry names accumulate the relative prefix.
fn list_recursive(
    dir: &Path,
    depth: u32,
    include_hidden: bool,
    prefix: &str,
    out: &mut Vec<DirEntry>,
) -> std::io::Result<()> {
    if depth == 0 {
        return Ok(());
    }

    let mut children: Vec<_> = std::fs::read_dir(dir)?.filter_map(Result::ok).collect();
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let name = child.file_name().to_string_lossy().to_string();
        if !include_hidden && name.starts_with('.') {
            continue;
        }

        let Ok(meta) = child.metadata() else { continue };
        let file_type = child.file_type().ok();
        let kind = if meta.is_dir() {
            "dir"
        } else if file_type.is_some_and(|t| t.is_symlink()) {
            "symlink"
        } else {
            "file"
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let joined = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        out.push(DirEntry {
            name: joined.clone(),
            kind,
            size: meta.len(),
            mtime,
        });

        if meta.is_dir() && depth > 1 {
            let _ = list_recursive(&child.path(), depth - 1, include_hidden, &joined, out);
        }
    }
    Ok(())
}

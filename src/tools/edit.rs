//! Edit tools — fuzzy search/replace and line-range edits on files.
//!
//! This is the most important tool surface for a coding agent. Instead of
//! rewriting entire files, the agent specifies text (or a line range) to
//! replace. Unlike a naive exact-match editor, `edit_search` tolerates small
//! drift between what the model remembers and the file's current contents by
//! scoring candidate windows with a string-similarity metric, the same way
//! Aider's search/replace blocks degrade gracefully on near-misses.

use crate::types::*;
use async_trait::async_trait;
use std::path::Path;

const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;
const EARLY_EXIT_SIMILARITY: f64 = 0.95;
const MAX_CANDIDATES: usize = 10;
const PREFILTER_MIN_LINES: usize = 5;
const PREFILTER_MIN_SIMILARITY: f64 = 0.2;

/// Fuzzy search-replace editing: find the best-matching window of lines in a
/// file and replace it, tolerating whitespace drift and minor wording changes.
pub struct EditSearchTool;

impl Default for EditSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl EditSearchTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentTool for EditSearchTool {
    fn name(&self) -> &str {
        "filesystem-edit_search"
    }

    fn label(&self) -> &str {
        "Edit File (search/replace)"
    }

    fn description(&self) -> &str {
        "Replace a block of text in a file by fuzzy-matching search_content against the file's current contents. Tolerates small whitespace or wording drift; falls back to a diff-based error if no close match is found."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to edit" },
                "search_content": { "type": "string", "description": "Text block to locate (fuzzy-matched)" },
                "replace_content": { "type": "string", "description": "Text to replace the matched block with" },
                "occurrence": { "type": "integer", "description": "1-indexed match to use when several windows score above threshold (default 1)" }
            },
            "required": ["path", "search_content", "replace_content"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let path = params["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'path' parameter".into()))?;
        let search_content = params["search_content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'search_content' parameter".into()))?;
        let replace_content = params["replace_content"].as_str().ok_or_else(|| {
            ToolError::InvalidArgs("missing 'replace_content' parameter".into())
        })?;
        let occurrence = params["occurrence"].as_u64().unwrap_or(1).max(1) as usize;

        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        enforce_editable_suffix(ctx, path)?;

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ToolError::Failed(format!(
                "Cannot read {}: {}. Use filesystem-create to create new files.",
                path, e
            ))
        })?;

        ctx.snapshot_before_write(Path::new(path)).await;

        let (new_content, summary) =
            apply_edit_search(&content, search_content, replace_content, occurrence, path)?;

        write_with_format(path, &new_content).await?;

        Ok(ToolResult {
            content: vec![Content::Text { text: summary }],
            details: serde_json::json!({ "path": path }),
        })
    }
}

/// Line-range editing: replace lines `start_line..=end_line` (1-indexed,
/// inclusive) with `new_content`.
pub struct EditRangeTool;

impl Default for EditRangeTool {
    fn default() -> Self {
        Self::new()
    }
}

impl EditRangeTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentTool for EditRangeTool {
    fn name(&self) -> &str {
        "filesystem-edit"
    }

    fn label(&self) -> &str {
        "Edit File (line range)"
    }

    fn description(&self) -> &str {
        "Replace a 1-indexed, inclusive line range in a file with new content. Use filesystem-read first to confirm line numbers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "start_line": { "type": "integer", "description": "1-indexed start line, inclusive" },
                "end_line": { "type": "integer", "description": "1-indexed end line, inclusive" },
                "new_content": { "type": "string" }
            },
            "required": ["path", "start_line", "end_line", "new_content"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let path = params["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'path' parameter".into()))?;
        let start_line = params["start_line"]
            .as_u64()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'start_line' parameter".into()))?
            as usize;
        let end_line = params["end_line"]
            .as_u64()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'end_line' parameter".into()))?
            as usize;
        let new_content = params["new_content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'new_content' parameter".into()))?;

        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        if start_line == 0 || end_line < start_line {
            return Err(ToolError::InvalidArgs(format!(
                "invalid range {}..={} (1-indexed, start must be >= 1 and <= end)",
                start_line, end_line
            )));
        }

        enforce_editable_suffix(ctx, path)?;

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::Failed(format!("Cannot read {}: {}", path, e)))?;

        ctx.snapshot_before_write(Path::new(path)).await;

        let lines: Vec<&str> = content.lines().collect();
        if start_line > lines.len() {
            return Err(ToolError::Failed(format!(
                "start_line {} is beyond end of file ({} lines)",
                start_line,
                lines.len()
            )));
        }
        let end = end_line.min(lines.len());

        let mut result_lines: Vec<String> = Vec::with_capacity(lines.len());
        result_lines.extend(lines[..start_line - 1].iter().map(|s| s.to_string()));
        result_lines.extend(new_content.lines().map(|s| s.to_string()));
        result_lines.extend(lines[end..].iter().map(|s| s.to_string()));

        let mut new_file_content = result_lines.join("\n");
        if content.ends_with('\n') {
            new_file_content.push('\n');
        }

        let warnings = analyze_structure(&new_content);
        write_with_format(path, &new_file_content).await?;

        let mut summary = format!(
            "Replaced lines {}-{} in {}",
            start_line, end_line, path
        );
        if !warnings.is_empty() {
            summary.push_str("\n\nWarnings:\n");
            summary.push_str(&warnings.join("\n"));
        }

        Ok(ToolResult {
            content: vec![Content::Text { text: summary }],
            details: serde_json::json!({ "path": path, "start_line": start_line, "end_line": end_line }),
        })
    }
}

/// Undo the most recent edit made to `path` during the current turn, by
/// restoring the SnapshotStore pre-image recorded for it (or deleting the
/// file if it didn't exist before the edit). Only reverses the single most
/// recent edit — a second `filesystem-undo` call on the same path in the
/// same turn has nothing left to restore.
pub struct UndoTool;

impl Default for UndoTool {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentTool for UndoTool {
    fn name(&self) -> &str {
        "filesystem-undo"
    }

    fn label(&self) -> &str {
        "Undo Edit"
    }

    fn description(&self) -> &str {
        "Undo the most recent edit made to a file in this turn, restoring its prior contents exactly (or deleting it if this turn created it)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to undo the last edit to" }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let path = params["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'path' parameter".into()))?;

        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let (store, session_id) = match (&ctx.snapshot_store, &ctx.session_id) {
            (Some(store), Some(session_id)) => (store, session_id),
            _ => {
                return Err(ToolError::Failed(
                    "no snapshot store configured for this session; nothing to undo".into(),
                ))
            }
        };

        let undone = store
            .restore_and_forget(session_id, ctx.message_index, Path::new(path))
            .await
            .map_err(|e| ToolError::Failed(format!("undo failed for {}: {}", path, e)))?;

        if !undone {
            return Err(ToolError::Failed(format!(
                "nothing to undo for {} in this turn",
                path
            )));
        }

        Ok(ToolResult {
            content: vec![Content::Text {
                text: format!("Undid the last edit to {}", path),
            }],
            details: serde_json::json!({ "path": path }),
        })
    }
}

fn enforce_editable_suffix(ctx: &ToolContext, path: &str) -> Result<(), ToolError> {
    if let Some(suffixes) = &ctx.editable_file_suffixes {
        if !suffixes.iter().any(|s| path.ends_with(s.as_str())) {
            return Err(ToolError::Failed(format!(
                "Writing to {} is not permitted in this context (allowed suffixes: {:?})",
                path, suffixes
            )));
        }
    }
    Ok(())
}

/// Core of `edit_search`: find the best window, splice in the replacement,
/// and return the new file content plus a human-readable summary.
fn apply_edit_search(
    content: &str,
    search_content: &str,
    replace_content: &str,
    occurrence: usize,
    path: &str,
) -> Result<(String, String), ToolError> {
    let content_lf = content.replace("\r\n", "\n");
    let search_lf = search_content.replace("\r\n", "\n");

    let matches = find_candidate_windows(&content_lf, &search_lf);

    if matches.is_empty() {
        if let Some(unescaped) = try_unescape(&search_lf) {
            let retry = find_candidate_windows(&content_lf, &unescaped);
            if !retry.is_empty() {
                let unescaped_replace = try_unescape(replace_content).unwrap_or_else(|| replace_content.to_string());
                return apply_edit_search(content, &unescaped, &unescaped_replace, occurrence, path);
            }
        }

        return Err(ToolError::Failed(zero_match_diagnostic(&content_lf, &search_lf)));
    }

    let passing: Vec<&WindowMatch> = matches
        .iter()
        .filter(|m| m.score >= DEFAULT_SIMILARITY_THRESHOLD)
        .collect();

    if passing.is_empty() {
        return Err(ToolError::Failed(zero_match_diagnostic(&content_lf, &search_lf)));
    }

    if passing.len() > 1 && occurrence > passing.len() {
        let lines: Vec<String> = passing
            .iter()
            .map(|m| format!("line {} ({:.0}% match)", m.start_line + 1, m.score * 100.0))
            .collect();
        return Err(ToolError::Failed(format!(
            "search_content matches {} locations in {}: {}. Pass 'occurrence' to pick one, or include more context to make it unique.",
            passing.len(),
            path,
            lines.join(", ")
        )));
    }

    let chosen = if passing.len() == 1 {
        passing[0]
    } else {
        passing[occurrence - 1]
    };

    let file_lines: Vec<&str> = content_lf.lines().collect();
    let original_indent = leading_whitespace(file_lines[chosen.start_line]);

    let mut replace_lines: Vec<String> = replace_content.replace("\r\n", "\n").lines().map(|s| s.to_string()).collect();
    if let Some(first) = replace_lines.first_mut() {
        let trimmed = first.trim_start();
        *first = format!("{}{}", original_indent, trimmed);
    }

    let mut new_lines: Vec<String> = Vec::with_capacity(file_lines.len());
    new_lines.extend(file_lines[..chosen.start_line].iter().map(|s| s.to_string()));
    new_lines.extend(replace_lines);
    new_lines.extend(file_lines[chosen.start_line + chosen.len..].iter().map(|s| s.to_string()));

    let mut new_content = new_lines.join("\n");
    if content.ends_with('\n') {
        new_content.push('\n');
    }

    let warnings = analyze_structure(replace_content);
    let mut summary = format!(
        "Replaced {} line(s) at line {} in {} ({:.0}% match)",
        chosen.len,
        chosen.start_line + 1,
        path,
        chosen.score * 100.0
    );
    if !warnings.is_empty() {
        summary.push_str("\n\nWarnings:\n");
        summary.push_str(&warnings.join("\n"));
    }

    Ok((new_content, summary))
}

struct WindowMatch {
    start_line: usize,
    len: usize,
    score: f64,
}

/// Slide a window the size of `search` across `content`'s lines, scoring each
/// by normalized Damerau-Levenshtein similarity. Early-exits once a
/// near-perfect match is found; caps the number of candidates kept.
fn find_candidate_windows(content: &str, search: &str) -> Vec<WindowMatch> {
    let content_lines: Vec<&str> = content.lines().collect();
    let search_lines: Vec<&str> = search.lines().collect();
    if search_lines.is_empty() || content_lines.is_empty() || search_lines.len() > content_lines.len() {
        return Vec::new();
    }

    let window_len = search_lines.len();
    let search_block = search_lines.join("\n");
    let first_search_line = collapse_whitespace(search_lines[0]);

    let mut candidates: Vec<WindowMatch> = Vec::new();

    for start in 0..=(content_lines.len() - window_len) {
        if window_len >= PREFILTER_MIN_LINES {
            let first_line = collapse_whitespace(content_lines[start]);
            let prefilter_score = strsim::normalized_damerau_levenshtein(&first_line, &first_search_line);
            if prefilter_score < PREFILTER_MIN_SIMILARITY {
                continue;
            }
        }

        let window_block = content_lines[start..start + window_len].join("\n");
        let score = strsim::normalized_damerau_levenshtein(&window_block, &search_block);

        candidates.push(WindowMatch {
            start_line: start,
            len: window_len,
            score,
        });

        if score >= EARLY_EXIT_SIMILARITY {
            break;
        }
    }

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    candidates.truncate(MAX_CANDIDATES);
    candidates
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn leading_whitespace(line: &str) -> String {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').collect()
}

/// Detects a search string that looks escaped one level too deep (e.g. the
/// model sent `\\n` where the file has an actual newline, or `\\\"` where it
/// has a plain quote) and returns the corrected string if unescaping changes
/// anything.
fn try_unescape(s: &str) -> Option<String> {
    if !s.contains("\\\\") && !s.contains("\\n") && !s.contains("\\\"") {
        return None;
    }
    let unescaped = s
        .replace("\\\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\\\\"", "\"")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\");
    if unescaped == s {
        None
    } else {
        Some(unescaped)
    }
}

/// Builds the diagnostic shown when no window scores above threshold: the
/// three closest candidates with percent match, plus a unified diff against
/// the single best one.
fn zero_match_diagnostic(content: &str, search: &str) -> String {
    let mut all = find_candidate_windows(content, search);
    // find_candidate_windows already filters by prefilter but not threshold;
    // rebuild without the early-exit cutoff so we always have up to 3 to show.
    if all.is_empty() {
        let content_lines: Vec<&str> = content.lines().collect();
        let search_lines: Vec<&str> = search.lines().collect();
        if search_lines.len() > content_lines.len() || content_lines.is_empty() {
            return format!(
                "search_content not found in file: the file has {} line(s), search_content has {}.",
                content_lines.len(),
                search_lines.len()
            );
        }
        return "search_content not found in file and no similar region could be located.".into();
    }

    all.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    all.truncate(3);

    let content_lines: Vec<&str> = content.lines().collect();
    let mut msg = String::from("search_content not found (below threshold). Closest candidates:\n");
    for m in &all {
        msg.push_str(&format!(
            "  line {} — {:.0}% match\n",
            m.start_line + 1,
            m.score * 100.0
        ));
    }

    let best = &all[0];
    let best_block = content_lines[best.start_line..best.start_line + best.len].join("\n");
    let diff = similar::TextDiff::from_lines(search, &best_block)
        .unified_diff()
        .context_radius(1)
        .header("search_content", "closest file region")
        .to_string();
    msg.push_str("\nUnified diff against the closest region:\n");
    msg.push_str(&diff);
    msg.push_str("\nTip: use filesystem-read to re-check the current contents, then retry with more precise context.");
    msg
}

/// Advisory structural checks on the text being introduced: bracket/tag
/// balance and indentation anomalies. Never blocks the write.
fn analyze_structure(text: &str) -> Vec<String> {
    let mut warnings = Vec::new();

    let mut stack = Vec::new();
    for c in text.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    warnings.push("unbalanced ')' — no matching '(' found".to_string());
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    warnings.push("unbalanced ']' — no matching '[' found".to_string());
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    warnings.push("unbalanced '}' — no matching '{' found".to_string());
                }
            }
            _ => {}
        }
    }
    if !stack.is_empty() {
        warnings.push(format!("{} unclosed bracket(s): {:?}", stack.len(), stack));
    }

    let tag_re = regex::Regex::new(r"</?([a-zA-Z][a-zA-Z0-9_-]*)[^>]*?(/?)>").unwrap();
    let mut open_tags: Vec<String> = Vec::new();
    for cap in tag_re.captures_iter(text) {
        let full = cap.get(0).unwrap().as_str();
        let name = cap.get(1).unwrap().as_str().to_string();
        let self_closing = cap.get(2).map(|m| m.as_str() == "/").unwrap_or(false);
        if self_closing || full.starts_with("<!--") {
            continue;
        }
        if full.starts_with("</") {
            if open_tags.last() == Some(&name) {
                open_tags.pop();
            } else if open_tags.contains(&name) {
                open_tags.retain(|t| t != &name);
            } else {
                warnings.push(format!("closing tag </{}> has no matching opener", name));
            }
        } else {
            open_tags.push(name);
        }
    }
    if !open_tags.is_empty() {
        warnings.push(format!("unclosed tag(s): {}", open_tags.join(", ")));
    }

    let has_tabs = text.lines().any(|l| l.starts_with('\t'));
    let has_space_indent = text.lines().any(|l| l.starts_with("  ") && !l.starts_with('\t'));
    if has_tabs && has_space_indent {
        warnings.push("mixed tab/space indentation in edited region".to_string());
    }

    warnings
}

/// Write the file, then try to format it with `prettier` if one is on PATH
/// and the extension is supported. Formatting failures are swallowed: the
/// edit already succeeded, formatting is best-effort.
async fn write_with_format(path: &str, content: &str) -> Result<(), ToolError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Failed(format!("Cannot create directory: {}", e)))?;
        }
    }

    tokio::fs::write(path, content)
        .await
        .map_err(|e| ToolError::Failed(format!("Cannot write {}: {}", path, e)))?;

    if prettier_supports(path) {
        let _ = run_prettier(path).await;
    }

    Ok(())
}

fn prettier_supports(path: &str) -> bool {
    const EXTS: &[&str] = &[
        ".js", ".jsx", ".ts", ".tsx", ".json", ".css", ".scss", ".less", ".md", ".yaml", ".yml",
        ".html", ".vue",
    ];
    EXTS.iter().any(|e| path.ends_with(e))
}

/// Resolves and invokes `prettier` via PATH. If the binary can't be found,
/// this is a documented no-op (the caller attaches a warning); prettier
/// itself resolves `.prettierrc*`/`package.json` config per directory and
/// caches that resolution internally, so no caching is duplicated here.
async fn run_prettier(path: &str) -> Result<(), String> {
    let which = tokio::process::Command::new("which")
        .arg("prettier")
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if !which.status.success() {
        return Err("prettier not found on PATH; left file unformatted".into());
    }

    let output = tokio::process::Command::new("prettier")
        .args(["--write", path])
        .output()
        .await
        .map_err(|e| e.to_string())?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).to_string());
    }
    Ok(())
}

//! Sandbox tools implementing the `Tool` trait.
//!
//! Every tool snapshots the active workspace when it runs, calls one sandbox
//! operation and returns its structured result as `ToolOutput::data`.
//! Expected failures become `ToolOutput::error`; only malformed arguments
//! are returned as `Err`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use devbox_core::config::SandboxSettings;
use devbox_core::{
    ActiveWorkspace, Error, Result, Tool, ToolOutput, ToolRegistry, ToolRiskLevel,
};

use crate::errors;
use crate::files::{ContentEncoding, FileOps};
use crate::gateway::CommandGateway;
use crate::patch::PatchEngine;
use crate::plan::PlanStore;
use crate::search::{GrepOptions, SearchEngine};

/// Upper bound for a caller-supplied command timeout.
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// Sandbox Manager
// =============================================================================

/// Shared state behind all sandbox tools: the active workspace and, when a
/// container runtime is available, the command gateway.
pub struct SandboxManager {
    workspace: ActiveWorkspace,
    gateway: Option<Arc<CommandGateway>>,
}

impl SandboxManager {
    pub fn new(workspace: ActiveWorkspace) -> Self {
        Self {
            workspace,
            gateway: None,
        }
    }

    /// Build from settings, activating `default_workspace` if configured.
    pub fn from_settings(settings: &SandboxSettings) -> Result<Self> {
        let workspace =
            ActiveWorkspace::new(settings.home_dir.clone(), settings.container_workdir.clone());
        if let Some(name) = &settings.default_workspace {
            workspace.set(name.clone())?;
        }
        Ok(Self::new(workspace))
    }

    pub fn with_gateway(mut self, gateway: Arc<CommandGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn workspace(&self) -> &ActiveWorkspace {
        &self.workspace
    }

    pub fn files(&self) -> FileOps {
        FileOps::new(self.workspace.scope())
    }

    pub fn patches(&self) -> PatchEngine {
        PatchEngine::new(self.workspace.scope())
    }

    pub fn search(&self) -> SearchEngine {
        SearchEngine::new(self.workspace.scope())
    }

    pub fn plans(&self) -> PlanStore {
        PlanStore::new(self.workspace.scope())
    }

    pub fn gateway(&self) -> Option<&Arc<CommandGateway>> {
        self.gateway.as_ref()
    }
}

/// Register every sandbox tool.
pub async fn register_sandbox_tools(
    registry: &dyn ToolRegistry,
    manager: Arc<SandboxManager>,
) -> Result<()> {
    let tools: Vec<Box<dyn Tool>> = vec![
        Box::new(WriteFileTool::new(manager.clone())),
        Box::new(ReadFileTool::new(manager.clone())),
        Box::new(AppendFileTool::new(manager.clone())),
        Box::new(PrependFileTool::new(manager.clone())),
        Box::new(CopyPathTool::new(manager.clone())),
        Box::new(MovePathTool::new(manager.clone())),
        Box::new(RemovePathTool::new(manager.clone())),
        Box::new(MakeDirectoryTool::new(manager.clone())),
        Box::new(PathExistsTool::new(manager.clone())),
        Box::new(ListDirectoryTool::new(manager.clone())),
        Box::new(GrepTool::new(manager.clone())),
        Box::new(ApplyTextPatchTool::new(manager.clone())),
        Box::new(ApplyUnifiedDiffTool::new(manager.clone())),
        Box::new(RunCommandTool::new(manager.clone())),
        Box::new(ReadPlanTool::new(manager.clone())),
        Box::new(WritePlanTool::new(manager)),
    ];
    let count = tools.len();
    for tool in tools {
        registry.register(tool).await?;
    }
    tracing::info!(count, "Sandbox tools registered");
    Ok(())
}

// =============================================================================
// Argument and output helpers
// =============================================================================

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::invalid_request(format!("{} is required", key)))
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(Error::invalid_request(format!("{} must be a string", key))),
    }
}

fn optional_usize(args: &Value, key: &str) -> Result<Option<usize>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| Error::invalid_request(format!("{} must be a non-negative integer", key))),
    }
}

fn required_usize(args: &Value, key: &str) -> Result<usize> {
    optional_usize(args, key)?.ok_or_else(|| Error::invalid_request(format!("{} is required", key)))
}

fn optional_bool(args: &Value, key: &str) -> Result<Option<bool>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(Error::invalid_request(format!("{} must be a boolean", key))),
    }
}

/// Accepts a list of strings or a single string.
fn string_list(args: &Value, key: &str) -> Result<Vec<String>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::invalid_request(format!("{} must contain strings", key)))
            })
            .collect(),
        Some(_) => Err(Error::invalid_request(format!(
            "{} must be a list of strings",
            key
        ))),
    }
}

/// Wrap a structured result: `summary` on success, the stable error string
/// (plus detail) on failure.
fn respond<T: Serialize>(
    result: &T,
    success: bool,
    summary: impl Into<String>,
    error: Option<&str>,
    detail: Option<&str>,
) -> Result<ToolOutput> {
    let data = serde_json::to_value(result)?;
    if success {
        return Ok(ToolOutput::text(summary).with_data(data));
    }
    let error = error.unwrap_or(errors::INTERNAL_ERROR);
    let message = match detail {
        Some(detail) => format!("{}: {}", error, detail),
        None => error.to_string(),
    };
    Ok(ToolOutput::error(message).with_data(data))
}

fn path_param(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

// =============================================================================
// File Tools
// =============================================================================

/// Tool for creating or overwriting a file.
pub struct WriteFileTool {
    manager: Arc<SandboxManager>,
}

impl WriteFileTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create a file or overwrite it entirely. Parent directories are created as needed. \
         Paths are relative to the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_param("File path inside the workspace"),
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let result = self.manager.files().write(path, content);
        respond(
            &result,
            result.success,
            format!("Wrote {} bytes to {}", content.len(), result.path),
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

/// Tool for reading a file, optionally a line window of it.
pub struct ReadFileTool {
    manager: Arc<SandboxManager>,
}

impl ReadFileTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file. Text is returned as UTF-8; binary files are returned base64-encoded. \
         Optionally pass start_line/end_line (1-based, inclusive) to read part of a text file."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_param("File path inside the workspace"),
                "start_line": { "type": "integer", "minimum": 1 },
                "end_line": { "type": "integer", "minimum": 1 }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let start = optional_usize(&args, "start_line")?;
        let end = optional_usize(&args, "end_line")?;

        let files = self.manager.files();
        let result = match (start, end) {
            (None, None) => files.read(path),
            (start, end) => files.read_range(path, start.unwrap_or(1), end),
        };

        let summary = match (&result.content, result.encoding) {
            (Some(content), Some(ContentEncoding::Utf8)) => content.clone(),
            (Some(content), Some(ContentEncoding::Base64)) => {
                format!("[binary file, base64]\n{}", content)
            }
            _ => String::new(),
        };
        respond(
            &result,
            result.success,
            summary,
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

/// Tool for appending to a file.
pub struct AppendFileTool {
    manager: Arc<SandboxManager>,
}

impl AppendFileTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for AppendFileTool {
    fn name(&self) -> &str {
        "append_file"
    }

    fn description(&self) -> &str {
        "Append content to the end of a file, creating it if it does not exist."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_param("File path inside the workspace"),
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let result = self.manager.files().append(path, content);
        respond(
            &result,
            result.success,
            format!("Appended {} bytes to {}", content.len(), result.path),
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

/// Tool for inserting content at the start of a file.
pub struct PrependFileTool {
    manager: Arc<SandboxManager>,
}

impl PrependFileTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for PrependFileTool {
    fn name(&self) -> &str {
        "prepend_file"
    }

    fn description(&self) -> &str {
        "Insert content at the beginning of a file, creating it if it does not exist."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_param("File path inside the workspace"),
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let result = self.manager.files().prepend(path, content);
        respond(
            &result,
            result.success,
            format!("Prepended {} bytes to {}", content.len(), result.path),
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

/// Tool for copying files and directories.
pub struct CopyPathTool {
    manager: Arc<SandboxManager>,
}

impl CopyPathTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for CopyPathTool {
    fn name(&self) -> &str {
        "copy_path"
    }

    fn description(&self) -> &str {
        "Copy a file, or a directory recursively. An existing destination file is overwritten."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": path_param("Existing path to copy"),
                "destination": path_param("Target path")
            },
            "required": ["source", "destination"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let source = required_str(&args, "source")?;
        let destination = required_str(&args, "destination")?;
        let result = self.manager.files().copy(source, destination);
        respond(
            &result,
            result.success,
            format!("Copied {} to {}", source, result.path),
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

/// Tool for moving or renaming files and directories.
pub struct MovePathTool {
    manager: Arc<SandboxManager>,
}

impl MovePathTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for MovePathTool {
    fn name(&self) -> &str {
        "move_path"
    }

    fn description(&self) -> &str {
        "Move or rename a file or directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": path_param("Existing path to move"),
                "destination": path_param("New path")
            },
            "required": ["source", "destination"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let source = required_str(&args, "source")?;
        let destination = required_str(&args, "destination")?;
        let result = self.manager.files().rename(source, destination);
        respond(
            &result,
            result.success,
            format!("Moved {} to {}", source, result.path),
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

/// Tool for deleting files and directories.
pub struct RemovePathTool {
    manager: Arc<SandboxManager>,
}

impl RemovePathTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for RemovePathTool {
    fn name(&self) -> &str {
        "remove_path"
    }

    fn description(&self) -> &str {
        "Delete a file, or a directory and everything inside it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": path_param("Path to delete") },
            "required": ["path"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let result = self.manager.files().remove(path);
        respond(
            &result,
            result.success,
            format!("Removed {}", result.path),
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

pub struct MakeDirectoryTool {
    manager: Arc<SandboxManager>,
}

impl MakeDirectoryTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for MakeDirectoryTool {
    fn name(&self) -> &str {
        "make_directory"
    }

    fn description(&self) -> &str {
        "Create a directory, including missing parent directories."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": path_param("Directory to create") },
            "required": ["path"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let result = self.manager.files().mkdir(path);
        respond(
            &result,
            result.success,
            format!("Created directory {}", result.path),
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

pub struct PathExistsTool {
    manager: Arc<SandboxManager>,
}

impl PathExistsTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for PathExistsTool {
    fn name(&self) -> &str {
        "path_exists"
    }

    fn description(&self) -> &str {
        "Check whether a path exists and whether it is a file or a directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": path_param("Path to check") },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let result = self.manager.files().exists(path);
        let summary = if result.is_dir {
            format!("{} is a directory", result.path)
        } else if result.is_file {
            format!("{} is a file", result.path)
        } else {
            format!("{} does not exist", result.path)
        };
        respond(
            &result,
            result.success,
            summary,
            result.error.as_deref(),
            None,
        )
    }
}

pub struct ListDirectoryTool {
    manager: Arc<SandboxManager>,
}

impl ListDirectoryTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory (default: the workspace root). Directories end with '/'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": path_param("Directory to list (default \".\")") }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = optional_str(&args, "path")?.unwrap_or(".");
        let result = self.manager.files().list_dir(path);
        let summary = if result.entries.is_empty() {
            format!("{} is empty", result.path)
        } else {
            result
                .entries
                .iter()
                .map(|e| {
                    if e.is_dir {
                        format!("{}/", e.name)
                    } else {
                        format!("{} ({} bytes)", e.name, e.size)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        respond(
            &result,
            result.success,
            summary,
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

// =============================================================================
// Search Tool
// =============================================================================

pub struct GrepTool {
    manager: Arc<SandboxManager>,
}

impl GrepTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents line by line. Case-insensitive regex by default. \
         Globs use globstar semantics: '*' stays within a directory, '**' spans directories. \
         VCS metadata, dependency directories, caches and lock files are always skipped."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex (or literal text when regex=false)" },
                "include_globs": { "type": "array", "items": { "type": "string" } },
                "exclude_globs": { "type": "array", "items": { "type": "string" } },
                "regex": { "type": "boolean", "default": true },
                "case_sensitive": { "type": "boolean", "default": false },
                "max_results": { "type": "integer", "minimum": 1, "default": 1000 },
                "path": path_param("Subdirectory to search (default: whole workspace)")
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let pattern = required_str(&args, "pattern")?;
        let defaults = GrepOptions::default();
        let options = GrepOptions {
            include_globs: string_list(&args, "include_globs")?,
            exclude_globs: string_list(&args, "exclude_globs")?,
            regex: optional_bool(&args, "regex")?.unwrap_or(defaults.regex),
            case_sensitive: optional_bool(&args, "case_sensitive")?
                .unwrap_or(defaults.case_sensitive),
            max_results: optional_usize(&args, "max_results")?.unwrap_or(defaults.max_results),
            path: optional_str(&args, "path")?.map(str::to_string),
        };

        let result = self.manager.search().grep(pattern, &options);
        let mut summary = result
            .matches
            .iter()
            .map(|m| format!("{}:{}: {}", m.path, m.line_number, m.line))
            .collect::<Vec<_>>()
            .join("\n");
        if result.matches.is_empty() {
            summary = format!("No matches in {} files", result.files_searched);
        }
        if result.truncated {
            summary.push_str(&format!(
                "\n[truncated at {} matches]",
                result.matches.len()
            ));
        }
        respond(
            &result,
            result.success,
            summary,
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

// =============================================================================
// Patch Tools
// =============================================================================

pub struct ApplyTextPatchTool {
    manager: Arc<SandboxManager>,
}

impl ApplyTextPatchTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ApplyTextPatchTool {
    fn name(&self) -> &str {
        "apply_text_patch"
    }

    fn description(&self) -> &str {
        "Replace lines start_line..end_line (1-based, inclusive) of a text file with new text. \
         An empty replacement deletes the lines. Returns a unified diff of the change."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_param("File to patch"),
                "start_line": { "type": "integer", "minimum": 1 },
                "end_line": { "type": "integer", "minimum": 1 },
                "replacement": { "type": "string" }
            },
            "required": ["path", "start_line", "end_line", "replacement"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let path = required_str(&args, "path")?;
        let start_line = required_usize(&args, "start_line")?;
        let end_line = required_usize(&args, "end_line")?;
        let replacement = required_str(&args, "replacement")?;

        let result = self
            .manager
            .patches()
            .apply_text_patch(path, start_line, end_line, replacement);
        let summary = if result.diff.is_empty() {
            format!("No changes to {}", result.path)
        } else {
            result.diff.clone()
        };
        respond(
            &result,
            result.success,
            summary,
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

pub struct ApplyUnifiedDiffTool {
    manager: Arc<SandboxManager>,
}

impl ApplyUnifiedDiffTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ApplyUnifiedDiffTool {
    fn name(&self) -> &str {
        "apply_unified_diff"
    }

    fn description(&self) -> &str {
        "Apply a unified diff (one or more files) to existing files. Context and removed \
         lines must match the current content exactly; each file is applied independently. \
         Creating or deleting files is not supported."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "diff": { "type": "string", "description": "Unified diff text with ---/+++ headers and @@ hunks" }
            },
            "required": ["diff"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let diff = required_str(&args, "diff")?;
        let result = self.manager.patches().apply_unified_diff(diff);
        let summary = result
            .files
            .iter()
            .map(|f| match (&f.error, f.diff.is_empty()) {
                (Some(error), _) => format!("{}: {}", f.path, error),
                (None, true) => format!("{}: no changes", f.path),
                (None, false) => f.diff.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        respond(
            &result,
            result.success,
            summary,
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

// =============================================================================
// Command Tool
// =============================================================================

/// Tool for executing shell commands inside the sandbox container.
///
/// Risk level: HIGH.
pub struct RunCommandTool {
    manager: Arc<SandboxManager>,
}

impl RunCommandTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the sandbox container, in the workspace directory. \
         Long-running processes (dev servers, watch modes, log following) are refused \
         with exit code 126. Commands exceeding the timeout are aborted."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Timeout in seconds (default from configuration, max: 600)"
                }
            },
            "required": ["command"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::High
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let command = required_str(&args, "command")?;
        let timeout_secs = optional_usize(&args, "timeout_secs")?;

        let Some(gateway) = self.manager.gateway() else {
            return Ok(ToolOutput::error("No container runtime configured")
                .with_data(json!({ "error": "No container runtime configured" })));
        };
        let timeout = match timeout_secs {
            Some(secs) => Duration::from_secs((secs as u64).clamp(1, MAX_COMMAND_TIMEOUT_SECS)),
            None => gateway.config().timeout,
        };

        let workspace = self.manager.workspace().get();
        let result = match gateway
            .run_with_timeout(command, workspace.as_deref(), timeout)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                let kind = match &e {
                    Error::ContainerNotFound(_) => "Container not found",
                    Error::Timeout { .. } => "Command timed out",
                    _ => errors::INTERNAL_ERROR,
                };
                if !matches!(e, Error::ContainerNotFound(_) | Error::Timeout { .. }) {
                    tracing::error!(command = %command, error = %e, "Command dispatch failed");
                }
                return Ok(ToolOutput::error(e.to_string())
                    .with_data(json!({ "error": kind, "detail": e.to_string() })));
            }
        };

        let mut output = String::new();
        if !result.stdout.is_empty() {
            output.push_str(&result.stdout);
        }
        if !result.stderr.is_empty() {
            if !output.is_empty() {
                output.push_str("\n--- stderr ---\n");
            }
            output.push_str(&result.stderr);
        }
        if output.is_empty() {
            output = format!("Command completed with exit code {}", result.exit_code);
        }

        let data = serde_json::to_value(&result)?;
        if result.success() {
            Ok(ToolOutput::text(output).with_data(data))
        } else {
            Ok(ToolOutput::error(format!(
                "Command failed (exit code {}):\n{}",
                result.exit_code, output
            ))
            .with_data(data))
        }
    }
}

// =============================================================================
// Implementation Plan Tools
// =============================================================================

pub struct ReadPlanTool {
    manager: Arc<SandboxManager>,
}

impl ReadPlanTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ReadPlanTool {
    fn name(&self) -> &str {
        "read_implementation_plan"
    }

    fn description(&self) -> &str {
        "Read the implementation plan stored for the active workspace."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput> {
        let result = self.manager.plans().read();
        let summary = match &result.plan {
            Some(plan) => serde_json::to_string_pretty(plan)?,
            None => "No implementation plan yet".to_string(),
        };
        respond(
            &result,
            result.success,
            summary,
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

pub struct WritePlanTool {
    manager: Arc<SandboxManager>,
}

impl WritePlanTool {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for WritePlanTool {
    fn name(&self) -> &str {
        "write_implementation_plan"
    }

    fn description(&self) -> &str {
        "Replace the implementation plan of the active workspace with a JSON object."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "plan": { "type": "object", "description": "The complete plan" }
            },
            "required": ["plan"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let plan = args
            .get("plan")
            .ok_or_else(|| Error::invalid_request("plan is required"))?;
        let result = self.manager.plans().write(plan);
        respond(
            &result,
            result.success,
            "Implementation plan saved",
            result.error.as_deref(),
            result.detail.as_deref(),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

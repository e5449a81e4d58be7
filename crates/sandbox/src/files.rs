//! Primitive file operations inside the sandbox.
//!
//! Every operation resolves its path through the workspace scope and reports
//! expected failures (missing file, wrong type, escaping symlink) in its
//! result object instead of returning an error.
//!
//! Plain writes truncate in place. Only [`FileOps::write_atomic`], used by the
//! patch engine, goes through a temporary file and a rename.

use std::fs;
use std::io::Write;
use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use devbox_core::{ResolvedPath, WorkspaceScope};

use crate::errors::{self, OpFailure};

/// Number of leading bytes inspected for NUL when classifying a file.
pub const BINARY_PROBE_BYTES: usize = 1024;

/// Whether `bytes` look like binary content (a NUL in the first 1 KiB).
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_PROBE_BYTES).any(|b| *b == 0)
}

// =============================================================================
// Result Types
// =============================================================================

/// Outcome of a mutating file operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOpResult {
    pub success: bool,
    /// Workspace-relative path the operation acted on.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FileOpResult {
    fn ok(path: String) -> Self {
        Self {
            success: true,
            path,
            error: None,
            detail: None,
        }
    }

    fn failed(path: String, failure: OpFailure) -> Self {
        Self {
            success: false,
            path,
            error: Some(failure.error.to_string()),
            detail: failure.detail,
        }
    }

    fn from_outcome(path: String, outcome: Result<(), OpFailure>) -> Self {
        match outcome {
            Ok(()) => Self::ok(path),
            Err(failure) => Self::failed(path, failure),
        }
    }
}

/// How `ReadResult::content` is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentEncoding {
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResult {
    pub success: bool,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<ContentEncoding>,
    /// True when the file was classified binary and `content` is base64.
    #[serde(default)]
    pub binary: bool,
    /// Line count of a text file (whole file, not just the window read).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ReadResult {
    fn failed(path: String, failure: OpFailure) -> Self {
        Self {
            success: false,
            path,
            content: None,
            encoding: None,
            binary: false,
            total_lines: None,
            error: Some(failure.error.to_string()),
            detail: failure.detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistsResult {
    pub success: bool,
    pub path: String,
    pub exists: bool,
    pub is_file: bool,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryInfo {
    pub name: String,
    /// Workspace-relative path of the entry.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResult {
    pub success: bool,
    pub path: String,
    pub entries: Vec<DirEntryInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// =============================================================================
// FileOps
// =============================================================================

/// File operations bound to one workspace scope.
#[derive(Debug, Clone)]
pub struct FileOps {
    scope: WorkspaceScope,
}

impl FileOps {
    pub fn new(scope: WorkspaceScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &WorkspaceScope {
        &self.scope
    }

    /// Resolve `path` and verify no symlink on the way leads outside.
    pub fn resolve(&self, path: &str) -> Result<ResolvedPath, OpFailure> {
        let resolved = self.scope.resolve(path);
        self.scope
            .ensure_contained(&resolved)
            .map_err(|e| OpFailure::with_detail(errors::PATH_ESCAPES_SANDBOX, e.to_string()))?;
        Ok(resolved)
    }

    /// Workspace-relative display form of a resolved path.
    pub fn display(&self, resolved: &ResolvedPath) -> String {
        self.scope.workspace_relative(&resolved.absolute)
    }

    fn display_input(&self, path: &str) -> String {
        self.display(&self.scope.resolve(path))
    }

    /// Create or truncate `path` with `content`.
    pub fn write(&self, path: &str, content: &str) -> FileOpResult {
        let outcome = self.resolve(path).and_then(|resolved| {
            let shown = self.display(&resolved);
            if resolved.absolute.is_dir() {
                return Err(OpFailure::new(errors::NOT_A_FILE));
            }
            create_parent(&resolved.absolute, &shown)?;
            fs::write(&resolved.absolute, content).map_err(|e| OpFailure::io("write", &shown, e))?;
            tracing::info!(path = %shown, bytes = content.len(), "File written");
            Ok(())
        });
        FileOpResult::from_outcome(self.display_input(path), outcome)
    }

    /// Append `content`, creating the file if needed.
    pub fn append(&self, path: &str, content: &str) -> FileOpResult {
        let outcome = self.resolve(path).and_then(|resolved| {
            let shown = self.display(&resolved);
            if resolved.absolute.is_dir() {
                return Err(OpFailure::new(errors::NOT_A_FILE));
            }
            create_parent(&resolved.absolute, &shown)?;
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved.absolute)
                .map_err(|e| OpFailure::io("append", &shown, e))?;
            file.write_all(content.as_bytes())
                .map_err(|e| OpFailure::io("append", &shown, e))?;
            tracing::info!(path = %shown, bytes = content.len(), "File appended");
            Ok(())
        });
        FileOpResult::from_outcome(self.display_input(path), outcome)
    }

    /// Insert `content` before the existing bytes, creating the file if needed.
    pub fn prepend(&self, path: &str, content: &str) -> FileOpResult {
        let outcome = self.resolve(path).and_then(|resolved| {
            let shown = self.display(&resolved);
            if resolved.absolute.is_dir() {
                return Err(OpFailure::new(errors::NOT_A_FILE));
            }
            let existing = if resolved.absolute.exists() {
                fs::read(&resolved.absolute).map_err(|e| OpFailure::io("prepend", &shown, e))?
            } else {
                create_parent(&resolved.absolute, &shown)?;
                Vec::new()
            };
            let mut combined = Vec::with_capacity(content.len() + existing.len());
            combined.extend_from_slice(content.as_bytes());
            combined.extend_from_slice(&existing);
            fs::write(&resolved.absolute, combined)
                .map_err(|e| OpFailure::io("prepend", &shown, e))?;
            tracing::info!(path = %shown, bytes = content.len(), "File prepended");
            Ok(())
        });
        FileOpResult::from_outcome(self.display_input(path), outcome)
    }

    /// Read a file, base64-encoding it when classified binary.
    pub fn read(&self, path: &str) -> ReadResult {
        let shown = self.display_input(path);
        match self.read_bytes(path) {
            Ok((_, bytes)) => {
                tracing::debug!(path = %shown, bytes = bytes.len(), "File read");
                if is_binary(&bytes) {
                    ReadResult {
                        success: true,
                        path: shown,
                        content: Some(base64::engine::general_purpose::STANDARD.encode(&bytes)),
                        encoding: Some(ContentEncoding::Base64),
                        binary: true,
                        total_lines: None,
                        error: None,
                        detail: None,
                    }
                } else {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    ReadResult {
                        success: true,
                        path: shown,
                        total_lines: Some(line_count(&text)),
                        content: Some(text),
                        encoding: Some(ContentEncoding::Utf8),
                        binary: false,
                        error: None,
                        detail: None,
                    }
                }
            }
            Err(failure) => ReadResult::failed(shown, failure),
        }
    }

    /// Read the 1-based inclusive line window `[start, end]` of a text file.
    /// `end` defaults to the last line and is clamped to it.
    pub fn read_range(&self, path: &str, start: usize, end: Option<usize>) -> ReadResult {
        let shown = self.display_input(path);
        let (_, text) = match self.read_text(path) {
            Ok(found) => found,
            Err(failure) => return ReadResult::failed(shown, failure),
        };
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let total = lines.len();
        let end = end.unwrap_or(total).min(total);
        if start == 0 || (total > 0 && start > total) || (total > 0 && end < start) {
            return ReadResult::failed(
                shown,
                OpFailure::with_detail(
                    errors::INVALID_LINE_RANGE,
                    format!("requested {}..{} of {} lines", start, end, total),
                ),
            );
        }
        let window = if total == 0 {
            String::new()
        } else {
            lines[start - 1..end].concat()
        };
        ReadResult {
            success: true,
            path: shown,
            content: Some(window),
            encoding: Some(ContentEncoding::Utf8),
            binary: false,
            total_lines: Some(total),
            error: None,
            detail: None,
        }
    }

    /// Copy a file or, recursively, a directory.
    pub fn copy(&self, source: &str, destination: &str) -> FileOpResult {
        let outcome = self.resolve(source).and_then(|src| {
            let dst = self.resolve(destination)?;
            let shown = self.display(&dst);
            if !src.absolute.exists() {
                return Err(OpFailure::with_detail(errors::PATH_NOT_FOUND, self.display(&src)));
            }
            if src.absolute == dst.absolute {
                // fs::copy would truncate the file before reading it.
                tracing::debug!(path = %shown, "Copy onto itself skipped");
                return Ok(());
            }
            if dst.absolute.is_dir() {
                return Err(OpFailure::new(errors::DESTINATION_EXISTS));
            }
            if src.absolute.is_dir() {
                if dst.absolute.starts_with(&src.absolute) {
                    return Err(OpFailure::with_detail(
                        errors::DESTINATION_EXISTS,
                        "destination is inside the source directory",
                    ));
                }
                copy_dir(&src.absolute, &dst.absolute, &shown)?;
            } else {
                create_parent(&dst.absolute, &shown)?;
                fs::copy(&src.absolute, &dst.absolute)
                    .map_err(|e| OpFailure::io("copy", &shown, e))?;
            }
            tracing::info!(from = %self.display(&src), to = %shown, "Path copied");
            Ok(())
        });
        FileOpResult::from_outcome(self.display_input(destination), outcome)
    }

    /// Move (rename) a file or directory.
    pub fn rename(&self, source: &str, destination: &str) -> FileOpResult {
        let outcome = self.resolve(source).and_then(|src| {
            let dst = self.resolve(destination)?;
            let shown = self.display(&dst);
            if !src.absolute.exists() {
                return Err(OpFailure::with_detail(errors::PATH_NOT_FOUND, self.display(&src)));
            }
            if src.absolute == self.scope.root() {
                return Err(OpFailure::new(errors::CANNOT_REMOVE_ROOT));
            }
            if dst.absolute.is_dir() {
                return Err(OpFailure::new(errors::DESTINATION_EXISTS));
            }
            if src.absolute.is_dir() && dst.absolute.starts_with(&src.absolute) {
                return Err(OpFailure::with_detail(
                    errors::DESTINATION_EXISTS,
                    "destination is inside the source directory",
                ));
            }
            create_parent(&dst.absolute, &shown)?;
            fs::rename(&src.absolute, &dst.absolute).map_err(|e| OpFailure::io("move", &shown, e))?;
            tracing::info!(from = %self.display(&src), to = %shown, "Path moved");
            Ok(())
        });
        FileOpResult::from_outcome(self.display_input(destination), outcome)
    }

    /// Remove a file, or a directory with everything under it.
    pub fn remove(&self, path: &str) -> FileOpResult {
        let outcome = self.resolve(path).and_then(|resolved| {
            let shown = self.display(&resolved);
            if resolved.absolute == self.scope.root() || resolved.absolute == self.scope.home() {
                return Err(OpFailure::new(errors::CANNOT_REMOVE_ROOT));
            }
            let metadata = match fs::symlink_metadata(&resolved.absolute) {
                Ok(m) => m,
                Err(_) => return Err(OpFailure::new(errors::PATH_NOT_FOUND)),
            };
            if metadata.is_dir() {
                fs::remove_dir_all(&resolved.absolute)
            } else {
                fs::remove_file(&resolved.absolute)
            }
            .map_err(|e| OpFailure::io("remove", &shown, e))?;
            tracing::info!(path = %shown, "Path removed");
            Ok(())
        });
        FileOpResult::from_outcome(self.display_input(path), outcome)
    }

    /// Create a directory and any missing parents.
    pub fn mkdir(&self, path: &str) -> FileOpResult {
        let outcome = self.resolve(path).and_then(|resolved| {
            let shown = self.display(&resolved);
            if resolved.absolute.is_file() {
                return Err(OpFailure::new(errors::NOT_A_DIRECTORY));
            }
            fs::create_dir_all(&resolved.absolute).map_err(|e| OpFailure::io("mkdir", &shown, e))?;
            tracing::info!(path = %shown, "Directory created");
            Ok(())
        });
        FileOpResult::from_outcome(self.display_input(path), outcome)
    }

    pub fn exists(&self, path: &str) -> ExistsResult {
        let shown = self.display_input(path);
        match self.resolve(path) {
            Ok(resolved) => ExistsResult {
                success: true,
                path: shown,
                exists: resolved.absolute.exists(),
                is_file: resolved.absolute.is_file(),
                is_dir: resolved.absolute.is_dir(),
                error: None,
            },
            Err(failure) => ExistsResult {
                success: false,
                path: shown,
                exists: false,
                is_file: false,
                is_dir: false,
                error: Some(failure.error.to_string()),
            },
        }
    }

    /// List a directory's immediate children, sorted by name.
    pub fn list_dir(&self, path: &str) -> ListResult {
        let shown = self.display_input(path);
        let listing = self.resolve(path).and_then(|resolved| {
            if !resolved.absolute.exists() {
                return Err(OpFailure::new(errors::PATH_NOT_FOUND));
            }
            if !resolved.absolute.is_dir() {
                return Err(OpFailure::new(errors::NOT_A_DIRECTORY));
            }
            let read_dir =
                fs::read_dir(&resolved.absolute).map_err(|e| OpFailure::io("list", &shown, e))?;
            let mut entries = Vec::new();
            for entry in read_dir {
                let entry = entry.map_err(|e| OpFailure::io("list", &shown, e))?;
                if self.scope.is_reserved(&entry.path()) {
                    continue;
                }
                let metadata = entry
                    .metadata()
                    .map_err(|e| OpFailure::io("list", &shown, e))?;
                entries.push(DirEntryInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: self.scope.workspace_relative(&entry.path()),
                    is_dir: metadata.is_dir(),
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                });
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        });
        match listing {
            Ok(entries) => {
                tracing::debug!(path = %shown, count = entries.len(), "Directory listed");
                ListResult {
                    success: true,
                    path: shown,
                    entries,
                    error: None,
                    detail: None,
                }
            }
            Err(failure) => ListResult {
                success: false,
                path: shown,
                entries: Vec::new(),
                error: Some(failure.error.to_string()),
                detail: failure.detail,
            },
        }
    }

    // =========================================================================
    // Primitives shared with the patch engine
    // =========================================================================

    /// Read raw bytes of an existing regular file.
    pub fn read_bytes(&self, path: &str) -> Result<(ResolvedPath, Vec<u8>), OpFailure> {
        let resolved = self.resolve(path)?;
        if !resolved.absolute.exists() {
            return Err(OpFailure::new(errors::FILE_NOT_FOUND));
        }
        if !resolved.absolute.is_file() {
            return Err(OpFailure::new(errors::NOT_A_FILE));
        }
        let shown = self.display(&resolved);
        let bytes = fs::read(&resolved.absolute).map_err(|e| OpFailure::io("read", &shown, e))?;
        Ok((resolved, bytes))
    }

    /// Read an existing file that must be UTF-8 text.
    pub fn read_text(&self, path: &str) -> Result<(ResolvedPath, String), OpFailure> {
        let (resolved, bytes) = self.read_bytes(path)?;
        if is_binary(&bytes) {
            return Err(OpFailure::new(errors::BINARY_FILE));
        }
        let text = String::from_utf8(bytes)
            .map_err(|_| OpFailure::with_detail(errors::BINARY_FILE, "file is not valid UTF-8"))?;
        Ok((resolved, text))
    }

    /// Replace a file's content via a temporary file in the same directory
    /// and a rename, so readers never observe a partial write.
    pub fn write_atomic(&self, resolved: &ResolvedPath, content: &str) -> Result<(), OpFailure> {
        let shown = self.display(resolved);
        let parent = resolved
            .absolute
            .parent()
            .unwrap_or_else(|| self.scope.home());
        fs::create_dir_all(parent).map_err(|e| OpFailure::io("write", &shown, e))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| OpFailure::io("write", &shown, e))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| OpFailure::io("write", &shown, e))?;
        if let Ok(metadata) = fs::metadata(&resolved.absolute) {
            // Keep the original mode (e.g. executable scripts).
            if let Err(e) = fs::set_permissions(tmp.path(), metadata.permissions()) {
                tracing::debug!(path = %shown, error = %e, "Could not carry file permissions over");
            }
        }
        tmp.persist(&resolved.absolute)
            .map_err(|e| OpFailure::io("write", &shown, e.error))?;
        tracing::info!(path = %shown, bytes = content.len(), "File written atomically");
        Ok(())
    }
}

/// Number of lines, counting a final unterminated line.
pub fn line_count(text: &str) -> usize {
    text.split_inclusive('\n').count()
}

fn create_parent(path: &Path, shown: &str) -> Result<(), OpFailure> {
    if let Some(parent) = path.parent() {
        if parent.is_file() {
            return Err(OpFailure::with_detail(
                errors::NOT_A_DIRECTORY,
                "a parent path component is a file",
            ));
        }
        fs::create_dir_all(parent).map_err(|e| OpFailure::io("mkdir", shown, e))?;
    }
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path, shown: &str) -> Result<(), OpFailure> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            OpFailure::io("copy", shown, e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed")
            }))
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| OpFailure::io("copy", shown, e))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map_err(|e| OpFailure::io("copy", shown, e))?;
        }
        // Symlinks are not followed or recreated.
    }
    Ok(())
}

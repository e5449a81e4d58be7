//! Positional text patching.
//!
//! Two entry points share one write path: [`PatchEngine::apply_text_patch`]
//! replaces an inclusive 1-based line range, and
//! [`PatchEngine::apply_unified_diff`] applies a (possibly multi-file) unified
//! diff strictly, without fuzzy offset search. Changed files are written
//! atomically; unchanged content is never rewritten and yields an empty diff.

pub mod unified;

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use devbox_core::WorkspaceScope;

use crate::errors::{self, OpFailure};
use crate::files::FileOps;

pub use unified::{DiffApplyResult, FilePatchResult};

/// Context lines around each change in rendered diffs.
pub const DIFF_CONTEXT_LINES: usize = 3;

/// Outcome of a structured line-range patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    pub success: bool,
    pub path: String,
    /// Unified diff of the applied change; empty when nothing changed.
    #[serde(default)]
    pub diff: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PatchResult {
    fn failed(path: String, failure: OpFailure) -> Self {
        Self {
            success: false,
            path,
            diff: String::new(),
            error: Some(failure.error.to_string()),
            detail: failure.detail,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatchEngine {
    files: FileOps,
}

impl PatchEngine {
    pub fn new(scope: WorkspaceScope) -> Self {
        Self {
            files: FileOps::new(scope),
        }
    }

    pub fn files(&self) -> &FileOps {
        &self.files
    }

    /// Replace lines `start_line..=end_line` of `path` with `replacement`.
    ///
    /// An empty replacement deletes the range. A non-empty replacement that
    /// lacks a final newline gets one when lines follow the range, so the
    /// next line is never merged into it.
    pub fn apply_text_patch(
        &self,
        path: &str,
        start_line: usize,
        end_line: usize,
        replacement: &str,
    ) -> PatchResult {
        let shown = self.files.display(&self.files.scope().resolve(path));
        let (resolved, original) = match self.files.read_text(path) {
            Ok(found) => found,
            Err(failure) => return PatchResult::failed(shown, failure),
        };

        let lines: Vec<&str> = original.split_inclusive('\n').collect();
        if start_line < 1 || end_line < start_line || end_line > lines.len() {
            return PatchResult::failed(
                shown,
                OpFailure::with_detail(
                    errors::INVALID_LINE_RANGE,
                    format!(
                        "lines {}..={} requested, file has {} lines",
                        start_line,
                        end_line,
                        lines.len()
                    ),
                ),
            );
        }

        let mut updated = String::with_capacity(original.len() + replacement.len());
        updated.extend(lines[..start_line - 1].iter().copied());
        updated.push_str(replacement);
        if !replacement.is_empty() && !replacement.ends_with('\n') && end_line < lines.len() {
            let replaced_last = lines[end_line - 1];
            updated.push_str(if replaced_last.ends_with("\r\n") { "\r\n" } else { "\n" });
        }
        updated.extend(lines[end_line..].iter().copied());

        if updated == original {
            tracing::debug!(path = %shown, "Text patch is a no-op");
            return PatchResult {
                success: true,
                path: shown,
                diff: String::new(),
                error: None,
                detail: None,
            };
        }

        if let Err(failure) = self.files.write_atomic(&resolved, &updated) {
            return PatchResult::failed(shown, failure);
        }
        tracing::info!(path = %shown, start_line, end_line, "Text patch applied");

        PatchResult {
            diff: render_diff(&shown, &original, &updated),
            success: true,
            path: shown,
            error: None,
            detail: None,
        }
    }

    /// Apply every file section of a unified diff independently.
    pub fn apply_unified_diff(&self, diff_text: &str) -> DiffApplyResult {
        unified::apply(&self.files, diff_text)
    }
}

/// Render the change from `before` to `after` as a unified diff with
/// `"<path> (before)"`/`"<path> (after)"` headers. Empty when identical.
pub fn render_diff(path: &str, before: &str, after: &str) -> String {
    if before == after {
        return String::new();
    }
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(DIFF_CONTEXT_LINES)
        .header(&format!("{} (before)", path), &format!("{} (after)", path))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine_with(content: &str) -> (TempDir, PatchEngine) {
        let home = TempDir::new().unwrap();
        let scope = WorkspaceScope::new(home.path(), "/home/user")
            .with_workspace("ws")
            .unwrap();
        let engine = PatchEngine::new(scope);
        assert!(engine.files().write("f.txt", content).success);
        (home, engine)
    }

    fn read(home: &TempDir) -> String {
        std::fs::read_to_string(home.path().join("ws/f.txt")).unwrap()
    }

    #[test]
    fn test_replace_single_line() {
        let (home, engine) = engine_with("alpha\nbeta\ngamma\n");
        let result = engine.apply_text_patch("f.txt", 2, 2, "delta\n");
        assert!(result.success);
        assert!(result.diff.contains("-beta"));
        assert!(result.diff.contains("+delta"));
        assert!(result.diff.contains("f.txt (before)"));
        assert!(result.diff.contains("f.txt (after)"));
        assert_eq!(read(&home), "alpha\ndelta\ngamma\n");
    }

    #[test]
    fn test_invalid_ranges_leave_file_untouched() {
        let (home, engine) = engine_with("a\nb\nc\n");
        for (start, end) in [(0, 1), (3, 2), (1, 4), (4, 4)] {
            let result = engine.apply_text_patch("f.txt", start, end, "x\n");
            assert!(!result.success, "{start}..{end} should fail");
            assert_eq!(result.error.as_deref(), Some(errors::INVALID_LINE_RANGE));
            assert!(result.diff.is_empty());
        }
        assert_eq!(read(&home), "a\nb\nc\n");
    }

    #[test]
    fn test_identical_replacement_is_noop() {
        let (home, engine) = engine_with("a\nb\nc\n");
        let before = std::fs::metadata(home.path().join("ws/f.txt"))
            .unwrap()
            .modified()
            .unwrap();

        let result = engine.apply_text_patch("f.txt", 2, 2, "b\n");
        assert!(result.success);
        assert_eq!(result.diff, "");

        // Missing newline is restored, so this is also identical.
        let result = engine.apply_text_patch("f.txt", 2, 2, "b");
        assert!(result.success);
        assert_eq!(result.diff, "");

        let after = std::fs::metadata(home.path().join("ws/f.txt"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_multi_line_and_deletion() {
        let (home, engine) = engine_with("1\n2\n3\n4\n");
        let result = engine.apply_text_patch("f.txt", 2, 3, "two\nthree\nextra\n");
        assert!(result.success);
        assert_eq!(read(&home), "1\ntwo\nthree\nextra\n4\n");

        let result = engine.apply_text_patch("f.txt", 2, 4, "");
        assert!(result.success);
        assert!(result.diff.contains("-two"));
        assert_eq!(read(&home), "1\n4\n");
    }

    #[test]
    fn test_last_line_without_newline() {
        let (home, engine) = engine_with("a\nb");
        let result = engine.apply_text_patch("f.txt", 2, 2, "c");
        assert!(result.success);
        assert_eq!(read(&home), "a\nc");
    }

    #[test]
    fn test_crlf_preserved_for_following_line() {
        let (home, engine) = engine_with("a\r\nb\r\nc\r\n");
        let result = engine.apply_text_patch("f.txt", 1, 1, "z");
        assert!(result.success);
        assert_eq!(read(&home), "z\r\nb\r\nc\r\n");
    }

    #[test]
    fn test_missing_and_binary_files() {
        let (home, engine) = engine_with("a\n");
        let result = engine.apply_text_patch("missing.txt", 1, 1, "x");
        assert_eq!(result.error.as_deref(), Some(errors::FILE_NOT_FOUND));

        std::fs::write(home.path().join("ws/blob.bin"), [0u8, 1, 2, b'\n']).unwrap();
        let result = engine.apply_text_patch("blob.bin", 1, 1, "x");
        assert_eq!(result.error.as_deref(), Some(errors::BINARY_FILE));
    }

    #[test]
    fn test_render_diff_empty_when_identical() {
        assert_eq!(render_diff("p", "same\n", "same\n"), "");
        let diff = render_diff("p", "a\n", "b\n");
        assert!(diff.starts_with("--- p (before)\n+++ p (after)\n"));
        assert!(diff.contains("@@ -1 +1 @@"));
    }
}

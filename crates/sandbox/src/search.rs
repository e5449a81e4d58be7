//! Recursive grep over the workspace with globstar include/exclude filters.

use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use devbox_core::WorkspaceScope;

use crate::errors::{self, OpFailure};
use crate::files::is_binary;

pub const DEFAULT_MAX_RESULTS: usize = 1000;

/// Directory names never descended into.
pub const BASELINE_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".tox",
    "target",
];

/// File globs always excluded, on top of caller excludes.
pub const BASELINE_EXCLUDED_FILES: &[&str] = &[
    "**/*.pyc",
    "**/*.pyo",
    "**/*.lock",
    "**/package-lock.json",
    "**/pnpm-lock.yaml",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrepOptions {
    /// Only files matching at least one of these are searched (all when empty).
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Treat the pattern as a regex; otherwise it is matched literally.
    pub regex: bool,
    pub case_sensitive: bool,
    pub max_results: usize,
    /// Subdirectory to search instead of the whole workspace.
    pub path: Option<String>,
}

impl Default for GrepOptions {
    fn default() -> Self {
        Self {
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            regex: true,
            case_sensitive: false,
            max_results: DEFAULT_MAX_RESULTS,
            path: None,
        }
    }
}

/// One matching line. Columns are 0-based character offsets, end-exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: usize,
    pub line: String,
    pub column_start: usize,
    pub column_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepResult {
    pub success: bool,
    pub matches: Vec<GrepMatch>,
    /// More matches existed beyond `max_results`.
    pub truncated: bool,
    pub files_searched: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GrepResult {
    fn empty() -> Self {
        Self {
            success: true,
            matches: Vec::new(),
            truncated: false,
            files_searched: 0,
            error: None,
            detail: None,
        }
    }

    fn failed(failure: OpFailure) -> Self {
        Self {
            success: false,
            error: Some(failure.error.to_string()),
            detail: failure.detail,
            ..Self::empty()
        }
    }
}

/// Expand every `**/` segment into a kept and a dropped variant so that
/// `a/**/b` also matches `a/b`.
pub fn expand_globstar(pattern: &str) -> Vec<String> {
    let at_segment_start = |idx: usize| idx == 0 || pattern.as_bytes()[idx - 1] == b'/';
    let position = pattern
        .match_indices("**/")
        .map(|(idx, _)| idx)
        .find(|idx| at_segment_start(*idx));

    let Some(idx) = position else {
        return vec![pattern.to_string()];
    };
    let head = &pattern[..idx];
    let mut expanded = Vec::new();
    for rest in expand_globstar(&pattern[idx + 3..]) {
        for candidate in [format!("{}**/{}", head, rest), format!("{}{}", head, rest)] {
            if !expanded.contains(&candidate) {
                expanded.push(candidate);
            }
        }
    }
    expanded
}

/// Compile globs into one set. With `cover_contents`, every pattern also
/// matches everything beneath a directory it names, so an exclude like
/// `dist` or `dist/` drops the whole tree.
fn build_globset<'a>(
    patterns: impl IntoIterator<Item = &'a str>,
    cover_contents: bool,
) -> Result<GlobSet, OpFailure> {
    let mut builder = GlobSetBuilder::new();
    for raw in patterns {
        let raw = raw.trim().trim_start_matches("./");
        let raw = if cover_contents {
            raw.trim_end_matches('/')
        } else {
            raw
        };
        // A slashless glob names a file at any depth.
        let normalized = if raw.contains('/') {
            raw.to_string()
        } else {
            format!("**/{}", raw)
        };
        let mut variants = vec![normalized.clone()];
        if cover_contents && !normalized.ends_with("**") {
            variants.push(format!("{}/**", normalized));
        }
        for pattern in variants.iter().flat_map(|v| expand_globstar(v)) {
            let glob = GlobBuilder::new(&pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| OpFailure::with_detail(errors::INVALID_GLOB, format!("{}: {}", raw, e)))?;
            builder.add(glob);
        }
    }
    builder
        .build()
        .map_err(|e| OpFailure::with_detail(errors::INVALID_GLOB, e.to_string()))
}

fn build_regex(pattern: &str, options: &GrepOptions) -> Result<Regex, OpFailure> {
    if pattern.is_empty() {
        return Err(OpFailure::with_detail(errors::INVALID_REGEX, "pattern is empty"));
    }
    let source = if options.regex {
        pattern.to_string()
    } else {
        regex::escape(pattern)
    };
    RegexBuilder::new(&source)
        .case_insensitive(!options.case_sensitive)
        .build()
        .map_err(|e| OpFailure::with_detail(errors::INVALID_REGEX, e.to_string()))
}

/// Grep bound to one workspace scope.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    scope: WorkspaceScope,
}

impl SearchEngine {
    pub fn new(scope: WorkspaceScope) -> Self {
        Self { scope }
    }

    pub fn grep(&self, pattern: &str, options: &GrepOptions) -> GrepResult {
        match self.try_grep(pattern, options) {
            Ok(result) => result,
            Err(failure) => {
                tracing::debug!(pattern = %pattern, error = %failure, "Grep rejected");
                GrepResult::failed(failure)
            }
        }
    }

    fn try_grep(&self, pattern: &str, options: &GrepOptions) -> Result<GrepResult, OpFailure> {
        let regex = build_regex(pattern, options)?;
        let includes = if options.include_globs.is_empty() {
            None
        } else {
            Some(build_globset(
                options.include_globs.iter().map(String::as_str),
                false,
            )?)
        };
        let excludes = build_globset(
            BASELINE_EXCLUDED_FILES
                .iter()
                .copied()
                .chain(options.exclude_globs.iter().map(String::as_str)),
            true,
        )?;
        let max_results = options.max_results.max(1);

        let root = match &options.path {
            Some(sub) => {
                let resolved = self.scope.resolve(sub);
                self.scope
                    .ensure_contained(&resolved)
                    .map_err(|e| OpFailure::with_detail(errors::PATH_ESCAPES_SANDBOX, e.to_string()))?;
                resolved.absolute
            }
            None => self.scope.root(),
        };

        let mut result = GrepResult::empty();
        if !root.exists() {
            return Ok(result);
        }

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if self.scope.is_reserved(entry.path()) {
                    return false;
                }
                !(entry.depth() > 0
                    && entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| BASELINE_EXCLUDED_DIRS.contains(&name)))
            });

        'files: for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = self.scope.workspace_relative(entry.path());
            let rel_path = Path::new(&relative);
            if excludes.is_match(rel_path) {
                continue;
            }
            if let Some(includes) = &includes {
                if !includes.is_match(rel_path) {
                    continue;
                }
            }

            let bytes = match std::fs::read(entry.path()) {
                Ok(b) => b,
                Err(e) => {
                    tracing::debug!(path = %relative, error = %e, "Skipping unreadable file");
                    continue;
                }
            };
            if is_binary(&bytes) {
                continue;
            }
            result.files_searched += 1;

            let text = String::from_utf8_lossy(&bytes);
            for (index, line) in text.lines().enumerate() {
                let Some(found) = regex.find(line) else {
                    continue;
                };
                if result.matches.len() == max_results {
                    result.truncated = true;
                    break 'files;
                }
                let column_start = line[..found.start()].chars().count();
                result.matches.push(GrepMatch {
                    path: relative.clone(),
                    line_number: index + 1,
                    line: line.to_string(),
                    column_start,
                    column_end: column_start + found.as_str().chars().count(),
                });
            }
        }

        tracing::debug!(
            pattern = %pattern,
            matches = result.matches.len(),
            files = result.files_searched,
            truncated = result.truncated,
            "Grep finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus(files: &[(&str, &str)]) -> (TempDir, SearchEngine) {
        let home = TempDir::new().unwrap();
        for (path, content) in files {
            let full = home.path().join("ws").join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        let scope = WorkspaceScope::new(home.path(), "/home/user")
            .with_workspace("ws")
            .unwrap();
        (home, SearchEngine::new(scope))
    }

    fn paths(result: &GrepResult) -> Vec<&str> {
        let mut p: Vec<&str> = result.matches.iter().map(|m| m.path.as_str()).collect();
        p.dedup();
        p
    }

    #[test]
    fn test_expand_globstar() {
        assert_eq!(expand_globstar("*.rs"), vec!["*.rs"]);
        assert_eq!(expand_globstar("src/**/*.rs"), vec!["src/**/*.rs", "src/*.rs"]);
        assert_eq!(
            expand_globstar("**/a/**/b"),
            vec!["**/a/**/b", "a/**/b", "**/a/b", "a/b"]
        );
        // Not at a segment boundary, left alone.
        assert_eq!(expand_globstar("x**/y"), vec!["x**/y"]);
    }

    #[test]
    fn test_basic_match_and_columns() {
        let (_home, engine) = corpus(&[("src/app.py", "import os\nprint('Hello')\n")]);
        let result = engine.grep("hello", &GrepOptions::default());
        assert!(result.success);
        assert_eq!(result.matches.len(), 1);
        let m = &result.matches[0];
        assert_eq!(m.path, "src/app.py");
        assert_eq!(m.line_number, 2);
        assert_eq!(m.line, "print('Hello')");
        assert_eq!((m.column_start, m.column_end), (7, 12));
        assert_eq!(result.files_searched, 1);
    }

    #[test]
    fn test_case_sensitive_and_literal() {
        let (_home, engine) = corpus(&[("a.txt", "Value a.b\nvalue axb\n")]);
        let opts = GrepOptions {
            case_sensitive: true,
            ..Default::default()
        };
        assert_eq!(engine.grep("value", &opts).matches.len(), 1);

        let opts = GrepOptions {
            regex: false,
            ..Default::default()
        };
        let result = engine.grep("a.b", &opts);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].line_number, 1);
    }

    #[test]
    fn test_anchors_are_per_line() {
        let (_home, engine) = corpus(&[("a.txt", "start here\nnot start\n")]);
        let result = engine.grep("^start", &GrepOptions::default());
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].line_number, 1);
    }

    #[test]
    fn test_unicode_columns_are_chars() {
        let (_home, engine) = corpus(&[("u.txt", "héllo wörld\n")]);
        let result = engine.grep("wörld", &GrepOptions::default());
        assert_eq!(
            (result.matches[0].column_start, result.matches[0].column_end),
            (6, 11)
        );
    }

    #[test]
    fn test_truncation() {
        let content = "hit\n".repeat(10);
        let (_home, engine) = corpus(&[("many.txt", content.as_str())]);
        let opts = GrepOptions {
            max_results: 3,
            ..Default::default()
        };
        let result = engine.grep("hit", &opts);
        assert_eq!(result.matches.len(), 3);
        assert!(result.truncated);

        let opts = GrepOptions {
            max_results: 10,
            ..Default::default()
        };
        let result = engine.grep("hit", &opts);
        assert_eq!(result.matches.len(), 10);
        assert!(!result.truncated);
    }

    #[test]
    fn test_include_globstar_zero_dirs() {
        let (_home, engine) = corpus(&[
            ("src/lib.rs", "needle\n"),
            ("src/deep/mod.rs", "needle\n"),
            ("docs/notes.md", "needle\n"),
        ]);
        let opts = GrepOptions {
            include_globs: vec!["src/**/*.rs".into()],
            ..Default::default()
        };
        assert_eq!(
            paths(&engine.grep("needle", &opts)),
            vec!["src/deep/mod.rs", "src/lib.rs"]
        );

        let opts = GrepOptions {
            include_globs: vec!["*.md".into()],
            ..Default::default()
        };
        assert_eq!(paths(&engine.grep("needle", &opts)), vec!["docs/notes.md"]);
    }

    #[test]
    fn test_single_star_does_not_cross_directories() {
        let (_home, engine) = corpus(&[("src/a.rs", "x\n"), ("src/sub/b.rs", "x\n")]);
        let opts = GrepOptions {
            include_globs: vec!["src/*.rs".into()],
            ..Default::default()
        };
        assert_eq!(paths(&engine.grep("x", &opts)), vec!["src/a.rs"]);
    }

    #[test]
    fn test_baseline_and_caller_excludes() {
        let (_home, engine) = corpus(&[
            (".git/config", "needle\n"),
            ("node_modules/pkg/index.js", "needle\n"),
            ("pkg/__pycache__/m.txt", "needle\n"),
            ("Cargo.lock", "needle\n"),
            ("app/package-lock.json", "needle\n"),
            ("build/out.txt", "needle\n"),
            ("main.txt", "needle\n"),
        ]);
        let result = engine.grep("needle", &GrepOptions::default());
        assert_eq!(paths(&result), vec!["build/out.txt", "main.txt"]);

        let opts = GrepOptions {
            exclude_globs: vec!["build/**".into()],
            ..Default::default()
        };
        assert_eq!(paths(&engine.grep("needle", &opts)), vec!["main.txt"]);
    }

    #[test]
    fn test_excluding_a_directory_name_drops_its_contents() {
        let (_home, engine) = corpus(&[
            ("dist/bundle.js", "needle\n"),
            ("web/dist/chunk.js", "needle\n"),
            ("src/a.js", "needle\n"),
            ("src/dist.js", "needle\n"),
        ]);
        for exclude in ["dist", "dist/", "./dist"] {
            let opts = GrepOptions {
                exclude_globs: vec![exclude.into()],
                ..Default::default()
            };
            assert_eq!(
                paths(&engine.grep("needle", &opts)),
                vec!["src/a.js", "src/dist.js"],
                "exclude {exclude:?}"
            );
        }

        let opts = GrepOptions {
            exclude_globs: vec!["web/dist".into()],
            ..Default::default()
        };
        assert_eq!(
            paths(&engine.grep("needle", &opts)),
            vec!["dist/bundle.js", "src/a.js", "src/dist.js"]
        );
    }

    #[test]
    fn test_plans_dir_never_searched() {
        let home = TempDir::new().unwrap();
        let plans = home.path().join("implementation_plans/proj");
        std::fs::create_dir_all(&plans).unwrap();
        std::fs::write(plans.join("plan.json"), "{\"goal\":\"secret\"}").unwrap();
        std::fs::write(home.path().join("notes.txt"), "secret\n").unwrap();
        let engine = SearchEngine::new(WorkspaceScope::new(home.path(), "/home/user"));

        let result = engine.grep("secret", &GrepOptions::default());
        assert_eq!(paths(&result), vec!["notes.txt"]);

        let opts = GrepOptions {
            path: Some("implementation_plans".into()),
            ..Default::default()
        };
        let result = engine.grep("secret", &opts);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(errors::PATH_ESCAPES_SANDBOX));
    }

    #[test]
    fn test_binary_files_skipped() {
        let (home, engine) = corpus(&[("text.txt", "needle\n")]);
        std::fs::write(home.path().join("ws/blob.bin"), b"needle\0\x01").unwrap();
        let result = engine.grep("needle", &GrepOptions::default());
        assert_eq!(paths(&result), vec!["text.txt"]);
        assert_eq!(result.files_searched, 1);
    }

    #[test]
    fn test_invalid_inputs() {
        let (_home, engine) = corpus(&[("a.txt", "x\n")]);
        let result = engine.grep("(unclosed", &GrepOptions::default());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(errors::INVALID_REGEX));

        let opts = GrepOptions {
            include_globs: vec!["src/[".into()],
            ..Default::default()
        };
        let result = engine.grep("x", &opts);
        assert_eq!(result.error.as_deref(), Some(errors::INVALID_GLOB));

        assert_eq!(
            engine.grep("", &GrepOptions::default()).error.as_deref(),
            Some(errors::INVALID_REGEX)
        );
    }

    #[test]
    fn test_subdirectory_and_missing_root() {
        let (_home, engine) = corpus(&[("a/x.txt", "hit\n"), ("b/y.txt", "hit\n")]);
        let opts = GrepOptions {
            path: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(paths(&engine.grep("hit", &opts)), vec!["b/y.txt"]);

        let opts = GrepOptions {
            path: Some("nowhere".into()),
            ..Default::default()
        };
        let result = engine.grep("hit", &opts);
        assert!(result.success);
        assert!(result.matches.is_empty());
    }
}

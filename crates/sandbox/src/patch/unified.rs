//! Unified diff tokenizer, parser and strict applier.
//!
//! Parsing is split in two passes. [`tokenize`] classifies every line into a
//! [`DiffToken`]; [`parse`] folds the tokens into one [`FilePatch`] per
//! `---`/`+++` header pair. Application then walks each target file's lines
//! and requires every context and removal line to match exactly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{self, OpFailure};
use crate::files::FileOps;
use crate::patch::render_diff;

/// Header path meaning "no file on this side".
pub const NULL_PATH: &str = "/dev/null";

// =============================================================================
// Tokens
// =============================================================================

/// Line counts and starts from an `@@ -a,b +c,d @@` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkRange {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
}

/// One classified line of diff text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffToken<'a> {
    /// `--- path`, with prefixes and timestamps stripped. `None` is `/dev/null`.
    FileOld(Option<&'a str>),
    /// `+++ path`.
    FileNew(Option<&'a str>),
    HunkHeader(HunkRange),
    Context(&'a str),
    Removal(&'a str),
    Addition(&'a str),
    /// A completely empty line inside a hunk.
    Blank,
    /// `\ No newline at end of file`.
    NoNewlineMarker,
    /// Anything outside a hunk: `diff --git`, `index`, commentary.
    Noise(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: malformed hunk header {text:?}")]
    MalformedHunkHeader { line: usize, text: String },

    #[error("line {line}: hunk header before any ---/+++ file header")]
    HunkOutsideFile { line: usize },

    #[error("line {line}: hunk has no body lines")]
    EmptyHunk { line: usize },

    #[error("file header for {path} has no hunks")]
    FileWithoutHunks { path: String },

    #[error("no ---/+++ file headers found")]
    NoFiles,
}

/// Classify every line of `text`.
///
/// Header counts do not bound a hunk: bodies may run past them. They do
/// decide whether a `--- `/`+++ ` pair inside a hunk is a removal and an
/// addition or the next file header. While both sides still expect lines,
/// the pair is body unless a hunk header follows it and the hunk could not
/// end with exactly those two lines.
pub fn tokenize(text: &str) -> Result<Vec<DiffToken<'_>>, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut tokens = Vec::with_capacity(lines.len());
    let mut in_hunk = false;
    // Old and new lines the current hunk header still expects.
    let mut remaining = (0usize, 0usize);
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if line.starts_with("--- ") || line == "---" {
            if let Some(next) = lines.get(i + 1) {
                if next.starts_with("+++ ") || *next == "+++" {
                    let counts_open = in_hunk && remaining.0 > 0 && remaining.1 > 0;
                    let hunk_follows = lines.get(i + 2).is_some_and(|l| l.starts_with("@@"));
                    if !counts_open || (hunk_follows && remaining != (1, 1)) {
                        tokens.push(DiffToken::FileOld(header_path(line, "a/")));
                        tokens.push(DiffToken::FileNew(header_path(next, "b/")));
                        in_hunk = false;
                        remaining = (0, 0);
                        i += 2;
                        continue;
                    }
                }
            }
        }

        if line.starts_with("@@") {
            let range = parse_hunk_header(line).ok_or_else(|| ParseError::MalformedHunkHeader {
                line: i + 1,
                text: line.to_string(),
            })?;
            tokens.push(DiffToken::HunkHeader(range));
            in_hunk = true;
            remaining = (range.old_count, range.new_count);
            i += 1;
            continue;
        }

        let token = if in_hunk {
            let token = match line.as_bytes().first() {
                None => DiffToken::Blank,
                Some(b' ') => DiffToken::Context(&line[1..]),
                Some(b'-') => DiffToken::Removal(&line[1..]),
                Some(b'+') => DiffToken::Addition(&line[1..]),
                Some(b'\\') => DiffToken::NoNewlineMarker,
                Some(_) => {
                    in_hunk = false;
                    remaining = (0, 0);
                    DiffToken::Noise(line)
                }
            };
            remaining = match token {
                DiffToken::Blank | DiffToken::Context(_) => {
                    (remaining.0.saturating_sub(1), remaining.1.saturating_sub(1))
                }
                DiffToken::Removal(_) => (remaining.0.saturating_sub(1), remaining.1),
                DiffToken::Addition(_) => (remaining.0, remaining.1.saturating_sub(1)),
                _ => remaining,
            };
            token
        } else {
            DiffToken::Noise(line)
        };
        tokens.push(token);
        i += 1;
    }

    Ok(tokens)
}

fn header_path<'a>(line: &'a str, git_prefix: &str) -> Option<&'a str> {
    let raw = line.get(4..).unwrap_or("");
    // Timestamps follow a tab: "--- file.txt\t2024-01-01 00:00:00"
    let raw = raw.split('\t').next().unwrap_or("").trim_end();
    if raw == NULL_PATH || raw.is_empty() {
        return None;
    }
    Some(raw.strip_prefix(git_prefix).unwrap_or(raw))
}

fn parse_hunk_header(line: &str) -> Option<HunkRange> {
    let body = line.strip_prefix("@@")?.trim_start();
    let end = body.find("@@")?;
    let mut parts = body[..end].split_whitespace();
    let (old_start, old_count) = parse_side(parts.next()?.strip_prefix('-')?)?;
    let (new_start, new_count) = parse_side(parts.next()?.strip_prefix('+')?)?;
    if parts.next().is_some() {
        return None;
    }
    Some(HunkRange {
        old_start,
        old_count,
        new_start,
        new_count,
    })
}

fn parse_side(side: &str) -> Option<(usize, usize)> {
    match side.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((side.parse().ok()?, 1)),
    }
}

// =============================================================================
// Parsed representation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Removal(String),
    Addition(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub range: HunkRange,
    pub lines: Vec<HunkLine>,
    /// The hunk's final added line carries no trailing newline.
    pub missing_newline: bool,
}

impl Hunk {
    /// Number of original lines the body consumes (context + removals).
    pub fn old_len(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Addition(_)))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    /// Path used to report this file.
    pub fn display_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or(NULL_PATH)
    }
}

/// Parse diff text into per-file patches.
pub fn parse(text: &str) -> Result<Vec<FilePatch>, ParseError> {
    let tokens = tokenize(text)?;
    let mut files: Vec<FilePatch> = Vec::new();
    let mut current: Option<FilePatch> = None;
    let mut hunk: Option<(usize, Hunk)> = None;
    // Blank lines only count as context when more body follows them.
    let mut pending_blanks = 0usize;

    fn close_hunk(
        hunk: &mut Option<(usize, Hunk)>,
        current: &mut Option<FilePatch>,
    ) -> Result<(), ParseError> {
        if let Some((line, h)) = hunk.take() {
            if h.lines.is_empty() {
                return Err(ParseError::EmptyHunk { line });
            }
            if let Some(file) = current.as_mut() {
                file.hunks.push(h);
            }
        }
        Ok(())
    }

    fn close_file(
        current: &mut Option<FilePatch>,
        files: &mut Vec<FilePatch>,
    ) -> Result<(), ParseError> {
        if let Some(file) = current.take() {
            if file.hunks.is_empty() {
                return Err(ParseError::FileWithoutHunks {
                    path: file.display_path().to_string(),
                });
            }
            files.push(file);
        }
        Ok(())
    }

    fn push_body(hunk: &mut Option<(usize, Hunk)>, pending_blanks: &mut usize, line: HunkLine) {
        if let Some((_, h)) = hunk.as_mut() {
            for _ in 0..*pending_blanks {
                h.lines.push(HunkLine::Context(String::new()));
            }
            h.lines.push(line);
        }
        *pending_blanks = 0;
    }

    // Tokens map one-to-one onto input lines.
    let mut line_no = 0usize;
    for token in tokens {
        line_no += 1;
        match token {
            DiffToken::FileOld(path) => {
                close_hunk(&mut hunk, &mut current)?;
                close_file(&mut current, &mut files)?;
                pending_blanks = 0;
                current = Some(FilePatch {
                    old_path: path.map(str::to_string),
                    new_path: None,
                    hunks: Vec::new(),
                });
            }
            DiffToken::FileNew(path) => {
                if let Some(file) = current.as_mut() {
                    file.new_path = path.map(str::to_string);
                }
            }
            DiffToken::HunkHeader(range) => {
                close_hunk(&mut hunk, &mut current)?;
                pending_blanks = 0;
                if current.is_none() {
                    return Err(ParseError::HunkOutsideFile { line: line_no });
                }
                hunk = Some((
                    line_no,
                    Hunk {
                        range,
                        lines: Vec::new(),
                        missing_newline: false,
                    },
                ));
            }
            DiffToken::Blank => pending_blanks += 1,
            DiffToken::Context(text) => {
                push_body(&mut hunk, &mut pending_blanks, HunkLine::Context(text.to_string()))
            }
            DiffToken::Removal(text) => {
                push_body(&mut hunk, &mut pending_blanks, HunkLine::Removal(text.to_string()))
            }
            DiffToken::Addition(text) => {
                push_body(&mut hunk, &mut pending_blanks, HunkLine::Addition(text.to_string()))
            }
            DiffToken::NoNewlineMarker => {
                if let Some((_, h)) = hunk.as_mut() {
                    if matches!(h.lines.last(), Some(HunkLine::Addition(_))) {
                        h.missing_newline = true;
                    }
                }
            }
            DiffToken::Noise(_) => {
                close_hunk(&mut hunk, &mut current)?;
                pending_blanks = 0;
            }
        }
    }
    close_hunk(&mut hunk, &mut current)?;
    close_file(&mut current, &mut files)?;

    if files.is_empty() {
        return Err(ParseError::NoFiles);
    }
    Ok(files)
}

// =============================================================================
// Application
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatchResult {
    pub path: String,
    pub success: bool,
    /// Diff of what actually changed on disk; empty when nothing changed.
    #[serde(default)]
    pub diff: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffApplyResult {
    /// True only when every file section applied.
    pub success: bool,
    pub files: Vec<FilePatchResult>,
    /// First failure, repeated here so callers can branch without scanning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A line of the file being rebuilt: content plus its terminator.
struct Line<'a> {
    text: std::borrow::Cow<'a, str>,
    eol: &'a str,
}

pub(crate) fn apply(files: &FileOps, diff_text: &str) -> DiffApplyResult {
    let patches = match parse(diff_text) {
        Ok(patches) => patches,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected unparseable diff");
            return DiffApplyResult {
                success: false,
                files: Vec::new(),
                error: Some(errors::INVALID_DIFF.to_string()),
                detail: Some(e.to_string()),
            };
        }
    };

    let results: Vec<FilePatchResult> = patches
        .iter()
        .map(|patch| apply_file(files, patch))
        .collect();

    let first_failure = results.iter().find(|r| !r.success);
    DiffApplyResult {
        success: first_failure.is_none(),
        error: first_failure.and_then(|r| r.error.clone()),
        detail: first_failure.and_then(|r| {
            r.detail
                .as_ref()
                .map(|d| format!("{}: {}", r.path, d))
                .or_else(|| Some(r.path.clone()))
        }),
        files: results,
    }
}

fn apply_file(files: &FileOps, patch: &FilePatch) -> FilePatchResult {
    let reported = patch.display_path().to_string();
    let failed = |path: String, failure: OpFailure| FilePatchResult {
        path,
        success: false,
        diff: String::new(),
        error: Some(failure.error.to_string()),
        detail: failure.detail,
    };

    let target = match (&patch.old_path, &patch.new_path) {
        (_, None) => return failed(reported, OpFailure::new(errors::DELETION_NOT_SUPPORTED)),
        (None, Some(_)) => return failed(reported, OpFailure::new(errors::CREATION_NOT_SUPPORTED)),
        (Some(_), Some(new)) => new.as_str(),
    };
    let shown = files.display(&files.scope().resolve(target));

    let (resolved, original) = match files.read_text(target) {
        Ok(found) => found,
        Err(failure) => return failed(shown, failure),
    };

    let updated = match rebuild(&original, &patch.hunks) {
        Ok(updated) => updated,
        Err(failure) => {
            tracing::warn!(path = %shown, error = %failure, "Diff did not apply");
            return failed(shown, failure);
        }
    };

    if updated == original {
        return FilePatchResult {
            path: shown,
            success: true,
            diff: String::new(),
            error: None,
            detail: None,
        };
    }

    if let Err(failure) = files.write_atomic(&resolved, &updated) {
        return failed(shown, failure);
    }
    tracing::info!(path = %shown, hunks = patch.hunks.len(), "Unified diff applied");

    FilePatchResult {
        diff: render_diff(&shown, &original, &updated),
        path: shown,
        success: true,
        error: None,
        detail: None,
    }
}

/// Rebuild `original` with `hunks` applied, or explain the first mismatch.
fn rebuild(original: &str, hunks: &[Hunk]) -> Result<String, OpFailure> {
    let source: Vec<Line<'_>> = original
        .split_inclusive('\n')
        .map(|raw| {
            let (text, eol) = split_eol(raw);
            Line {
                text: text.into(),
                eol,
            }
        })
        .collect();
    let default_eol = source
        .first()
        .map(|l| if l.eol == "\r\n" { "\r\n" } else { "\n" })
        .unwrap_or("\n");

    let mut output: Vec<Line<'_>> = Vec::with_capacity(source.len());
    let mut cursor = 0usize;

    for (index, hunk) in hunks.iter().enumerate() {
        let hunk_no = index + 1;
        // Pure insertions name the line they follow; others the first line consumed.
        let position = if hunk.old_len() == 0 {
            hunk.range.old_start
        } else {
            hunk.range.old_start.saturating_sub(1)
        };
        if position < cursor {
            return Err(OpFailure::with_detail(
                errors::HUNK_OUT_OF_ORDER,
                format!(
                    "hunk {} starts at line {} but the previous hunk ended at line {}",
                    hunk_no, hunk.range.old_start, cursor
                ),
            ));
        }
        if position > source.len() {
            return Err(OpFailure::with_detail(
                errors::HUNK_OUT_OF_RANGE,
                format!(
                    "hunk {} starts at line {} but the file has {} lines",
                    hunk_no,
                    hunk.range.old_start,
                    source.len()
                ),
            ));
        }

        for line in &source[cursor..position] {
            output.push(Line {
                text: line.text.clone(),
                eol: line.eol,
            });
        }
        let mut at = position;

        for body in &hunk.lines {
            match body {
                HunkLine::Context(expected) | HunkLine::Removal(expected) => {
                    let actual = source.get(at);
                    if actual.map(|l| l.text.as_ref()) != Some(expected.as_str()) {
                        let kind = if matches!(body, HunkLine::Context(_)) {
                            errors::CONTEXT_MISMATCH
                        } else {
                            errors::REMOVAL_MISMATCH
                        };
                        let found = match actual {
                            Some(l) => format!("{:?}", l.text),
                            None => "end of file".to_string(),
                        };
                        return Err(OpFailure::with_detail(
                            kind,
                            format!(
                                "hunk {}, line {}: expected {:?}, found {}",
                                hunk_no,
                                at + 1,
                                expected,
                                found
                            ),
                        ));
                    }
                    if let (HunkLine::Context(_), Some(line)) = (body, actual) {
                        output.push(Line {
                            text: line.text.clone(),
                            eol: line.eol,
                        });
                    }
                    at += 1;
                }
                HunkLine::Addition(text) => output.push(Line {
                    text: text.as_str().into(),
                    eol: default_eol,
                }),
            }
        }

        if hunk.missing_newline {
            if let Some(last) = output.last_mut() {
                last.eol = "";
            }
        }
        cursor = at;
    }

    for line in &source[cursor..] {
        output.push(Line {
            text: line.text.clone(),
            eol: line.eol,
        });
    }

    let last = output.len().saturating_sub(1);
    let mut rebuilt = String::with_capacity(original.len());
    for (i, line) in output.iter().enumerate() {
        rebuilt.push_str(&line.text);
        if line.eol.is_empty() && i != last {
            // A formerly final line gained a successor.
            rebuilt.push_str(default_eol);
        } else {
            rebuilt.push_str(line.eol);
        }
    }
    Ok(rebuilt)
}

fn split_eol(raw: &str) -> (&str, &str) {
    if let Some(text) = raw.strip_suffix("\r\n") {
        (text, "\r\n")
    } else if let Some(text) = raw.strip_suffix('\n') {
        (text, "\n")
    } else {
        (raw, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbox_core::WorkspaceScope;
    use tempfile::TempDir;

    fn ops() -> (TempDir, FileOps) {
        let home = TempDir::new().unwrap();
        let scope = WorkspaceScope::new(home.path(), "/home/user")
            .with_workspace("ws")
            .unwrap();
        (home, FileOps::new(scope))
    }

    #[test]
    fn test_tokenize_classifies_lines() {
        let text = "diff --git a/x b/x\n--- a/x\t2024-01-01\n+++ b/x\n@@ -1,2 +1,2 @@ fn main\n ctx\n-old\n+new\n\\ No newline at end of file\n";
        let tokens = tokenize(text).unwrap();
        assert_eq!(
            tokens,
            vec![
                DiffToken::Noise("diff --git a/x b/x"),
                DiffToken::FileOld(Some("x")),
                DiffToken::FileNew(Some("x")),
                DiffToken::HunkHeader(HunkRange {
                    old_start: 1,
                    old_count: 2,
                    new_start: 1,
                    new_count: 2
                }),
                DiffToken::Context("ctx"),
                DiffToken::Removal("old"),
                DiffToken::Addition("new"),
                DiffToken::NoNewlineMarker,
            ]
        );
    }

    #[test]
    fn test_triple_dash_removal_is_not_a_header() {
        let text = "--- f\n+++ f\n@@ -1,2 +1,1 @@\n--- yaml separator\n keep\n";
        let tokens = tokenize(text).unwrap();
        assert_eq!(tokens[3], DiffToken::Removal("-- yaml separator"));
    }

    #[test]
    fn test_header_like_body_lines_follow_hunk_counts() {
        let text = "--- f\n+++ f\n@@ -1,2 +1,2 @@\n--- x\n+++ y\n keep\n";
        let files = parse(text).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(
            files[0].hunks[0].lines,
            vec![
                HunkLine::Removal("-- x".into()),
                HunkLine::Addition("++ y".into()),
                HunkLine::Context("keep".into()),
            ]
        );
        assert_eq!(rebuild("-- x\nkeep\n", &files[0].hunks).unwrap(), "++ y\nkeep\n");

        // Pair ends the hunk exactly, then the same file continues.
        let text = "--- f\n+++ f\n@@ -1 +1 @@\n--- x\n+++ y\n@@ -3 +3 @@\n-c\n+C\n";
        let files = parse(text).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].hunks.len(), 2);

        // Counts used up: the pair is the next file.
        let text = "--- f\n+++ f\n@@ -1 +1 @@\n-a\n+b\n--- g\n+++ g\n@@ -1 +1 @@\n-c\n+d\n";
        assert_eq!(parse(text).unwrap().len(), 2);
    }

    #[test]
    fn test_hunk_header_defaults_and_errors() {
        assert_eq!(
            parse_hunk_header("@@ -3 +4,0 @@"),
            Some(HunkRange {
                old_start: 3,
                old_count: 1,
                new_start: 4,
                new_count: 0
            })
        );
        assert!(parse_hunk_header("@@ nonsense @@").is_none());
        assert!(matches!(
            tokenize("--- a\n+++ a\n@@ bad\n"),
            Err(ParseError::MalformedHunkHeader { line: 3, .. })
        ));
    }

    #[test]
    fn test_parse_multi_file_and_sentinels() {
        let text = "--- a/one.txt\n+++ b/one.txt\n@@ -1 +1 @@\n-a\n+b\n--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+hi\n";
        let files = parse(text).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].new_path.as_deref(), Some("one.txt"));
        assert_eq!(files[1].old_path, None);
        assert_eq!(files[1].display_path(), "new.txt");
    }

    #[test]
    fn test_parse_rejects_structural_errors() {
        assert_eq!(parse("just prose\n"), Err(ParseError::NoFiles));
        assert!(matches!(
            parse("@@ -1 +1 @@\n-a\n+b\n"),
            Err(ParseError::HunkOutsideFile { .. })
        ));
        assert!(matches!(
            parse("--- a\n+++ a\n"),
            Err(ParseError::FileWithoutHunks { .. })
        ));
    }

    #[test]
    fn test_blank_lines_inside_and_after_hunk() {
        let text = "--- f\n+++ f\n@@ -1,3 +1,3 @@\n a\n\n-b\n+c\n\n\n";
        let files = parse(text).unwrap();
        let lines = &files[0].hunks[0].lines;
        assert_eq!(
            lines,
            &vec![
                HunkLine::Context("a".into()),
                HunkLine::Context(String::new()),
                HunkLine::Removal("b".into()),
                HunkLine::Addition("c".into()),
            ]
        );
    }

    #[test]
    fn test_rebuild_multiple_hunks() {
        let original = "1\n2\n3\n4\n5\n6\n7\n8\n";
        let patch = parse(
            "--- f\n+++ f\n@@ -1,2 +1,2 @@\n-1\n+one\n 2\n@@ -7,2 +7,3 @@\n 7\n+7.5\n 8\n",
        )
        .unwrap();
        let rebuilt = rebuild(original, &patch[0].hunks).unwrap();
        assert_eq!(rebuilt, "one\n2\n3\n4\n5\n6\n7\n7.5\n8\n");
    }

    #[test]
    fn test_rebuild_pure_insertion_and_append() {
        let patch = parse("--- f\n+++ f\n@@ -2,0 +3 @@\n+inserted\n").unwrap();
        assert_eq!(rebuild("a\nb\nc\n", &patch[0].hunks).unwrap(), "a\nb\ninserted\nc\n");

        let patch = parse("--- f\n+++ f\n@@ -1,0 +1 @@\n+tail\n").unwrap();
        assert_eq!(rebuild("only\n", &patch[0].hunks).unwrap(), "only\ntail\n");
    }

    #[test]
    fn test_rebuild_mismatch_and_order_errors() {
        let patch = parse("--- f\n+++ f\n@@ -1,2 +1,2 @@\n x\n-b\n+c\n").unwrap();
        let err = rebuild("a\nb\n", &patch[0].hunks).unwrap_err();
        assert_eq!(err.error, errors::CONTEXT_MISMATCH);
        assert!(err.detail.unwrap().contains("expected \"x\""));

        let patch = parse("--- f\n+++ f\n@@ -2 +2 @@\n-zzz\n+c\n").unwrap();
        let err = rebuild("a\nb\n", &patch[0].hunks).unwrap_err();
        assert_eq!(err.error, errors::REMOVAL_MISMATCH);

        let patch = parse("--- f\n+++ f\n@@ -9 +9 @@\n-a\n+b\n").unwrap();
        let err = rebuild("a\nb\n", &patch[0].hunks).unwrap_err();
        assert_eq!(err.error, errors::HUNK_OUT_OF_RANGE);

        let patch =
            parse("--- f\n+++ f\n@@ -2 +2 @@\n-b\n+B\n@@ -1 +1 @@\n-a\n+A\n").unwrap();
        let err = rebuild("a\nb\n", &patch[0].hunks).unwrap_err();
        assert_eq!(err.error, errors::HUNK_OUT_OF_ORDER);
    }

    #[test]
    fn test_rebuild_line_endings() {
        let patch = parse("--- f\n+++ f\n@@ -1,2 +1,2 @@\n a\n-b\n+c\n").unwrap();
        assert_eq!(rebuild("a\r\nb\r\n", &patch[0].hunks).unwrap(), "a\r\nc\r\n");

        let patch = parse(
            "--- f\n+++ f\n@@ -1 +1 @@\n-a\n\\ No newline at end of file\n+b\n\\ No newline at end of file\n",
        )
        .unwrap();
        assert!(patch[0].hunks[0].missing_newline);
        assert_eq!(rebuild("a", &patch[0].hunks).unwrap(), "b");

        let patch = parse("--- f\n+++ f\n@@ -1 +1,2 @@\n a\n+b\n").unwrap();
        assert_eq!(rebuild("a", &patch[0].hunks).unwrap(), "a\nb\n");
    }

    #[test]
    fn test_apply_reports_each_file() {
        let (home, files) = ops();
        files.write("good.txt", "keep\nold\n");
        files.write("bad.txt", "unexpected\n");

        let diff = "--- a/good.txt\n+++ b/good.txt\n@@ -1,2 +1,2 @@\n keep\n-old\n+new\n--- a/bad.txt\n+++ b/bad.txt\n@@ -1 +1 @@\n-expected\n+changed\n";
        let result = apply(&files, diff);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(errors::REMOVAL_MISMATCH));
        assert_eq!(result.files.len(), 2);
        assert!(result.files[0].success);
        assert!(result.files[0].diff.contains("+new"));
        assert!(!result.files[1].success);
        assert_eq!(result.files[1].path, "bad.txt");

        assert_eq!(
            std::fs::read_to_string(home.path().join("ws/good.txt")).unwrap(),
            "keep\nnew\n"
        );
        assert_eq!(
            std::fs::read_to_string(home.path().join("ws/bad.txt")).unwrap(),
            "unexpected\n"
        );
    }

    #[test]
    fn test_apply_rejects_creation_and_deletion() {
        let (_home, files) = ops();
        files.write("gone.txt", "x\n");
        let result = apply(&files, "--- a/gone.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-x\n");
        assert_eq!(result.files[0].error.as_deref(), Some(errors::DELETION_NOT_SUPPORTED));

        let result = apply(&files, "--- /dev/null\n+++ b/fresh.txt\n@@ -0,0 +1 @@\n+x\n");
        assert_eq!(result.files[0].error.as_deref(), Some(errors::CREATION_NOT_SUPPORTED));
        assert!(!files.exists("fresh.txt").exists);

        let result = apply(&files, "--- a/missing.txt\n+++ b/missing.txt\n@@ -1 +1 @@\n-a\n+b\n");
        assert_eq!(result.files[0].error.as_deref(), Some(errors::FILE_NOT_FOUND));
    }

    #[test]
    fn test_apply_invalid_diff() {
        let (_home, files) = ops();
        let result = apply(&files, "not a diff at all");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(errors::INVALID_DIFF));
        assert!(result.files.is_empty());
        assert!(result.detail.is_some());
    }

    #[test]
    fn test_apply_noop_diff_has_empty_output() {
        let (_home, files) = ops();
        files.write("same.txt", "a\n");
        let result = apply(&files, "--- same.txt\n+++ same.txt\n@@ -1 +1 @@\n a\n");
        assert!(result.success);
        assert_eq!(result.files[0].diff, "");
    }
}

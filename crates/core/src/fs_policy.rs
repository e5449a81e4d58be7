//! Filesystem path policy for the sandbox.
//!
//! Every caller-supplied path (absolute, relative, or carrying the
//! container's working-directory prefix) is resolved to a location under the
//! sandbox home directory and the active workspace. Resolution clamps rather
//! than rejects: surplus `..` segments collapse to the workspace root.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::{Error, Result};

/// Directory under the sandbox home holding per-workspace implementation
/// plans. It can never be a workspace, and no resolved path may enter it.
pub const PLANS_DIR: &str = "implementation_plans";

/// A path resolved inside the sandbox. Computed per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Absolute filesystem path; always `home` or a descendant of it.
    pub absolute: PathBuf,
    /// The sandbox home directory.
    pub home: PathBuf,
    /// Path relative to `home`, workspace-prefixed when a workspace is active.
    pub relative: PathBuf,
}

impl ResolvedPath {
    /// `relative` rendered with `/` separators, for result objects.
    pub fn display_relative(&self) -> String {
        let rendered = self
            .relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rendered.is_empty() {
            ".".to_string()
        } else {
            rendered
        }
    }
}

/// Immutable resolution context: sandbox root, container prefix and the
/// workspace (if any) that scopes relative paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceScope {
    home: PathBuf,
    container_workdir: String,
    workspace: Option<String>,
}

impl WorkspaceScope {
    /// Create a scope with no active workspace.
    pub fn new(home: impl Into<PathBuf>, container_workdir: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            container_workdir: container_workdir.into(),
            workspace: None,
        }
    }

    /// Return a copy of this scope bound to `workspace`.
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Result<Self> {
        let workspace = workspace.into();
        validate_workspace_name(&workspace)?;
        self.workspace = Some(workspace);
        Ok(self)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn container_workdir(&self) -> &str {
        &self.container_workdir
    }

    pub fn workspace(&self) -> Option<&str> {
        self.workspace.as_deref()
    }

    /// The directory all relative paths are rooted under.
    pub fn root(&self) -> PathBuf {
        match &self.workspace {
            Some(ws) => self.home.join(ws),
            None => self.home.clone(),
        }
    }

    /// Resolve `input` to a location that can never leave the sandbox.
    pub fn resolve(&self, input: &str) -> ResolvedPath {
        let mut segments: Vec<&str> = input
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .collect();

        // Windows drive anchors ("C:") are dropped like a leading "/".
        if segments
            .first()
            .is_some_and(|s| s.len() == 2 && s.ends_with(':') && s.as_bytes()[0].is_ascii_alphabetic())
        {
            segments.remove(0);
        }

        // Strip an echoed container prefix, then an echoed workspace name.
        let prefix: Vec<&str> = self
            .container_workdir
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if !prefix.is_empty() && segments.starts_with(&prefix) {
            segments.drain(..prefix.len());
            if let Some(ws) = &self.workspace {
                if segments.first() == Some(&ws.as_str()) {
                    segments.remove(0);
                }
            }
        }

        let mut accepted: Vec<&str> = Vec::with_capacity(segments.len());
        for segment in segments {
            match segment {
                "." => {}
                ".." => {
                    accepted.pop();
                }
                other => accepted.push(other),
            }
        }

        let mut relative = PathBuf::new();
        if let Some(ws) = &self.workspace {
            relative.push(ws);
        }
        for segment in accepted {
            relative.push(segment);
        }

        ResolvedPath {
            absolute: self.home.join(&relative),
            home: self.home.clone(),
            relative,
        }
    }

    /// Path of `resolved` relative to the workspace root, with `/` separators.
    pub fn workspace_relative(&self, absolute: &Path) -> String {
        let root = self.root();
        let rel = absolute.strip_prefix(&root).unwrap_or(absolute);
        let rendered = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rendered.is_empty() {
            ".".to_string()
        } else {
            rendered
        }
    }

    /// Whether `absolute` lies in the reserved plans directory.
    pub fn is_reserved(&self, absolute: &Path) -> bool {
        under_plans_dir(&self.home, absolute)
    }

    /// Reject paths whose existing portion resolves (through symlinks)
    /// outside the canonical home directory, and paths into the plans
    /// directory.
    pub fn ensure_contained(&self, resolved: &ResolvedPath) -> Result<()> {
        if self.is_reserved(&resolved.absolute) {
            return Err(reserved_path(resolved));
        }

        let canonical_home = match self.home.canonicalize() {
            Ok(p) => p,
            // Nothing exists yet, so nothing can point outside.
            Err(_) => return Ok(()),
        };

        let mut ancestor = resolved.absolute.as_path();
        loop {
            if let Ok(canonical) = ancestor.canonicalize() {
                if canonical.starts_with(&canonical_home) {
                    if under_plans_dir(&canonical_home, &canonical) {
                        return Err(reserved_path(resolved));
                    }
                    return Ok(());
                }
                return Err(Error::SecurityViolation(format!(
                    "{} resolves outside the sandbox",
                    resolved.relative.display()
                )));
            }
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => return Ok(()),
            }
        }
    }
}

/// Shared handle on the active workspace name.
///
/// Cloning shares the same slot. Operations snapshot it with [`scope`] so a
/// single call never observes a workspace switch halfway through.
///
/// [`scope`]: ActiveWorkspace::scope
#[derive(Debug, Clone)]
pub struct ActiveWorkspace {
    base: WorkspaceScope,
    active: Arc<RwLock<Option<String>>>,
}

impl ActiveWorkspace {
    pub fn new(home: impl Into<PathBuf>, container_workdir: impl Into<String>) -> Self {
        Self {
            base: WorkspaceScope::new(home, container_workdir),
            active: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the active workspace.
    pub fn set(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        validate_workspace_name(&name)?;
        tracing::info!(workspace = %name, "Active workspace set");
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(name);
        Ok(())
    }

    pub fn get(&self) -> Option<String> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Clear the active workspace; paths resolve against the home directory.
    pub fn reset(&self) {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Snapshot the current state as an immutable scope.
    pub fn scope(&self) -> WorkspaceScope {
        let mut scope = self.base.clone();
        scope.workspace = self.get();
        scope
    }
}

fn under_plans_dir(home: &Path, path: &Path) -> bool {
    path.strip_prefix(home)
        .ok()
        .and_then(|rel| rel.components().next())
        .and_then(|first| first.as_os_str().to_str())
        .is_some_and(|name| name.eq_ignore_ascii_case(PLANS_DIR))
}

fn reserved_path(resolved: &ResolvedPath) -> Error {
    Error::SecurityViolation(format!(
        "{} is in a reserved directory",
        resolved.relative.display()
    ))
}

fn validate_workspace_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.eq_ignore_ascii_case(PLANS_DIR)
    {
        return Err(Error::invalid_request(format!(
            "Invalid workspace name: {:?}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> WorkspaceScope {
        WorkspaceScope::new("/sandbox", "/home/user")
    }

    fn ws_scope() -> WorkspaceScope {
        scope().with_workspace("proj").unwrap()
    }

    #[test]
    fn test_relative_paths() {
        let r = ws_scope().resolve("src/app.js");
        assert_eq!(r.absolute, PathBuf::from("/sandbox/proj/src/app.js"));
        assert_eq!(r.relative, PathBuf::from("proj/src/app.js"));
        assert_eq!(r.home, PathBuf::from("/sandbox"));

        let r = scope().resolve("./local.txt");
        assert_eq!(r.absolute, PathBuf::from("/sandbox/local.txt"));
    }

    #[test]
    fn test_absolute_anchor_is_stripped() {
        let r = ws_scope().resolve("/etc/passwd");
        assert_eq!(r.absolute, PathBuf::from("/sandbox/proj/etc/passwd"));

        let r = ws_scope().resolve("C:\\Windows\\System32");
        assert_eq!(r.absolute, PathBuf::from("/sandbox/proj/Windows/System32"));
    }

    #[test]
    fn test_container_prefix_and_workspace_echo() {
        let r = ws_scope().resolve("/home/user/proj/src/main.rs");
        assert_eq!(r.absolute, PathBuf::from("/sandbox/proj/src/main.rs"));

        let r = ws_scope().resolve("/home/user/src/main.rs");
        assert_eq!(r.absolute, PathBuf::from("/sandbox/proj/src/main.rs"));

        // Without the container prefix, a leading workspace name is a real directory.
        let r = ws_scope().resolve("proj/file.txt");
        assert_eq!(r.absolute, PathBuf::from("/sandbox/proj/proj/file.txt"));
    }

    #[test]
    fn test_parent_segments_clamp_to_root() {
        let r = ws_scope().resolve("../../../../etc/passwd");
        assert_eq!(r.absolute, PathBuf::from("/sandbox/proj/etc/passwd"));

        let r = ws_scope().resolve("src/../../..");
        assert_eq!(r.absolute, PathBuf::from("/sandbox/proj"));
        assert_eq!(r.display_relative(), "proj");

        let r = scope().resolve("a/b/../c");
        assert_eq!(r.absolute, PathBuf::from("/sandbox/a/c"));
    }

    #[test]
    fn test_never_escapes_home() {
        let inputs = [
            "..",
            "../..",
            "/../../x",
            "a/../../../../b/../..",
            "./../.././../",
            "\\..\\..\\windows",
            "/home/user/../../../root",
            "",
            "/",
        ];
        for scope in [scope(), ws_scope()] {
            for input in inputs {
                let r = scope.resolve(input);
                assert!(
                    r.absolute.starts_with(scope.root()),
                    "{input:?} escaped to {:?}",
                    r.absolute
                );
                assert!(!r.relative.components().any(|c| c.as_os_str() == ".."));
            }
        }
    }

    #[test]
    fn test_workspace_relative() {
        let s = ws_scope();
        let r = s.resolve("src/lib.rs");
        assert_eq!(s.workspace_relative(&r.absolute), "src/lib.rs");
        assert_eq!(s.workspace_relative(&s.root()), ".");
    }

    #[test]
    fn test_invalid_workspace_names() {
        assert!(scope().with_workspace("").is_err());
        assert!(scope().with_workspace("..").is_err());
        assert!(scope().with_workspace("a/b").is_err());
        assert!(scope().with_workspace("implementation_plans").is_err());
        assert!(scope().with_workspace("Implementation_Plans").is_err());
        assert!(ActiveWorkspace::new("/sandbox", "/home/user")
            .set(PLANS_DIR)
            .is_err());
        assert!(scope().with_workspace("ok-name").is_ok());
    }

    #[test]
    fn test_active_workspace_set_get_reset() {
        let active = ActiveWorkspace::new("/sandbox", "/home/user");
        assert!(active.get().is_none());

        active.set("alpha").unwrap();
        let shared = active.clone();
        assert_eq!(shared.get().as_deref(), Some("alpha"));
        assert_eq!(
            shared.scope().resolve("x").absolute,
            PathBuf::from("/sandbox/alpha/x")
        );

        assert!(active.set("../beta").is_err());
        assert_eq!(active.get().as_deref(), Some("alpha"));

        active.reset();
        assert!(shared.get().is_none());
        assert_eq!(shared.scope().resolve("x").absolute, PathBuf::from("/sandbox/x"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_detected() {
        let home = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), home.path().join("link")).unwrap();

        let scope = WorkspaceScope::new(home.path(), "/home/user");
        let inside = scope.resolve("plain/file.txt");
        assert!(scope.ensure_contained(&inside).is_ok());

        let escaped = scope.resolve("link/secret.txt");
        assert!(scope.ensure_contained(&escaped).is_err());
    }

    #[test]
    fn test_plans_dir_unreachable_without_workspace() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join("implementation_plans/proj")).unwrap();
        let scope = WorkspaceScope::new(home.path(), "/home/user");

        for input in [
            "implementation_plans/proj/plan.json",
            "/home/user/implementation_plans",
            "x/../implementation_plans/new/plan.json",
            "IMPLEMENTATION_PLANS/proj",
        ] {
            let resolved = scope.resolve(input);
            assert!(scope.is_reserved(&resolved.absolute), "{input:?}");
            assert!(scope.ensure_contained(&resolved).is_err(), "{input:?}");
        }

        let plain = scope.resolve("notes/implementation_plans.md");
        assert!(scope.ensure_contained(&plain).is_ok());

        let ws = scope.with_workspace("proj").unwrap();
        let nested = ws.resolve("implementation_plans/plan.json");
        assert!(!ws.is_reserved(&nested.absolute));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_into_plans_dir_detected() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join("implementation_plans/proj")).unwrap();
        std::fs::create_dir_all(home.path().join("proj")).unwrap();
        std::os::unix::fs::symlink(
            home.path().join("implementation_plans"),
            home.path().join("proj/plans"),
        )
        .unwrap();

        let scope = WorkspaceScope::new(home.path(), "/home/user")
            .with_workspace("proj")
            .unwrap();
        let through_link = scope.resolve("plans/proj/plan.json");
        assert!(scope.ensure_contained(&through_link).is_err());
    }
}

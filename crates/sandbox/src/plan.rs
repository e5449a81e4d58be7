//! Implementation plan side-channel.
//!
//! Plans live at `<home>/implementation_plans/<workspace>/plan.json`, outside
//! every workspace tree, so the file tools can neither see nor modify them.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use devbox_core::WorkspaceScope;

use crate::errors::{self, OpFailure};

pub use devbox_core::PLANS_DIR;
pub const PLAN_FILE: &str = "plan.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// The stored plan; `None` when none has been written yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PlanResult {
    fn ok(workspace: &str, plan: Option<Value>) -> Self {
        Self {
            success: true,
            workspace: Some(workspace.to_string()),
            plan,
            error: None,
            detail: None,
        }
    }

    fn failed(workspace: Option<&str>, failure: OpFailure) -> Self {
        Self {
            success: false,
            workspace: workspace.map(str::to_string),
            plan: None,
            error: Some(failure.error.to_string()),
            detail: failure.detail,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanStore {
    scope: WorkspaceScope,
}

impl PlanStore {
    pub fn new(scope: WorkspaceScope) -> Self {
        Self { scope }
    }

    fn plan_path(&self) -> Result<(&str, PathBuf), OpFailure> {
        let workspace = self
            .scope
            .workspace()
            .ok_or_else(|| OpFailure::new(errors::NO_ACTIVE_WORKSPACE))?;
        let path = self
            .scope
            .home()
            .join(PLANS_DIR)
            .join(workspace)
            .join(PLAN_FILE);
        Ok((workspace, path))
    }

    pub fn read(&self) -> PlanResult {
        let (workspace, path) = match self.plan_path() {
            Ok(found) => found,
            Err(failure) => return PlanResult::failed(None, failure),
        };
        if !path.exists() {
            return PlanResult::ok(workspace, None);
        }
        let loaded = std::fs::read_to_string(&path)
            .map_err(|e| OpFailure::io("read plan", workspace, e))
            .and_then(|raw| {
                serde_json::from_str::<Value>(&raw)
                    .map_err(|e| OpFailure::with_detail(errors::INVALID_PLAN, e.to_string()))
            });
        match loaded {
            Ok(plan) => {
                tracing::debug!(workspace = %workspace, "Implementation plan read");
                PlanResult::ok(workspace, Some(plan))
            }
            Err(failure) => PlanResult::failed(Some(workspace), failure),
        }
    }

    /// Replace the stored plan. Only JSON objects are accepted.
    pub fn write(&self, plan: &Value) -> PlanResult {
        let (workspace, path) = match self.plan_path() {
            Ok(found) => found,
            Err(failure) => return PlanResult::failed(None, failure),
        };
        if !plan.is_object() {
            return PlanResult::failed(
                Some(workspace),
                OpFailure::with_detail(errors::INVALID_PLAN, "plan must be a JSON object"),
            );
        }
        match persist(&path, plan, workspace) {
            Ok(()) => {
                tracing::info!(workspace = %workspace, "Implementation plan written");
                PlanResult::ok(workspace, Some(plan.clone()))
            }
            Err(failure) => PlanResult::failed(Some(workspace), failure),
        }
    }
}

fn persist(path: &std::path::Path, plan: &Value, workspace: &str) -> Result<(), OpFailure> {
    let dir = path
        .parent()
        .ok_or_else(|| OpFailure::with_detail(errors::INTERNAL_ERROR, "plan path has no parent"))?;
    std::fs::create_dir_all(dir).map_err(|e| OpFailure::io("write plan", workspace, e))?;
    let body = serde_json::to_string_pretty(plan)
        .map_err(|e| OpFailure::with_detail(errors::INVALID_PLAN, e.to_string()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| OpFailure::io("write plan", workspace, e))?;
    tmp.write_all(body.as_bytes())
        .map_err(|e| OpFailure::io("write plan", workspace, e))?;
    tmp.persist(path)
        .map_err(|e| OpFailure::io("write plan", workspace, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(home: &TempDir, workspace: Option<&str>) -> PlanStore {
        let scope = WorkspaceScope::new(home.path(), "/home/user");
        let scope = match workspace {
            Some(ws) => scope.with_workspace(ws).unwrap(),
            None => scope,
        };
        PlanStore::new(scope)
    }

    #[test]
    fn test_roundtrip_outside_workspace_tree() {
        let home = TempDir::new().unwrap();
        let plans = store(&home, Some("proj"));

        let empty = plans.read();
        assert!(empty.success);
        assert!(empty.plan.is_none());

        let plan = json!({"goal": "ship", "steps": ["a", "b"]});
        assert!(plans.write(&plan).success);
        assert_eq!(plans.read().plan, Some(plan));

        assert!(home
            .path()
            .join("implementation_plans/proj/plan.json")
            .is_file());
        assert!(!home.path().join("proj").exists());
    }

    #[test]
    fn test_requires_workspace_and_object() {
        let home = TempDir::new().unwrap();
        let result = store(&home, None).read();
        assert_eq!(result.error.as_deref(), Some(errors::NO_ACTIVE_WORKSPACE));

        let result = store(&home, Some("proj")).write(&json!(["not", "an", "object"]));
        assert_eq!(result.error.as_deref(), Some(errors::INVALID_PLAN));
    }

    #[test]
    fn test_corrupt_plan_reported() {
        let home = TempDir::new().unwrap();
        let dir = home.path().join("implementation_plans/proj");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("plan.json"), "{ not json").unwrap();

        let result = store(&home, Some("proj")).read();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(errors::INVALID_PLAN));
    }
}

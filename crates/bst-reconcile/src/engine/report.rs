use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Value, json};

use crate::catalog::Catalog;
use crate::error::Result;
use crate::process::TerminationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    ToggleRoot,
    ToggleRw,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::ToggleRoot => "toggle-root",
            Operation::ToggleRw => "toggle-rw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Succeeded,
    PartialFailure,
    Failed,
}

impl BatchStatus {
    pub fn label(self) -> &'static str {
        match self {
            BatchStatus::Succeeded => "succeeded",
            BatchStatus::PartialFailure => "partial-failure",
            BatchStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub value: String,
    /// Whether any file on disk was rewritten.
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub unique_id: String,
    pub operation: Operation,
    pub result: Result<Applied>,
}

impl ItemOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(applied) => write!(
                f,
                "{} {}: {}{}",
                self.operation.label(),
                self.unique_id,
                applied.value,
                if applied.changed { "" } else { " (unchanged)" }
            ),
            Err(e) => write!(
                f,
                "{} failed for {}: {e}",
                self.operation.label(),
                self.unique_id
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalOutcome {
    pub config_path: PathBuf,
    pub result: Result<Applied>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TerminationSummary {
    pub found: usize,
    pub exited: usize,
    pub killed: usize,
    pub survivors: Vec<String>,
    pub failures: Vec<String>,
}

impl From<&TerminationReport> for TerminationSummary {
    fn from(r: &TerminationReport) -> Self {
        Self {
            found: r.found.len(),
            exited: r.exited.len(),
            killed: r.killed.len(),
            survivors: r
                .survivors
                .iter()
                .map(|p| format!("{}({})", p.name, p.pid))
                .collect(),
            failures: r
                .failures
                .iter()
                .map(|(p, e)| format!("{}({}): {e}", p.name, p.pid))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub operation: Operation,
    pub started_at: DateTime<Local>,
    pub items: Vec<ItemOutcome>,
    pub global: Vec<GlobalOutcome>,
    pub termination: TerminationSummary,
    pub status: BatchStatus,
    /// Snapshot with every successful mutation applied.
    pub catalog: Catalog,
}

impl BatchReport {
    pub fn item(&self, unique_id: &str) -> Option<&ItemOutcome> {
        self.items.iter().find(|o| o.unique_id == unique_id)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|o| !o.is_ok())
    }

    pub fn to_json(&self) -> Value {
        let items: Vec<Value> = self
            .items
            .iter()
            .map(|o| match &o.result {
                Ok(a) => json!({
                    "id": o.unique_id,
                    "operation": o.operation,
                    "ok": true,
                    "value": a.value,
                    "changed": a.changed,
                }),
                Err(e) => json!({
                    "id": o.unique_id,
                    "operation": o.operation,
                    "ok": false,
                    "kind": e.kind(),
                    "error": e.to_string(),
                }),
            })
            .collect();
        let global: Vec<Value> = self
            .global
            .iter()
            .map(|g| match &g.result {
                Ok(a) => json!({
                    "config": g.config_path.display().to_string(),
                    "ok": true,
                    "value": a.value,
                    "changed": a.changed,
                }),
                Err(e) => json!({
                    "config": g.config_path.display().to_string(),
                    "ok": false,
                    "kind": e.kind(),
                    "error": e.to_string(),
                }),
            })
            .collect();
        json!({
            "operation": self.operation,
            "started_at": self.started_at.to_rfc3339(),
            "status": self.status,
            "termination": self.termination,
            "items": items,
            "global": global,
        })
    }
}

pub(crate) fn batch_status(items: &[ItemOutcome], global: &[GlobalOutcome]) -> BatchStatus {
    let failed_items = items.iter().filter(|o| !o.is_ok()).count();
    let failed_global = global.iter().filter(|g| g.result.is_err()).count();
    if failed_items == 0 && failed_global == 0 {
        BatchStatus::Succeeded
    } else if failed_items == items.len() {
        BatchStatus::Failed
    } else {
        BatchStatus::PartialFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn ok(id: &str) -> ItemOutcome {
        ItemOutcome {
            unique_id: id.into(),
            operation: Operation::ToggleRoot,
            result: Ok(Applied {
                value: "on".into(),
                changed: true,
            }),
        }
    }

    fn failed(id: &str) -> ItemOutcome {
        ItemOutcome {
            unique_id: id.into(),
            operation: Operation::ToggleRoot,
            result: Err(Error::not_found("config missing")),
        }
    }

    #[test]
    fn status_rollup() {
        assert_eq!(batch_status(&[ok("a"), ok("b")], &[]), BatchStatus::Succeeded);
        assert_eq!(batch_status(&[ok("a"), failed("b")], &[]), BatchStatus::PartialFailure);
        assert_eq!(batch_status(&[failed("a")], &[]), BatchStatus::Failed);
        let global_failed = GlobalOutcome {
            config_path: PathBuf::from("/bs/bluestacks.conf"),
            result: Err(Error::io("disk full")),
        };
        assert_eq!(
            batch_status(&[ok("a")], &[global_failed]),
            BatchStatus::PartialFailure
        );
    }

    #[test]
    fn failures_carry_id_operation_and_cause() {
        let text = failed("Pie64 (nxt)").to_string();
        assert_eq!(text, "toggle-root failed for Pie64 (nxt): config missing");
    }
}

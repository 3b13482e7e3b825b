//! Batch loading and dedup against the result sink.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use judgeloop_shared::{
    Department, JudgeloopError, Result, WorkItem, normalize_id, normalize_id_value,
};

/// One entry of the input batch, before validation.
///
/// Fields are kept loose so a single malformed record can be skipped
/// without rejecting the whole file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCase {
    #[serde(rename = "caseID", default)]
    pub case_id: serde_json::Value,
    #[serde(default)]
    pub report: serde_json::Value,
}

/// Why a batch record was not turned into a [`WorkItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    /// Position in the input file.
    pub index: usize,
    pub reason: String,
}

/// A loaded batch: valid items in input order plus the records skipped.
#[derive(Debug, Clone, Default)]
pub struct LoadedBatch {
    pub total: usize,
    pub items: Vec<WorkItem>,
    pub skipped: Vec<SkippedItem>,
}

impl RawCase {
    /// Validate into a work item with a normalized id.
    pub fn into_work_item(self, width: usize) -> std::result::Result<WorkItem, String> {
        let id = normalize_id_value(&self.case_id, width);
        let payload = self
            .report
            .as_str()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(String::from);

        match (id, payload) {
            (Some(id), Some(payload)) => Ok(WorkItem { id, payload }),
            (None, _) => Err("missing 'caseID'".into()),
            (Some(_), None) => Err("missing 'report'".into()),
        }
    }
}

/// Parse a JSON array of cases. Malformed entries are skipped, not fatal.
pub fn parse_cases(json: &str, width: usize) -> serde_json::Result<LoadedBatch> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(json)?;

    let mut batch = LoadedBatch {
        total: entries.len(),
        ..LoadedBatch::default()
    };

    for (index, entry) in entries.into_iter().enumerate() {
        let raw = if entry.is_object() {
            serde_json::from_value::<RawCase>(entry).unwrap_or_default()
        } else {
            RawCase::default()
        };
        match raw.into_work_item(width) {
            Ok(item) => batch.items.push(item),
            Err(reason) => {
                warn!(index, %reason, "skipping malformed case");
                batch.skipped.push(SkippedItem { index, reason });
            }
        }
    }
    Ok(batch)
}

/// Read and parse the case batch file. Read or parse failure is fatal.
pub fn load_cases(path: &Path, width: usize) -> Result<LoadedBatch> {
    let content = std::fs::read_to_string(path).map_err(|e| JudgeloopError::io(path, e))?;
    let batch = parse_cases(&content, width).map_err(|e| {
        JudgeloopError::parse(format!("{}: expected a JSON array of cases: {e}", path.display()))
    })?;
    info!(
        path = %path.display(),
        total = batch.total,
        valid = batch.items.len(),
        "loaded case batch"
    );
    Ok(batch)
}

/// Read the department catalogue (`[{departmentID, description}]`).
pub fn load_departments(path: &Path) -> Result<Vec<Department>> {
    let content = std::fs::read_to_string(path).map_err(|e| JudgeloopError::io(path, e))?;
    let departments: Vec<Department> = serde_json::from_str(&content)
        .map_err(|e| JudgeloopError::parse(format!("{}: {e}", path.display())))?;
    if departments.is_empty() {
        return Err(JudgeloopError::validation(format!(
            "{} lists no departments",
            path.display()
        )));
    }
    Ok(departments)
}

/// Items whose normalized id is not yet processed, in input order.
pub fn select_new_items(
    items: Vec<WorkItem>,
    processed: &HashSet<String>,
    width: usize,
) -> Vec<WorkItem> {
    items
        .into_iter()
        .filter(|item| !processed.contains(&normalize_id(&item.id, width)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_string_ids_normalize_alike() {
        let batch = parse_cases(
            r#"[{"caseID": 1, "report": "a"}, {"caseID": "2", "report": "b"}, {"caseID": "003", "report": "c"}]"#,
            3,
        )
        .unwrap();
        let ids: Vec<&str> = batch.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["001", "002", "003"]);
        assert!(batch.skipped.is_empty());
    }

    #[test]
    fn malformed_records_are_skipped_not_fatal() {
        let batch = parse_cases(
            r#"[{"caseID": "1"}, {"report": "sin id"}, {"caseID": "3", "report": "   "}, 42, {"caseID": "5", "report": "ok"}]"#,
            3,
        )
        .unwrap();
        assert_eq!(batch.total, 5);
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].id, "005");
        let indexes: Vec<usize> = batch.skipped.iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        assert_eq!(batch.skipped[0].reason, "missing 'report'");
        assert_eq!(batch.skipped[1].reason, "missing 'caseID'");
    }

    #[test]
    fn negative_case_id_is_skipped() {
        let batch = parse_cases(
            r#"[{"caseID": -1, "report": "texto"}, {"caseID": 2, "report": "texto"}]"#,
            3,
        )
        .unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].id, "002");
        assert_eq!(batch.skipped[0].index, 0);
        assert_eq!(batch.skipped[0].reason, "missing 'caseID'");
    }

    #[test]
    fn non_array_batch_is_fatal() {
        assert!(parse_cases(r#"{"caseID": 1}"#, 3).is_err());
        assert!(parse_cases("not json", 3).is_err());
    }

    #[test]
    fn unreadable_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_cases(&dir.path().join("missing.json"), 3).unwrap_err();
        assert!(matches!(err, JudgeloopError::Io { .. }));
    }

    #[test]
    fn select_preserves_order_and_drops_processed() {
        let items = vec![
            WorkItem {
                id: "001".into(),
                payload: "a".into(),
            },
            WorkItem {
                id: "2".into(),
                payload: "b".into(),
            },
            WorkItem {
                id: "003".into(),
                payload: "c".into(),
            },
        ];
        let processed = HashSet::from(["002".to_string()]);
        let selected = select_new_items(items, &processed, 3);
        let ids: Vec<&str> = selected.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["001", "003"]);
    }

    #[test]
    fn departments_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("departments.json");
        std::fs::write(
            &path,
            r#"[{"departmentID": "SOP", "description": "Soporte técnico"}]"#,
        )
        .unwrap();
        let departments = load_departments(&path).unwrap();
        assert_eq!(departments[0].id, "SOP");

        std::fs::write(&path, "[]").unwrap();
        assert!(load_departments(&path).is_err());
    }
}

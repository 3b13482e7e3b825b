//! Append-only CSV file of processed cases.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use judgeloop_shared::{JudgeloopError, ProcessedRecord, Result, normalize_id};

/// Name of the identifier column, shared with the batch input.
pub const CASE_ID_COLUMN: &str = "caseID";

/// CSV result sink with a single-writer lock.
///
/// The header is written only when the file is created (or empty); later
/// appends add rows in the same column order and never touch existing rows.
pub struct CsvSink {
    path: PathBuf,
    writer: Mutex<()>,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records in order.
    pub fn append(&self, records: &[ProcessedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self
            .writer
            .lock()
            .map_err(|_| JudgeloopError::Sink("sink writer lock poisoned".into()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| JudgeloopError::io(parent, e))?;
        }

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| JudgeloopError::io(&self.path, e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        for record in records {
            writer
                .serialize(record)
                .map_err(|e| JudgeloopError::Sink(format!("{}: {e}", self.path.display())))?;
        }
        writer
            .flush()
            .map_err(|e| JudgeloopError::io(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), rows = records.len(), "appended to sink");
        Ok(())
    }

    /// Normalized ids already present in the sink.
    ///
    /// A missing or empty file yields an empty set. A file without the
    /// identifier column is an error: the dedup snapshot cannot be trusted.
    pub fn processed_ids(&self, width: usize) -> Result<HashSet<String>> {
        let is_empty = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(JudgeloopError::io(&self.path, e)),
        };
        if is_empty {
            return Ok(HashSet::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)
            .map_err(|e| JudgeloopError::parse(format!("{}: {e}", self.path.display())))?;
        let headers = reader
            .headers()
            .map_err(|e| JudgeloopError::parse(format!("{}: {e}", self.path.display())))?;
        let column = headers
            .iter()
            .position(|h| h.trim() == CASE_ID_COLUMN)
            .ok_or_else(|| {
                JudgeloopError::parse(format!(
                    "{} has no '{CASE_ID_COLUMN}' column",
                    self.path.display()
                ))
            })?;

        let mut ids = HashSet::new();
        for row in reader.records() {
            let row =
                row.map_err(|e| JudgeloopError::parse(format!("{}: {e}", self.path.display())))?;
            if let Some(raw) = row.get(column).filter(|v| !v.trim().is_empty()) {
                ids.insert(normalize_id(raw, width));
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use judgeloop_shared::{CaseClassification, CaseStatus};

    fn record(id: &str) -> ProcessedRecord {
        ProcessedRecord::new(
            CaseClassification {
                status: CaseStatus::Done,
                actions: "Se reinició el router".into(),
                info: "Cliente, satisfecho".into(),
                department: "SOP".into(),
            },
            id,
        )
    }

    #[test]
    fn header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("out.csv"));
        sink.append(&[record("001")]).unwrap();
        sink.append(&[record("002"), record("003")]).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "status,actions,info,department,caseID");
        assert_eq!(lines.len(), 4);
        assert_eq!(content.matches("caseID").count(), 1);
        assert!(lines[1].starts_with("done,"));
        assert!(lines[1].contains("\"Cliente, satisfecho\""));
    }

    #[test]
    fn missing_file_means_nothing_processed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("absent.csv"));
        assert!(sink.processed_ids(3).unwrap().is_empty());
    }

    #[test]
    fn processed_ids_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        std::fs::write(&path, "status,actions,info,department,caseID\ndone,a,b,c,1\ndone,a,b,c,012\n")
            .unwrap();
        let ids = CsvSink::new(&path).processed_ids(3).unwrap();
        assert!(ids.contains("001"));
        assert!(ids.contains("012"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn missing_id_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "status,actions\ndone,a\n").unwrap();
        let err = CsvSink::new(&path).processed_ids(3).unwrap_err();
        assert!(err.to_string().contains("caseID"));
    }

    #[test]
    fn appended_ids_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("out.csv"));
        sink.append(&[record("004"), record("010")]).unwrap();
        let ids = sink.processed_ids(3).unwrap();
        assert_eq!(ids, HashSet::from(["004".to_string(), "010".to_string()]));
    }
}

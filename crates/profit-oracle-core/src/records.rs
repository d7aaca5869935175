//! Durable completion records keyed by request identifier.

use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{ConsultingReport, ConsultingRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub request_id: String,
    pub status: CompletionStatus,
    pub goal: String,
    pub business_profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CompletionRecord {
    pub fn completed(
        request_id: impl Into<String>,
        request: &ConsultingRequest,
        report: &ConsultingReport,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            status: CompletionStatus::Completed,
            goal: request.goal.clone(),
            business_profile: request.business_profile.clone(),
            final_report: Some(report.final_report.clone()),
            graph_file_path: report.graph_file_path.clone(),
            impact_value: report.impact_value,
            error: None,
            error_kind: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(
        request_id: impl Into<String>,
        goal: impl Into<String>,
        business_profile: impl Into<String>,
        error: impl ToString,
        error_kind: Option<&str>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            status: CompletionStatus::Failed,
            goal: goal.into(),
            business_profile: business_profile.into(),
            final_report: None,
            graph_file_path: None,
            impact_value: None,
            error: Some(error.to_string()),
            error_kind: error_kind.map(str::to_string),
            completed_at: Utc::now(),
        }
    }
}

const MAX_REQUEST_ID_LEN: usize = 128;

/// Request ids double as file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn is_valid_request_id(request_id: &str) -> bool {
    !request_id.is_empty()
        && request_id.len() <= MAX_REQUEST_ID_LEN
        && request_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

fn record_path(dir: &Path, request_id: &str) -> Option<PathBuf> {
    is_valid_request_id(request_id).then(|| dir.join(format!("{request_id}.json")))
}

/// Write `record` to `{dir}/{request_id}.json`, replacing any previous record.
pub fn persist_completion_record<P: AsRef<Path>>(
    dir: P,
    record: &CompletionRecord,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)
        .with_context(|| format!("failed to create records directory {}", dir.display()))?;
    let Some(path) = record_path(dir, &record.request_id) else {
        bail!("request id {:?} is not a valid record name", record.request_id);
    };
    let payload = serde_json::to_vec_pretty(record)?;
    let mut file = File::create(&path)
        .with_context(|| format!("failed to create record file {}", path.display()))?;
    file.write_all(&payload)
        .with_context(|| format!("failed to write record file {}", path.display()))?;
    Ok(path)
}

/// Load a previously persisted record, `None` if the request is unknown.
pub fn load_completion_record<P: AsRef<Path>>(
    dir: P,
    request_id: &str,
) -> Result<Option<CompletionRecord>> {
    let Some(path) = record_path(dir.as_ref(), request_id) else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read(&path)
        .with_context(|| format!("failed to read record file {}", path.display()))?;
    let record: CompletionRecord = serde_json::from_slice(&raw)
        .with_context(|| format!("malformed record file {}", path.display()))?;
    if record.request_id != request_id {
        bail!(
            "record file {} belongs to request {}",
            path.display(),
            record.request_id
        );
    }
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persists_and_reloads_by_request_id() -> Result<()> {
        let dir = tempdir()?;
        let request = ConsultingRequest::new("Increase revenue", "A general store", "sales.csv");
        let report = ConsultingReport {
            final_report: "Stock more seasonal goods.".into(),
            graph_file_path: Some(PathBuf::from("data/artifacts/chart.png")),
            impact_value: Some(1250.0),
        };

        let record = CompletionRecord::completed("req-42", &request, &report);
        let path = persist_completion_record(dir.path(), &record)?;
        assert!(path.ends_with("req-42.json"));

        let loaded = load_completion_record(dir.path(), "req-42")?.expect("record exists");
        assert_eq!(loaded.status, CompletionStatus::Completed);
        assert_eq!(loaded.final_report.as_deref(), Some("Stock more seasonal goods."));
        assert_eq!(loaded.impact_value, Some(1250.0));
        Ok(())
    }

    #[test]
    fn unknown_request_is_none() -> Result<()> {
        let dir = tempdir()?;
        assert!(load_completion_record(dir.path(), "missing")?.is_none());
        Ok(())
    }

    #[test]
    fn request_ids_cannot_escape_directory() {
        assert_eq!(record_path(Path::new("/records"), "../etc/passwd"), None);
        assert_eq!(
            record_path(Path::new("/records"), "req-42_a"),
            Some(PathBuf::from("/records/req-42_a.json"))
        );
    }

    #[test]
    fn similar_ids_do_not_share_a_record() -> Result<()> {
        let dir = tempdir()?;
        let record = CompletionRecord::failed("a.b", "Grow", "Store", "boom", None);
        assert!(persist_completion_record(dir.path(), &record).is_err());

        let record = CompletionRecord::failed("a_b", "Grow", "Store", "boom", None);
        persist_completion_record(dir.path(), &record)?;

        assert!(load_completion_record(dir.path(), "a.b")?.is_none());
        let loaded = load_completion_record(dir.path(), "a_b")?.expect("record exists");
        assert_eq!(loaded.request_id, "a_b");
        Ok(())
    }

    #[test]
    fn record_for_another_request_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let record = CompletionRecord::failed("req-1", "Grow", "Store", "boom", None);
        let path = persist_completion_record(dir.path(), &record)?;
        fs::rename(&path, dir.path().join("req-2.json"))?;

        assert!(load_completion_record(dir.path(), "req-2").is_err());
        Ok(())
    }

    #[test]
    fn request_id_alphabet() {
        assert!(is_valid_request_id("consult-1b2c_3"));
        assert!(!is_valid_request_id(""));
        assert!(!is_valid_request_id("a.b"));
        assert!(!is_valid_request_id("with space"));
        assert!(!is_valid_request_id(&"x".repeat(129)));
    }
}

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

const LOG_DIR_ENV: &str = "PROFIT_ORACLE_LOG_DIR";
const RETENTION_ENV: &str = "PROFIT_ORACLE_LOG_RETENTION_DAYS";
const DEFAULT_LOG_DIR: &str = "data/logs";
const DEFAULT_RETENTION_DAYS: u64 = 90;
const EXCERPT_CHARS: usize = 280;

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("api_key", r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)"),
        ("secret", r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)"),
        ("bearer", r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)"),
        ("sk_token", r"(sk-[A-Za-z0-9_\-]{16,})"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|regex| (name, regex)))
    .collect()
});

/// Outcome of one pipeline run, as handed to the run log.
#[derive(Debug, Clone)]
pub struct RunLogInput {
    pub request_id: String,
    pub goal: String,
    pub status: String,
    pub report: Option<String>,
    pub graph_file_path: Option<PathBuf>,
    pub impact_value: Option<f64>,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct RunLogRecord {
    timestamp: String,
    request_id: String,
    goal: String,
    status: String,
    report_excerpt: Option<String>,
    graph_file_path: Option<String>,
    impact_value: Option<f64>,
    error: Option<String>,
    redactions: Vec<&'static str>,
}

/// Where run logs go and how long they are kept.
#[derive(Debug, Clone)]
pub struct RunLogSettings {
    pub base_dir: PathBuf,
    pub retention_days: u64,
}

impl RunLogSettings {
    pub fn from_env() -> Self {
        let base_dir = std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR));
        let retention_days = std::env::var(RETENTION_ENV)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETENTION_DAYS);
        Self {
            base_dir,
            retention_days,
        }
    }
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{line}")
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Mask anything that looks like a credential, recording which patterns fired.
pub fn redact(input: &str, redactions: &mut BTreeSet<&'static str>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(name);
        }
    }
    output
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}

/// Append a redacted entry to `runs.jsonl` using env-derived settings.
pub fn log_run_completion(input: RunLogInput) -> Result<PathBuf> {
    log_run_completion_with(&RunLogSettings::from_env(), input)
}

pub fn log_run_completion_with(settings: &RunLogSettings, input: RunLogInput) -> Result<PathBuf> {
    let timestamp = Utc::now();
    let mut redactions = BTreeSet::new();

    let goal = redact(&input.goal, &mut redactions);
    let report_excerpt = input
        .report
        .as_deref()
        .map(|report| redact(&excerpt(report), &mut redactions));
    let error = input
        .error
        .as_deref()
        .map(|message| redact(message, &mut redactions));

    let record = RunLogRecord {
        timestamp: timestamp.to_rfc3339(),
        request_id: input.request_id.clone(),
        goal,
        status: input.status,
        report_excerpt,
        graph_file_path: input
            .graph_file_path
            .map(|path| path.display().to_string()),
        impact_value: input.impact_value,
        error,
        redactions: redactions.iter().copied().collect(),
    };

    let month_dir = settings
        .base_dir
        .join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", timestamp.month()));
    let path = month_dir.join("runs.jsonl");
    append_json_line(&path, &record)?;

    if !record.redactions.is_empty() {
        warn!(
            request_id = %input.request_id,
            fields = ?record.redactions,
            "redacted potential secrets from run log"
        );
    }

    enforce_retention(&settings.base_dir, settings.retention_days)?;

    Ok(path)
}

fn enforce_retention(base_dir: &Path, retention_days: u64) -> Result<()> {
    if retention_days == 0 || !base_dir.exists() {
        return Ok(());
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days.saturating_mul(86_400)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    prune_directory(base_dir, cutoff)
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    #[test]
    fn run_log_redacts_and_appends() -> Result<()> {
        let temp = TempDir::new()?;
        let settings = RunLogSettings {
            base_dir: temp.path().to_path_buf(),
            retention_days: 0,
        };

        let input = RunLogInput {
            request_id: "req-7".into(),
            goal: "Grow margin, api_key=abcd1234".into(),
            status: "completed".into(),
            report: Some("Use bearer XYZ123 for nothing".into()),
            graph_file_path: Some(PathBuf::from("data/artifacts/chart.png")),
            impact_value: Some(900.0),
            error: None,
        };

        let path = log_run_completion_with(&settings, input.clone())?;
        log_run_completion_with(&settings, input)?;
        assert!(path.ends_with("runs.jsonl"));

        let contents = fs::read_to_string(&path)?;
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let record: Value = serde_json::from_str(lines[0])?;
        assert_eq!(record["request_id"], "req-7");
        assert_eq!(record["goal"], "Grow margin, api_key=[REDACTED]");
        assert!(!contents.contains("abcd1234"));
        assert!(!contents.contains("XYZ123"));
        let redactions = record["redactions"].as_array().expect("array");
        assert_eq!(redactions.len(), 2);
        Ok(())
    }

    #[test]
    fn bare_tokens_are_masked_entirely() {
        let mut redactions = BTreeSet::new();
        let masked = redact("key sk-abcdefghijklmnop1234 here", &mut redactions);
        assert_eq!(masked, "key [REDACTED] here");
        assert!(redactions.contains("sk_token"));
    }

    #[test]
    fn long_reports_are_truncated() {
        let long = "x".repeat(EXCERPT_CHARS + 10);
        assert_eq!(excerpt(&long).chars().count(), EXCERPT_CHARS + 1);
    }
}

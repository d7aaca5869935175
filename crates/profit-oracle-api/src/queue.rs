use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use dashmap::{DashMap, mapref::entry::Entry};
use profit_oracle_core::{
    CompletionRecord, CompletionStatus, ConsultingNodes, ConsultingRequest, RunLogInput,
    RunLogSettings, SessionOptions, is_valid_request_id, load_completion_record,
    log_run_completion_with, persist_completion_record, run_consulting_session_with_options,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub goal: String,
    pub business_profile: String,
    #[serde(default)]
    pub file_urls: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0}")]
    Invalid(String),
    #[error("request {0} is already running")]
    Duplicate(String),
}

#[derive(Debug, Clone)]
enum RequestRecord {
    Queued,
    Running,
    Finished(CompletionRecord),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct RequestStatus {
    pub request_id: String,
    pub state: RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<CompletionRecord>,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct QueueMetrics {
    pub max_concurrency: usize,
    pub available_permits: usize,
    pub active_requests: usize,
    pub tracked_requests: usize,
}

/// Semaphore-bounded worker pool running one consulting graph per request.
#[derive(Clone)]
pub struct RequestQueue {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    nodes: ConsultingNodes,
    http: reqwest::Client,
    work_dir: PathBuf,
    records_dir: PathBuf,
    run_log: RunLogSettings,
    requests: Arc<DashMap<String, RequestRecord>>,
}

impl RequestQueue {
    pub fn new(
        nodes: ConsultingNodes,
        max_concurrency: usize,
        work_dir: PathBuf,
        records_dir: PathBuf,
        download_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()
            .context("failed to build download client")?;
        let max_concurrency = max_concurrency.max(1);
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            nodes,
            http,
            work_dir,
            records_dir,
            run_log: RunLogSettings::from_env(),
            requests: Arc::new(DashMap::new()),
        })
    }

    pub fn with_run_log(mut self, run_log: RunLogSettings) -> Self {
        self.run_log = run_log;
        self
    }

    /// Validate and enqueue a request, returning its identifier immediately.
    pub fn submit(&self, request: AnalyzeRequest) -> Result<String, SubmitError> {
        if request.goal.trim().is_empty() {
            return Err(SubmitError::Invalid("goal must not be empty".into()));
        }
        let Some(file_url) = request.file_urls.first().cloned() else {
            return Err(SubmitError::Invalid(
                "file_urls must contain at least one dataset URL".into(),
            ));
        };
        if request.file_urls.len() > 1 {
            warn!(
                ignored = request.file_urls.len() - 1,
                "only the first dataset URL is analyzed"
            );
        }

        let request_id = request
            .request_id
            .clone()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if !is_valid_request_id(&request_id) {
            return Err(SubmitError::Invalid(
                "request_id may only contain ASCII letters, digits, '-' and '_' (max 128)".into(),
            ));
        }

        match self.requests.entry(request_id.clone()) {
            Entry::Occupied(mut entry) => {
                if matches!(entry.get(), RequestRecord::Queued | RequestRecord::Running) {
                    return Err(SubmitError::Duplicate(request_id));
                }
                entry.insert(RequestRecord::Queued);
            }
            Entry::Vacant(entry) => {
                entry.insert(RequestRecord::Queued);
            }
        }

        let queue = self.clone();
        let id = request_id.clone();
        tokio::spawn(async move {
            queue.process(id, request, file_url).await;
        });

        Ok(request_id)
    }

    #[instrument(name = "queue.process", skip(self, request, file_url))]
    async fn process(&self, request_id: String, request: AnalyzeRequest, file_url: String) {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                self.finish(
                    &request_id,
                    CompletionRecord::failed(
                        &request_id,
                        &request.goal,
                        &request.business_profile,
                        err,
                        Some("queue_closed"),
                    ),
                );
                return;
            }
        };
        self.requests.insert(request_id.clone(), RequestRecord::Running);

        let outcome = self.run(&request_id, &request, &file_url).await;
        self.clean_work_dir(&request_id).await;

        let record = match outcome {
            Ok(record) => record,
            Err(err) => {
                error!(%request_id, error = %err, "request failed before the pipeline ran");
                CompletionRecord::failed(
                    &request_id,
                    &request.goal,
                    &request.business_profile,
                    format!("{err:#}"),
                    Some("download"),
                )
            }
        };
        drop(permit);

        self.finish(&request_id, record);
    }

    async fn run(
        &self,
        request_id: &str,
        request: &AnalyzeRequest,
        file_url: &str,
    ) -> Result<CompletionRecord> {
        let data_path = self.download(request_id, file_url).await?;
        let consulting = ConsultingRequest::new(
            request.goal.clone(),
            request.business_profile.clone(),
            data_path,
        );

        let result = run_consulting_session_with_options(
            consulting.clone(),
            &self.nodes,
            SessionOptions::default().with_session_id(request_id.to_string()),
        )
        .await;

        Ok(match result {
            Ok(outcome) => {
                info!(%request_id, "request completed");
                CompletionRecord::completed(request_id, &consulting, &outcome.report)
            }
            Err(err) => {
                error!(%request_id, error = %err, kind = err.kind(), "pipeline failed");
                CompletionRecord::failed(
                    request_id,
                    &consulting.goal,
                    &consulting.business_profile,
                    &err,
                    Some(err.kind()),
                )
            }
        })
    }

    /// Fetch the dataset into the request's work directory, keeping the URL's extension.
    async fn download(&self, request_id: &str, file_url: &str) -> Result<PathBuf> {
        let url = reqwest::Url::parse(file_url)
            .with_context(|| format!("invalid dataset URL {file_url}"))?;
        let target = self
            .work_dir
            .join(request_id)
            .join(dataset_file_name(&url));

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("dataset download rejected for {url}"))?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {url}"))?;

        let parent = target
            .parent()
            .ok_or_else(|| anyhow!("work path has no parent"))?;
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
        tokio::fs::write(&target, &bytes)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        Ok(target)
    }

    /// The dataset is only needed while the graph runs; charts live in the artifact dir.
    async fn clean_work_dir(&self, request_id: &str) {
        let dir = self.work_dir.join(request_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    %request_id,
                    dir = %dir.display(),
                    error = %err,
                    "failed to remove work directory"
                );
            }
        }
    }

    fn finish(&self, request_id: &str, record: CompletionRecord) {
        let persisted = match persist_completion_record(&self.records_dir, &record) {
            Ok(_) => true,
            Err(err) => {
                warn!(%request_id, error = %err, "failed to persist completion record");
                false
            }
        };

        let log = RunLogInput {
            request_id: request_id.to_string(),
            goal: record.goal.clone(),
            status: match record.status {
                CompletionStatus::Completed => "completed".into(),
                CompletionStatus::Failed => "failed".into(),
            },
            report: record.final_report.clone(),
            graph_file_path: record.graph_file_path.clone(),
            impact_value: record.impact_value,
            error: record.error.clone(),
        };
        if let Err(err) = log_run_completion_with(&self.run_log, log) {
            warn!(%request_id, error = %err, "failed to append run log");
        }

        // Persisted records are served from disk.
        if persisted {
            self.requests.remove(request_id);
        } else {
            self.requests
                .insert(request_id.to_string(), RequestRecord::Finished(record));
        }
    }

    /// In-memory status first, then the durable record.
    pub fn status(&self, request_id: &str) -> Result<Option<RequestStatus>> {
        if let Some(record) = self.requests.get(request_id) {
            let status = match record.value() {
                RequestRecord::Queued => status_of(request_id, RequestState::Queued, None),
                RequestRecord::Running => status_of(request_id, RequestState::Running, None),
                RequestRecord::Finished(record) => finished_status(record),
            };
            return Ok(Some(status));
        }

        Ok(load_completion_record(&self.records_dir, request_id)?
            .map(|record| finished_status(&record)))
    }

    pub fn metrics(&self) -> QueueMetrics {
        let active_requests = self
            .requests
            .iter()
            .filter(|entry| matches!(entry.value(), RequestRecord::Queued | RequestRecord::Running))
            .count();
        QueueMetrics {
            max_concurrency: self.max_concurrency,
            available_permits: self.semaphore.available_permits(),
            active_requests,
            tracked_requests: self.requests.len(),
        }
    }
}

fn status_of(
    request_id: &str,
    state: RequestState,
    record: Option<CompletionRecord>,
) -> RequestStatus {
    RequestStatus {
        request_id: request_id.to_string(),
        state,
        record,
    }
}

fn finished_status(record: &CompletionRecord) -> RequestStatus {
    let state = match record.status {
        CompletionStatus::Completed => RequestState::Completed,
        CompletionStatus::Failed => RequestState::Failed,
    };
    status_of(&record.request_id, state, Some(record.clone()))
}

fn dataset_file_name(url: &reqwest::Url) -> String {
    let extension = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension {
        Some(ext) => format!("dataset.{ext}"),
        None => "dataset".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_name_keeps_url_extension() {
        let url = reqwest::Url::parse("https://files.example.com/uploads/Sales.XLSX?sig=abc")
            .expect("url");
        assert_eq!(dataset_file_name(&url), "dataset.xlsx");

        let url = reqwest::Url::parse("https://files.example.com/export").expect("url");
        assert_eq!(dataset_file_name(&url), "dataset");
    }
}

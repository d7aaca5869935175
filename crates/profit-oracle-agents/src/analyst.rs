//! Analytics role: runs the dataset through a code-execution sandbox and pulls
//! out the chart it draws.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use profit_oracle_core::{
    AnalyticsNode, AnalyticsOutput, CompletionService, DatasetFormat, FilePurpose, FileStore,
    FileUpload, PipelineError, ResponseRequest, SandboxArtifact, TaskPackage, ToolGrant, metrics,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::prompts;

const DEFAULT_RETENTION: Duration = Duration::from_secs(12 * 60 * 60);

pub struct AnalyticsAgent {
    service: Arc<dyn CompletionService>,
    files: Arc<dyn FileStore>,
    model: String,
    retention: Duration,
    artifact_dir: PathBuf,
}

impl AnalyticsAgent {
    pub fn new(
        service: Arc<dyn CompletionService>,
        files: Arc<dyn FileStore>,
        model: impl Into<String>,
        artifact_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service,
            files,
            model: model.into(),
            retention: DEFAULT_RETENTION,
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Download an image artifact; anything else yields no path.
    ///
    /// Failures are absorbed here so the run degrades to a text-only report.
    async fn resolve_chart(&self, artifact: Option<&SandboxArtifact>) -> Option<PathBuf> {
        let Some(artifact) = artifact else {
            metrics::record_artifact("absent");
            return None;
        };
        if !artifact.is_image() {
            debug!(filename = %artifact.filename, "ignoring non-image sandbox file");
            metrics::record_artifact("ignored");
            return None;
        }

        match self.download(artifact).await {
            Ok(path) => {
                info!(path = %path.display(), "chart resolved from sandbox");
                metrics::record_artifact("resolved");
                Some(path)
            }
            Err(err) => {
                warn!(error = %err, file_id = %artifact.file_id, "chart could not be resolved");
                metrics::record_artifact("failed");
                None
            }
        }
    }

    async fn download(&self, artifact: &SandboxArtifact) -> Result<PathBuf, PipelineError> {
        let bytes = self
            .files
            .fetch_container_file(artifact)
            .await
            .map_err(|err| PipelineError::ArtifactResolution(err.to_string()))?;

        tokio::fs::create_dir_all(&self.artifact_dir)
            .await
            .map_err(|err| {
                PipelineError::ArtifactResolution(format!(
                    "cannot create {}: {err}",
                    self.artifact_dir.display()
                ))
            })?;

        let path = self
            .artifact_dir
            .join(format!("{}-{}", Uuid::new_v4(), local_name(&artifact.filename)));
        tokio::fs::write(&path, &bytes).await.map_err(|err| {
            PipelineError::ArtifactResolution(format!("cannot write {}: {err}", path.display()))
        })?;
        Ok(path)
    }
}

/// Sandbox filenames may carry a directory (`/mnt/data/chart.png`); keep the leaf.
fn local_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("chart.png")
        .to_string()
}

#[async_trait]
impl AnalyticsNode for AnalyticsAgent {
    #[instrument(
        name = "agent.analytics",
        skip(self, package, data_path),
        fields(model = %self.model, data_path = %data_path.display())
    )]
    async fn analyze(
        &self,
        package: &TaskPackage,
        data_path: &Path,
    ) -> Result<AnalyticsOutput, PipelineError> {
        DatasetFormat::detect(data_path)?;

        let file_id = self
            .files
            .upload(
                FileUpload::new(data_path, FilePurpose::UserData).expiring_after(self.retention),
            )
            .await
            .map_err(PipelineError::Analytics)?;

        let request = ResponseRequest::new(self.model.clone(), prompts::analytics_prompt(package))
            .with_instructions(prompts::ANALYTICS_ROLE)
            .with_tool(ToolGrant::CodeInterpreter {
                file_ids: vec![file_id],
            });

        let response = self
            .service
            .create_response(request)
            .await
            .map_err(PipelineError::Analytics)?;

        let graph_file_path = self.resolve_chart(response.first_artifact()).await;

        Ok(AnalyticsOutput {
            analytics_report: response.output_text(),
            graph_file_path,
        })
    }
}

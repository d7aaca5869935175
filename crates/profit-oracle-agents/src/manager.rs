//! Manager role: turns the client brief into one task package per specialist.

use std::sync::Arc;

use async_trait::async_trait;
use profit_oracle_core::{
    CompletionService, ConsultingRequest, ManagerCommand, ManagerNode, PipelineError,
    ResponseRequest, TaskPackage, summarize_dataset,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::prompts;

const SCHEMA_NAME: &str = "manager_command";

/// Wire shape the service is asked to fill in.
#[derive(Debug, Deserialize, JsonSchema)]
struct PackageSchema {
    /// Tasks to be completed by the specialist.
    tasks: String,
    /// Focus or lens through which the specialist should work.
    focus: String,
    /// What the tasks must satisfy to count as done.
    #[serde(alias = "standards")]
    standard: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CommandSchema {
    /// Package for the research specialist.
    research_instructions: PackageSchema,
    /// Package for the analytics specialist.
    analytics_instructions: PackageSchema,
}

impl From<PackageSchema> for TaskPackage {
    fn from(value: PackageSchema) -> Self {
        TaskPackage::new(value.tasks, value.focus, value.standard)
    }
}

impl From<CommandSchema> for ManagerCommand {
    fn from(value: CommandSchema) -> Self {
        ManagerCommand {
            research_instructions: value.research_instructions.into(),
            analytics_instructions: value.analytics_instructions.into(),
        }
    }
}

pub struct ManagerAgent {
    service: Arc<dyn CompletionService>,
    model: String,
}

impl ManagerAgent {
    pub fn new(service: Arc<dyn CompletionService>, model: impl Into<String>) -> Self {
        Self {
            service,
            model: model.into(),
        }
    }

    fn output_schema() -> Result<serde_json::Value, PipelineError> {
        serde_json::to_value(schemars::schema_for!(CommandSchema))
            .map_err(|err| PipelineError::ManagerOutput(format!("schema generation failed: {err}")))
    }
}

/// Strictly parse the structured output into two task packages.
pub fn parse_manager_output(raw: &str) -> Result<ManagerCommand, PipelineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::ManagerOutput("empty response".into()));
    }
    serde_json::from_str::<CommandSchema>(trimmed)
        .map(ManagerCommand::from)
        .map_err(|err| PipelineError::ManagerOutput(format!("unparseable task packages: {err}")))
}

#[async_trait]
impl ManagerNode for ManagerAgent {
    #[instrument(name = "agent.manager", skip(self, request), fields(model = %self.model))]
    async fn plan(&self, request: &ConsultingRequest) -> Result<ManagerCommand, PipelineError> {
        let summary = summarize_dataset(&request.data_path)?;
        debug!(columns = summary.columns.len(), rows = summary.rows, "dataset briefed");

        let call = ResponseRequest::new(
            self.model.clone(),
            prompts::manager_request(&request.business_profile, &request.goal, &summary),
        )
        .with_instructions(prompts::MANAGER_ROLE)
        .with_output_schema(SCHEMA_NAME, Self::output_schema()?);

        let response = self
            .service
            .create_response(call)
            .await
            .map_err(|err| PipelineError::ManagerOutput(format!("service call failed: {err}")))?;

        parse_manager_output(&response.output_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profit_oracle_core::{ServiceError, ServiceResponse};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct CannedService {
        reply: Result<String, ()>,
        seen: Mutex<Vec<ResponseRequest>>,
    }

    #[async_trait]
    impl CompletionService for CannedService {
        async fn create_response(
            &self,
            request: ResponseRequest,
        ) -> Result<ServiceResponse, ServiceError> {
            self.seen.lock().expect("lock").push(request);
            match &self.reply {
                Ok(text) => Ok(ServiceResponse::from_text(text.clone())),
                Err(()) => Err(ServiceError::Http {
                    status: 500,
                    message: "boom".into(),
                }),
            }
        }
    }

    fn dataset(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("sales.csv");
        std::fs::write(&path, "Month,Revenue\nJan,100\nFeb,120\n").expect("write csv");
        path
    }

    #[test]
    fn parses_plural_standards_key() {
        let command = parse_manager_output(
            r#"{"research_instructions":{"tasks":"t1","focus":"f1","standards":"s1"},
                "analytics_instructions":{"tasks":"t2","focus":"f2","standard":"s2"}}"#,
        )
        .expect("valid command");
        assert_eq!(command.research_instructions.standard, "s1");
        assert_eq!(command.analytics_instructions.tasks, "t2");
    }

    #[test]
    fn rejects_partial_output() {
        let err = parse_manager_output(r#"{"research_instructions":{"tasks":"t"}}"#)
            .expect_err("missing fields");
        assert!(matches!(err, PipelineError::ManagerOutput(_)));
    }

    #[tokio::test]
    async fn plan_embeds_brief_and_schema() {
        let dir = TempDir::new().expect("temp dir");
        let service = Arc::new(CannedService {
            reply: Ok(r#"{"research_instructions":{"tasks":"t1","focus":"f1","standard":"s1"},
                         "analytics_instructions":{"tasks":"t2","focus":"f2","standard":"s2"}}"#
                .into()),
            seen: Mutex::new(Vec::new()),
        });
        let manager = ManagerAgent::new(service.clone(), "gpt-4o-mini");
        let request = ConsultingRequest::new("Increase revenue", "A bakery", dataset(&dir));

        let command = manager.plan(&request).await.expect("plan succeeds");
        assert_eq!(command.analytics_instructions.focus, "f2");

        let seen = service.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        let call = &seen[0];
        assert_eq!(call.instructions.as_deref(), Some(prompts::MANAGER_ROLE));
        assert!(call.input.text().contains("A bakery"));
        assert!(call.input.text().contains("Revenue"));
        let schema = call.output_schema.as_ref().expect("schema attached");
        assert_eq!(schema.name, SCHEMA_NAME);
        assert!(schema.schema.to_string().contains("research_instructions"));
    }

    #[tokio::test]
    async fn service_failure_is_fatal_manager_error() {
        let dir = TempDir::new().expect("temp dir");
        let service = Arc::new(CannedService {
            reply: Err(()),
            seen: Mutex::new(Vec::new()),
        });
        let manager = ManagerAgent::new(service, "gpt-4o-mini");
        let request = ConsultingRequest::new("Increase revenue", "A bakery", dataset(&dir));

        let err = manager.plan(&request).await.expect_err("must fail");
        assert!(matches!(err, PipelineError::ManagerOutput(_)));
    }

    #[tokio::test]
    async fn unsupported_dataset_skips_the_service() {
        let service = Arc::new(CannedService {
            reply: Ok("{}".into()),
            seen: Mutex::new(Vec::new()),
        });
        let manager = ManagerAgent::new(service.clone(), "gpt-4o-mini");
        let request = ConsultingRequest::new("Increase revenue", "A bakery", "notes.txt");

        let err = manager.plan(&request).await.expect_err("must fail");
        assert!(matches!(err, PipelineError::UnsupportedFormat { .. }));
        assert!(service.seen.lock().expect("lock").is_empty());
    }
}

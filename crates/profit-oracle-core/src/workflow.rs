use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use graph_flow::{
    Context, ExecutionStatus, FlowRunner, GraphBuilder, GraphError, InMemorySessionStorage,
    NextAction, Session, SessionStorage, Task, TaskResult,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dataset::DatasetFormat;
use crate::error::PipelineError;
use crate::metrics;
use crate::nodes::{AnalyticsNode, ConsultingNodes, ManagerNode, ResearchNode, SynthesizerNode};
use crate::state::{
    AnalyticsOutput, ConsultingReport, ConsultingRequest, ResearchOutput, SharedState,
    StateField, SynthesisInput, TaskPackage,
};
use crate::trace::{SharedTrace, TraceEvent, TracePhase, TraceSummary};

pub const MANAGER_NODE: &str = "manager";
pub const RESEARCH_NODE: &str = "research";
pub const ANALYTICS_NODE: &str = "analytics";
pub const SYNTHESIZER_NODE: &str = "synthesizer";
const FAN_OUT_TASK: &str = "fan_out";

/// First typed node error of a run, kept so it survives the graph engine's
/// string-only error channel.
type FailureSlot = Arc<Mutex<Option<PipelineError>>>;

#[derive(Clone, Default)]
struct RunHandles {
    failure: FailureSlot,
    trace: SharedTrace,
}

impl RunHandles {
    fn fail(&self, node: &str, err: PipelineError) -> GraphError {
        let message = err.to_string();
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(err);
        }
        GraphError::TaskExecutionFailed(format!("{node}: {message}"))
    }

    fn take_failure(&self) -> Option<PipelineError> {
        self.failure.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Run one node future with start/finish bookkeeping.
    async fn observe<T, F>(&self, node: &str, fut: F) -> Result<T, PipelineError>
    where
        F: std::future::Future<Output = Result<T, PipelineError>>,
    {
        self.trace.record(node, TracePhase::Started, "entered");
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                metrics::record_node(node, "ok", elapsed);
                self.trace.record(node, TracePhase::Finished, "completed");
            }
            Err(err) => {
                metrics::record_node(node, err.kind(), elapsed);
                self.trace.record(node, TracePhase::Failed, err.to_string());
            }
        }
        result
    }
}

/// Write a state field, refusing a second write to the same field.
async fn write_once<T: Serialize>(
    context: &Context,
    field: StateField,
    value: T,
) -> Result<(), PipelineError> {
    if context.get::<serde_json::Value>(field.key()).await.is_some() {
        return Err(PipelineError::Graph(format!(
            "state field `{}` written twice",
            field.key()
        )));
    }
    context.set(field.key(), value).await;
    Ok(())
}

async fn read_field<T: DeserializeOwned>(
    context: &Context,
    field: StateField,
) -> Result<T, PipelineError> {
    context.get(field.key()).await.ok_or_else(|| {
        PipelineError::Graph(format!("state field `{}` missing", field.key()))
    })
}

struct ManagerTask {
    node: Arc<dyn ManagerNode>,
    handles: RunHandles,
}

impl ManagerTask {
    async fn execute(&self, context: &Context) -> Result<(), PipelineError> {
        let request = ConsultingRequest {
            goal: read_field(context, StateField::Goal).await?,
            business_profile: read_field(context, StateField::BusinessProfile).await?,
            data_path: read_field(context, StateField::DataPath).await?,
        };

        let command = self
            .handles
            .observe(MANAGER_NODE, self.node.plan(&request))
            .await?;

        write_once(
            context,
            StateField::ResearchInstructions,
            &command.research_instructions,
        )
        .await?;
        write_once(
            context,
            StateField::AnalyticsInstructions,
            &command.analytics_instructions,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Task for ManagerTask {
    fn id(&self) -> &str {
        MANAGER_NODE
    }

    #[instrument(name = "task.manager", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        self.execute(&context)
            .await
            .map_err(|err| self.handles.fail(MANAGER_NODE, err))?;

        info!("manager issued research and analytics packages");
        Ok(TaskResult::new(
            Some("Task packages issued".to_string()),
            NextAction::ContinueAndExecute,
        ))
    }
}

/// Fork/join barrier: research and analytics run side by side and their
/// outputs are written only after both have returned.
struct FanOutTask {
    research: Arc<dyn ResearchNode>,
    analytics: Arc<dyn AnalyticsNode>,
    handles: RunHandles,
}

impl FanOutTask {
    async fn run_research(&self, package: &TaskPackage) -> Result<ResearchOutput, PipelineError> {
        self.handles
            .observe(RESEARCH_NODE, self.research.research(package))
            .await
    }

    async fn run_analytics(
        &self,
        package: &TaskPackage,
        data_path: &Path,
    ) -> Result<AnalyticsOutput, PipelineError> {
        self.handles
            .observe(ANALYTICS_NODE, self.analytics.analyze(package, data_path))
            .await
    }

    async fn execute(&self, context: &Context) -> Result<(), (String, PipelineError)> {
        let tag = |node: &str| {
            let node = node.to_string();
            move |err: PipelineError| (node, err)
        };

        let research_package: TaskPackage = read_field(context, StateField::ResearchInstructions)
            .await
            .map_err(tag(FAN_OUT_TASK))?;
        let analytics_package: TaskPackage =
            read_field(context, StateField::AnalyticsInstructions)
                .await
                .map_err(tag(FAN_OUT_TASK))?;
        let data_path: PathBuf = read_field(context, StateField::DataPath)
            .await
            .map_err(tag(FAN_OUT_TASK))?;

        let (research, analytics) = tokio::join!(
            self.run_research(&research_package),
            self.run_analytics(&analytics_package, &data_path),
        );

        let research = research.map_err(tag(RESEARCH_NODE))?;
        let analytics = analytics.map_err(tag(ANALYTICS_NODE))?;

        write_once(context, StateField::ResearchReport, &research.research_report)
            .await
            .map_err(tag(FAN_OUT_TASK))?;
        write_once(
            context,
            StateField::AnalyticsReport,
            &analytics.analytics_report,
        )
        .await
        .map_err(tag(FAN_OUT_TASK))?;
        write_once(
            context,
            StateField::GraphFilePath,
            &analytics.graph_file_path,
        )
        .await
        .map_err(tag(FAN_OUT_TASK))?;

        debug!(
            has_chart = analytics.graph_file_path.is_some(),
            "specialists joined"
        );
        Ok(())
    }
}

#[async_trait]
impl Task for FanOutTask {
    fn id(&self) -> &str {
        FAN_OUT_TASK
    }

    #[instrument(name = "task.fan_out", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        if let Err((node, err)) = self.execute(&context).await {
            return Err(self.handles.fail(&node, err));
        }

        Ok(TaskResult::new(
            Some("Research and analytics completed".to_string()),
            NextAction::ContinueAndExecute,
        ))
    }
}

struct SynthesizerTask {
    node: Arc<dyn SynthesizerNode>,
    handles: RunHandles,
}

impl SynthesizerTask {
    async fn execute(&self, context: &Context) -> Result<(), PipelineError> {
        let input = SynthesisInput {
            business_profile: read_field(context, StateField::BusinessProfile).await?,
            goal: read_field(context, StateField::Goal).await?,
            research_report: read_field(context, StateField::ResearchReport).await?,
            analytics_report: read_field(context, StateField::AnalyticsReport).await?,
            graph_file_path: read_field(context, StateField::GraphFilePath).await?,
        };

        let output = self
            .handles
            .observe(SYNTHESIZER_NODE, self.node.synthesize(input))
            .await?;

        write_once(context, StateField::FinalReport, &output.final_report).await?;
        write_once(context, StateField::ImpactValue, output.impact_value).await?;
        Ok(())
    }
}

#[async_trait]
impl Task for SynthesizerTask {
    fn id(&self) -> &str {
        SYNTHESIZER_NODE
    }

    #[instrument(name = "task.synthesizer", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        self.execute(&context)
            .await
            .map_err(|err| self.handles.fail(SYNTHESIZER_NODE, err))?;

        Ok(TaskResult::new(
            Some("Final report synthesized".to_string()),
            NextAction::End,
        ))
    }
}

fn build_graph(nodes: &ConsultingNodes, handles: &RunHandles) -> Arc<graph_flow::Graph> {
    let manager = Arc::new(ManagerTask {
        node: nodes.manager.clone(),
        handles: handles.clone(),
    });
    let fan_out = Arc::new(FanOutTask {
        research: nodes.research.clone(),
        analytics: nodes.analytics.clone(),
        handles: handles.clone(),
    });
    let synthesizer = Arc::new(SynthesizerTask {
        node: nodes.synthesizer.clone(),
        handles: handles.clone(),
    });

    let builder = GraphBuilder::new("profit_oracle_consulting")
        .add_task(manager.clone())
        .add_task(fan_out.clone())
        .add_task(synthesizer.clone())
        .add_edge(manager.id(), fan_out.id())
        .add_edge(fan_out.id(), synthesizer.id())
        .set_start_task(manager.id());

    Arc::new(builder.build())
}

/// Options for a single consulting run.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub session_id: Option<String>,
}

impl SessionOptions {
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Everything a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: String,
    pub report: ConsultingReport,
    pub state: SharedState,
    pub trace: Vec<TraceEvent>,
}

impl SessionOutcome {
    pub fn trace_summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.trace)
    }
}

/// Run the consulting graph end to end with default options.
pub async fn run_consulting_session(
    request: ConsultingRequest,
    nodes: &ConsultingNodes,
) -> Result<SessionOutcome, PipelineError> {
    run_consulting_session_with_options(request, nodes, SessionOptions::default()).await
}

#[instrument(
    name = "workflow.consulting",
    skip(request, nodes, options),
    fields(data_path = %request.data_path.display())
)]
pub async fn run_consulting_session_with_options(
    request: ConsultingRequest,
    nodes: &ConsultingNodes,
    options: SessionOptions,
) -> Result<SessionOutcome, PipelineError> {
    DatasetFormat::detect(&request.data_path)?;

    let handles = RunHandles::default();
    let graph = build_graph(nodes, &handles);
    let storage = Arc::new(InMemorySessionStorage::new());
    let runner = FlowRunner::new(graph, storage.clone());

    let session_id = options
        .session_id
        .unwrap_or_else(|| format!("consult-{}", Uuid::new_v4()));
    let session = Session::new_from_task(session_id.clone(), MANAGER_NODE);

    write_once(&session.context, StateField::Goal, &request.goal).await?;
    write_once(
        &session.context,
        StateField::BusinessProfile,
        &request.business_profile,
    )
    .await?;
    write_once(&session.context, StateField::DataPath, &request.data_path).await?;

    storage
        .save(session)
        .await
        .map_err(|err| PipelineError::Graph(format!("failed to persist session: {err}")))?;

    loop {
        let result = match runner.run(&session_id).await {
            Ok(result) => result,
            Err(err) => {
                return Err(handles
                    .take_failure()
                    .unwrap_or_else(|| PipelineError::Graph(err.to_string())));
            }
        };

        match result.status {
            ExecutionStatus::Completed => break,
            ExecutionStatus::Error(message) => {
                return Err(handles
                    .take_failure()
                    .unwrap_or(PipelineError::Graph(message)));
            }
            _ => {
                warn!(session_id = %session_id, "graph paused unexpectedly; resuming");
                continue;
            }
        }
    }

    let session = storage
        .get(&session_id)
        .await
        .map_err(|err| PipelineError::Graph(format!("failed to reload session: {err}")))?
        .ok_or_else(|| PipelineError::Graph("session missing after execution".to_string()))?;

    let state = collect_state(&session.context).await?;
    let final_report = state
        .final_report
        .clone()
        .ok_or_else(|| PipelineError::Graph("graph ended without a final report".to_string()))?;

    let report = ConsultingReport {
        final_report,
        graph_file_path: state.graph_file_path.clone(),
        impact_value: state.impact_value,
    };

    info!(
        session_id = %session_id,
        has_chart = report.graph_file_path.is_some(),
        impact = ?report.impact_value,
        "consulting session completed"
    );

    Ok(SessionOutcome {
        session_id,
        report,
        state,
        trace: handles.trace.snapshot(),
    })
}

async fn collect_state(context: &Context) -> Result<SharedState, PipelineError> {
    Ok(SharedState {
        goal: read_field(context, StateField::Goal).await?,
        business_profile: read_field(context, StateField::BusinessProfile).await?,
        data_path: read_field(context, StateField::DataPath).await?,
        research_instructions: context.get(StateField::ResearchInstructions.key()).await,
        analytics_instructions: context.get(StateField::AnalyticsInstructions.key()).await,
        research_report: context.get(StateField::ResearchReport.key()).await,
        analytics_report: context.get(StateField::AnalyticsReport.key()).await,
        graph_file_path: context
            .get::<Option<PathBuf>>(StateField::GraphFilePath.key())
            .await
            .flatten(),
        impact_value: context
            .get::<Option<f64>>(StateField::ImpactValue.key())
            .await
            .flatten(),
        final_report: context.get(StateField::FinalReport.key()).await,
    })
}

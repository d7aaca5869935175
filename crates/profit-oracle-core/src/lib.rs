//! Profit Oracle core abstractions built directly on top of `graph_flow`.
//!
//! This crate owns the shared-state protocol, the consulting graph
//! (manager, research ∥ analytics, synthesizer), the reasoning-service
//! boundary, and the ambient plumbing (config, telemetry, run records).

mod config;
mod dataset;
mod error;
mod impact;
mod logging;
pub mod metrics;
mod nodes;
mod openai;
mod records;
mod security;
mod service;
mod state;
mod telemetry;
mod trace;
mod workflow;

pub use config::{
    AnalyticsConfig, Config, ConfigLoader, LoggingConfig, ModelConfig, OutputConfig,
    ResearchConfig, ServiceConfig,
};
pub use dataset::{ColumnSummary, ColumnType, DatasetFormat, DatasetSummary, summarize_dataset};
pub use error::{PipelineError, ServiceError};
pub use impact::{IMPACT_LINE_PREFIX, parse_impact_value};
pub use logging::{RunLogInput, RunLogSettings, log_run_completion, log_run_completion_with, redact};
pub use nodes::{AnalyticsNode, ConsultingNodes, ManagerNode, ResearchNode, SynthesizerNode};
pub use openai::OpenAiClient;
pub use records::{
    CompletionRecord, CompletionStatus, is_valid_request_id, load_completion_record,
    persist_completion_record,
};
pub use security::{SecretValue, require_env};
pub use service::{
    CompletionService, FilePurpose, FileStore, FileUpload, OutputItem, OutputSchema,
    RequestInput, ResponseRequest, SandboxArtifact, ServiceResponse, ToolGrant,
};
pub use state::{
    AnalyticsOutput, ConsultingReport, ConsultingRequest, ManagerCommand, ResearchOutput,
    SharedState, StateField, SynthesisInput, SynthesisOutput, TaskPackage,
};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{SharedTrace, TraceCollector, TraceEvent, TracePhase, TraceStep, TraceSummary};
pub use workflow::{
    ANALYTICS_NODE, MANAGER_NODE, RESEARCH_NODE, SYNTHESIZER_NODE, SessionOptions,
    SessionOutcome, run_consulting_session, run_consulting_session_with_options,
};

//! Shared-state record threaded through the consulting graph.
//!
//! Every field is written by exactly one node. The per-node input and output
//! structs below spell out which subset of fields each node reads and writes;
//! the research and analytics outputs are disjoint so the two can run side by side.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Instruction package produced by the manager for one specialist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPackage {
    /// Tasks to be completed.
    pub tasks: String,
    /// Lens through which the tasks should be approached.
    pub focus: String,
    /// What a successfully completed task looks like.
    #[serde(alias = "standards")]
    pub standard: String,
}

impl TaskPackage {
    pub fn new(
        tasks: impl Into<String>,
        focus: impl Into<String>,
        standard: impl Into<String>,
    ) -> Self {
        Self {
            tasks: tasks.into(),
            focus: focus.into(),
            standard: standard.into(),
        }
    }
}

/// Graph invocation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultingRequest {
    pub goal: String,
    pub business_profile: String,
    pub data_path: PathBuf,
}

impl ConsultingRequest {
    pub fn new(
        goal: impl Into<String>,
        business_profile: impl Into<String>,
        data_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            goal: goal.into(),
            business_profile: business_profile.into(),
            data_path: data_path.into(),
        }
    }
}

/// Manager output: one package per specialist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerCommand {
    pub research_instructions: TaskPackage,
    pub analytics_instructions: TaskPackage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub research_report: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsOutput {
    pub analytics_report: String,
    pub graph_file_path: Option<PathBuf>,
}

/// Everything the synthesizer reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisInput {
    pub business_profile: String,
    pub goal: String,
    pub research_report: String,
    pub analytics_report: String,
    pub graph_file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub final_report: String,
    pub impact_value: Option<f64>,
}

/// Names of the shared-state fields as stored in the graph context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Goal,
    BusinessProfile,
    DataPath,
    ResearchInstructions,
    AnalyticsInstructions,
    ResearchReport,
    AnalyticsReport,
    GraphFilePath,
    ImpactValue,
    FinalReport,
}

impl StateField {
    pub const ALL: [StateField; 10] = [
        StateField::Goal,
        StateField::BusinessProfile,
        StateField::DataPath,
        StateField::ResearchInstructions,
        StateField::AnalyticsInstructions,
        StateField::ResearchReport,
        StateField::AnalyticsReport,
        StateField::GraphFilePath,
        StateField::ImpactValue,
        StateField::FinalReport,
    ];

    pub fn key(self) -> &'static str {
        match self {
            StateField::Goal => "goal",
            StateField::BusinessProfile => "business_profile",
            StateField::DataPath => "data_path",
            StateField::ResearchInstructions => "research_instructions",
            StateField::AnalyticsInstructions => "analytics_instructions",
            StateField::ResearchReport => "research_report",
            StateField::AnalyticsReport => "analytics_report",
            StateField::GraphFilePath => "graph_file_path",
            StateField::ImpactValue => "impact_value",
            StateField::FinalReport => "final_report",
        }
    }
}

/// Snapshot of the accumulated state once the graph reaches `end`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedState {
    pub goal: String,
    pub business_profile: String,
    pub data_path: PathBuf,
    pub research_instructions: Option<TaskPackage>,
    pub analytics_instructions: Option<TaskPackage>,
    pub research_report: Option<String>,
    pub analytics_report: Option<String>,
    pub graph_file_path: Option<PathBuf>,
    pub impact_value: Option<f64>,
    pub final_report: Option<String>,
}

/// Graph invocation output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultingReport {
    pub final_report: String,
    pub graph_file_path: Option<PathBuf>,
    pub impact_value: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_package_accepts_plural_standards() {
        let package: TaskPackage = serde_json::from_str(
            r#"{"tasks":"Benchmark margins","focus":"Retail","standards":"Three sources"}"#,
        )
        .expect("package should deserialize");
        assert_eq!(package.standard, "Three sources");
    }

    #[test]
    fn state_keys_are_unique() {
        let mut keys: Vec<_> = StateField::ALL.iter().map(|field| field.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), StateField::ALL.len());
    }
}

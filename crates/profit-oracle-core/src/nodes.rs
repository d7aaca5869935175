//! Typed contracts of the four graph roles.
//!
//! Each trait takes exactly the state subset its role may read and returns the
//! subset it writes. Research and analytics never see each other's outputs.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::state::{
    AnalyticsOutput, ConsultingRequest, ManagerCommand, ResearchOutput, SynthesisInput,
    SynthesisOutput, TaskPackage,
};

#[async_trait]
pub trait ManagerNode: Send + Sync {
    async fn plan(&self, request: &ConsultingRequest) -> Result<ManagerCommand, PipelineError>;
}

#[async_trait]
pub trait ResearchNode: Send + Sync {
    async fn research(&self, package: &TaskPackage) -> Result<ResearchOutput, PipelineError>;
}

#[async_trait]
pub trait AnalyticsNode: Send + Sync {
    async fn analyze(
        &self,
        package: &TaskPackage,
        data_path: &Path,
    ) -> Result<AnalyticsOutput, PipelineError>;
}

#[async_trait]
pub trait SynthesizerNode: Send + Sync {
    async fn synthesize(&self, input: SynthesisInput) -> Result<SynthesisOutput, PipelineError>;
}

/// The node set a consulting graph is built from.
#[derive(Clone)]
pub struct ConsultingNodes {
    pub manager: Arc<dyn ManagerNode>,
    pub research: Arc<dyn ResearchNode>,
    pub analytics: Arc<dyn AnalyticsNode>,
    pub synthesizer: Arc<dyn SynthesizerNode>,
}

impl ConsultingNodes {
    pub fn new(
        manager: Arc<dyn ManagerNode>,
        research: Arc<dyn ResearchNode>,
        analytics: Arc<dyn AnalyticsNode>,
        synthesizer: Arc<dyn SynthesizerNode>,
    ) -> Self {
        Self {
            manager,
            research,
            analytics,
            synthesizer,
        }
    }
}

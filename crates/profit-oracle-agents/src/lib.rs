//! The four consulting roles and the wiring that turns a config plus a service
//! client into a node set for the core graph.

mod analyst;
mod manager;
pub mod prompts;
mod researcher;
mod synthesizer;

use std::sync::Arc;
use std::time::Duration;

use profit_oracle_core::{CompletionService, Config, ConsultingNodes, FileStore, OpenAiClient};

pub use analyst::AnalyticsAgent;
pub use manager::{ManagerAgent, parse_manager_output};
pub use researcher::{ResearchAgent, RetryPolicy, RetryState};
pub use synthesizer::SynthesizerAgent;

/// Builds the standard node set from configuration.
pub struct ConsultingTeam;

impl ConsultingTeam {
    /// Wire every role to the same hosted service.
    pub fn from_config(config: &Config, client: Arc<OpenAiClient>) -> ConsultingNodes {
        Self::with_services(config, client.clone(), client)
    }

    /// Wire every role to arbitrary service implementations.
    pub fn with_services(
        config: &Config,
        service: Arc<dyn CompletionService>,
        files: Arc<dyn FileStore>,
    ) -> ConsultingNodes {
        let models = &config.models;

        let manager = ManagerAgent::new(service.clone(), models.manager.clone());
        let research = ResearchAgent::new(
            service.clone(),
            service.clone(),
            models.research.clone(),
            models.simplifier.clone(),
        )
        .with_policy(RetryPolicy::from(&config.research));
        let analytics = AnalyticsAgent::new(
            service.clone(),
            files.clone(),
            models.analytics.clone(),
            config.analytics.artifact_dir.clone(),
        )
        .with_retention(Duration::from_secs(config.analytics.upload_retention_secs));
        let synthesizer = SynthesizerAgent::new(service, files, models.synthesizer.clone());

        ConsultingNodes::new(
            Arc::new(manager),
            Arc::new(research),
            Arc::new(analytics),
            Arc::new(synthesizer),
        )
    }
}

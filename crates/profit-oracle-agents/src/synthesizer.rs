//! Synthesizer role: one completion call that merges both specialist reports,
//! with the chart attached when analytics produced one.

use std::sync::Arc;

use async_trait::async_trait;
use profit_oracle_core::{
    CompletionService, FilePurpose, FileStore, FileUpload, PipelineError, ResponseRequest,
    SynthesisInput, SynthesisOutput, SynthesizerNode, parse_impact_value,
};
use tracing::{info, instrument, warn};

use crate::prompts;

pub struct SynthesizerAgent {
    service: Arc<dyn CompletionService>,
    files: Arc<dyn FileStore>,
    model: String,
}

impl SynthesizerAgent {
    pub fn new(
        service: Arc<dyn CompletionService>,
        files: Arc<dyn FileStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            service,
            files,
            model: model.into(),
        }
    }

    /// Upload the chart for vision input, `None` when there is nothing usable.
    async fn attach_chart(&self, input: &SynthesisInput) -> Option<String> {
        let path = input.graph_file_path.as_ref()?;
        match self
            .files
            .upload(FileUpload::new(path, FilePurpose::Vision))
            .await
        {
            Ok(file_id) => Some(file_id),
            Err(err) => {
                warn!(
                    error = %err,
                    path = %path.display(),
                    "chart upload failed; synthesizing text-only"
                );
                None
            }
        }
    }
}

#[async_trait]
impl SynthesizerNode for SynthesizerAgent {
    #[instrument(name = "agent.synthesizer", skip(self, input), fields(model = %self.model))]
    async fn synthesize(&self, input: SynthesisInput) -> Result<SynthesisOutput, PipelineError> {
        let request = match self.attach_chart(&input).await {
            Some(image_file_id) => ResponseRequest::multimodal(
                self.model.clone(),
                prompts::synthesis_prompt(&input, true),
                image_file_id,
            ),
            None => {
                ResponseRequest::new(self.model.clone(), prompts::synthesis_prompt(&input, false))
            }
        }
        .with_instructions(prompts::SYNTHESIZER_ROLE);

        let response = self
            .service
            .create_response(request)
            .await
            .map_err(|err| PipelineError::Synthesis(err.to_string()))?;

        let final_report = response.output_text();
        if final_report.trim().is_empty() {
            return Err(PipelineError::Synthesis(
                "service returned an empty report".into(),
            ));
        }
        let impact_value = parse_impact_value(&final_report);
        info!(impact = ?impact_value, "final report synthesized");

        Ok(SynthesisOutput {
            final_report,
            impact_value,
        })
    }
}

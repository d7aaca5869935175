//! Research role with adaptive degrade-and-retry.
//!
//! A rejected attempt does not just wait and resubmit: the prompt is first
//! rewritten by a lightweight model to narrow the work, so each retry asks for
//! less than the one before it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use profit_oracle_core::{
    CompletionService, PipelineError, ResearchConfig, ResearchNode, ResearchOutput,
    ResponseRequest, ServiceError, TaskPackage, ToolGrant, metrics,
};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl From<&ResearchConfig> for RetryPolicy {
    fn from(config: &ResearchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: config.retry_delay(),
        }
    }
}

/// States of the research retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    /// Submit `prompt`; `attempt` counts earlier rejected submissions.
    Attempting { prompt: String, attempt: u32 },
    /// `prompt` was rejected and must be narrowed before attempt `attempt`.
    Simplifying {
        prompt: String,
        attempt: u32,
        last_error: String,
    },
    Succeeded(String),
    Exhausted { attempts: u32, last_error: String },
}

impl RetryPolicy {
    pub fn start(&self, prompt: String) -> RetryState {
        RetryState::Attempting { prompt, attempt: 0 }
    }

    /// Transition out of `Attempting` once the submission has returned.
    pub fn after_attempt(
        &self,
        prompt: String,
        attempt: u32,
        outcome: Result<String, String>,
    ) -> RetryState {
        match outcome {
            Ok(report) => RetryState::Succeeded(report),
            Err(last_error) => {
                let attempt = attempt + 1;
                if attempt >= self.max_attempts {
                    RetryState::Exhausted {
                        attempts: attempt,
                        last_error,
                    }
                } else {
                    RetryState::Simplifying {
                        prompt,
                        attempt,
                        last_error,
                    }
                }
            }
        }
    }

    /// Transition out of `Simplifying` with the narrowed prompt.
    pub fn after_simplification(&self, simplified: String, attempt: u32) -> RetryState {
        RetryState::Attempting {
            prompt: simplified,
            attempt,
        }
    }
}

pub struct ResearchAgent {
    service: Arc<dyn CompletionService>,
    simplifier: Arc<dyn CompletionService>,
    model: String,
    simplifier_model: String,
    policy: RetryPolicy,
}

impl ResearchAgent {
    pub fn new(
        service: Arc<dyn CompletionService>,
        simplifier: Arc<dyn CompletionService>,
        model: impl Into<String>,
        simplifier_model: impl Into<String>,
    ) -> Self {
        Self {
            service,
            simplifier,
            model: model.into(),
            simplifier_model: simplifier_model.into(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn submit(&self, prompt: &str) -> Result<String, ServiceError> {
        let request = ResponseRequest::new(self.model.clone(), prompt)
            .with_tool(ToolGrant::WebSearch)
            .with_tool(ToolGrant::CodeInterpreter {
                file_ids: Vec::new(),
            });
        let response = self.service.create_response(request).await?;
        Ok(response.output_text())
    }

    async fn simplify(&self, prompt: &str) -> Result<String, PipelineError> {
        let request = ResponseRequest::new(
            self.simplifier_model.clone(),
            prompts::simplification_request(prompt),
        )
        .with_instructions(prompts::SIMPLIFIER_ROLE);
        let response = self
            .simplifier
            .create_response(request)
            .await
            .map_err(PipelineError::Simplification)?;

        let simplified = response.output_text().trim().to_string();
        if simplified.is_empty() {
            warn!("simplifier returned nothing; keeping previous prompt");
            return Ok(prompt.to_string());
        }
        Ok(simplified)
    }
}

#[async_trait]
impl ResearchNode for ResearchAgent {
    #[instrument(name = "agent.research", skip(self, package), fields(model = %self.model))]
    async fn research(&self, package: &TaskPackage) -> Result<ResearchOutput, PipelineError> {
        let mut state = self.policy.start(prompts::research_prompt(package));

        loop {
            state = match state {
                RetryState::Attempting { prompt, attempt } => {
                    debug!(attempt = attempt + 1, "submitting research prompt");
                    // Every failure is handled like a capacity rejection.
                    let outcome = self.submit(&prompt).await.map_err(|err| {
                        warn!(attempt = attempt + 1, error = %err, "research attempt rejected");
                        err.to_string()
                    });
                    metrics::record_research_attempt(
                        attempt + 1,
                        if outcome.is_ok() { "accepted" } else { "rejected" },
                    );
                    self.policy.after_attempt(prompt, attempt, outcome)
                }
                RetryState::Simplifying {
                    prompt,
                    attempt,
                    last_error,
                } => {
                    info!(attempt, %last_error, "narrowing research prompt before retry");
                    let simplified = self.simplify(&prompt).await?;
                    sleep(self.policy.delay).await;
                    self.policy.after_simplification(simplified, attempt)
                }
                RetryState::Succeeded(research_report) => {
                    return Ok(ResearchOutput { research_report });
                }
                RetryState::Exhausted {
                    attempts,
                    last_error,
                } => {
                    return Err(PipelineError::RetryBudgetExhausted {
                        attempts,
                        last_error,
                    });
                }
            };
        }
    }
}

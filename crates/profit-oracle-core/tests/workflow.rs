use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use profit_oracle_core::{
    AnalyticsNode, AnalyticsOutput, ConsultingNodes, ConsultingRequest, ManagerCommand,
    ManagerNode, PipelineError, ResearchNode, ResearchOutput, SynthesisInput, SynthesisOutput,
    SynthesizerNode, TaskPackage, TracePhase, run_consulting_session,
};
use tokio::sync::Mutex;

#[derive(Default)]
struct Timings {
    research: Option<(Instant, Instant)>,
    analytics: Option<(Instant, Instant)>,
    synthesizer_entered: Option<Instant>,
    synthesis_input: Option<SynthesisInput>,
}

type SharedTimings = Arc<Mutex<Timings>>;

struct StubManager {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ManagerNode for StubManager {
    async fn plan(&self, request: &ConsultingRequest) -> Result<ManagerCommand, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ManagerCommand {
            research_instructions: TaskPackage::new(
                format!("Research ways to {}", request.goal.to_lowercase()),
                "Local retail",
                "Three cited sources",
            ),
            analytics_instructions: TaskPackage::new(
                "Chart monthly revenue",
                "Seasonality",
                "One saved chart",
            ),
        })
    }
}

struct StubResearch {
    timings: SharedTimings,
    fail: bool,
}

#[async_trait]
impl ResearchNode for StubResearch {
    async fn research(&self, package: &TaskPackage) -> Result<ResearchOutput, PipelineError> {
        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(120)).await;
        self.timings.lock().await.research = Some((start, Instant::now()));
        if self.fail {
            return Err(PipelineError::RetryBudgetExhausted {
                attempts: 3,
                last_error: "capacity rejection: quota".into(),
            });
        }
        Ok(ResearchOutput {
            research_report: format!("Findings for: {}", package.tasks),
        })
    }
}

struct StubAnalytics {
    timings: SharedTimings,
}

#[async_trait]
impl AnalyticsNode for StubAnalytics {
    async fn analyze(
        &self,
        _package: &TaskPackage,
        data_path: &Path,
    ) -> Result<AnalyticsOutput, PipelineError> {
        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(120)).await;
        self.timings.lock().await.analytics = Some((start, Instant::now()));
        Ok(AnalyticsOutput {
            analytics_report: format!("Analyzed {}", data_path.display()),
            graph_file_path: Some(PathBuf::from("data/artifacts/chart.png")),
        })
    }
}

struct StubSynthesizer {
    timings: SharedTimings,
}

#[async_trait]
impl SynthesizerNode for StubSynthesizer {
    async fn synthesize(&self, input: SynthesisInput) -> Result<SynthesisOutput, PipelineError> {
        let mut timings = self.timings.lock().await;
        timings.synthesizer_entered = Some(Instant::now());
        timings.synthesis_input = Some(input);
        Ok(SynthesisOutput {
            final_report: "Final advisory report".into(),
            impact_value: Some(4200.0),
        })
    }
}

fn nodes(
    timings: &SharedTimings,
    manager_calls: &Arc<AtomicUsize>,
    research_fails: bool,
) -> ConsultingNodes {
    ConsultingNodes::new(
        Arc::new(StubManager {
            calls: manager_calls.clone(),
        }),
        Arc::new(StubResearch {
            timings: timings.clone(),
            fail: research_fails,
        }),
        Arc::new(StubAnalytics {
            timings: timings.clone(),
        }),
        Arc::new(StubSynthesizer {
            timings: timings.clone(),
        }),
    )
}

fn request() -> ConsultingRequest {
    ConsultingRequest::new("Increase revenue", "A medium general store", "sales.csv")
}

#[tokio::test]
async fn specialists_overlap_and_synthesizer_waits_for_both() {
    let timings = SharedTimings::default();
    let manager_calls = Arc::new(AtomicUsize::new(0));

    let outcome = run_consulting_session(request(), &nodes(&timings, &manager_calls, false))
        .await
        .expect("workflow should succeed");

    let timings = timings.lock().await;
    let (research_start, research_end) = timings.research.expect("research ran");
    let (analytics_start, analytics_end) = timings.analytics.expect("analytics ran");
    let synth = timings.synthesizer_entered.expect("synthesizer ran");

    assert!(
        research_start < analytics_end && analytics_start < research_end,
        "research and analytics windows must overlap"
    );
    assert!(synth > research_end, "synthesizer entered before research finished");
    assert!(synth > analytics_end, "synthesizer entered before analytics finished");

    let input = timings.synthesis_input.clone().expect("synthesis input captured");
    assert_eq!(input.goal, "Increase revenue");
    assert_eq!(input.business_profile, "A medium general store");
    assert_eq!(input.research_report, "Findings for: Research ways to increase revenue");
    assert_eq!(input.analytics_report, "Analyzed sales.csv");

    assert_eq!(outcome.report.final_report, "Final advisory report");
    assert_eq!(
        outcome.report.graph_file_path,
        Some(PathBuf::from("data/artifacts/chart.png"))
    );
    assert_eq!(outcome.report.impact_value, Some(4200.0));
    assert_eq!(
        outcome
            .state
            .research_instructions
            .as_ref()
            .map(|package| package.focus.clone()),
        Some("Local retail".to_string())
    );
    assert_eq!(manager_calls.load(Ordering::SeqCst), 1);

    let summary = outcome.trace_summary().render_markdown();
    assert!(summary.contains("manager [started]"));
    assert!(summary.contains("synthesizer [finished]"));
}

#[tokio::test]
async fn node_failure_reaches_caller_with_its_type() {
    let timings = SharedTimings::default();
    let manager_calls = Arc::new(AtomicUsize::new(0));

    let err = run_consulting_session(request(), &nodes(&timings, &manager_calls, true))
        .await
        .expect_err("research failure must abort the run");

    assert!(
        matches!(err, PipelineError::RetryBudgetExhausted { attempts: 3, .. }),
        "unexpected error: {err:?}"
    );

    let timings = timings.lock().await;
    assert!(timings.analytics.is_some(), "sibling still runs to completion");
    assert!(timings.synthesizer_entered.is_none(), "no synthesis after a failed join");
}

#[tokio::test]
async fn unsupported_dataset_is_rejected_before_any_node() {
    let timings = SharedTimings::default();
    let manager_calls = Arc::new(AtomicUsize::new(0));
    let request =
        ConsultingRequest::new("Increase revenue", "A medium general store", "sales.json");

    let err = run_consulting_session(request, &nodes(&timings, &manager_calls, false))
        .await
        .expect_err("json datasets are unsupported");

    assert!(matches!(err, PipelineError::UnsupportedFormat { .. }));
    assert_eq!(manager_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn trace_records_each_node_once() {
    let timings = SharedTimings::default();
    let manager_calls = Arc::new(AtomicUsize::new(0));

    let outcome = run_consulting_session(request(), &nodes(&timings, &manager_calls, false))
        .await
        .expect("workflow should succeed");

    for node in ["manager", "research", "analytics", "synthesizer"] {
        let finished = outcome
            .trace
            .iter()
            .filter(|event| event.node == node && event.phase == TracePhase::Finished)
            .count();
        assert_eq!(finished, 1, "{node} should finish exactly once");
    }
}

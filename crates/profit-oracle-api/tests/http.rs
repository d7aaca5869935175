use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use profit_oracle_api::{AppState, RequestQueue, build_router};
use profit_oracle_core::{
    AnalyticsNode, AnalyticsOutput, ConsultingNodes, ConsultingRequest, ManagerCommand,
    ManagerNode, PipelineError, ResearchNode, ResearchOutput, RunLogSettings, SynthesisInput,
    SynthesisOutput, SynthesizerNode, TaskPackage, load_completion_record,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SALES_CSV: &str = "month,revenue\n2024-01,1200\n2024-02,1350\n";

struct Manager;

#[async_trait]
impl ManagerNode for Manager {
    async fn plan(&self, _request: &ConsultingRequest) -> Result<ManagerCommand, PipelineError> {
        Ok(ManagerCommand {
            research_instructions: TaskPackage::new("Scan competitors", "Pricing", "Sources"),
            analytics_instructions: TaskPackage::new("Chart revenue", "Trend", "One chart"),
        })
    }
}

/// Holds the research branch open until released, when a gate is set.
struct Research {
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl ResearchNode for Research {
    async fn research(&self, _package: &TaskPackage) -> Result<ResearchOutput, PipelineError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(ResearchOutput {
            research_report: "Competitors discount weekends.".into(),
        })
    }
}

struct Analytics;

#[async_trait]
impl AnalyticsNode for Analytics {
    async fn analyze(
        &self,
        _package: &TaskPackage,
        data_path: &Path,
    ) -> Result<AnalyticsOutput, PipelineError> {
        let contents = tokio::fs::read_to_string(data_path)
            .await
            .map_err(|err| PipelineError::dataset_load(data_path, err))?;
        Ok(AnalyticsOutput {
            analytics_report: format!("{} rows analyzed", contents.lines().count() - 1),
            graph_file_path: None,
        })
    }
}

struct Synthesizer;

#[async_trait]
impl SynthesizerNode for Synthesizer {
    async fn synthesize(&self, input: SynthesisInput) -> Result<SynthesisOutput, PipelineError> {
        Ok(SynthesisOutput {
            final_report: format!(
                "{}\n{}\nEstimated monthly impact: $900",
                input.research_report, input.analytics_report
            ),
            impact_value: Some(900.0),
        })
    }
}

struct Harness {
    server: TestServer,
    records_dir: PathBuf,
    work_dir: PathBuf,
    _dir: TempDir,
}

fn harness(gate: Option<Arc<Notify>>) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let records_dir = dir.path().join("records");
    let work_dir = dir.path().join("work");

    let nodes = ConsultingNodes::new(
        Arc::new(Manager),
        Arc::new(Research { gate }),
        Arc::new(Analytics),
        Arc::new(Synthesizer),
    );
    let queue = RequestQueue::new(
        nodes,
        2,
        work_dir.clone(),
        records_dir.clone(),
        Duration::from_secs(5),
    )
    .expect("queue")
    .with_run_log(RunLogSettings {
        base_dir: dir.path().join("logs"),
        retention_days: 90,
    });

    let server = TestServer::new(build_router(AppState::new(queue))).unwrap();
    Harness {
        server,
        records_dir,
        work_dir,
        _dir: dir,
    }
}

async fn dataset_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exports/sales.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SALES_CSV))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/exports/missing.csv"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
}

async fn wait_for_terminal(server: &TestServer, request_id: &str) -> Value {
    let status_path = format!("/requests/{request_id}");
    timeout(Duration::from_secs(5), async {
        loop {
            let response = server.get(&status_path).await;
            assert_eq!(response.status_code(), 200);
            let payload = response.json::<Value>();
            if payload["state"] == "completed" || payload["state"] == "failed" {
                return payload;
            }
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("request did not finish in time")
}

#[tokio::test]
async fn analyze_runs_to_completion_and_writes_record() {
    let files = dataset_server().await;
    let harness = harness(None);

    let response = harness
        .server
        .post("/analyze")
        .json(&json!({
            "request_id": "req-001",
            "goal": "Increase revenue",
            "business_profile": "A medium general store",
            "file_urls": [format!("{}/exports/sales.csv", files.uri())],
        }))
        .await;
    assert_eq!(response.status_code(), 202);
    let body = response.json::<Value>();
    assert_eq!(body["request_id"], "req-001");
    assert_eq!(body["state"], "queued");

    let status = wait_for_terminal(&harness.server, "req-001").await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["record"]["impact_value"], 900.0);
    let report = status["record"]["final_report"].as_str().expect("report");
    assert!(report.contains("2 rows analyzed"));

    // the analytics stub read the downloaded rows; the scratch copy is gone afterwards
    assert!(!harness.work_dir.join("req-001").exists());

    let record = load_completion_record(&harness.records_dir, "req-001")
        .expect("record readable")
        .expect("record persisted");
    assert_eq!(record.goal, "Increase revenue");
    assert_eq!(record.impact_value, Some(900.0));

    let health = harness.server.get("/health").await.json::<Value>();
    assert_eq!(health["capacity"]["tracked_requests"], 0);
    assert_eq!(health["capacity"]["active_requests"], 0);
}

#[tokio::test]
async fn failed_download_is_recorded_as_failure() {
    let files = dataset_server().await;
    let harness = harness(None);

    let response = harness
        .server
        .post("/analyze")
        .json(&json!({
            "request_id": "req-missing",
            "goal": "Increase revenue",
            "business_profile": "A medium general store",
            "file_urls": [format!("{}/exports/missing.csv", files.uri())],
        }))
        .await;
    assert_eq!(response.status_code(), 202);

    let status = wait_for_terminal(&harness.server, "req-missing").await;
    assert_eq!(status["state"], "failed");
    assert_eq!(status["record"]["error_kind"], "download");
    assert!(!harness.work_dir.join("req-missing").exists());
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let harness = harness(None);

    let response = harness
        .server
        .post("/analyze")
        .json(&json!({
            "goal": "  ",
            "business_profile": "Store",
            "file_urls": ["http://localhost/sales.csv"],
        }))
        .await;
    assert_eq!(response.status_code(), 400);

    let response = harness
        .server
        .post("/analyze")
        .json(&json!({
            "goal": "Increase revenue",
            "business_profile": "Store",
            "file_urls": [],
        }))
        .await;
    assert_eq!(response.status_code(), 400);
    let body = response.json::<Value>();
    assert!(body["error"].as_str().expect("error").contains("file_urls"));

    for request_id in ["a.b", "../escape", "with space"] {
        let response = harness
            .server
            .post("/analyze")
            .json(&json!({
                "request_id": request_id,
                "goal": "Increase revenue",
                "business_profile": "Store",
                "file_urls": ["http://localhost/sales.csv"],
            }))
            .await;
        assert_eq!(response.status_code(), 400, "{request_id} should be rejected");
    }
    assert!(!harness.work_dir.exists());
}

#[tokio::test]
async fn duplicate_running_request_conflicts() {
    let files = dataset_server().await;
    let gate = Arc::new(Notify::new());
    let harness = harness(Some(gate.clone()));

    let payload = json!({
        "request_id": "req-dup",
        "goal": "Increase revenue",
        "business_profile": "A medium general store",
        "file_urls": [format!("{}/exports/sales.csv", files.uri())],
    });

    let first = harness.server.post("/analyze").json(&payload).await;
    assert_eq!(first.status_code(), 202);
    let second = harness.server.post("/analyze").json(&payload).await;
    assert_eq!(second.status_code(), 409);

    gate.notify_one();
    let status = wait_for_terminal(&harness.server, "req-dup").await;
    assert_eq!(status["state"], "completed");

    // finished ids may be resubmitted
    let third = harness.server.post("/analyze").json(&payload).await;
    assert_eq!(third.status_code(), 202);
    gate.notify_one();
    wait_for_terminal(&harness.server, "req-dup").await;
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let harness = harness(None);
    let response = harness.server.get("/requests/nope").await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn health_reports_capacity() {
    let harness = harness(None);
    let response = harness.server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["capacity"]["max_concurrency"], 2);
    assert_eq!(body["capacity"]["available_permits"], 2);
    assert_eq!(body["capacity"]["active_requests"], 0);
}

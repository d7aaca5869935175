use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use profit_oracle_agents::ConsultingTeam;
use profit_oracle_core::{
    CompletionRecord, Config, ConfigLoader, ConsultingReport, ConsultingRequest, OpenAiClient,
    RunLogInput, SessionOptions, TelemetryOptions, init_telemetry, is_valid_request_id,
    log_run_completion, metrics, persist_completion_record, run_consulting_session_with_options,
    summarize_dataset,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "profit-oracle",
    version,
    about = "Business consulting pipeline over graph_flow"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full consulting pipeline against a dataset.
    Run(RunArgs),
    /// Print the structural synopsis of a dataset without calling any service.
    Summarize(SummarizeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// What the client wants to achieve.
    #[arg(long)]
    goal: String,

    /// Short description of the client's business.
    #[arg(long)]
    profile: String,

    /// Path to a `.csv` or `.xlsx` dataset.
    #[arg(long)]
    data: PathBuf,

    /// Optional configuration file (defaults to `PROFIT_ORACLE_CONFIG` or `config.toml`).
    #[arg(long, env = "PROFIT_ORACLE_CONFIG")]
    config: Option<PathBuf>,

    /// Request identifier used for the completion record, `[A-Za-z0-9_-]` (random when omitted).
    #[arg(long)]
    request_id: Option<String>,

    /// Print the node trace after the report.
    #[arg(long, default_value_t = false)]
    explain: bool,
}

#[derive(Args, Debug)]
struct SummarizeArgs {
    /// Path to a `.csv` or `.xlsx` dataset.
    #[arg(long)]
    data: PathBuf,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let config = ConfigLoader::load(args.config.clone())?;
            init_telemetry(
                TelemetryOptions {
                    with_target: false,
                    ..TelemetryOptions::default()
                }
                .with_default_level(&config.logging.level),
            )?;
            metrics::init_metrics_from_env("profit-oracle-cli");

            let rt = Runtime::new()?;
            rt.block_on(run_command(args, config))
        }
        Command::Summarize(args) => summarize_command(args),
    }
}

async fn run_command(args: RunArgs, config: Config) -> Result<()> {
    let request_id = args
        .request_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if !is_valid_request_id(&request_id) {
        bail!("request id {request_id:?} may only contain ASCII letters, digits, '-' and '_'");
    }
    info!(%request_id, data = %args.data.display(), "starting consulting session");

    let client = Arc::new(OpenAiClient::from_config(&config)?);
    let nodes = ConsultingTeam::from_config(&config, client);
    let request = ConsultingRequest::new(args.goal, args.profile, args.data);

    let result = run_consulting_session_with_options(
        request.clone(),
        &nodes,
        SessionOptions::default().with_session_id(request_id.clone()),
    )
    .await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            let record = CompletionRecord::failed(
                &request_id,
                &request.goal,
                &request.business_profile,
                &err,
                Some(err.kind()),
            );
            if let Err(persist_err) =
                persist_completion_record(&config.output.records_dir, &record)
            {
                warn!(error = %persist_err, "failed to persist completion record");
            }
            log_outcome(
                &request_id,
                &request.goal,
                "failed",
                None,
                Some(err.to_string()),
            );
            return Err(err).context("consulting session failed");
        }
    };

    let report = &outcome.report;
    println!("{}", report.final_report);
    println!();
    match &report.graph_file_path {
        Some(path) => println!("Chart: {}", path.display()),
        None => println!("Chart: none"),
    }
    match report.impact_value {
        Some(value) => println!("Estimated monthly impact: ${value:.2}"),
        None => println!("Estimated monthly impact: not stated"),
    }

    if args.explain {
        println!();
        println!("{}", outcome.trace_summary().render_markdown());
    }

    let record = CompletionRecord::completed(&request_id, &request, report);
    let path = persist_completion_record(&config.output.records_dir, &record)?;
    info!(path = %path.display(), "completion record written");

    log_outcome(&request_id, &request.goal, "completed", Some(report), None);
    Ok(())
}

fn log_outcome(
    request_id: &str,
    goal: &str,
    status: &str,
    report: Option<&ConsultingReport>,
    error: Option<String>,
) {
    let input = RunLogInput {
        request_id: request_id.to_string(),
        goal: goal.to_string(),
        status: status.to_string(),
        report: report.map(|report| report.final_report.clone()),
        graph_file_path: report.and_then(|report| report.graph_file_path.clone()),
        impact_value: report.and_then(|report| report.impact_value),
        error,
    };
    if let Err(err) = log_run_completion(input) {
        warn!(error = %err, "failed to append run log");
    }
}

fn summarize_command(args: SummarizeArgs) -> Result<()> {
    let summary = summarize_dataset(&args.data)
        .with_context(|| format!("could not summarize {}", args.data.display()))?;
    print!("{}", summary.render());
    Ok(())
}

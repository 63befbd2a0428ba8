//! Command-line interface for committee-rs

mod output;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use committee_core::{AnalysisRequest, Capability, Context, FocusFilter};
use committee_utils::{Config, LogFormat};
use committee_workflow::{
    CommitteeOrchestrator, ExecutionPlan, ScriptedCommittee, WorkerRegistry, WorkflowConfig,
};
use output::OutputFormat;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Sample committee used when no `--committee` file is given
const DEFAULT_COMMITTEE: &str = include_str!("../committee.json");

#[derive(Parser, Debug)]
#[command(name = "committee")]
#[command(about = "Run a multi-agent investment committee", long_about = None)]
struct Cli {
    /// Committee definition (JSON); defaults to the bundled sample committee
    #[arg(long, global = true)]
    committee: Option<PathBuf>,

    /// Log format (pretty or json); overrides COMMITTEE_LOG_FORMAT
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the execution waves without running anything
    Plan {
        /// Ticker the plan is for
        subject: Option<String>,

        #[command(flatten)]
        workflow: WorkflowArgs,
    },
    /// Run the committee on a subject
    Run {
        /// Ticker to analyse
        subject: String,

        /// Company display name
        #[arg(long)]
        company: Option<String>,

        /// Free-form context passed to every worker
        #[arg(long)]
        context: Option<String>,

        /// Current share price, used for upside reporting
        #[arg(long)]
        price: Option<f64>,

        #[command(flatten)]
        workflow: WorkflowArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct WorkflowArgs {
    /// Maximum debate rounds
    #[arg(long, default_value_t = 3)]
    rounds: u32,

    /// Leave the devil's advocate out of the run
    #[arg(long)]
    no_devils_advocate: bool,

    /// Only run these analyst capabilities (comma separated)
    #[arg(long, value_delimiter = ',', conflicts_with = "exclude")]
    focus: Vec<Capability>,

    /// Skip these analyst capabilities (comma separated)
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<Capability>,

    /// Per-worker timeout in seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Whole-run deadline in seconds; 0 disables it
    #[arg(long, default_value_t = 900)]
    deadline_secs: u64,

    /// Score movement below which a response counts as unchanged
    #[arg(long, default_value_t = 0.1)]
    tolerance: f64,
}

impl WorkflowArgs {
    fn focus_filter(&self) -> Option<FocusFilter> {
        if !self.focus.is_empty() {
            Some(FocusFilter::include(self.focus.iter().copied()))
        } else if !self.exclude.is_empty() {
            Some(FocusFilter::exclude(self.exclude.iter().copied()))
        } else {
            None
        }
    }

    fn to_config(&self) -> Result<WorkflowConfig> {
        let mut builder = WorkflowConfig::builder()
            .max_debate_rounds(self.rounds)
            .include_devils_advocate(!self.no_devils_advocate)
            .per_worker_timeout(Duration::from_secs(self.timeout_secs))
            .convergence_tolerance(self.tolerance);

        builder = if self.deadline_secs == 0 {
            builder.no_deadline()
        } else {
            builder.overall_deadline(Duration::from_secs(self.deadline_secs))
        };
        if let Some(focus) = self.focus_filter() {
            builder = builder.focus_areas(focus);
        }

        builder.build().context("Invalid workflow options")
    }
}

fn load_registry(path: Option<&Path>) -> Result<WorkerRegistry> {
    let json = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read committee file {}", path.display()))?,
        None => DEFAULT_COMMITTEE.to_string(),
    };

    let committee = ScriptedCommittee::from_json(&json).context("Invalid committee definition")?;
    let registry = committee
        .into_registry()
        .context("Invalid committee definition")?;
    info!(workers = registry.len(), "Committee loaded");
    Ok(registry)
}

/// Validate the options and compute the waves a run would use
fn plan(registry: WorkerRegistry, subject: Option<String>, workflow: &WorkflowArgs) -> Result<ExecutionPlan> {
    let workflow = workflow.to_config()?;
    let request = AnalysisRequest::new(subject.unwrap_or_default());
    CommitteeOrchestrator::new(Arc::new(registry))
        .plan(&request, &workflow)
        .context("Committee cannot be scheduled")
}

/// Cancel the run on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().context("Invalid environment configuration")?;
    committee_utils::init_tracing_with(cli.log_format.unwrap_or(config.log_format));
    info!(app = %config.app_name, environment = %config.environment, "Starting committee");

    let registry = load_registry(cli.committee.as_deref())?;

    match cli.command {
        Commands::Plan { subject, workflow } => {
            let plan = plan(registry, subject, &workflow)?;
            output::print_plan(&plan, cli.format)?;
        }
        Commands::Run {
            subject,
            company,
            context,
            price,
            workflow,
        } => {
            let workflow = workflow.to_config()?;

            let mut request = AnalysisRequest::new(subject);
            if let Some(company) = company {
                request = request.with_company_name(company);
            }
            if let Some(context) = context {
                request = request.with_additional_context(context);
            }

            let mut worker_context = Context::new();
            if let Some(price) = price {
                worker_context = worker_context.with_current_price(price);
            }

            let orchestrator = CommitteeOrchestrator::builder(Arc::new(registry))
                .context(worker_context)
                .build()?;
            let decision = orchestrator
                .run_with_cancellation(request, &workflow, cancel_on_interrupt())
                .await
                .context("Committee run failed")?;

            output::print_decision(&decision, cli.format)?;
            if cli.format == OutputFormat::Table {
                if let Some(upside) = price.and_then(|p| decision.upside_potential(p)) {
                    println!("upside to mid target: {upside:+.1}%");
                }
            }
        }
    }

    Ok(())
}

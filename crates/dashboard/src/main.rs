//! `jobdash` terminal client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use jobdash_core::{JobId, JobKind, JobStatus};
use jobdash_dashboard::render::render_text;
use jobdash_dashboard::{
    CacheConfig, ClientConfig, Dashboard, HttpGateway, JobGateway, JobSubmitter, SubmitError,
    SyncCache,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "jobdash", about = "Watch and drive a job-processing service")]
struct Cli {
    /// Base URL of the job service API (overrides JOBDASH_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Delay between polls in milliseconds (overrides JOBDASH_POLL_INTERVAL_MS).
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live dashboard; reads commands from stdin until `quit` or Ctrl-C.
    Watch {
        /// Only list jobs with this status.
        #[arg(long)]
        status: Option<JobStatus>,
    },
    /// Create a job.
    Submit {
        /// Job type, e.g. data-processing, health-report, cleanup.
        kind: String,
        /// Job payload.
        data: String,
    },
    /// Show a single job.
    Get { id: String },
    /// Check service health.
    Health,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(api_url) = &cli.api_url {
        config = config.with_api_url(api_url);
    }
    if let Some(ms) = cli.poll_interval_ms {
        config = config.with_poll_interval(Duration::from_millis(ms));
    }
    jobdash_observability::init(config.log_format);

    let gateway: Arc<dyn JobGateway> = Arc::new(
        HttpGateway::from_config(&config).context("failed to build HTTP client")?,
    );
    tracing::info!(api_url = %config.api_url, "jobdash starting");

    match cli.command {
        Command::Watch { status } => watch(gateway, &config, status).await,
        Command::Submit { kind, data } => {
            let cache = SyncCache::new(gateway.clone(), CacheConfig::from(&config));
            let job = JobSubmitter::new(gateway, cache)
                .submit_job(JobKind::from(kind), data)
                .await
                .context("job submission failed")?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        Command::Get { id } => {
            let id: JobId = id.parse()?;
            let job = gateway
                .get_job(&id)
                .await
                .with_context(|| format!("failed to fetch job {id}"))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        Command::Health => {
            let health = gateway.health().await.context("health check failed")?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            if !health.is_healthy() {
                anyhow::bail!("service reports status `{}`", health.status);
            }
            Ok(())
        }
    }
}

async fn watch(
    gateway: Arc<dyn JobGateway>,
    config: &ClientConfig,
    status: Option<JobStatus>,
) -> anyhow::Result<()> {
    let cache = SyncCache::new(gateway.clone(), CacheConfig::from(config));
    let dashboard = Arc::new(Dashboard::new(gateway, cache));
    dashboard.set_status_filter(status);

    let mut changes = dashboard.changes();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    redraw(&dashboard);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.changed() => {
                if change.is_none() {
                    break;
                }
                redraw(&dashboard);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !handle_input(&dashboard, line.trim()) {
                    break;
                }
            }
        }
    }

    tracing::info!("jobdash stopped");
    Ok(())
}

/// Apply one line of user input. Returns `false` on `quit`.
fn handle_input(dashboard: &Arc<Dashboard>, line: &str) -> bool {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    let arg = arg.trim();

    match command {
        "" => {}
        "quit" | "q" => return false,
        "filter" => match arg {
            "" | "all" => dashboard.set_status_filter(None),
            status => match status.parse::<JobStatus>() {
                Ok(status) => dashboard.set_status_filter(Some(status)),
                Err(err) => eprintln!("{err}"),
            },
        },
        "type" => dashboard.set_pending_job_type(JobKind::from(arg)),
        "data" => dashboard.set_pending_job_data(arg),
        "submit" => {
            let dashboard = dashboard.clone();
            tokio::spawn(async move {
                // Gateway errors show up in the render model's form view.
                if let Err(err @ SubmitError::InFlight) = dashboard.submit().await {
                    eprintln!("{err}");
                }
            });
        }
        other => eprintln!("unknown command `{other}` (filter|type|data|submit|quit)"),
    }
    true
}

fn redraw(dashboard: &Dashboard) {
    // Clear screen and home the cursor.
    print!("\x1b[2J\x1b[H{}", render_text(&dashboard.snapshot()));
    println!("\n> filter <status|all> | type <kind> | data <text> | submit | quit");
}

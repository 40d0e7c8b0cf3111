use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use recongraph::config::load_settings_or_default;
use recongraph::pipeline::FULL_AUTO;
use recongraph::telemetry::init_logging;
use recongraph::{Orchestrator, RecongraphError, ScanEvent, StartScanRequest};

#[derive(Parser)]
#[command(name = "recongraph", version, about = "Chain recon tools against a target")]
struct Cli {
    /// Settings file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scan and follow its progress until it ends
    Scan {
        #[arg(short, long)]
        target: String,
        /// A tool name or `full_auto`
        #[arg(short = 'T', long = "type", default_value = FULL_AUTO)]
        scan_type: String,
        /// Attach to an existing project instead of creating one
        #[arg(short, long)]
        project: Option<String>,
        /// Print raw server-sent events instead of log lines
        #[arg(long)]
        events: bool,
    },
    /// List recent scan jobs
    Jobs {
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: u64,
    },
    /// Show installed tools and the Go toolchain
    Tools,
    /// Install a tool with `go install`
    Install { tool: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings_or_default(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&settings.logging);

    let orchestrator = match Orchestrator::from_settings(&settings) {
        Ok(o) => o,
        Err(e) => {
            log::error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Scan {
            target,
            scan_type,
            project,
            events,
        } => run_scan(&orchestrator, target, scan_type, project, events).await,
        Command::Jobs { project, limit } => list_jobs(&orchestrator, project.as_deref(), limit),
        Command::Tools => {
            show_tools(&orchestrator).await;
            Ok(())
        }
        Command::Install { tool } => match orchestrator.install_tool(&tool).await {
            Ok(status) => {
                println!(
                    "{} installed at {}",
                    status.name,
                    status
                        .path
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
    };

    let aborted = orchestrator.shutdown().await;
    if aborted > 0 {
        log::warn!("{} scan task(s) were aborted at exit", aborted);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_scan(
    orchestrator: &Orchestrator,
    target: String,
    scan_type: String,
    project_id: Option<String>,
    events: bool,
) -> Result<(), RecongraphError> {
    let job = orchestrator.start_scan(StartScanRequest {
        project_id,
        project_name: None,
        target_domain: target,
        scan_type,
    })?;
    log::info!("Scan {} created for project {}", job.id, job.project_id);

    let (interrupt_tx, mut interrupt_rx) = mpsc::unbounded_channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    }) {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }

    let mut stream = std::pin::pin!(orchestrator.subscribe(&job.id).into_stream());
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = stream.next() => {
                let Some(event) = event else { break };
                print_event(&event, events);
                if event.is_done() {
                    break;
                }
            }
            Some(()) = interrupt_rx.recv(), if !interrupted => {
                interrupted = true;
                match orchestrator.stop(&job.id) {
                    Ok(_) => log::info!("Stopping scan {}, partial results are kept", job.id),
                    Err(e) => log::warn!("{}", e),
                }
            }
        }
    }

    orchestrator.wait(&job.id).await;
    let job = orchestrator.get_scan(&job.id)?;
    if !events {
        println!("Scan {} ended: {}", job.id, job.status);
        for (tool, result) in &job.result_summary {
            println!(
                "  {:<12} parsed {:>6}  new {:>6}  duplicate {:>6}",
                tool, result.parsed_count, result.new_count, result.duplicate_count
            );
        }
        if let Some(error) = &job.error {
            println!("  error: {}", error);
        }
    }
    Ok(())
}

fn print_event(event: &ScanEvent, raw: bool) {
    if raw {
        match event.to_sse() {
            Ok(frame) => print!("{}", frame),
            Err(e) => log::warn!("Failed to encode event: {}", e),
        }
    } else if let ScanEvent::Log { line } = event {
        println!("{}", line);
    }
}

fn list_jobs(
    orchestrator: &Orchestrator,
    project_id: Option<&str>,
    limit: u64,
) -> Result<(), RecongraphError> {
    for job in orchestrator.list_scans(project_id, Some(limit))? {
        println!(
            "{}  {:<10} {:<12} {:>3}%  {}",
            job.id, job.status, job.scan_type, job.progress, job.target
        );
    }
    Ok(())
}

async fn show_tools(orchestrator: &Orchestrator) {
    let go = orchestrator.go_status().await;
    println!(
        "{:<12} {:<10} {}",
        "go",
        if go.installed { "installed" } else { "missing" },
        go.version.unwrap_or_default()
    );
    for tool in orchestrator.tool_statuses().await {
        println!(
            "{:<12} {:<10} {}",
            tool.name,
            if tool.installed { "installed" } else { "missing" },
            tool.version.unwrap_or_default()
        );
    }
}

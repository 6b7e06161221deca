use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;
mod config;

use cli::Cli;
use cli::commands::{Commands, DashboardCommands, TokenArg};
use config::Config;
use ralph::control::{ControlDirectory, NotificationFlag, StopHandle};
use ralph::dashboard::{DashboardClient, LoopCommand};
use ralph::liveness::{Liveness, LivenessManager};
use ralph::loop_config::LoopConfig;
use ralph::runner::{CommandWork, LoopRunner, RunOutcome};
use ralph::telemetry::{IterationRecord, IterationStats, TelemetryReader, record};

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ralph")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("ralph.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    let dir = ControlDirectory::for_project(&cli.project, &config.control_dir);
    info!("Using control directory {}", dir.root().display());

    if cli.is_verbose() {
        println!("{} {}", "Control directory:".yellow(), dir.root().display());
    }

    match &cli.command {
        Commands::Run => handle_run(&dir).await,
        Commands::Status => handle_status(&dir),
        Commands::Pause => {
            dir.request_pause()?;
            println!("{} runner will pause before its next iteration", "Paused:".yellow());
            Ok(())
        }
        Commands::Resume => {
            if dir.clear_pause()? {
                println!("{} pause marker removed", "Resumed:".green());
            } else {
                println!("Not paused");
            }
            Ok(())
        }
        Commands::Inject { instruction } => {
            dir.inject(instruction)?;
            println!("{} instruction queued for the next iteration", "Injected:".green());
            Ok(())
        }
        Commands::Stop => match LivenessManager::request_stop(&dir)? {
            Some(pid) => {
                println!("{} sent stop request to pid {}", "Stopping:".red(), pid);
                Ok(())
            }
            None => {
                println!("No live runner");
                Ok(())
            }
        },
        Commands::Iterations { limit } => handle_iterations(&dir, *limit),
        Commands::Stats => handle_stats(&dir),
        Commands::Notify { clear } => {
            let flag = NotificationFlag::new(dir.clone());
            let message = if *clear { flag.take()? } else { flag.peek()? };
            match message {
                Some(message) => println!("{}", message.trim_end()),
                None => println!("No pending notification"),
            }
            Ok(())
        }
        Commands::Doctor => handle_doctor(&dir),
        Commands::Schema => handle_schema(),
        Commands::Dashboard { command } => handle_dashboard(command, config).await,
    }
}

async fn handle_run(dir: &ControlDirectory) -> Result<()> {
    dir.ensure()?;
    let loop_config = LoopConfig::load(dir).context("Refusing to start")?;
    info!("Loop config: {:?}", loop_config);

    if let Liveness::Live { pid } = LivenessManager::check(dir) {
        return Err(eyre!("a runner is already live with pid {}", pid));
    }

    let stop = StopHandle::new();
    stop.listen_for_termination()?;

    let work = CommandWork::new(loop_config.clone(), dir.project_root());
    let mut runner = LoopRunner::new(dir.clone(), loop_config, work, stop)?;
    println!(
        "{} iteration {} in {}",
        "Starting:".cyan(),
        runner.next_iteration(),
        dir.project_root().display()
    );

    match runner.run().await? {
        RunOutcome::Stopped { reason, iterations } => {
            println!("{} {:?} after {} iterations", "Stopped:".green(), reason, iterations);
            Ok(())
        }
        RunOutcome::Failed { iteration, reason } => Err(eyre!("iteration {} failed fatally: {}", iteration, reason)),
    }
}

fn handle_status(dir: &ControlDirectory) -> Result<()> {
    if !dir.exists() {
        println!("{} no control directory at {}", "Missing:".red(), dir.root().display());
        return Ok(());
    }

    match LivenessManager::check(dir) {
        Liveness::Live { pid } => println!("{} pid {}", "Running:".green(), pid),
        Liveness::Stale { reason } => println!("{} {}", "Stale:".yellow(), reason),
        Liveness::Absent => println!("{}", "Not running".dimmed()),
    }

    if dir.pause_path().exists() {
        println!("{} pause marker present", "Paused:".yellow());
    }
    if let Some(instruction) = dir.pending_instruction()? {
        println!("{} {}", "Pending instruction:".cyan(), instruction);
    }
    if let Some(note) = NotificationFlag::new(dir.clone()).peek()? {
        println!("{} {}", "Notification:".cyan(), note.trim_end());
    }

    let last = TelemetryReader::new(dir.clone()).last_iteration()?;
    println!("Last iteration: {}", last);
    Ok(())
}

fn print_record(record: &IterationRecord) {
    let status = if record.is_success() {
        "success".green()
    } else {
        "failure".red()
    };
    print!(
        "#{:<4} {:<10} {} {:>7.1}s",
        record.iteration,
        record.phase,
        status,
        record.duration_seconds()
    );
    if let Some(commit) = &record.metrics.commit {
        print!("  {}", commit);
    }
    if let Some(errors) = &record.metrics.errors {
        print!("  {}", errors.join("; ").dimmed());
    }
    println!();
}

fn handle_iterations(dir: &ControlDirectory, limit: usize) -> Result<()> {
    let records = TelemetryReader::new(dir.clone()).read_recent(limit)?;
    if records.is_empty() {
        println!("No iterations recorded");
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn handle_stats(dir: &ControlDirectory) -> Result<()> {
    let records = TelemetryReader::new(dir.clone()).read_all()?;
    let stats = IterationStats::from_records(&records);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    if let Some(rate) = stats.success_rate() {
        println!("Success rate: {:.1}%", rate * 100.0);
    }
    Ok(())
}

fn handle_doctor(dir: &ControlDirectory) -> Result<()> {
    let check = |ok: bool, label: &str, detail: String| {
        let mark = if ok { "ok".green() } else { "!!".red() };
        println!("[{}] {}: {}", mark, label, detail);
    };

    check(dir.exists(), "control directory", dir.root().display().to_string());
    if !dir.exists() {
        return Ok(());
    }

    match LivenessManager::check(dir) {
        Liveness::Live { pid } => check(true, "pid", format!("live ({})", pid)),
        Liveness::Absent => check(true, "pid", "no runner".to_string()),
        Liveness::Stale { reason } => check(false, "pid", format!("stale ({}), safe to clear", reason)),
    }

    check(
        dir.log_path().exists(),
        "ralph.log",
        if dir.log_path().exists() { "present" } else { "missing" }.to_string(),
    );

    let report = TelemetryReader::new(dir.clone()).validate()?;
    let mut detail = format!("{} valid records", report.valid);
    if !report.invalid_lines.is_empty() {
        detail.push_str(&format!(", invalid lines {:?}", report.invalid_lines));
    }
    if report.incomplete_tail {
        detail.push_str(", incomplete trailing line");
    }
    check(report.is_clean(), "iterations.jsonl", detail);

    if let Err(e) = LoopConfig::load(dir) {
        check(false, "config.json", e.to_string());
    } else {
        check(true, "config.json", "valid".to_string());
    }
    Ok(())
}

fn handle_schema() -> Result<()> {
    println!("Minimum record:");
    println!("{}", serde_json::to_string_pretty(&record::minimum_record_example())?);
    println!("Recommended fields: {}", record::RECOMMENDED_FIELDS.join(", "));
    Ok(())
}

fn dashboard_client(config: &Config, auth: &TokenArg) -> Result<DashboardClient> {
    Ok(DashboardClient::new(config.dashboard.client_config())?.with_token(auth.token.clone()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_dashboard(command: &DashboardCommands, config: &Config) -> Result<()> {
    info!("Handling dashboard command: {:?}", command);
    match command {
        DashboardCommands::Login { username, password } => {
            let username = username
                .clone()
                .or_else(|| config.dashboard.username.clone())
                .ok_or_else(|| eyre!("no username given and none configured"))?;
            let mut client = DashboardClient::new(config.dashboard.client_config())?;
            let response = client.login(&username, password).await.context("Login failed")?;
            println!("{}", response.access_token);
            Ok(())
        }
        DashboardCommands::Projects { auth } => {
            let projects = dashboard_client(config, auth)?.list_projects().await?;
            for project in &projects {
                println!(
                    "  - {}: {}",
                    project.id,
                    project.status.as_deref().unwrap_or("unknown")
                );
            }
            Ok(())
        }
        DashboardCommands::Project { id, auth } => print_json(&dashboard_client(config, auth)?.get_project(id).await?),
        DashboardCommands::Stats { id, auth } => print_json(&dashboard_client(config, auth)?.get_stats(id).await?),
        DashboardCommands::Iterations { id, limit, page, auth } => {
            print_json(&dashboard_client(config, auth)?.get_iterations(id, *limit, *page).await?)
        }
        DashboardCommands::Plan { id, auth } => print_json(&dashboard_client(config, auth)?.get_plan(id).await?),
        DashboardCommands::Start { id, auth } => {
            print_json(&dashboard_client(config, auth)?.command(id, LoopCommand::Start).await?)
        }
        DashboardCommands::Stop { id, auth } => {
            print_json(&dashboard_client(config, auth)?.command(id, LoopCommand::Stop).await?)
        }
        DashboardCommands::Pause { id, auth } => {
            print_json(&dashboard_client(config, auth)?.command(id, LoopCommand::Pause).await?)
        }
        DashboardCommands::Resume { id, auth } => {
            print_json(&dashboard_client(config, auth)?.command(id, LoopCommand::Resume).await?)
        }
        DashboardCommands::Inject { id, instruction, auth } => {
            print_json(&dashboard_client(config, auth)?.inject(id, instruction).await?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Logging level may come from the config file
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

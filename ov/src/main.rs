//! Overseer CLI entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use overseer::cli::{Cli, Command, OutputFormat, QueueCommand};
use overseer::config::Settings;
use overseer::daemon::{self, PidFile};
use overseer::health::{CheckStatus, HealthContext, OverallStatus, run_all};
use overseer::intervention::Notification;
use overseer::queue::QueueManager;
use overseer::state::{OssPaths, WorkflowSnapshot};
use overseer::supervisor::Supervisor;
use overseer::wlog::{LogTailer, read_all};

fn setup_logging(cli_level: Option<&str>, settings_level: Option<&str>, log_file: Option<PathBuf>) -> Result<()> {
    let level = match cli_level.or(settings_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some("INFO") | None => tracing::Level::INFO,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = std::fs::File::create(&path).context("Failed to create supervisor log file")?;
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project = match &cli.project {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let settings = Settings::load();

    let log_file = match cli.command {
        Command::RunDaemon => Some(OssPaths::new(&project).dir().join("supervisor.log")),
        _ => None,
    };
    setup_logging(cli.log_level.as_deref(), settings.log_level.as_deref(), log_file)?;

    debug!(command = ?cli.command, project = %project.display(), "main: dispatching");
    match cli.command {
        Command::Start => cmd_start(&project),
        Command::Stop => cmd_stop(&project),
        Command::Status { format } => cmd_status(&project, format),
        Command::RunDaemon => cmd_run_daemon(&project, settings).await,
        Command::Health { format } => cmd_health(&project, format),
        Command::Queue { command } => cmd_queue(&project, command),
        Command::Log { lines, follow } => cmd_log(&project, lines, follow).await,
    }
}

fn cmd_start(project: &PathBuf) -> Result<()> {
    let paths = OssPaths::new(project);
    let pid_file = PidFile::new(paths.pid_file());

    if let Some(pid) = pid_file.running_pid() {
        return Err(eyre!("Supervisor already running with PID {}", pid));
    }

    let pid = daemon::spawn_detached(project)?;
    println!("{} supervisor started (PID {})", "✓".green(), pid);
    Ok(())
}

fn cmd_stop(project: &PathBuf) -> Result<()> {
    let paths = OssPaths::new(project);
    let pid_file = PidFile::new(paths.pid_file());

    let Some(pid) = pid_file.running_pid() else {
        println!("Supervisor is not running");
        return Ok(());
    };

    daemon::terminate(pid)?;
    pid_file.release();
    println!("{} supervisor stopped", "✓".green());
    Ok(())
}

fn cmd_status(project: &PathBuf, format: OutputFormat) -> Result<()> {
    let paths = OssPaths::new(project);
    let pid = PidFile::new(paths.pid_file()).running_pid();
    let snapshot = WorkflowSnapshot::load(&paths.state_file()).unwrap_or_default();
    let queue = QueueManager::open(&paths)?;

    if format == OutputFormat::Json {
        let value = serde_json::json!({
            "running": pid.is_some(),
            "pid": pid,
            "current_command": snapshot.current_command,
            "current_phase": snapshot.current_phase,
            "next_command": snapshot.next_command,
            "chain": snapshot.chain,
            "pending_tasks": queue.pending_count(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match pid {
        Some(pid) => println!("{} supervisor running (PID {})", "●".green(), pid),
        None => println!("{} supervisor not running", "●".red()),
    }
    match &snapshot.current_command {
        Some(cmd) => println!("  current: {}", cmd.bold()),
        None => println!("  current: {}", "idle".dimmed()),
    }
    if let Some(next) = &snapshot.next_command {
        println!("  next:    {}", next);
    }
    println!("  pending tasks: {}", queue.pending_count());
    for (priority, count) in queue.count_by_priority() {
        println!("    {}: {}", priority, count);
    }
    Ok(())
}

async fn cmd_run_daemon(project: &PathBuf, settings: Settings) -> Result<()> {
    let mut supervisor = Supervisor::with_settings(project, settings)?.with_notifier(system_notifier());

    supervisor.start().map_err(|e| eyre!(e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Termination signal received");
        let _ = shutdown_tx.send(true);
    });

    supervisor.run(shutdown_rx).await?;
    Ok(())
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Deliver notifications through whatever notifier the host has
fn system_notifier() -> Arc<dyn Fn(&Notification) + Send + Sync> {
    Arc::new(|notification: &Notification| {
        let delivered = std::process::Command::new("terminal-notifier")
            .arg("-title")
            .arg(&notification.title)
            .arg("-message")
            .arg(&notification.message)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .is_ok()
            || std::process::Command::new("notify-send")
                .arg(&notification.title)
                .arg(&notification.message)
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .spawn()
                .is_ok();

        if !delivered {
            info!(title = %notification.title, message = %notification.message, "notification");
        }
    })
}

fn cmd_health(project: &PathBuf, format: OutputFormat) -> Result<()> {
    let paths = OssPaths::new(project);
    let session_active = WorkflowSnapshot::load(&paths.state_file())
        .map(|s| s.current_command.is_some())
        .unwrap_or(false);

    let report = run_all(&HealthContext::new(project, session_active));

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let overall = match report.overall_status {
        OverallStatus::Healthy => "healthy".green(),
        OverallStatus::Warning => "warning".yellow(),
        OverallStatus::Critical => "critical".red(),
    };
    println!("Overall: {}", overall);
    for check in &report.checks {
        let glyph = match check.status {
            CheckStatus::Pass => "✓".green(),
            CheckStatus::Warn => "!".yellow(),
            CheckStatus::Fail => "✗".red(),
        };
        println!("  {} {:<15} {}", glyph, check.name, check.message);
    }
    Ok(())
}

fn cmd_queue(project: &PathBuf, command: QueueCommand) -> Result<()> {
    let paths = OssPaths::new(project);
    let mut queue = QueueManager::open(&paths)?;

    match command {
        QueueCommand::List { format } => {
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(queue.tasks())?);
                return Ok(());
            }
            if queue.tasks().is_empty() {
                println!("Queue is empty");
                return Ok(());
            }
            for task in queue.tasks() {
                println!(
                    "{:<30} {:<8} {:<10} {:<20} {}",
                    task.id,
                    task.priority.to_string(),
                    format!("{:?}", task.status).to_lowercase(),
                    task.anomaly_type,
                    task.suggested_agent
                );
            }
        }
        QueueCommand::Clear => {
            queue.clear()?;
            println!("{} queue cleared", "✓".green());
        }
    }
    Ok(())
}

async fn cmd_log(project: &PathBuf, lines: usize, follow: bool) -> Result<()> {
    let paths = OssPaths::new(project);
    let entries = read_all(&paths.workflow_log());

    let start = entries.len().saturating_sub(lines);
    for entry in &entries[start..] {
        println!("{}  {}", entry.ts.format("%H:%M:%S"), entry.summary());
    }

    if follow {
        let mut tailer = LogTailer::new(paths.workflow_log());
        tailer.start(|entry| {
            println!("{}  {}", entry.ts.format("%H:%M:%S"), entry.summary());
        });
        tokio::signal::ctrl_c().await.ok();
        tailer.stop().await;
    }
    Ok(())
}

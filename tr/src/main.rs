//! TaskRelay - bounded-concurrency agent task orchestrator
//!
//! CLI entry point for running task batches and inspecting configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use taskrelay::cli::{Cli, Command, OutputFormat};
use taskrelay::config::Config;
use taskrelay::domain::{ExecutionMode, TaskResult, parse_batch};
use taskrelay::events::{Event, EventBus, EventHistory, EventPayload};
use taskrelay::executor::TaskExecutor;
use taskrelay::orchestrator::Orchestrator;
use taskrelay::prompts::PromptLoader;
use taskrelay::runner::{CommandRunner, MockRunner, TaskRunner};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskrelay")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("taskrelay.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            batch_file,
            parallel,
            max_concurrency,
            mock,
            format,
        } => {
            if mock {
                config.runner.mock = true;
            }
            if let Some(n) = max_concurrency {
                config.execution.max_concurrency = n;
            }
            if parallel {
                config.execution.default_mode = ExecutionMode::Parallel;
            }
            config.validate().context("Invalid configuration")?;

            let failures = cmd_run(&config, &batch_file, format).await?;
            if failures > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Agents => cmd_agents(&config),
        Command::Config => cmd_config(&config),
    }
}

fn build_runner(config: &Config) -> Result<Arc<dyn TaskRunner>> {
    if config.runner.mock {
        debug!(delay_ms = config.runner.mock_delay_ms, "build_runner: using mock runner");
        return Ok(Arc::new(
            MockRunner::new().with_delay(Duration::from_millis(config.runner.mock_delay_ms)),
        ));
    }

    let program = config
        .runner
        .command
        .clone()
        .ok_or_else(|| eyre::eyre!("runner.command is required unless runner.mock is enabled"))?;
    debug!(%program, "build_runner: using command runner");
    Ok(Arc::new(CommandRunner::new(program, config.runner.args.clone())))
}

fn build_executor(config: &Config, bus: Option<Arc<EventBus>>) -> Result<TaskExecutor> {
    let prompts = Arc::new(PromptLoader::new(&config.agents.prompt_dir));
    let mut executor = TaskExecutor::new(prompts, build_runner(config)?)
        .with_timeouts(config.timeout_config())
        .with_known_agents(config.agents.known_types.iter().cloned());
    if let Some(bus) = bus {
        executor = executor.with_bus(bus);
    }
    Ok(executor)
}

/// Live progress line for each event, on stderr so stdout stays parseable
fn print_event(event: &Event) {
    let id = event.task_id.dimmed();
    match &event.payload {
        EventPayload::TaskStarted { agent_type, .. } => {
            eprintln!("{} {} {}", "start".cyan(), id, agent_type);
        }
        EventPayload::TaskProgress { stage, progress, .. } => {
            eprintln!("{} {} {} ({:.0}%)", "stage".dimmed(), id, stage, progress * 100.0);
        }
        EventPayload::TaskCompleted { model, duration_ms, .. } => {
            eprintln!("{} {} {} in {}ms", "done".green(), id, model, duration_ms);
        }
        EventPayload::TaskFailed { stage, error, .. } => {
            eprintln!("{} {} at {}: {}", "fail".red(), id, stage, error);
        }
        EventPayload::BatchStarted { mode, task_count, .. } => {
            eprintln!("{} {} {} tasks ({})", "batch".bright_cyan().bold(), id, task_count, mode);
        }
        EventPayload::BatchCompleted {
            success_count,
            failure_count,
            duration_ms,
            ..
        } => {
            eprintln!(
                "{} {} {} ok, {} failed in {}ms",
                "batch".bright_cyan().bold(),
                id,
                success_count,
                failure_count,
                duration_ms
            );
        }
        EventPayload::BatchFailed { error, .. } => {
            eprintln!("{} {} {}", "batch".red().bold(), id, error);
        }
    }
}

async fn cmd_run(config: &Config, batch_file: &Path, format: OutputFormat) -> Result<usize> {
    debug!(?batch_file, %format, "cmd_run: called");

    let content = fs::read_to_string(batch_file).context(format!("Failed to read {}", batch_file.display()))?;
    let tasks = parse_batch(&content).context(format!("Failed to parse {}", batch_file.display()))?;
    info!(count = tasks.len(), "cmd_run: loaded batch");

    let bus = Arc::new(EventBus::new(config.bus_config()));
    let history = Arc::new(EventHistory::new(config.events.history_size));
    history.attach(&bus);
    if format == OutputFormat::Text {
        bus.subscribe_all(print_event);
    }

    let executor = Arc::new(build_executor(config, Some(Arc::clone(&bus)))?);
    let orchestrator = Orchestrator::with_config(executor, config.orchestrator_config());

    let results = orchestrator.run(&tasks, None).await;

    let stats = bus.stats();
    if let Err(e) = bus.close().await {
        warn!(error = %e, "cmd_run: bus close failed");
    }
    if stats.total_dropped > 0 {
        warn!(dropped = stats.total_dropped, "cmd_run: events dropped during batch");
    }

    let failures = results.iter().filter(|r| !r.is_success()).count();
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "mode": config.execution.default_mode,
                "task_count": results.len(),
                "success_count": results.len() - failures,
                "failure_count": failures,
                "results": results,
                "events_recorded": history.len(),
                "events_dropped": stats.total_dropped,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => print_results(&results),
    }

    Ok(failures)
}

fn print_results(results: &[TaskResult]) {
    println!();
    for result in results {
        match &result.failure {
            None => println!(
                "{} {:16} {:20} {}ms",
                "✓".green(),
                result.task_id,
                result.agent_type,
                result.duration_ms
            ),
            Some(failure) => println!(
                "{} {:16} {:20} {}",
                "✗".red(),
                result.task_id,
                result.agent_type,
                failure
            ),
        }
    }

    let failures = results.iter().filter(|r| !r.is_success()).count();
    println!();
    println!("{} succeeded, {} failed", results.len() - failures, failures);
}

fn cmd_agents(config: &Config) -> Result<()> {
    debug!("cmd_agents: called");
    let executor = build_executor(config, None)?;
    let timeouts = config.timeout_config();

    println!("{}", "Known agent types".bright_cyan().bold());
    for agent in executor.known_agents() {
        println!(
            "  {:20} timeout {:>6}s  model {}",
            agent.yellow(),
            timeouts.for_agent(&agent).as_secs(),
            executor.selector().default_model(&agent)
        );
    }

    let loader = PromptLoader::new(&config.agents.prompt_dir);
    let available = loader.available();
    println!();
    println!("Prompt directory: {}", loader.dir().display());
    if available.is_empty() {
        println!("{}", "  no prompt files found; built-in fallback prompts will be used".dimmed());
    } else {
        println!("  prompt files: {}", available.join(", "));
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", serde_yaml::to_string(config).context("Failed to serialize config")?);
    Ok(())
}

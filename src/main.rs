use anyhow::{Context, Result};
use localci::artifact::ArtifactStore;
use localci::cli::commands::{
    ArtifactsCommand, HistoryCommand, ListCommand, RunCommand, ValidateCommand,
};
use localci::cli::output::*;
use localci::cli::terminal_output::RunDisplay;
use localci::cli::{git, Cli, Command};
use localci::core::config::PipelineConfig;
use localci::core::{Pipeline, PipelineError, StepState, TriggerEvent};
use localci::execution::{ExecutionEngine, RunOutcome, ShellRunner};
use localci::persistence::{create_summary, InMemoryPersistence, PersistenceBackend, RunSummary};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Lines of the failing step's output shown after a failure
const FAILURE_TAIL_LINES: usize = 20;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &cli).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd, &cli).await?,
        Command::History(cmd) => show_history(cmd, &cli).await?,
        Command::Artifacts(cmd) => artifacts(cmd, &cli)?,
    }

    Ok(())
}

async fn open_history(data_dir: &Path) -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = localci::persistence::SqliteRunStore::in_data_dir(data_dir).await?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        warn!(
            "Built without the sqlite feature; history in {} is not available",
            data_dir.display()
        );
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

async fn run_pipeline(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let mut pipeline = config.to_pipeline()?;

    println!("{}Loaded pipeline: {}", INFO, style(&pipeline.name).bold());

    let data_dir = cli.data_dir();
    let branch = match &cmd.branch {
        Some(branch) => branch.clone(),
        None => git::current_branch(&cmd.source).await?,
    };
    let commit = git::resolve_commit(&cmd.source, &cmd.commit).await;
    let trigger = TriggerEvent::push(branch, commit);

    let overrides: BTreeMap<String, String> = cmd.var.iter().cloned().collect();
    for (key, value) in &overrides {
        println!(
            "{}Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    // Set up persistence
    let history: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history(&data_dir).await?
    };

    let workspace_root = cmd
        .workspace
        .clone()
        .unwrap_or_else(|| data_dir.join("workspaces"));

    let mut engine = ExecutionEngine::new(ShellRunner::new(), ArtifactStore::new(data_dir.join("artifacts")))
        .with_workspace_root(workspace_root)
        .with_source_dir(&cmd.source)
        .with_variables(overrides)
        .with_clean_workspaces(cmd.clean);

    // Set up event handler for console output
    let display = Arc::new(RunDisplay::new(cli.stream));
    let handler_display = display.clone();
    engine.add_event_handler(move |event| handler_display.on_event(&event));

    // Ctrl-C kills the running step and fails the run as Cancelled
    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    // Execute pipeline
    println!();
    let result = engine.execute(&mut pipeline, &trigger).await;
    display.finish();

    // Save to history
    if !cmd.no_history {
        let summary = create_summary(&pipeline);
        history.save_run(&summary).await?;
        println!(
            "\n{}Run saved to history (ID: {})",
            INFO,
            style(summary.run_id).dim()
        );
    }

    match result {
        Ok(RunOutcome::Skipped) => {
            println!(
                "\n{}{} skipped: branch {} does not match {}",
                SKIP,
                style(&pipeline.name).bold(),
                style(&trigger.branch).cyan(),
                pipeline.trigger().push_branches().join(", ")
            );
        }
        Ok(RunOutcome::Completed { artifacts }) => {
            println!(
                "\n{}{} completed {}",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green()
            );
            for manifest in &artifacts {
                println!("  {}", format_manifest(manifest));
            }
            if let Some(first) = artifacts.first() {
                println!(
                    "  {}",
                    style(format!(
                        "localci artifacts download {} {} <dest>",
                        pipeline.state.run_id, first.name
                    ))
                    .dim()
                );
            }
        }
        Err(e) => {
            print_failure(&pipeline, &e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_failure(pipeline: &Pipeline, err: &PipelineError) {
    println!(
        "\n{}{} {} [{}]",
        CROSS,
        style(&pipeline.name).bold(),
        style("failed").red(),
        style(err.kind()).red().bold()
    );
    error!("{}", err);

    let failed = pipeline
        .steps()
        .find(|step| matches!(step.state(), StepState::Failed { .. }));
    if let Some(step) = failed {
        println!("  Step: {} ({})", style(step.name()).bold(), step.qualified_id());
        if let Some(output) = step.state().output().filter(|o| !o.trim().is_empty()) {
            println!("  {}", style("Output:").dim());
            for line in format_output_tail(output, FAILURE_TAIL_LINES).lines() {
                println!("    {}", line);
            }
        }
    }

    println!("  {}", style("Steps:").dim());
    for step in pipeline.steps() {
        println!(
            "    {:<24} {}",
            format_step_state(step.state()),
            step.qualified_id()
        );
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    if !cmd.json {
        println!("{}Validating pipeline...", INFO);
    }

    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        let pipeline = config.to_pipeline()?;
        Ok((config, pipeline))
    });

    match result {
        Ok((config, pipeline)) => {
            let warnings = pipeline.lint();

            if cmd.json {
                let jobs: Vec<_> = pipeline
                    .jobs()
                    .iter()
                    .map(|job| {
                        json!({
                            "id": job.id(),
                            "name": job.name(),
                            "image": job.image(),
                            "steps": job.steps().iter().map(|step| json!({
                                "id": step.id(),
                                "name": step.name(),
                                "phase": step.phase(),
                                "timeout_secs": step.timeout_secs(),
                            })).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                let actions: Vec<_> = config
                    .actions
                    .iter()
                    .map(|(reference, action)| {
                        json!({
                            "uses": reference,
                            "phase": action.phase,
                            "description": action.description,
                        })
                    })
                    .collect();
                let data = json!({
                    "valid": true,
                    "name": config.name,
                    "version": config.version,
                    "actions": actions,
                    "branches": pipeline.trigger().push_branches(),
                    "jobs": jobs,
                    "warnings": warnings,
                });
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }

            println!("{}Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            if let Some(version) = &config.version {
                println!("  Version: {}", style(version).cyan());
            }
            println!("  Jobs: {}", style(pipeline.jobs().len()).cyan());
            for job in pipeline.jobs() {
                println!(
                    "    {} ({}, {} steps on {})",
                    style(job.name()).bold(),
                    job.id(),
                    job.steps().len(),
                    job.image().label()
                );
            }
            let mut actions: Vec<_> = config.actions.iter().collect();
            actions.sort_by(|a, b| a.0.cmp(b.0));
            for (reference, action) in actions {
                match &action.description {
                    Some(description) => println!("  Action {}: {}", style(reference).cyan(), description),
                    None => println!("  Action {}", style(reference).cyan()),
                }
            }
            println!("  Steps: {}", style(pipeline.total_steps()).cyan());
            println!("  Variables: {}", style(config.variables.len()).cyan());
            println!(
                "  Triggered by pushes to: {}",
                style(pipeline.trigger().push_branches().join(", ")).cyan()
            );
            for warning in &warnings {
                println!("{}{}", WARN, style(warning).yellow());
            }
            Ok(())
        }
        Err(e) => {
            if cmd.json {
                let data = json!({ "valid": false, "error": format!("{:#}", e) });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{}Validation failed:", CROSS);
                println!("  {}", style(format!("{:#}", e)).red());
            }
            std::process::exit(1);
        }
    }
}

async fn list_pipelines(cmd: &ListCommand, cli: &Cli) -> Result<()> {
    let history = open_history(&cli.data_dir()).await?;
    let pipelines = history.list_pipelines().await?;

    if cmd.json {
        let data: Vec<_> = pipelines
            .iter()
            .map(|(name, runs)| json!({ "name": name, "runs": runs }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&json!({ "pipelines": data }))?);
        return Ok(());
    }

    if pipelines.is_empty() {
        println!("{}No pipelines found in history", INFO);
        return Ok(());
    }

    println!("{}Pipelines in history:", INFO);
    for (name, runs) in &pipelines {
        println!("  {} ({} runs)", style(name).bold(), style(runs).cyan());
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli) -> Result<()> {
    let history = open_history(&cli.data_dir()).await?;

    // If a specific run is requested
    if let Some(run_id) = cmd.run_id {
        match history.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_run_details(&summary),
            None => println!("{}Run {} not found", WARN, run_id),
        }
        return Ok(());
    }

    let runs = history.list_runs(cmd.pipeline.as_deref(), cmd.limit).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&json!({ "runs": runs }))?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{}No runs found", INFO);
        return Ok(());
    }

    println!("{}Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary) {
    println!("{}Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    if let Some(branch) = &summary.branch {
        println!("  Branch: {}", style(branch).cyan());
    }
    if let Some(commit) = &summary.commit {
        println!("  Commit: {}", style(commit).dim());
    }
    if !summary.images.is_empty() {
        println!("  Workers: {}", summary.images.join(", "));
    }
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
    }
    if let Some(duration) = summary.duration().and_then(|d| d.to_std().ok()) {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }
    println!(
        "  Progress: {} ({}/{})",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.completed_steps,
        summary.total_steps
    );
    if let Some(kind) = summary.failure {
        println!(
            "  Failure: {} at {}",
            style(kind).red(),
            summary.failed_step.as_deref().unwrap_or("-")
        );
    }
    if !summary.artifacts.is_empty() {
        println!("  Artifacts: {}", summary.artifacts.join(", "));
    }
}

fn artifacts(cmd: &ArtifactsCommand, cli: &Cli) -> Result<()> {
    let store = ArtifactStore::new(cli.data_dir().join("artifacts"));

    match cmd {
        ArtifactsCommand::List { run_id, json } => {
            let manifests = store
                .list(*run_id)
                .with_context(|| format!("Failed to list artifacts of run {}", run_id))?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&manifests)?);
            } else if manifests.is_empty() {
                println!("{}No artifacts published by run {}", INFO, run_id);
            } else {
                for manifest in &manifests {
                    println!("{}", format_manifest(manifest));
                    for file in &manifest.files {
                        println!(
                            "    {} {} {}",
                            file.path,
                            style(format_size(file.size)).dim(),
                            style(short_digest(&file.sha256)).dim()
                        );
                    }
                }
            }
        }
        ArtifactsCommand::Download { run_id, name, dest } => {
            let files = store
                .download(*run_id, name, dest)
                .with_context(|| format!("Failed to download artifact '{}'", name))?;
            println!(
                "{}Downloaded {} file(s) of {} to {}",
                CHECK,
                files.len(),
                style(name).bold(),
                dest.display()
            );
        }
    }

    Ok(())
}

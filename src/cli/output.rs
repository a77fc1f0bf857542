//! CLI output formatting

use crate::{
    artifact::ArtifactManifest,
    core::{ExecutionStatus, StepState},
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "# ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Completed { .. } => style("COMPLETED").green().to_string(),
        StepState::Failed { kind, .. } => style(format!("FAILED ({})", kind)).red().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        ExecutionStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// One history line
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed | ExecutionStatus::Cancelled => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Skipped => SKIP,
        ExecutionStatus::Pending => INFO,
    };

    let mut line = format!(
        "{}{} - {} - {} ({}/{})",
        status_icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.completed_steps,
        summary.total_steps,
    );
    if let Some(branch) = &summary.branch {
        line.push_str(&format!(" - {}", style(branch).cyan()));
    }
    if let (Some(step), Some(kind)) = (&summary.failed_step, summary.failure) {
        line.push_str(&format!(" - {} at {}", style(kind).red(), step));
    }
    if !summary.artifacts.is_empty() {
        line.push_str(&format!(" - {}{}", PACKAGE, summary.artifacts.join(", ")));
    }
    line
}

/// Format an execution event for display
///
/// `StepOutput` lines are rendered by the terminal display, not here.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{}Starting pipeline {} ({}, {} steps)",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(run_id)).dim(),
            total_steps
        ),
        ExecutionEvent::PipelineSkipped {
            pipeline_name,
            branch,
            ..
        } => format!(
            "{}Pipeline {} is not triggered by a push to {}; nothing to do",
            SKIP,
            style(pipeline_name).bold(),
            style(branch).cyan()
        ),
        ExecutionEvent::JobStarted {
            job_id,
            image,
            workspace,
        } => format!(
            "{}Job {} on {} ({})",
            INFO,
            style(job_id).bold(),
            style(image).cyan(),
            style(workspace.display()).dim()
        ),
        ExecutionEvent::StepStarted { step_id, name } => {
            format!("{}{} {}", SPINNER, style(name).cyan(), style(step_id).dim())
        }
        ExecutionEvent::StepOutput { .. } => return None,
        ExecutionEvent::StepCompleted { step_id } => {
            format!("{}{}", CHECK, style(step_id).green())
        }
        ExecutionEvent::StepFailed {
            step_id,
            kind,
            error,
        } => format!(
            "{}{} [{}]: {}",
            CROSS,
            style(step_id).red(),
            style(kind).red().bold(),
            style(error).dim()
        ),
        ExecutionEvent::ArtifactStaged { name, files, .. } => format!(
            "{}Staged {} ({} file{})",
            PACKAGE,
            style(name).bold(),
            files,
            if *files == 1 { "" } else { "s" }
        ),
        ExecutionEvent::ArtifactPublished { name, files, size } => format!(
            "{}Published {} ({} file{}, {})",
            PACKAGE,
            style(name).green().bold(),
            files,
            if *files == 1 { "" } else { "s" },
            format_size(*size)
        ),
        ExecutionEvent::PipelineCompleted { run_id, status } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("{} completed", style("successfully").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                ExecutionStatus::Cancelled => style("was cancelled").yellow().to_string(),
                other => other.to_string(),
            };
            format!("{}Run {} {}", INFO, style(short_id(run_id)).dim(), status_str)
        }
    };
    Some(line)
}

/// Artifact listing line
pub fn format_manifest(manifest: &ArtifactManifest) -> String {
    format!(
        "{}{} ({} file{}, {})",
        PACKAGE,
        style(&manifest.name).bold(),
        manifest.files.len(),
        if manifest.files.len() == 1 { "" } else { "s" },
        format_size(manifest.total_size())
    )
}

/// Leading 12 hex digits of a digest; shorter values are shown whole
pub fn short_digest(sha256: &str) -> &str {
    sha256.get(..12).unwrap_or(sha256)
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Last `max_lines` lines of a step's output
pub fn format_output_tail(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        lines.join("\n")
    } else {
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            lines[lines.len() - max_lines..].join("\n")
        )
    }
}

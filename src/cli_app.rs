//! Top-level CLI definition and dispatch.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::json;
use thiserror::Error;

use kb_indexer::core::config::{IndexingConfig, IndexingMode};
use kb_indexer::core::errors::KbError;
use kb_indexer::execute::RunState;
use kb_indexer::indexer::Indexer;

/// CLI-layer errors wrapping engine errors with usage problems.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] KbError),
    #[error("{0}")]
    Usage(String),
}

/// Knowledge-base indexer — maintains per-file analyses and per-directory
/// knowledge files mirroring a source tree.
#[derive(Debug, Parser)]
#[command(
    name = "kbx",
    author,
    version,
    about = "Knowledge-base indexer - incremental, plan-then-execute",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run an indexing pass over a source tree.
    Index(TargetArgs),
    /// Show the execution plan without running it.
    Plan(TargetArgs),
    /// Show cache statistics for a source tree.
    Status(StatusArgs),
    /// Delete orphaned artifacts (and optionally the whole cache).
    CleanOrphans(CleanArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct TargetArgs {
    /// Source tree to index. Defaults to the current directory.
    path: Option<PathBuf>,
    /// Indexing mode: incremental, full, or full_kb_rebuild.
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,
    /// Skip vendored repositories under git-clones/.
    #[arg(long)]
    no_git_clones: bool,
    /// Skip the project tree itself.
    #[arg(long)]
    no_project: bool,
    /// Worker pool width override.
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct StatusArgs {
    /// Source tree to inspect. Defaults to the current directory.
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CleanArgs {
    /// Source tree to clean. Defaults to the current directory.
    path: Option<PathBuf>,
    /// Also remove every analysis cache file, orphaned or not.
    #[arg(long)]
    all_cache: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

/// Dispatch the parsed CLI. Returns the process exit code.
pub fn run(cli: &Cli) -> Result<i32, CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Index(args) => cmd_index(cli, args),
        Command::Plan(args) => cmd_plan(cli, args),
        Command::Status(args) => cmd_status(cli, args),
        Command::CleanOrphans(args) => cmd_clean(cli, args),
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "kbx", &mut std::io::stdout());
            Ok(0)
        }
    }
}

fn load_config(cli: &Cli, args: Option<&TargetArgs>) -> Result<IndexingConfig, CliError> {
    let mut config = IndexingConfig::load(cli.config.as_deref())?;
    if let Some(args) = args {
        if let Some(mode) = &args.mode {
            config.engine.mode = mode.parse::<IndexingMode>()?;
        }
        if args.no_git_clones {
            config.handlers.enable_git_clone_indexing = false;
        }
        if args.no_project {
            config.handlers.enable_project_indexing = false;
        }
        if let Some(concurrency) = args.concurrency {
            config.engine.max_concurrent_operations = concurrency;
        }
        config.validate()?;
    }
    Ok(config)
}

fn target_path(path: Option<&PathBuf>) -> Result<PathBuf, CliError> {
    match path {
        Some(path) => Ok(path.clone()),
        None => std::env::current_dir()
            .map_err(|e| CliError::Usage(format!("cannot resolve current directory: {e}"))),
    }
}

fn cmd_index(cli: &Cli, args: &TargetArgs) -> Result<i32, CliError> {
    let config = load_config(cli, Some(args))?;
    let target = target_path(args.path.as_ref())?;
    let indexer = Indexer::new(config)?;
    let outcome = indexer.index(&target)?;

    if cli.json {
        let payload = json!({
            "state": outcome.state.to_string(),
            "decisions": outcome.decisions,
            "tasks_completed": outcome.results.completed.len(),
            "tasks_failed": outcome.results.failed.len(),
            "llm_calls": outcome.results.llm_call_count,
            "success_rate": outcome.results.success_rate(),
            "duration_secs": outcome.duration.as_secs_f64(),
            "failures": outcome.failures,
        });
        println!("{}", serde_json::to_string_pretty(&payload).map_err(KbError::from)?);
    } else {
        let state_label = match outcome.state {
            RunState::Completed => "completed".green().to_string(),
            RunState::CompletedWithFailures => "completed with failures".yellow().to_string(),
            RunState::Failed => "failed".red().to_string(),
        };
        println!(
            "{state_label}: {} tasks ok, {} failed, {} LLM calls, {:.1}s",
            outcome.results.completed.len(),
            outcome.results.failed.len(),
            outcome.results.llm_call_count,
            outcome.duration.as_secs_f64(),
        );
        println!(
            "decisions: {}/{} files rebuilt, {}/{} directories rebuilt, {} deletions",
            outcome.decisions.files_rebuild,
            outcome.decisions.files_total,
            outcome.decisions.directories_rebuild,
            outcome.decisions.directories_total,
            outcome.decisions.deletions,
        );
        for line in &outcome.failures {
            println!("  {} {line}", "failed".red());
        }
    }

    Ok(match outcome.state {
        RunState::Completed | RunState::CompletedWithFailures => 0,
        RunState::Failed => 1,
    })
}

fn cmd_plan(cli: &Cli, args: &TargetArgs) -> Result<i32, CliError> {
    let config = load_config(cli, Some(args))?;
    let target = target_path(args.path.as_ref())?;
    let indexer = Indexer::new(config)?;
    let (report, plan) = indexer.plan(&target)?;

    if cli.json {
        let payload = json!({
            "decisions": report.summary(),
            "task_count": plan.len(),
            "expensive_tasks": plan.expensive_task_count(),
            "max_parallel_width": plan.max_parallel_width(),
            "estimated_duration_secs": plan.total_estimated_duration(),
        });
        println!("{}", serde_json::to_string_pretty(&payload).map_err(KbError::from)?);
    } else {
        print!("{}", plan.preview());
    }
    Ok(0)
}

fn cmd_status(cli: &Cli, args: &StatusArgs) -> Result<i32, CliError> {
    let config = load_config(cli, None)?;
    let target = target_path(args.path.as_ref())?;
    let indexer = Indexer::new(config)?;

    let mut areas = Vec::new();
    for handler in indexer.registry().handlers() {
        let stats = indexer.cache().stats(&target, handler);
        areas.push((handler.name(), stats));
    }

    if cli.json {
        let payload = json!({
            "target": target,
            "areas": areas
                .iter()
                .map(|(name, stats)| json!({ "handler": name, "stats": stats }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload).map_err(KbError::from)?);
    } else {
        println!("cache status for {}", target.display());
        for (name, stats) in &areas {
            println!(
                "  {name}: {} analysis files, {} bytes",
                stats.file_count, stats.total_size_bytes,
            );
        }
    }
    Ok(0)
}

fn cmd_clean(cli: &Cli, args: &CleanArgs) -> Result<i32, CliError> {
    let config = load_config(cli, None)?;
    let target = target_path(args.path.as_ref())?;
    let indexer = Indexer::new(config)?;

    let mut removed_files = 0usize;
    let mut removed_dirs = 0usize;

    if args.all_cache {
        for handler in indexer.registry().handlers() {
            removed_files += indexer.cache().clear(&target, handler)?;
        }
    } else {
        let (report, _) = indexer.plan(&target)?;
        for deletion in report.deletion_decisions() {
            if !deletion.is_safe_to_delete {
                continue;
            }
            if deletion.is_directory {
                if remove_dir_if_empty(&deletion.path)? {
                    removed_dirs += 1;
                }
            } else if remove_file_if_present(&deletion.path)? {
                removed_files += 1;
            }
        }
    }

    if cli.json {
        let payload = json!({
            "removed_files": removed_files,
            "removed_directories": removed_dirs,
        });
        println!("{}", serde_json::to_string_pretty(&payload).map_err(KbError::from)?);
    } else {
        println!("removed {removed_files} files, {removed_dirs} directories");
    }
    Ok(0)
}

fn remove_file_if_present(path: &Path) -> Result<bool, CliError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(KbError::io(path, e).into()),
    }
}

fn remove_dir_if_empty(path: &Path) -> Result<bool, CliError> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(true),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::DirectoryNotEmpty
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(KbError::io(path, e).into()),
    }
}

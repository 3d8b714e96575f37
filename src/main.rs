//! `william` — CLI entry point. Thin shell around `william_core`: parses
//! arguments, resolves workspaces, and renders the one place the core is
//! allowed to fail loudly — a non-zero exit with a `[william] Error: ...`
//! line on stderr (spec §6, §7).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use william_core::adapter::ClaudeAdapter;
use william_core::config::{merge_config, ConfigManager};
use william_core::emitter::LoggingEmitter;
use william_core::loop_engine::{self, LoopOptions, LoopOutcome};
use william_core::prd;
use william_core::state::{WorkspaceMeta, WorkspaceState};
use william_core::workspace::{self, Workspace};

#[derive(Parser)]
#[command(name = "william", about = "Drive a coding agent through a PRD, one story at a time")]
struct Cli {
    /// Installation root holding `workspaces/` and `archive/`. Defaults to
    /// `$WILLIAM_HOME`, or `~/.william`.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new workspace from a PRD file (the interactive
    /// creation wizard itself is an external collaborator; this accepts
    /// the same inputs it would gather).
    New {
        #[arg(long)]
        project: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        prd: PathBuf,
        #[arg(long)]
        target_dir: PathBuf,
        #[arg(long)]
        branch_name: Option<String>,
    },
    /// Resolve a workspace and run the iteration loop.
    Start {
        workspace: String,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        tool: Option<String>,
    },
    /// Write `.stopped` so the next iteration exits cleanly.
    Stop { workspace: String },
    /// Print workspace status summaries.
    Status { workspace: Option<String> },
    /// List workspaces grouped by project.
    List { project: Option<String> },
    /// Archive a stopped workspace.
    Archive { workspace: String },
    /// Launch a revision subworkspace and run the loop on it (the
    /// interactive revision wizard itself is an external collaborator).
    Revise {
        workspace: String,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        tool: Option<String>,
    },
}

fn install_root(cli_root: Option<PathBuf>) -> PathBuf {
    cli_root
        .or_else(|| std::env::var_os("WILLIAM_HOME").map(PathBuf::from))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".william")
        })
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let root = install_root(cli.root.clone());

    match run(cli, &root).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("[william] Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, root: &std::path::Path) -> anyhow::Result<()> {
    match cli.command {
        Commands::New {
            project,
            name,
            prd: prd_path,
            target_dir,
            branch_name,
        } => cmd_new(root, project, name, prd_path, target_dir, branch_name),
        Commands::Start {
            workspace,
            max_iterations,
            tool,
        } => cmd_start(root, &workspace, max_iterations, tool).await,
        Commands::Stop { workspace } => cmd_stop(root, &workspace),
        Commands::Status { workspace } => cmd_status(root, workspace.as_deref()),
        Commands::List { project } => cmd_list(root, project.as_deref()),
        Commands::Archive { workspace } => cmd_archive(root, &workspace),
        Commands::Revise {
            workspace,
            max_iterations,
            tool,
        } => cmd_revise(root, &workspace, max_iterations, tool).await,
    }
}

fn cmd_new(
    root: &std::path::Path,
    project: String,
    name: String,
    prd_path: PathBuf,
    target_dir: PathBuf,
    branch_name: Option<String>,
) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(&prd_path)
        .map_err(|e| anyhow::anyhow!("could not read PRD at {:?}: {}", prd_path, e))?;
    let parsed = prd::parse(&source);

    let dir = root.join("workspaces").join(&project).join(&name);
    std::fs::create_dir_all(dir.join("logs"))?;
    std::fs::write(dir.join("prd.md"), &source)?;
    std::fs::write(dir.join("progress.txt"), "")?;

    let branch_name = branch_name.unwrap_or_else(|| format!("feature/{}", name));
    let state = WorkspaceState::init_from_prd(
        &parsed,
        WorkspaceMeta {
            workspace: name.clone(),
            project: project.clone(),
            target_dir: target_dir.clone(),
            branch_name,
            source_file: dir.join("prd.md"),
        },
    );
    state.save(&dir.join("state.json"))?;

    println!(
        "initialized workspace {}/{} with {} stories",
        project,
        name,
        parsed.stories.len()
    );
    Ok(())
}

fn build_tool_name(workspace: &Workspace, cli_tool: Option<String>, cli_max_iterations: Option<u32>) -> anyhow::Result<(String, u32, u64)> {
    let state = WorkspaceState::load(&workspace.state_path())?;
    let manager = ConfigManager::new(&state.target_dir);
    let file_config = manager
        .read()
        .map_err(|e| anyhow::anyhow!("could not read .william/config.toml: {}", e))?;
    let merged = merge_config(&file_config, cli_max_iterations, None, cli_tool.as_deref());
    Ok((merged.tool, merged.max_iterations, merged.sleep_ms))
}

async fn cmd_start(
    root: &std::path::Path,
    workspace_name: &str,
    max_iterations: Option<u32>,
    tool: Option<String>,
) -> anyhow::Result<()> {
    let workspace = workspace::resolve(root, workspace_name)?;
    let (tool_name, max_iterations, sleep_ms) = build_tool_name(&workspace, tool, max_iterations)?;
    let adapter = ClaudeAdapter::new(tool_name);
    let mut emitter = LoggingEmitter;

    let outcome = loop_engine::run(
        workspace_name,
        &workspace,
        LoopOptions {
            adapter: &adapter,
            max_iterations,
            sleep_ms,
        },
        &mut emitter,
    )
    .await?;

    report_outcome(workspace_name, outcome);
    Ok(())
}

fn report_outcome(workspace_name: &str, outcome: LoopOutcome) {
    match outcome {
        LoopOutcome::AllComplete => println!("{}: all stories complete", workspace_name),
        LoopOutcome::Stopped => println!("{}: stopped", workspace_name),
        LoopOutcome::Paused => println!("{}: paused", workspace_name),
        LoopOutcome::MaxIterationsReached => {
            println!("{}: max iterations reached without completion", workspace_name)
        }
    }
}

fn cmd_stop(root: &std::path::Path, workspace_name: &str) -> anyhow::Result<()> {
    let workspace = workspace::resolve(root, workspace_name)?;
    workspace.write_stopped()?;
    println!("{}: stop requested", workspace_name);
    Ok(())
}

fn cmd_status(root: &std::path::Path, workspace_name: Option<&str>) -> anyhow::Result<()> {
    if let Some(name) = workspace_name {
        let workspace = workspace::resolve(root, name)?;
        let state = WorkspaceState::load(&workspace.state_path())?;
        println!("{} ({})", state.workspace, state.project);
        println!("  branch: {}", state.branch_name);
        println!(
            "  stories: {} passed, {} skipped, {} total",
            state.stories_passed(),
            state.stories_skipped(),
            state.stories.len()
        );
        println!(
            "  current: {}",
            state.current_story.as_deref().unwrap_or("(none)")
        );
        if workspace.is_stopped() {
            println!("  status: stopped");
        } else if workspace.is_paused() {
            println!("  status: paused");
        } else {
            println!("  status: running");
        }
    } else {
        for (project, names) in workspace::list_all(root) {
            for name in names {
                let dir = root.join("workspaces").join(&project).join(&name);
                let state_path = dir.join("state.json");
                if let Ok(state) = WorkspaceState::load(&state_path) {
                    println!(
                        "{}/{}: {}/{} stories passed, current={}",
                        project,
                        name,
                        state.stories_passed(),
                        state.stories.len(),
                        state.current_story.as_deref().unwrap_or("(none)")
                    );
                }
            }
        }
    }
    Ok(())
}

fn cmd_list(root: &std::path::Path, project_filter: Option<&str>) -> anyhow::Result<()> {
    for (project, names) in workspace::list_all(root) {
        if let Some(filter) = project_filter {
            if filter != project {
                continue;
            }
        }
        println!("{}:", project);
        for name in names {
            let dir = root.join("workspaces").join(&project).join(&name);
            let tag = if dir.join("state.json").exists() {
                let is_revision = WorkspaceState::load(&dir.join("state.json"))
                    .map(|s| s.revision_number.is_some())
                    .unwrap_or(false);
                if is_revision { " [revision]" } else { "" }
            } else {
                ""
            };
            println!("  {}{}", name, tag);
        }
    }
    Ok(())
}

fn cmd_archive(root: &std::path::Path, workspace_name: &str) -> anyhow::Result<()> {
    let workspace = workspace::resolve(root, workspace_name)?;
    if !workspace.is_stopped() {
        return Err(william_core::WilliamError::NotStopped(workspace.dir.clone()).into());
    }

    let state = WorkspaceState::load(&workspace.state_path())?;
    let sanitized_branch: String = state
        .branch_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();

    let mut archive_dir = root.join("archive").join(format!("{}-{}", date, sanitized_branch));
    let mut suffix = 1;
    while archive_dir.exists() {
        archive_dir = root
            .join("archive")
            .join(format!("{}-{}-{}", date, sanitized_branch, suffix));
        suffix += 1;
    }
    std::fs::create_dir_all(&archive_dir)?;

    copy_if_exists(&workspace.state_path(), &archive_dir.join("state.json"))?;
    copy_if_exists(&workspace.progress_path(), &archive_dir.join("progress.txt"))?;
    copy_if_exists(&workspace.prd_path(), &archive_dir.join("prd.md"))?;
    copy_dir_if_exists(&workspace.logs_dir(), &archive_dir.join("logs"))?;

    std::fs::remove_dir_all(&workspace.dir)?;
    println!("archived {} to {:?}", workspace_name, archive_dir);
    Ok(())
}

fn copy_if_exists(from: &std::path::Path, to: &std::path::Path) -> std::io::Result<()> {
    if from.exists() {
        std::fs::copy(from, to)?;
    }
    Ok(())
}

fn copy_dir_if_exists(from: &std::path::Path, to: &std::path::Path) -> std::io::Result<()> {
    if !from.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        if entry.path().is_file() {
            std::fs::copy(entry.path(), to.join(entry.file_name()))?;
        }
    }
    Ok(())
}

async fn cmd_revise(
    root: &std::path::Path,
    workspace_name: &str,
    max_iterations: Option<u32>,
    tool: Option<String>,
) -> anyhow::Result<()> {
    let parent = workspace::resolve(root, workspace_name)?;
    let mut parent_state = WorkspaceState::load(&parent.state_path())?;

    let (revision_workspace, number) = william_core::revision::prepare_next(&parent, &parent_state)?;
    std::fs::copy(parent.prd_path(), revision_workspace.prd_path())?;
    if !revision_workspace.progress_path().exists() {
        std::fs::write(revision_workspace.progress_path(), "")?;
    }

    let source = std::fs::read_to_string(revision_workspace.prd_path())?;
    let parsed = prd::parse(&source);
    let mut revision_state = WorkspaceState::init_from_prd(
        &parsed,
        WorkspaceMeta {
            workspace: format!("{}/revision-{}", workspace_name, number),
            project: parent_state.project.clone(),
            target_dir: parent_state.target_dir.clone(),
            branch_name: parent_state.branch_name.clone(),
            source_file: revision_workspace.prd_path(),
        },
    );
    revision_state.parent_workspace = Some(parent.dir.clone());
    revision_state.revision_number = Some(number);
    revision_state.save(&revision_workspace.state_path())?;

    let (tool_name, max_iterations, sleep_ms) =
        build_tool_name(&revision_workspace, tool, max_iterations)?;
    let adapter = ClaudeAdapter::new(tool_name);
    let mut emitter = LoggingEmitter;

    let name_for_run = format!("{}/revision-{}", workspace_name, number);
    let outcome = loop_engine::run(
        &name_for_run,
        &revision_workspace,
        LoopOptions {
            adapter: &adapter,
            max_iterations,
            sleep_ms,
        },
        &mut emitter,
    )
    .await?;

    if outcome == LoopOutcome::AllComplete {
        william_core::revision::record_completed(
            &mut parent_state,
            number,
            parsed.stories.len() as u32,
            revision_workspace.dir.clone(),
        );
        parent_state.save(&parent.state_path())?;
    }

    report_outcome(&name_for_run, outcome);
    Ok(())
}

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use log::debug;

use keel_core::config::{Engine, ProjectConfig};
use keel_core::reconcile::ReconcileSummary;
use keel_core::resource::{ModifiedStatus, Resources};
use keel_state::{
    DeployContext, DeployHooks, DeployResult, DeploymentState, GraphStateHeader, Identity,
    LocalIdentity, LockState, Locker, ObjectStore, create_store, run_deploy,
};

mod workspace;

use workspace::WorkspaceClient;

/// Lock held by this machine, kept between `lock acquire` and `lock release`
const LOCK_RECORD_FILE: &str = "deploy.lock.json";

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Deploy safely to shared targets", long_about = None)]
struct Cli {
    /// Path to keel.json or the directory containing it
    #[arg(long, short, global = true, default_value = ".")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deployment lock commands
    Lock {
        #[command(subcommand)]
        command: LockCommands,
    },
    /// Deployment state commands
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// Show how declared resources relate to what is deployed
    Plan,
    /// Run a deploy: lock, pull, update, check active runs, push, unlock
    Deploy {
        /// Take over the lock even if another deployment holds it
        #[arg(long)]
        force_lock: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum LockCommands {
    /// Acquire the deployment lock
    Acquire {
        #[arg(long)]
        force: bool,
    },
    /// Release a lock acquired with `lock acquire`
    Release {
        /// Succeed if the lock no longer exists
        #[arg(long)]
        allow_missing: bool,
    },
    /// Show who holds the lock
    Status,
}

#[derive(Subcommand)]
enum StateCommands {
    /// Replace the local state with the remote state if it is newer
    Pull,
    /// Upload the local state
    Push,
    /// Record a new revision in the local state (direct engine)
    Update,
    /// Show the local state
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Lock { command } => run_lock_command(&cli.config, command).await,
        Commands::State { command } => run_state_command(&cli.config, command).await,
        Commands::Plan => run_plan(&cli.config).await,
        Commands::Deploy { force_lock } => run_deploy_command(&cli.config, force_lock).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "keel", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn load_config(path: &Path) -> Result<ProjectConfig, String> {
    ProjectConfig::load(path).map_err(|e| e.to_string())
}

async fn open_store(config: &ProjectConfig) -> Result<Arc<dyn ObjectStore>, String> {
    let store = create_store(&config.target.backend)
        .await
        .map_err(|e| format!("Failed to open {} backend: {}", config.target.backend.backend_type, e))?;
    store.init().await.map_err(|e| e.to_string())?;
    Ok(store)
}

async fn open_context(config: &ProjectConfig) -> Result<DeployContext, String> {
    let store = open_store(config).await?;
    Ok(DeployContext::new(config, store, &LocalIdentity))
}

fn lock_record_path(config: &ProjectConfig) -> PathBuf {
    config.cache_dir().join(LOCK_RECORD_FILE)
}

fn save_lock_record(path: &Path, state: &LockState) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    let content = serde_json::to_string_pretty(state).map_err(|e| e.to_string())?;
    fs::write(path, content).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

fn load_lock_record(path: &Path) -> Result<Option<LockState>, String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("Failed to read {}: {}", path.display(), e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}

async fn run_lock_command(config_path: &Path, command: LockCommands) -> Result<(), String> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;
    let target_dir = config.target.root_path.clone();

    match command {
        LockCommands::Acquire { force } => {
            if !config.deployment.lock.enabled {
                println!("{}", "Deployment lock is disabled in configuration.".yellow());
                return Ok(());
            }

            let record = lock_record_path(&config);
            if load_lock_record(&record)?.is_some() {
                return Err(format!(
                    "A lock is already recorded at {}; release it first",
                    record.display()
                ));
            }

            let mut locker = Locker::new(store, target_dir, LocalIdentity.current_user());
            locker
                .lock(force || config.deployment.lock.force)
                .await
                .map_err(|e| e.to_string())?;
            save_lock_record(&record, locker.state())?;

            println!(
                "{} {}",
                "Acquired deployment lock on".green(),
                locker.target_dir().bold()
            );
            Ok(())
        }
        LockCommands::Release { allow_missing } => {
            let record = lock_record_path(&config);
            let Some(state) = load_lock_record(&record)? else {
                if allow_missing {
                    println!("{}", "No lock recorded, nothing to release.".yellow());
                    return Ok(());
                }
                return Err(format!(
                    "No lock recorded at {}; acquire one with `keel lock acquire`",
                    record.display()
                ));
            };

            let mut locker = Locker::resume(store, target_dir, state);
            locker
                .unlock(allow_missing)
                .await
                .map_err(|e| e.to_string())?;
            fs::remove_file(&record)
                .map_err(|e| format!("Failed to remove {}: {}", record.display(), e))?;

            println!(
                "{} {}",
                "Released deployment lock on".green(),
                locker.target_dir().bold()
            );
            Ok(())
        }
        LockCommands::Status => {
            let locker = Locker::new(store, target_dir, LocalIdentity.current_user());
            match locker.active_lock_state().await.map_err(|e| e.to_string())? {
                Some(state) => {
                    println!("{} {}", "Locked:".yellow().bold(), locker.target_dir());
                    println!("  {} {}", "Holder:".cyan(), state.user);
                    println!("  {} {}", "Since:".cyan(), state.acquisition_time.to_rfc3339());
                    println!("  {} {}", "Forced:".cyan(), state.is_forced);
                    println!("  {} {}", "ID:".cyan(), state.id);
                }
                None => println!("{} {}", "Unlocked:".green().bold(), locker.target_dir()),
            }
            Ok(())
        }
    }
}

async fn run_state_command(config_path: &Path, command: StateCommands) -> Result<(), String> {
    let config = load_config(config_path)?;

    match command {
        StateCommands::Pull => {
            let ctx = open_context(&config).await?;
            ctx.state.pull().await.map_err(|e| e.to_string())?;
            println!("{} {}", "Pulled".green(), ctx.state.remote_path());
        }
        StateCommands::Push => {
            let ctx = open_context(&config).await?;
            ctx.state.push().await.map_err(|e| e.to_string())?;
            println!("{} {}", "Pushed".green(), ctx.state.remote_path());
        }
        StateCommands::Update => {
            let ctx = open_context(&config).await?;
            ctx.state.update().await.map_err(|e| e.to_string())?;
            println!("{} {}", "Updated".green(), ctx.state.local_path().display());
        }
        StateCommands::Show => return show_state(&config),
    }
    Ok(())
}

fn show_state(config: &ProjectConfig) -> Result<(), String> {
    let paths = keel_state::StatePaths {
        target_dir: config.target.root_path.clone(),
        cache_dir: config.cache_dir(),
        sync_root: config.sync_root(),
    };
    let path = match config.engine {
        Engine::Terraform => paths.graph_state_local(),
        Engine::Direct => paths.deployment_state_local(),
    };

    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("{}", "No local state. Run `keel state pull` first.".yellow());
            return Ok(());
        }
        Err(e) => return Err(format!("Failed to read {}: {}", path.display(), e)),
    };
    let display_path = path.display().to_string();

    println!("{} {}", "State:".cyan().bold(), display_path);
    match config.engine {
        Engine::Terraform => {
            let header =
                GraphStateHeader::parse(&bytes, &display_path).map_err(|e| e.to_string())?;
            println!("  {} {}", "Serial:".cyan(), header.serial);
            println!("  {} {}", "Lineage:".cyan(), header.lineage);
        }
        Engine::Direct => {
            let state = DeploymentState::parse(&bytes, &display_path).map_err(|e| e.to_string())?;
            println!("  {} {}", "Seq:".cyan(), state.seq);
            println!("  {} {}", "Version:".cyan(), state.version);
            println!("  {} {}", "CLI version:".cyan(), state.cli_version);
            println!("  {} {}", "Timestamp:".cyan(), state.timestamp.to_rfc3339());
            println!("  {} {}", "Files:".cyan(), state.files.len());
        }
    }
    Ok(())
}

fn print_resources(resources: &Resources) {
    if resources.is_empty() {
        println!("{}", "No resources declared or deployed.".green());
        return;
    }

    for (group, name, node) in resources.iter() {
        let key = format!("{}.{}", group, name);
        match node.modified_status {
            ModifiedStatus::Created => println!("  {} {}", "+".green().bold(), key.green()),
            ModifiedStatus::Deleted => {
                println!("  {} {} {}", "-".red().bold(), key.red(), format!("({})", node.id).dimmed())
            }
            ModifiedStatus::Unchanged => {
                println!("  {} {} {}", " ".normal(), key, format!("({})", node.id).dimmed())
            }
        }
    }

    println!();
    println!("{}", ReconcileSummary::from_resources(resources).to_string().bold());
}

async fn run_plan(config_path: &Path) -> Result<(), String> {
    let config = load_config(config_path)?;
    let ctx = open_context(&config).await?;

    ctx.state.pull().await.map_err(|e| e.to_string())?;
    let resources = ctx
        .reconciled_resources(&config.resources)
        .map_err(|e| e.to_string())?;

    println!("{}", "Resources:".cyan().bold());
    print_resources(&resources);
    Ok(())
}

/// Prints the reconciled resources in place of applying them
struct PlanHooks {
    declared: Resources,
}

#[async_trait]
impl DeployHooks for PlanHooks {
    async fn apply(&self, ctx: &DeployContext) -> DeployResult<()> {
        let resources = ctx.reconciled_resources(&self.declared)?;
        println!("{}", "Resources:".cyan().bold());
        print_resources(&resources);
        Ok(())
    }
}

async fn run_deploy_command(config_path: &Path, force_lock: bool) -> Result<(), String> {
    let config = load_config(config_path)?;
    let mut ctx = open_context(&config).await?;

    if config.deployment.fail_on_active_runs {
        match WorkspaceClient::from_env()? {
            Some(client) => ctx = ctx.with_status_provider(Arc::new(client)),
            None => debug!("No workspace client configured, active-run check will fail"),
        }
    }

    let hooks = PlanHooks {
        declared: config.resources.clone(),
    };
    run_deploy(&mut ctx, &hooks, force_lock)
        .await
        .map_err(|e| e.to_string())?;

    println!("{}", "Deploy complete!".green().bold());
    Ok(())
}

//! Skyform CLI entrypoint.
//!
//! This is the main entrypoint for the skyform command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use skyform::cli::{Cli, Commands, OutputFormatter, StateCommands};
use skyform::config::{
    ConfigParser, ConfigValidator, ProviderType, StackFile, StateBackend, find_config_file,
};
use skyform::engine::Engine;
use skyform::error::{Result, SkyformError};
use skyform::graph::{DeclarationSet, DependencyGraph, RemovalPolicy};
use skyform::provider::{CommandProvider, ProviderBackend, SimulatedProvider};
use skyform::state::{
    HistoryEntry, LocalStateStore, Operation, S3StateStore, STATE_DIR, StateStore,
};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    // stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Graph => cmd_graph(cli.config.as_ref(), &formatter),
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Apply { yes, parallelism } => {
            cmd_apply(cli.config.as_ref(), yes, parallelism, &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(cli.config.as_ref(), yes, &formatter).await,
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text.trim_end())?;
    Ok(())
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Initialize a new stack.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new Skyform stack in: {}", path.display());

    let config_path = path.join("skyform.stack.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Declaration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/skyform.stack.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", state_entry.as_str()]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Skyform")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit skyform.stack.yaml with your resources");
    eprintln!("  2. Run 'skyform validate' to check your declarations");
    eprintln!("  3. Run 'skyform plan' to see what will change");
    eprintln!("  4. Run 'skyform apply' to apply it");

    Ok(())
}

/// Validate declarations and the dependency graph.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config_file, stack) = load_stack(config_path)?;
    info!("Validating declarations: {}", config_file.display());

    let result = ConfigValidator::new().validate(&stack)?;
    let declarations = stack.to_declarations()?;
    let graph = DependencyGraph::from_declarations(&declarations)?;
    graph.topological_order()?;

    emit(&formatter.format_validation(&stack, &result, show_warnings))
}

/// Print resources in dependency order.
fn cmd_graph(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (_, stack) = load_stack(config_path)?;
    ConfigValidator::new().validate(&stack)?;
    let declarations = stack.to_declarations()?;

    let graph = DependencyGraph::from_declarations(&declarations)?;
    let order = graph.topological_order()?;
    emit(&formatter.format_graph(&graph, &order))
}

/// Show the plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let ws = Workspace::open(config_path).await?;
    let plan = ws.engine().plan().await?;
    emit(&formatter.format_plan(&plan, detailed))
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    parallelism: Option<u16>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let ws = Workspace::open(config_path).await?;
    let parallelism = parallelism.map_or(ws.stack.execution.parallelism, usize::from);
    let engine = ws.engine().with_parallelism(parallelism);

    let plan = engine.plan().await?;
    if plan.has_changes() {
        emit(&formatter.format_plan(&plan, false))?;
        if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    // a plan of no-ops still refreshes record metadata; the run is refused
    // if the plan rebuilt under the lock differs from the one shown
    let outcome = engine.apply_approved(&plan).await?;
    if outcome.plan.has_changes() {
        emit(&formatter.format_outcome(&outcome))?;
    } else {
        emit(&formatter.success("No changes to apply."))?;
    }
    outcome.into_result().map(|_| ())
}

/// Destroy every recorded resource.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let ws = Workspace::open(config_path).await?;
    let engine = ws.engine().with_parallelism(ws.stack.execution.parallelism);

    let state = engine.load_state().await?;
    if state.is_empty() {
        emit(&formatter.success("Nothing to destroy."))?;
        return Ok(());
    }

    eprintln!("The following resources will be removed:");
    for record in state.records_by_position().into_iter().rev() {
        let note = if record.removal_policy == RemovalPolicy::Retain {
            " (retained, state only)"
        } else {
            ""
        };
        eprintln!("  - {} ({}){note}", record.node_id, record.kind);
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let outcome = engine.destroy().await?;
    emit(&formatter.format_outcome(&outcome))?;
    outcome.into_result().map(|_| ())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let ws = Workspace::open(config_path).await?;
    let store = &ws.store;

    match command {
        StateCommands::Show => {
            if let Some(state) = store.load().await? {
                emit(&formatter.format_state(&state))?;
            } else {
                emit(&formatter.warning("No state found."))?;
            }
            let lock = store.get_lock_info().await?;
            if lock.is_some() {
                emit(&formatter.format_lock(lock.as_ref()))?;
            }
        }
        StateCommands::Lock { holder } => {
            let lock = store.acquire_lock(holder.as_deref().unwrap_or("")).await?;
            emit(&formatter.success(&format!("State locked: {}", lock.lock_id)))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                emit(&formatter.warning("State forcefully unlocked."))?;
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                emit(&formatter.success("State unlocked."))?;
            } else {
                emit(&formatter.error("Please provide --lock-id or use --force"))?;
            }
        }
        StateCommands::Rm { id } => {
            let lock = store.acquire_lock("").await?;
            let result = forget_record(&**store, &ws.stack, &id).await;
            if let Err(e) = store.release_lock(&lock.lock_id).await {
                warn!("Failed to release lock {}: {e}", lock.lock_id);
            }
            result?;
            emit(&formatter.success(&format!("Forgot '{id}'; the resource itself was left in place.")))?;
        }
    }

    Ok(())
}

/// Drops a record from state without calling the provider.
async fn forget_record(store: &dyn StateStore, stack: &StackFile, id: &str) -> Result<()> {
    let mut state = store
        .load()
        .await?
        .ok_or_else(|| SkyformError::internal("No state found"))?;

    if state.remove_record(id).is_none() {
        return Err(SkyformError::internal(format!("'{id}' is not in state")));
    }

    for record in state.records.values() {
        if record
            .last_applied_inputs
            .values()
            .flat_map(|v| v.references())
            .any(|r| r.node_id == id)
        {
            warn!("'{}' still references forgotten '{id}'", record.node_id);
        }
    }

    let hash = state.declaration_hash.clone();
    state.add_history(HistoryEntry::new(Operation::Forget, &hash, vec![id.to_string()]));
    store.save(&state).await?;
    info!("Forgot '{id}' from stack '{}'", stack.stack.name);
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Everything a stateful command needs.
struct Workspace {
    stack: StackFile,
    declarations: DeclarationSet,
    store: Box<dyn StateStore>,
    provider: Box<dyn ProviderBackend>,
}

impl Workspace {
    async fn open(config_path: Option<&PathBuf>) -> Result<Self> {
        let (config_file, stack) = load_stack(config_path)?;
        let result = ConfigValidator::new().validate(&stack)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }
        let declarations = stack.to_declarations()?;
        let base_dir = config_dir(&config_file);

        let store = create_state_store(&stack, &base_dir).await?;
        let provider = create_provider(&stack, &base_dir)?;
        debug!(
            "Using {} state at {} with {} provider",
            store.backend_type(),
            store.location(),
            provider.name()
        );

        Ok(Self {
            stack,
            declarations,
            store,
            provider,
        })
    }

    fn engine(&self) -> Engine<'_, dyn StateStore, dyn ProviderBackend> {
        Engine::new(&self.declarations, self.store.as_ref(), self.provider.as_ref())
            .with_environment(self.stack.stack.environment.as_str())
    }
}

/// Resolves the declaration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn config_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Loads the declaration file, `.env` and environment overrides.
fn load_stack(config_path: Option<&PathBuf>) -> Result<(PathBuf, StackFile)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading declarations from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;
    let stack = parser.load_with_env(&config_file)?;
    Ok((config_file, stack))
}

/// Creates the state store named by the declaration file.
async fn create_state_store(stack: &StackFile, base_dir: &Path) -> Result<Box<dyn StateStore>> {
    let store: Box<dyn StateStore> = match stack.state.backend {
        StateBackend::Local => {
            let path = stack
                .state
                .path
                .as_ref()
                .map_or_else(|| base_dir.join(STATE_DIR), |p| base_dir.join(p));
            Box::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = stack
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| SkyformError::internal("S3 bucket not configured"))?;
            let prefix = stack.state.prefix.as_deref();
            let region = stack.state.region.as_deref();
            Box::new(S3StateStore::new(bucket, prefix, region).await)
        }
    };
    Ok(store)
}

/// Creates the provider backend named by the declaration file.
fn create_provider(stack: &StackFile, base_dir: &Path) -> Result<Box<dyn ProviderBackend>> {
    let provider: Box<dyn ProviderBackend> = match stack.provider.provider_type {
        ProviderType::Simulated => Box::new(SimulatedProvider::new()),
        ProviderType::Command => {
            let program = stack
                .provider
                .program
                .as_deref()
                .ok_or_else(|| SkyformError::internal("Provider program not configured"))?;
            // relative paths are relative to the declaration file
            let program = if program.contains('/') && Path::new(program).is_relative() {
                base_dir.join(program).display().to_string()
            } else {
                program.to_string()
            };
            Box::new(CommandProvider::new(program).with_args(stack.provider.args.iter().cloned()))
        }
    };
    Ok(provider)
}

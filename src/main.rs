//! infragraph CLI entrypoint.
//!
//! This is the main entrypoint for the infragraph command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use infragraph::cli::{Cli, Commands, OutputFormatter, StateCommands};
use infragraph::config::{
    ConfigParser, ConfigValidator, Manifest, ProviderKind, StateBackend, build_declarations,
    find_config_file,
};
use infragraph::error::{InfragraphError, Result, StateError};
use infragraph::executor::ExecutorConfig;
use infragraph::graph::GraphBuilder;
use infragraph::model::ResourceKey;
use infragraph::planner::ChangePlan;
use infragraph::provider::{DEFAULT_LOCAL_PROVIDER_DIR, HttpProvider, LocalProvider, ProviderApi};
use infragraph::reconciler::{Reconciler, ensure_complete};
use infragraph::state::{DEFAULT_STATE_DIR, LocalStateStore, S3StateStore, StateStore};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

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
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over `--verbose` when set.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config, detailed, &formatter).await,
        Commands::Apply {
            yes,
            concurrency,
            dry_run,
        } => cmd_apply(config, yes, concurrency, dry_run, &formatter).await,
        Commands::Destroy {
            yes,
            concurrency,
            dry_run,
        } => cmd_destroy(config, yes, concurrency, dry_run, &formatter).await,
        Commands::Graph => cmd_graph(config, &formatter),
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new infragraph project in: {}", path.display());

    let config_path = path.join("infragraph.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Manifest already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/infragraph.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", ".infragraph/"]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# infragraph")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n.infragraph/\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit infragraph.yaml to declare your resources");
    eprintln!("  2. Run 'infragraph validate' to check the manifest");
    eprintln!("  3. Run 'infragraph plan' to see what will change");
    eprintln!("  4. Run 'infragraph apply' to converge");

    Ok(())
}

/// Validate the manifest and its graph.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, _) = read_manifest(config_path)?;

    let result = ConfigValidator::new().check(&manifest);
    eprintln!("{}", formatter.format_validation(&result, show_warnings));
    ConfigValidator::new().validate(&manifest)?;

    let declarations = build_declarations(&manifest)?;
    let graph = GraphBuilder::build(&declarations)?;

    eprintln!("\nManifest summary:");
    eprintln!("  Project: {}", manifest.project.name);
    eprintln!("  Environment: {}", manifest.project.environment);
    eprintln!("  Resources: {}", graph.len());
    eprintln!("  References: {}", graph.references().len());
    eprintln!("  Types: {}", manifest.types.len());

    Ok(())
}

/// Show the change plan.
async fn cmd_plan(
    config_path: Option<&Path>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let reconciler = build_reconciler(config_path, None).await?;
    let plan = reconciler.plan().await?;
    eprintln!("{}", formatter.format_plan(&plan, detailed));
    Ok(())
}

/// Apply the change plan.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    concurrency: Option<usize>,
    dry_run: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let reconciler = build_reconciler(config_path, concurrency).await?;
    if dry_run {
        let plan = reconciler.plan().await?;
        eprintln!("{}", formatter.format_plan(&plan, true));
        return Ok(());
    }

    // Held from planning to the end of the apply.
    let lock = reconciler.lock().await?;
    let outcome = plan_and_apply(&reconciler, auto_approve, formatter).await;
    reconciler.unlock(&lock).await;
    outcome
}

async fn plan_and_apply(
    reconciler: &Reconciler,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let plan = reconciler.plan().await?;
    eprintln!("{}", formatter.format_plan(&plan, false));

    if !plan.has_changes() {
        return Ok(());
    }

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    execute(reconciler, &plan, formatter).await
}

/// Destroy every recorded resource.
async fn cmd_destroy(
    config_path: Option<&Path>,
    auto_approve: bool,
    concurrency: Option<usize>,
    dry_run: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let reconciler = build_reconciler(config_path, concurrency).await?;
    if dry_run {
        let plan = reconciler.plan_destroy().await?;
        eprintln!("{}", formatter.format_plan(&plan, false));
        return Ok(());
    }

    let lock = reconciler.lock().await?;
    let outcome = plan_and_destroy(&reconciler, auto_approve, formatter).await;
    reconciler.unlock(&lock).await;
    outcome
}

async fn plan_and_destroy(
    reconciler: &Reconciler,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let plan = reconciler.plan_destroy().await?;

    if !plan.has_changes() {
        eprintln!("No recorded resources to destroy.");
        return Ok(());
    }

    eprintln!("{}", formatter.format_plan(&plan, false));
    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    execute(reconciler, &plan, formatter).await
}

/// Show the graph in dependency order.
fn cmd_graph(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (manifest, _) = load_manifest(config_path)?;
    let declarations = build_declarations(&manifest)?;
    let graph = GraphBuilder::build(&declarations)?;
    eprintln!("{}", formatter.format_graph(&graph));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, base_dir) = load_manifest(config_path)?;
    let store = create_state_store(&manifest, &base_dir).await?;

    match command {
        StateCommands::List => {
            let records = store.load().await?;
            eprintln!("{}", formatter.format_records(&records));
        }
        StateCommands::Show { key } => {
            let key = parse_key(&key)?;
            let record = store
                .get(&key)
                .await?
                .ok_or(InfragraphError::State(StateError::RecordNotFound { key }))?;
            eprintln!("{}", formatter.format_record(&record));
        }
        StateCommands::Rm { key } => {
            let key = parse_key(&key)?;
            if store.get(&key).await?.is_none() {
                return Err(InfragraphError::State(StateError::RecordNotFound { key }));
            }
            let lock = store.acquire_lock("").await?;
            let removed = store.delete(&key).await;
            store.release_lock(&lock.lock_id).await?;
            removed?;
            formatter.success(&format!(
                "Removed {key} from state; the resource itself was not touched."
            ));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = store.get_lock_info().await? {
                    store.release_lock(&lock_info.lock_id).await?;
                    formatter.warning("State forcefully unlocked.");
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                formatter.success("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Applies `plan` under a lock the caller holds, and fails unless it fully
/// converged. Ctrl-C cancels.
async fn execute(
    reconciler: &Reconciler,
    plan: &ChangePlan,
    formatter: &OutputFormatter,
) -> Result<()> {
    let result = reconciler.apply_locked(plan).await;
    eprintln!("{}", formatter.format_apply(&result));
    ensure_complete(&result)
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

fn parse_key(raw: &str) -> Result<ResourceKey> {
    raw.parse().map_err(InfragraphError::Internal)
}

/// Resolves the manifest file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Reads the manifest without validating it.
fn read_manifest(config_path: Option<&Path>) -> Result<(Manifest, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading manifest from: {}", config_file.display());

    let base_dir = config_file
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let parser = ConfigParser::new().with_base_path(&base_dir);
    parser.load_dotenv()?;

    let manifest = parser.load_with_env(&config_file)?;
    Ok((manifest, base_dir))
}

/// Reads and validates the manifest.
fn load_manifest(config_path: Option<&Path>) -> Result<(Manifest, PathBuf)> {
    let (manifest, base_dir) = read_manifest(config_path)?;
    let result = ConfigValidator::new().validate(&manifest)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }
    Ok((manifest, base_dir))
}

/// Builds a reconciler whose applies stop on Ctrl-C.
async fn build_reconciler(
    config_path: Option<&Path>,
    concurrency: Option<usize>,
) -> Result<Reconciler> {
    let (manifest, base_dir) = load_manifest(config_path)?;
    let store = create_state_store(&manifest, &base_dir).await?;
    let provider = create_provider(&manifest, &base_dir)?;

    let mut config = ExecutorConfig::from_settings(&manifest.settings);
    if let Some(concurrency) = concurrency {
        config = config.with_concurrency(concurrency.max(1));
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted: letting in-flight actions finish, starting nothing new");
            on_interrupt.cancel();
        }
    });

    Ok(Reconciler::from_manifest(&manifest, &provider, store)?
        .with_config(config)
        .with_cancellation(cancel))
}

/// Creates the state store the manifest asks for.
async fn create_state_store(
    manifest: &Manifest,
    base_dir: &Path,
) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match manifest.state.backend {
        StateBackend::Local => {
            let path = manifest
                .state
                .path
                .as_ref()
                .map_or_else(|| base_dir.join(DEFAULT_STATE_DIR), |p| base_dir.join(p));
            Arc::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = manifest
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| InfragraphError::internal("S3 bucket not configured"))?;
            Arc::new(
                S3StateStore::new(
                    bucket,
                    manifest.state.prefix.as_deref(),
                    manifest.state.region.as_deref(),
                )
                .await?,
            )
        }
    };
    debug!("Using {} state backend", store.backend_type());
    Ok(store)
}

/// Creates the provider client the manifest asks for.
fn create_provider(manifest: &Manifest, base_dir: &Path) -> Result<Arc<dyn ProviderApi>> {
    match manifest.provider.kind {
        ProviderKind::Local => {
            let path = manifest
                .provider
                .path
                .as_ref()
                .map_or_else(
                    || base_dir.join(DEFAULT_LOCAL_PROVIDER_DIR),
                    |p| base_dir.join(p),
                );
            Ok(Arc::new(LocalProvider::new(path)))
        }
        ProviderKind::Http => {
            let endpoint = manifest
                .provider
                .endpoint
                .as_deref()
                .ok_or_else(|| InfragraphError::internal("provider.endpoint not configured"))?;
            let token = ConfigParser::get_provider_token()
                .inspect_err(|e| warn!("Calling provider without credentials: {e}"))
                .ok();
            let provider = match manifest.provider.timeout_secs {
                Some(secs) => HttpProvider::with_timeout(endpoint, token, secs)?,
                None => HttpProvider::new(endpoint, token)?,
            };
            Ok(Arc::new(provider))
        }
    }
}

//! ecsdeploy CLI entrypoint.
//!
//! This is the main entrypoint for the ecsdeploy command-line tool. The
//! binary drives the reconcilers against the file-backed sandbox cloud.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use ecsdeploy::cli::{Cli, Commands, ConsoleSink, OutputFormatter, PlanTarget};
use ecsdeploy::cloud::{Cloud, MemoryCloud, SandboxSettings, SandboxStore};
use ecsdeploy::config::{ConfigParser, ConfigValidator, DeployConfig, find_config_file};
use ecsdeploy::error::Result;
use ecsdeploy::planner::ReconciliationPlan;
use ecsdeploy::reconciler::{
    ClusterReconciler, ClusterTeardown, Context, DeploymentReconciler, DeploymentTeardown,
};
use ecsdeploy::retry::WaitPolicies;

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
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_retryable() {
                eprintln!("The provider reported a transient condition; running the command again is safe.");
            }
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loaded configuration plus the sandbox it runs against.
struct Session {
    config: DeployConfig,
    store: SandboxStore,
    sandbox: Arc<MemoryCloud>,
    cloud: Cloud,
    sink: ConsoleSink,
}

impl Session {
    async fn open(cli: &Cli) -> Result<Self> {
        let config_file = resolve_config_path(cli.config.as_ref())?;
        let config = load_config(&config_file)?;

        let store = cli.sandbox.as_ref().map_or_else(
            || SandboxStore::in_dir(config_dir(&config_file)),
            SandboxStore::at,
        );
        debug!("Using sandbox state at {}", store.path().display());

        let sandbox = Arc::new(store.load(SandboxSettings::default()).await?);
        let cloud = Cloud::from_sandbox(&sandbox);

        Ok(Self {
            config,
            store,
            sandbox,
            cloud,
            sink: ConsoleSink::new(cli.output),
        })
    }

    fn context(&self) -> Context<'_> {
        Context::new(&self.cloud, &self.sink).with_waits(WaitPolicies::immediate())
    }

    async fn save(&self) -> Result<()> {
        self.store.save(&self.sandbox).await
    }
}

/// Main async entry point. Returns `false` when the command ran but did
/// not fully succeed.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);

    if let Commands::Validate { warnings } = cli.command {
        return cmd_validate(cli.config.as_ref(), warnings, &formatter);
    }

    let session = Session::open(&cli).await?;
    let outcome = match &cli.command {
        Commands::Validate { .. } => Ok(true),
        Commands::Plan { target } => cmd_plan(&session, *target, &formatter).await,
        Commands::ClusterCreate => cmd_cluster_create(&session, cli.yes, &formatter).await,
        Commands::ClusterDelete { continue_on_error } => {
            cmd_cluster_delete(&session, cli.yes, *continue_on_error, &formatter).await
        }
        Commands::Deploy => cmd_deploy(&session, cli.yes, &formatter).await,
        Commands::Delete {
            continue_on_error,
            keep_repository,
        } => {
            cmd_delete(
                &session,
                cli.yes,
                *continue_on_error,
                *keep_repository,
                &formatter,
            )
            .await
        }
    };

    // Partial progress is real state, keep it even when the run failed
    if !matches!(cli.command, Commands::Plan { .. }) {
        session.save().await?;
    }
    outcome
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&config);
    eprintln!("{}", formatter.format_validation(&result, show_warnings));

    if result.is_valid() {
        eprintln!("\nConfiguration summary:");
        eprintln!("  Cluster: {}", config.cluster.name);
        eprintln!("  Instances: {}", config.cluster.initial_capacity);
        if let Some(app) = &config.app {
            eprintln!("  App: {} ({} units)", app.name, app.units);
        }
    }

    Ok(result.is_valid())
}

/// Show a plan without applying it.
async fn cmd_plan(session: &Session, target: PlanTarget, formatter: &OutputFormatter) -> Result<bool> {
    let ctx = session.context();
    let plan = match target {
        PlanTarget::Cluster => {
            let spec = session.config.cluster_spec();
            ClusterReconciler::new(&ctx, &spec).plan().await?
        }
        PlanTarget::App => {
            let app = session.config.app_spec()?;
            DeploymentReconciler::new(&ctx, &app).plan().await?
        }
    };

    eprintln!("{}", formatter.format_plan(&plan));
    Ok(true)
}

/// Create or update the cluster.
async fn cmd_cluster_create(session: &Session, yes: bool, formatter: &OutputFormatter) -> Result<bool> {
    let ctx = session.context();
    let spec = session.config.cluster_spec();
    let reconciler = ClusterReconciler::new(&ctx, &spec);

    let plan = reconciler.plan().await?;
    if !confirm(&plan, yes, formatter, "Apply this plan?")? {
        return Ok(true);
    }

    let report = reconciler.apply(plan).await?;
    eprintln!("{}", formatter.format_reconcile(&report));
    Ok(true)
}

/// Delete the cluster.
async fn cmd_cluster_delete(
    session: &Session,
    yes: bool,
    continue_on_error: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let ctx = session.context();
    let spec = session.config.cluster_spec();
    let teardown = ClusterTeardown::new(&ctx, &spec).continue_on_error(continue_on_error);

    let plan = teardown.plan().await?;
    if !confirm(&plan, yes, formatter, "Delete these resources? This cannot be undone.")? {
        return Ok(true);
    }

    let report = teardown.apply(plan).await?;
    eprintln!("{}", formatter.format_teardown(&report));
    Ok(report.success())
}

/// Deploy the application.
async fn cmd_deploy(session: &Session, yes: bool, formatter: &OutputFormatter) -> Result<bool> {
    let ctx = session.context();
    let app = session.config.app_spec()?;
    let reconciler = DeploymentReconciler::new(&ctx, &app);

    let plan = reconciler.plan().await?;
    if !confirm(&plan, yes, formatter, "Apply this plan?")? {
        return Ok(true);
    }

    let report = reconciler.apply(plan).await?;
    eprintln!("{}", formatter.format_reconcile(&report));
    Ok(true)
}

/// Delete the application's resources.
async fn cmd_delete(
    session: &Session,
    yes: bool,
    continue_on_error: bool,
    keep_repository: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let ctx = session.context();
    let app = session.config.app_spec()?;
    let teardown = DeploymentTeardown::new(&ctx, &app)
        .continue_on_error(continue_on_error)
        .keep_repository(keep_repository);

    let plan = teardown.plan().await?;
    if !confirm(&plan, yes, formatter, "Delete these resources? This cannot be undone.")? {
        return Ok(true);
    }

    let report = teardown.apply(plan).await?;
    eprintln!("{}", formatter.format_teardown(&report));
    Ok(report.success())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Prints the plan and asks for confirmation unless `yes` is set or there
/// is nothing to do.
fn confirm(
    plan: &ReconciliationPlan,
    yes: bool,
    formatter: &OutputFormatter,
    question: &str,
) -> Result<bool> {
    eprintln!("{}", formatter.format_plan(plan));

    if yes || !plan.has_changes() {
        return Ok(true);
    }

    eprint!("{question} [y/N]: ");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    if input.trim().eq_ignore_ascii_case("y") {
        Ok(true)
    } else {
        warn!("Cancelled by user");
        eprintln!("Cancelled.");
        Ok(false)
    }
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Directory holding the configuration file.
fn config_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Loads, overrides and validates the configuration.
fn load_config(config_file: &Path) -> Result<DeployConfig> {
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok(config)
}

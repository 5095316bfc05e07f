mod commands;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_REGISTRY_ERROR, EXIT_STORE_ERROR};
use devstack_core::{install_signal_handler, Engine};
use devstack_schema::{load_registry, Registry};
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_REGISTRY: &str = "devstack.toml";

#[derive(Debug, Parser)]
#[command(
    name = "devstack",
    version,
    about = "Failsafe multi-repository development stack bootstrapper"
)]
struct Cli {
    /// Workspace directory holding checkouts, state, and the generated manifest.
    #[arg(long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Service registry file (default: <workspace>/devstack.toml).
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Tool backend: `docker` (git + docker CLIs) or `mock` (scripted, no tools).
    #[arg(long, default_value = "docker", global = true, hide = true)]
    backend: String,

    /// Worker threads for acquisition and probing (overrides the registry).
    #[arg(long, global = true, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    workers: Option<usize>,

    /// Clone/update timeout in seconds (overrides the registry).
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    clone_timeout: Option<u64>,

    /// Image build timeout in seconds (overrides the registry).
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    build_timeout: Option<u64>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse and validate the service registry.
    Validate,
    /// Acquire, probe, and regenerate docker-compose.yml without starting anything.
    Reconcile,
    /// Reconcile, then start the stack with `docker compose up`.
    Up,
    /// Regenerate docker-compose.yml from persisted state only.
    Generate {
        /// Print the manifest to stdout instead of a summary.
        #[arg(long, default_value_t = false)]
        print: bool,
    },
    /// Show repository verdicts, renderings, and container status.
    Status,
    /// Stop the stack with `docker compose down`.
    Down,
    /// Remove persisted state of services no longer in the registry.
    Prune,
    /// Run diagnostic checks on tools, registry, and workspace.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

impl Cli {
    fn registry_path(&self) -> PathBuf {
        self.registry
            .clone()
            .unwrap_or_else(|| self.workspace.join(DEFAULT_REGISTRY))
    }

    /// Load the registry and layer command-line overrides on its settings.
    fn load_registry(&self) -> Result<Registry, String> {
        let path = self.registry_path();
        let registry = load_registry(&path)
            .map_err(|e| format!("registry error: {}: {e}", path.display()))?;
        let mut settings = registry.settings();
        if let Some(w) = self.workers {
            settings.workers = w;
        }
        if let Some(t) = self.clone_timeout {
            settings.clone_timeout_secs = t;
        }
        if let Some(t) = self.build_timeout {
            settings.build_timeout_secs = t;
        }
        Ok(registry.with_settings(settings))
    }

    fn engine(&self) -> Result<Engine, String> {
        let registry = self.load_registry()?;
        let backends = devstack_runtime::select_backends(&self.backend).map_err(|e| e.to_string())?;
        tracing::debug!(
            "workspace {} with {} backend, {} workers",
            self.workspace.display(),
            self.backend,
            registry.settings().workers
        );
        Ok(Engine::new(registry, &self.workspace, backends))
    }
}

fn check_prereqs(cli: &Cli) -> Result<(), String> {
    let needs_tools = matches!(
        cli.command,
        Commands::Reconcile | Commands::Up | Commands::Down
    );
    if !needs_tools
        || cli.backend == "mock"
        || std::env::var("DEVSTACK_SKIP_PREREQS").as_deref() == Ok("1")
    {
        return Ok(());
    }
    let missing = devstack_runtime::check_prereqs();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(devstack_runtime::format_missing(&missing))
    }
}

fn run(cli: &Cli) -> Result<u8, String> {
    check_prereqs(cli)?;
    let json = cli.json;
    match &cli.command {
        Commands::Validate => commands::validate::run(&cli.load_registry()?, &cli.registry_path(), json),
        Commands::Reconcile => commands::reconcile::run(&cli.engine()?, json),
        Commands::Up => commands::up::run(&cli.engine()?, json),
        Commands::Generate { print } => commands::generate::run(&cli.engine()?, *print, json),
        Commands::Status => commands::status::run(&cli.engine()?, json),
        Commands::Down => commands::down::run(&cli.engine()?, json),
        Commands::Prune => commands::prune::run(&cli.engine()?, json),
        Commands::Doctor => commands::doctor::run(&cli.workspace, &cli.registry_path(), json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(*shell),
    }
}

fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("registry error:") || msg.starts_with("invalid service graph:") {
        EXIT_REGISTRY_ERROR
    } else if msg.starts_with("store error:") || msg.contains("is locked by another devstack process") {
        EXIT_STORE_ERROR
    } else {
        EXIT_FAILURE
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DEVSTACK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::Context;
use onboard_core::{
    install_signal_handler, CancelToken, ResolveOptions, RollbackOptions, RollbackPhase,
    VerifyFilter,
};
use onboard_schema::Priority;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "onboard",
    version,
    about = "Phased contributor onboarding: install, configure, verify, roll back"
)]
struct Cli {
    /// Project directory to onboard into.
    #[arg(long, default_value = ".", global = true)]
    project: String,

    /// Manifest cache directory [default: ~/.cache/onboard/manifests].
    #[arg(long, global = true)]
    cache_dir: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output and per-check detail.
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
    /// Resolve a repository's setup manifest and run every onboarding phase.
    Init {
        /// An https URL (https://host/owner/repo) or an SSH remote (git@host:owner/repo.git).
        #[arg(required_unless_present = "manifest")]
        repo: Option<String>,
        /// Use a local manifest file instead of fetching one.
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Fetch the manifest even when a fresh cache entry exists.
        #[arg(long, default_value_t = false)]
        no_cache: bool,
        /// Report what would happen without installing or writing anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Stop after configuration; skip the verification phase.
        #[arg(long, default_value_t = false)]
        skip_verify: bool,
    },
    /// Re-run the recorded verification checks.
    Verify {
        /// Only run checks at or above this priority (low|medium|high|critical).
        #[arg(long)]
        priority: Option<Priority>,
        /// Only run checks carrying at least one of these tags.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Reverse what init recorded, newest phase first.
    Rollback {
        /// Phases to reverse (docs,config,deps). Defaults to docs and config.
        #[arg(long, value_delimiter = ',')]
        partial: Vec<RollbackPhase>,
        /// Allow uninstalling dependencies.
        #[arg(long = "unsafe", default_value_t = false)]
        allow_unsafe: bool,
        /// Reverse files and packages even if they changed since init.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// List what would be reversed without touching anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Show the recorded installation state.
    Status,
    /// Inspect or clear the manifest cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Check the host and the project's onboarding state.
    Doctor,
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Generate man pages into a directory.
    ManPages {
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    /// Number and size of cached manifests.
    Stats,
    /// Remove the cached manifest for one repository URL, or all of them.
    Clear { repo: Option<String> },
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
            tracing_subscriber::EnvFilter::try_from_env("ONBOARD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);

    let ctx = Context {
        project: project_dir(&cli.project),
        cache_dir: cli.cache_dir.as_deref().map(expand_tilde),
        json: cli.json,
        verbose: cli.verbose,
        cancel,
    };

    let result = match cli.command {
        Commands::Init {
            repo,
            manifest,
            no_cache,
            dry_run,
            skip_verify,
        } => commands::init::run(
            &ctx,
            repo.as_deref(),
            manifest.as_deref(),
            ResolveOptions {
                use_cache: !no_cache,
            },
            dry_run,
            skip_verify,
        ),
        Commands::Verify { priority, tags } => commands::verify::run(
            &ctx,
            &VerifyFilter {
                min_priority: priority,
                tags,
            },
        ),
        Commands::Rollback {
            partial,
            allow_unsafe,
            force,
            dry_run,
        } => commands::rollback::run(
            &ctx,
            &RollbackOptions {
                phases: partial,
                allow_unsafe,
                force,
                dry_run,
            },
        ),
        Commands::Status => commands::status::run(&ctx),
        Commands::Cache { action } => match action {
            CacheAction::Stats => commands::cache::stats(&ctx),
            CacheAction::Clear { repo } => commands::cache::clear(&ctx, repo.as_deref()),
        },
        Commands::Doctor => commands::doctor::run(&ctx),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(commands::EXIT_FAILURE)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Artifact paths are recorded from this, so it must not depend on the
/// working directory of later invocations.
fn project_dir(raw: &str) -> PathBuf {
    let path = expand_tilde(raw);
    std::path::absolute(&path).unwrap_or(path)
}

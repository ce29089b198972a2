//! devbox - SSH-ready Docker dev containers

use clap::{Parser, Subcommand};
use devbox_cli::commands::{self, parse_time_arg, LogsArgs, TimeArg};
use devbox_cli::prompt;
use devbox_config::{DevboxConfig, EditorKind, ProjectPaths};
use devbox_core::{CleanupOptions, CoreError, DevboxManager};
use devbox_provider::{create_engine, ComposeCli, ProcessRunner, SystemRunner};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "devbox")]
#[command(author, version, about = "SSH-ready Docker dev containers", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project directory (defaults to the nearest parent with a .devbox directory)
    #[arg(short = 'C', long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the container, wait until it is ready, then follow its output
    Start {
        /// Build the image first
        #[arg(long)]
        build: bool,
        /// Return once the container is ready instead of following its output
        #[arg(short, long)]
        detach: bool,
    },

    /// Stop the container
    Stop {
        /// Kill without asking
        #[arg(short, long)]
        force: bool,
    },

    /// Open a shell in the container over SSH
    Connect {
        /// Use mosh instead of ssh
        #[arg(long)]
        mosh: bool,
        /// Attach to a tmux session
        #[arg(long)]
        tmux: bool,
    },

    /// Destroy and rebuild the container
    Rebuild {
        /// Build without cached layers
        #[arg(long)]
        no_cache: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Show container, key and host-key state
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show container logs
    Logs {
        /// Keep streaming new output
        #[arg(short, long)]
        follow: bool,
        /// Number of lines from the end
        #[arg(short = 'n', long)]
        tail: Option<u64>,
        /// Show timestamps
        #[arg(short, long)]
        timestamps: bool,
        /// Only logs after this time (unix seconds, RFC 3339, or 30s/10m/2h/1d ago)
        #[arg(long, value_parser = parse_time_arg)]
        since: Option<TimeArg>,
        /// Only logs before this time
        #[arg(long, value_parser = parse_time_arg)]
        until: Option<TimeArg>,
    },

    /// Remove the container and devbox state
    Cleanup {
        /// Also remove volumes, keys, the env file and editor exports
        #[arg(long)]
        all: bool,
        /// Show what would be removed
        #[arg(long)]
        dry_run: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Configure the project interactively
    Setup,

    /// Sync editor settings into the container
    Sync {
        /// Editor to sync (vscode or cursor); defaults to the configured one
        #[arg(long, value_name = "NAME", value_parser = EditorKind::from_str)]
        editor: Option<EditorKind>,
        /// Import settings exported earlier into the host editor instead
        #[arg(long)]
        import: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", commands::report_error(&e, verbose));
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let start_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let paths = ProjectPaths::discover(&start_dir);
    let config = DevboxConfig::load(&paths).map_err(CoreError::from)?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());

    // Setup writes the configuration, so it runs without an engine
    if let Commands::Setup = cli.command {
        let prompter = prompt::for_terminal();
        commands::setup(config, &paths, prompter.as_ref(), runner).await?;
        return Ok(0);
    }

    let engine = create_engine(&config.engine).await.map_err(CoreError::from)?;
    let compose = ComposeCli::new(&config, &paths, runner.clone());

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            eprintln!("{}", line);
        }
    });

    let manager = DevboxManager::new(
        config,
        paths,
        engine,
        Box::new(compose),
        runner,
        prompt::for_terminal(),
    )?
    .with_progress(tx);

    let result = dispatch(&manager, cli.command, cli.verbose).await;

    // Closing the channel lets the printer drain before any error is shown
    drop(manager);
    let _ = printer.await;
    result
}

async fn dispatch(manager: &DevboxManager, command: Commands, verbose: bool) -> anyhow::Result<i32> {
    match command {
        Commands::Start { build, detach } => {
            commands::start(manager, build, detach).await?;
        }
        Commands::Stop { force } => {
            commands::stop(manager, force).await?;
        }
        Commands::Connect { mosh, tmux } => return commands::connect(manager, mosh, tmux).await,
        Commands::Rebuild { no_cache, force } => {
            commands::rebuild(manager, no_cache, force).await?;
        }
        Commands::Status { json } => {
            commands::status(manager, json, verbose).await?;
        }
        Commands::Logs {
            follow,
            tail,
            timestamps,
            since,
            until,
        } => {
            let args = LogsArgs {
                follow,
                tail,
                timestamps,
                since,
                until,
            };
            commands::logs(manager, &args).await?;
        }
        Commands::Cleanup { all, dry_run, force } => {
            commands::cleanup(manager, CleanupOptions { all, dry_run, force }).await?;
        }
        Commands::Sync { editor, import } => {
            commands::sync(manager, editor, import).await?;
        }
        Commands::Setup => {}
    }
    Ok(0)
}

mod history_cmd;
mod sync_cmd;

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hishtory::config::ConfigStore;
use hishtory::crypto;
use hishtory::history::LocalCache;
use hishtory::logging::LogSink;
use hishtory::remote::SyncClient;

#[derive(Parser)]
#[command(
    name = "hishtory",
    version,
    about = "Your shell history: synced, queryable, and in context"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one command (called by the shell hook)
    #[command(name = "saveHistoryEntry")]
    SaveHistoryEntry {
        /// `bash` or `zsh`
        shell: String,
        exit_code: String,
        /// Raw command line as the shell reports it
        #[arg(allow_hyphen_values = true)]
        raw_line: String,
        /// Unix seconds at which the command started
        start_time: String,
    },
    /// Search history (terms may be `hostname:`, `user:`, `cwd:`, `exit_code:` atoms)
    Query {
        terms: Vec<String>,
        /// Maximum number of rows to show
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Print every recorded command, oldest first
    Export,
    /// Set this device up, optionally joining an existing secret
    Init { secret: Option<String> },
    /// Install the binary and shell hooks, then set up if needed
    Install { secret: Option<String> },
    /// Resume recording commands
    Enable,
    /// Stop recording commands
    Disable,
    /// Show this device's sync identity
    Status,
    /// Update to the latest verified release
    Update,
    /// Pull entries synced from other devices
    Sync,
}

/// Per-invocation handles shared by the command functions.
struct App {
    log: Arc<LogSink>,
    config: ConfigStore,
}

impl App {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            log: Arc::new(LogSink::from_env()),
            config: ConfigStore::from_env()?,
        })
    }

    fn cache(&self) -> anyhow::Result<LocalCache> {
        LocalCache::open_default(self.log.clone()).context("failed to open local history")
    }

    fn client(&self) -> anyhow::Result<SyncClient> {
        Ok(SyncClient::new(self.log.clone())?)
    }

    fn light_client(&self) -> anyhow::Result<SyncClient> {
        Ok(SyncClient::light(self.log.clone())?)
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("HISHTORY_LOG")
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn or_exit(r: anyhow::Result<i32>) -> i32 {
    r.unwrap_or_else(|e| {
        eprintln!("[hishtory] error: {e:#}");
        1
    })
}

fn cmd_enable(app: &App) -> anyhow::Result<i32> {
    app.config.enable()?;
    Ok(0)
}

fn cmd_disable(app: &App) -> anyhow::Result<i32> {
    app.config.disable()?;
    Ok(0)
}

fn cmd_status(app: &App) -> anyhow::Result<i32> {
    let config = app.config.get()?;
    println!("hishtory: {}", hishtory::update::RUNNING_VERSION);
    println!("Enabled: {}", config.is_enabled);
    println!("User ID: {}", crypto::user_id(&config.user_secret));
    println!("Device ID: {}", config.device_id);
    Ok(0)
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let app = App::from_env()?;
    match &cli.command {
        Commands::SaveHistoryEntry {
            shell,
            exit_code,
            raw_line,
            start_time,
        } => history_cmd::cmd_save(
            &app,
            hishtory::capture::HookArgs {
                shell: shell.clone(),
                exit_code: exit_code.clone(),
                raw_line: raw_line.clone(),
                start_time: start_time.clone(),
            },
        ),
        Commands::Query { terms, limit } => history_cmd::cmd_query(&app, terms, *limit),
        Commands::Export => history_cmd::cmd_export(&app),
        Commands::Init { secret } => sync_cmd::cmd_init(&app, secret.as_deref()),
        Commands::Install { secret } => sync_cmd::cmd_install(&app, secret.as_deref()),
        Commands::Enable => cmd_enable(&app),
        Commands::Disable => cmd_disable(&app),
        Commands::Status => cmd_status(&app),
        Commands::Update => sync_cmd::cmd_update(&app),
        Commands::Sync => sync_cmd::cmd_sync(&app),
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = or_exit(run(&cli));
    std::process::exit(exit_code);
}

mod prompt;
mod watcher;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use envsync_core::decision::FixedDecision;
use envsync_core::identity::GitConfigLookup;
use envsync_core::remote::HttpRemoteService;
use envsync_core::storage::{secret_keys, FileSecretVault, SqliteKvStore};
use envsync_core::sync::SyncServices;
use envsync_core::{
    AccountKeys, ConflictChoice, ConnectionMonitor, DecisionCallback, DeviceKeyPair,
    IdentityResolver, KvStore, LocalProjectFiles, MetadataStore, MigrationChoice, OfflineQueue,
    RemoteService, SecretVault, SyncConfig, SyncEvent, SyncManager, SyncOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// envsync - end-to-end encrypted sync of project .env files
#[derive(Parser)]
#[command(name = "envsync", version)]
#[command(about = "End-to-end encrypted sync of project environment files", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Remote API URL override
    #[arg(long)]
    api_url: Option<String>,

    /// Working copy to operate on
    #[arg(short = 'C', long, default_value = ".")]
    dir: PathBuf,

    /// How to settle conflicts and identity migrations
    #[arg(long, value_enum, default_value_t = Policy::Ask)]
    policy: Policy,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    /// Prompt on stdin
    Ask,
    /// Keep this device's copy; migrate identities
    Local,
    /// Take the remote copy; migrate identities
    Remote,
    /// Leave conflicts unresolved; defer migrations
    Cancel,
}

#[derive(Subcommand)]
enum Commands {
    /// Create this device's keypair (if needed) and print its public key
    Keygen,

    /// Store the account key material wrapped for this device
    Pair {
        #[arg(long)]
        account_id: String,

        /// Base64 RSA-OAEP wrapped key material
        #[arg(long)]
        wrapped_key: String,

        /// API access token
        #[arg(long)]
        token: Option<String>,
    },

    /// Show project identity, connectivity and queue state
    Status,

    /// Inspect or override the project identity
    Identity {
        #[command(subcommand)]
        command: IdentityCommand,
    },

    /// List tracked, untracked and remote files
    List,

    /// Start tracking a file and upload it
    Track { file: String },

    /// Upload local changes now
    Push { file: String },

    /// Fetch remote changes now (restores remote-only files)
    Pull { file: String },

    /// Stop tracking a file
    Untrack {
        file: String,

        /// Also delete the remote copy
        #[arg(long)]
        delete_remote: bool,
    },

    /// Re-register a file after automatic recovery gave up
    Reinit { file: String },

    /// Poll every tracked file once and replay the offline queue
    Sync,

    /// Keep syncing until interrupted
    Watch,

    /// Inspect or manage the offline queue
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum IdentityCommand {
    /// Resolve and print the identity (asks about pending migrations)
    Show,
    /// Use an explicit label instead of the detected remote
    Set { label: String },
    /// Remove the explicit label
    Clear,
    /// Scope identity to a sub-project of a monorepo
    Sub { path: Option<String> },
    /// Forget everything recorded about this working copy
    Reset,
}

#[derive(Subcommand)]
enum QueueCommand {
    Show,
    Drain,
    Clear,
}

/// Every service the sync manager is built from
struct App {
    working_copy: PathBuf,
    config: SyncConfig,
    identity: Arc<IdentityResolver>,
    queue: Arc<OfflineQueue>,
    connection: Arc<ConnectionMonitor>,
    remote: Arc<dyn RemoteService>,
    manager: Arc<SyncManager>,
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(envsync_core::get_default_config_path);
    let mut config = SyncConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(api_url) = &cli.api_url {
        config.api_url = api_url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn open_vault() -> Result<FileSecretVault> {
    envsync_core::ensure_config_dir()?;
    Ok(FileSecretVault::new(envsync_core::get_default_secrets_path()))
}

fn decisions(policy: Policy) -> Arc<dyn DecisionCallback> {
    let fixed = |conflict, migration| Arc::new(FixedDecision { conflict, migration });
    match policy {
        Policy::Ask => Arc::new(prompt::StdinDecision),
        Policy::Local => fixed(ConflictChoice::UseLocal, MigrationChoice::Migrate),
        Policy::Remote => fixed(ConflictChoice::UseRemote, MigrationChoice::Migrate),
        Policy::Cancel => fixed(ConflictChoice::Cancel, MigrationChoice::Later),
    }
}

/// Construct every service explicitly and wire them into a manager.
fn build(cli: &Cli, vault: &FileSecretVault) -> Result<App> {
    let config = load_config(cli)?;
    let working_copy = std::fs::canonicalize(&cli.dir)
        .with_context(|| format!("No such directory: {}", cli.dir.display()))?;

    let key = AccountKeys::load(vault)
        .context("This device is not paired; run `envsync keygen` then `envsync pair`")?
        .into_key();
    let token = vault
        .get(secret_keys::ACCESS_TOKEN)?
        .ok_or_else(|| anyhow!("No access token stored; run `envsync pair --token ...`"))?;

    envsync_core::ensure_data_dir()?;
    let store: Arc<dyn KvStore> = Arc::new(SqliteKvStore::open(
        envsync_core::get_default_database_path(),
    )?);

    let identity = Arc::new(IdentityResolver::new(
        store.clone(),
        Arc::new(GitConfigLookup::new()),
    ));
    let queue = Arc::new(OfflineQueue::open(store.clone(), config.queue_capacity)?);
    let connection = Arc::new(ConnectionMonitor::new(config.connection.clone()));
    let remote: Arc<dyn RemoteService> = Arc::new(HttpRemoteService::new(&config.api_url, &token)?);

    let services = SyncServices {
        identity: identity.clone(),
        metadata: MetadataStore::new(store.clone()),
        queue: queue.clone(),
        connection: connection.clone(),
        remote: remote.clone(),
        files: Arc::new(LocalProjectFiles::new(&working_copy)),
        decisions: decisions(cli.policy),
    };
    let manager = Arc::new(SyncManager::new(
        &working_copy,
        config.clone(),
        key,
        services,
    ));

    Ok(App {
        working_copy,
        config,
        identity,
        queue,
        connection,
        remote,
        manager,
    })
}

impl App {
    /// One probe so single-shot commands start from a real reachability state
    async fn probe(&self) {
        let ok = self.connection.probe(self.remote.as_ref()).await;
        self.connection.record_probe(ok);
        if !ok {
            println!("Remote unreachable; changes will be queued");
        }
    }
}

fn describe(file_name: &str, outcome: SyncOutcome) -> String {
    let what = match outcome {
        SyncOutcome::Pushed => "uploaded",
        SyncOutcome::Pulled => "updated from remote",
        SyncOutcome::Unchanged => "already in sync",
        SyncOutcome::Untracked => "not tracked (use `envsync track`)",
        SyncOutcome::Coalesced => "sync already running; change picked up",
        SyncOutcome::Queued => "queued until the remote is reachable",
        SyncOutcome::Conflict(ConflictChoice::UseLocal) => "conflict resolved with local copy",
        SyncOutcome::Conflict(ConflictChoice::UseRemote) => "conflict resolved with remote copy",
        SyncOutcome::Conflict(ConflictChoice::Cancel) => "conflict left unresolved",
        SyncOutcome::Recreated => "remote copy was missing; re-created",
        SyncOutcome::Ghost => "missing locally; stopped tracking",
        SyncOutcome::Skipped => "busy; try again",
    };
    format!("{}: {}", file_name, what)
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Pushed { file_name } => println!("{} uploaded", file_name),
        SyncEvent::Pulled { file_name } => println!("{} updated from remote", file_name),
        SyncEvent::Conflict { file_name, choice } => {
            println!("{} conflict: {:?}", file_name, choice)
        }
        SyncEvent::RecoveryExhausted { file_name, .. } => println!(
            "{}: remote copy keeps disappearing; run `envsync reinit {}`",
            file_name, file_name
        ),
        SyncEvent::GhostDetected { file_name } => println!(
            "{} was deleted locally; `envsync pull {}` restores it",
            file_name, file_name
        ),
        SyncEvent::Connectivity { state } => println!("connection: {}", state),
        _ => {}
    }
}

async fn watch(app: App) -> Result<()> {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(64);

    let monitor = app.connection.spawn(app.remote.clone(), cancel.clone());
    let root = app.working_copy.clone();
    let scanner_cancel = cancel.clone();
    let scanner = tokio::spawn(async move {
        if let Err(e) = watcher::watch(root, tx, scanner_cancel).await {
            warn!(error = %e, "File watcher stopped; relying on polling");
        }
    });

    let mut events = app.manager.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    let engine = tokio::spawn(app.manager.clone().run(rx, cancel.clone()));
    info!(
        "Watching {} (poll every {}s). Press Ctrl+C to exit.",
        app.working_copy.display(),
        app.config.poll_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    cancel.cancel();

    let _ = tokio::join!(engine, scanner, monitor);
    printer.abort();
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let vault = open_vault()?;

    match &cli.command {
        Commands::Keygen => {
            let keypair = DeviceKeyPair::load_or_create(&vault)?;
            println!("{}", keypair.public_key_pem()?);
            return Ok(());
        }
        Commands::Pair {
            account_id,
            wrapped_key,
            token,
        } => {
            if let Some(token) = token {
                vault.set(secret_keys::ACCESS_TOKEN, token)?;
            }
            AccountKeys::pair(&vault, account_id, wrapped_key)?;
            println!("Paired with account {}", account_id);
            return Ok(());
        }
        Commands::Config => {
            print!("{}", load_config(&cli)?.to_toml()?);
            return Ok(());
        }
        _ => {}
    }

    let app = build(&cli, &vault)?;
    let wc = app.working_copy.as_path();

    match cli.command {
        Commands::Keygen | Commands::Pair { .. } | Commands::Config => {}
        Commands::Status => {
            app.probe().await;
            let status = app.manager.status().await?;
            println!("Working copy:  {}", wc.display());
            println!(
                "Project:       {} ({})",
                status.project_id,
                status.identity_source.as_str()
            );
            if status.migration_pending {
                println!("               identity changed; run `envsync identity show`");
            }
            println!("Tracked files: {}", status.tracked_files);
            println!("Queued ops:    {}", status.queued_operations);
            println!("Connection:    {}", status.connection);
            if let Some(at) = status.last_good {
                println!("Last contact:  {}", at.to_rfc3339());
            }
        }
        Commands::Identity { command } => {
            let identity = match command {
                IdentityCommand::Show => {
                    app.probe().await;
                    app.manager.check_identity().await?
                }
                IdentityCommand::Set { label } => {
                    app.identity.set_manual_identity(wc, &label).await?
                }
                IdentityCommand::Clear => app.identity.clear_manual_identity(wc).await?,
                IdentityCommand::Sub { path } => {
                    app.identity.select_sub_project(wc, path.as_deref()).await?
                }
                IdentityCommand::Reset => {
                    app.identity.reset(wc).await?;
                    app.identity.resolve(wc).await?
                }
            };
            println!("id:     {}", identity.id);
            println!("source: {}", identity.source.as_str());
            if let Some(url) = &identity.remote_url {
                println!("remote: {}", url);
            }
            if let Some(sub) = &identity.sub_project_path {
                println!("sub:    {}", sub);
            }
            if let Some(proposal) = identity.suggested_migration.filter(|_| identity.requires_migration) {
                println!(
                    "pending migration {} -> {} ({})",
                    proposal.old_id, proposal.new_id, proposal.reason
                );
            }
        }
        Commands::List => {
            app.probe().await;
            println!("Tracked:");
            for file in app.manager.tracked_files().await? {
                println!("  {} ({} vars)", file.file_name, file.var_count);
            }
            println!("Untracked:");
            for name in app.manager.untracked_candidates().await? {
                println!("  {}", name);
            }
            if app.connection.is_reachable() {
                println!("Remote:");
                for file in app.manager.remote_files().await? {
                    println!("  {}", file.file_name);
                }
            }
        }
        Commands::Track { file } => {
            app.probe().await;
            let outcome = app.manager.initialize_file(&file).await?;
            println!("{}", describe(&file, outcome));
        }
        Commands::Push { file } => {
            app.probe().await;
            let outcome = app.manager.push_file(&file).await?;
            println!("{}", describe(&file, outcome));
        }
        Commands::Pull { file } => {
            app.probe().await;
            let outcome = app.manager.pull_file(&file).await?;
            println!("{}", describe(&file, outcome));
        }
        Commands::Untrack {
            file,
            delete_remote,
        } => {
            app.probe().await;
            app.manager.untrack_file(&file, delete_remote).await?;
            println!("{}: no longer tracked", file);
        }
        Commands::Reinit { file } => {
            app.probe().await;
            let outcome = app.manager.reinitialize_file(&file).await?;
            println!("{}", describe(&file, outcome));
        }
        Commands::Sync => {
            app.probe().await;
            app.manager.check_identity().await?;
            if let Some(report) = app.manager.process_offline_queue().await? {
                println!(
                    "Queue: {} replayed, {} remaining",
                    report.succeeded, report.remaining
                );
            }
            match app.manager.poll().await? {
                Some(report) => println!(
                    "Checked {} files: {} pulled, {} conflicts, {} failed",
                    report.checked, report.pulled, report.conflicts, report.failed
                ),
                None => println!("Remote unreachable; nothing polled"),
            }
        }
        Commands::Watch => watch(app).await?,
        Commands::Queue { command } => match command {
            QueueCommand::Show => {
                for op in app.queue.snapshot() {
                    println!(
                        "{:<8} {:<24} priority {}",
                        op.op_type.as_str(),
                        op.file_name,
                        op.priority
                    );
                }
                println!("{} of {} slots used", app.queue.len(), app.queue.capacity());
            }
            QueueCommand::Drain => {
                app.probe().await;
                match app.manager.process_offline_queue().await? {
                    Some(report) => println!(
                        "{} of {} replayed, {} remaining",
                        report.succeeded, report.attempted, report.remaining
                    ),
                    None => println!("Remote unreachable; queue kept"),
                }
            }
            QueueCommand::Clear => {
                app.queue.clear()?;
                println!("Offline queue cleared");
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    run(cli).await
}

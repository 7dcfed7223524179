//! relay-daemon: Streams a watched directory to a remote build directory.
//!
//! `monitor` runs on the machine with the sources and pushes every changed
//! file; `server` runs on the build machine and writes each project's files
//! under `<build-dir>/<project name>/`.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relay_core::{FrameLimits, ProjectIdentity};
use relay_daemon::config::{
    DEFAULT_BUILD_DIR, DEFAULT_LISTEN_ADDR, DEFAULT_PROJECT_KIND, DEFAULT_SERVER_ADDR, ReceiverConfig,
    ReconnectPolicy, SenderConfig,
};
use relay_daemon::outgoing::{Connector, ReconnectConfig, TcpConnector};
use relay_daemon::{FileWatcher, NativeFs, RelayServer, Sender, WatchOptions};

#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(about = "Relay file changes from a watched directory to a build server")]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept projects and persist their files
    Server(ServerArgs),
    /// Watch a directory and stream its changes to a server
    Monitor(MonitorArgs),
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Address to listen on for incoming connections
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// Directory under which each project's tree is written
    #[arg(long, default_value = DEFAULT_BUILD_DIR)]
    build_dir: PathBuf,

    /// Largest accepted path length in bytes
    #[arg(long, default_value_t = relay_core::protocol::DEFAULT_MAX_PATH_LEN)]
    max_path_len: usize,

    /// Largest accepted file size in bytes
    #[arg(long, default_value_t = relay_core::protocol::DEFAULT_MAX_CONTENT_LEN)]
    max_content_len: usize,
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Directory to watch
    #[arg(short, long)]
    target_dir: PathBuf,

    /// Receiver address
    #[arg(short, long, default_value = DEFAULT_SERVER_ADDR)]
    server: String,

    /// Project name (defaults to the target directory's name)
    #[arg(long)]
    project_name: Option<String>,

    /// Project kind announced to the receiver
    #[arg(long, default_value = DEFAULT_PROJECT_KIND)]
    project_kind: String,

    /// Debounce window for filesystem events, in milliseconds
    #[arg(long, default_value_t = 200)]
    debounce_ms: u64,

    /// Also relay dotfiles and files under dot-directories
    #[arg(long)]
    include_hidden: bool,

    /// Send every existing file once after connecting
    #[arg(long)]
    initial_scan: bool,

    /// Reconnect with backoff instead of exiting when the connection breaks
    #[arg(long)]
    reconnect: bool,

    /// Changes kept while disconnected (with --reconnect)
    #[arg(long, default_value_t = 256)]
    max_pending: usize,
}

impl From<ServerArgs> for ReceiverConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            listen: args.listen,
            build_dir: args.build_dir,
            limits: FrameLimits {
                max_path_len: args.max_path_len,
                max_content_len: args.max_content_len,
            },
        }
    }
}

impl MonitorArgs {
    fn into_config(self) -> Result<SenderConfig> {
        let mut config = SenderConfig::new(self.target_dir);

        if let Some(name) = self.project_name {
            config.project_name = name;
        } else if config.project_name.is_empty() {
            bail!(
                "Cannot derive a project name from {}; pass --project-name",
                config.target_dir.display()
            );
        }

        config.server = self.server;
        config.project_kind = self.project_kind;
        config.debounce = Duration::from_millis(self.debounce_ms);
        config.include_hidden = self.include_hidden;
        config.initial_scan = self.initial_scan;
        if self.reconnect {
            config.reconnect = ReconnectPolicy::Backoff(ReconnectConfig {
                max_pending: self.max_pending,
                ..Default::default()
            });
        }

        Ok(config)
    }
}

async fn run_server(config: ReceiverConfig) -> Result<()> {
    info!("Starting relay server");
    info!("Build directory: {}", config.build_dir.display());

    tokio::fs::create_dir_all(&config.build_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.build_dir.display()))?;

    let listener = RelayServer::<NativeFs>::bind(&config.listen).await?;
    let server = RelayServer::new(NativeFs::new(), config.build_dir, config.limits);

    info!("Server running. Press Ctrl+C to stop.");

    tokio::select! {
        result = server.serve(listener) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}

async fn run_monitor(config: SenderConfig) -> Result<()> {
    if !config.target_dir.is_dir() {
        bail!("Target directory {} does not exist", config.target_dir.display());
    }

    let identity = ProjectIdentity::validated(&config.project_name, &config.project_kind)
        .context("Invalid project identity")?;

    info!("Starting monitor for project {}", identity);
    info!("Target directory: {}", config.target_dir.display());

    let connector = TcpConnector::new(config.server.clone(), identity);
    let conn = connector.connect().await?;

    let mut watcher = FileWatcher::new(
        config.target_dir.clone(),
        WatchOptions {
            debounce: config.debounce,
            include_hidden: config.include_hidden,
        },
    )?;
    info!("File watcher started on {}", watcher.root().display());

    let mut sender = Sender::new(conn, NativeFs::new(), connector, config.reconnect);

    if config.initial_scan {
        let root = watcher.root().to_path_buf();
        sender.initial_scan(&root, config.include_hidden).await?;
    }

    info!("Monitor running. Press Ctrl+C to stop.");

    let (events, errors) = watcher.channels();
    tokio::select! {
        result = sender.run(events, errors) => {
            if let Err(e) = &result {
                error!("Monitor stopped: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down after {} file(s) relayed", sender.frames_sent());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if cli.verbose {
        "debug,relay_daemon=debug"
    } else {
        "info,relay_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Server(args) => run_server(args.into()).await,
        Command::Monitor(args) => run_monitor(args.into_config()?).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_server_defaults() {
        let cli = Cli::parse_from(["relay-daemon", "server"]);
        let Command::Server(args) = cli.command else {
            panic!("expected server subcommand");
        };
        let config = ReceiverConfig::from(args);
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.build_dir, PathBuf::from("build_directory"));
        assert_eq!(config.limits, FrameLimits::default());
    }

    #[test]
    fn test_monitor_flags() {
        let cli = Cli::parse_from([
            "relay-daemon",
            "monitor",
            "--target-dir",
            "/tmp/demo",
            "--project-name",
            "demo",
            "--reconnect",
            "--max-pending",
            "8",
            "--verbose",
        ]);
        assert!(cli.verbose);
        let Command::Monitor(args) = cli.command else {
            panic!("expected monitor subcommand");
        };
        let config = args.into_config().unwrap();
        assert_eq!(config.project_name, "demo");
        assert_eq!(config.project_kind, "go");
        assert_eq!(config.server, "localhost:8080");
        match config.reconnect {
            ReconnectPolicy::Backoff(reconnect) => assert_eq!(reconnect.max_pending, 8),
            ReconnectPolicy::Never => panic!("expected backoff policy"),
        }
    }

    #[test]
    fn test_monitor_defaults_project_name_to_dir_name() {
        let cli = Cli::parse_from(["relay-daemon", "monitor", "--target-dir", "/srv/projects/demo-app"]);
        let Command::Monitor(args) = cli.command else {
            panic!("expected monitor subcommand");
        };
        let config = args.into_config().unwrap();
        assert_eq!(config.project_name, "demo-app");
        assert_eq!(config.debounce, Duration::from_millis(200));
        assert!(matches!(config.reconnect, ReconnectPolicy::Never));
    }

    #[test]
    fn test_monitor_rejects_unnamed_root() {
        let cli = Cli::parse_from(["relay-daemon", "monitor", "--target-dir", "/"]);
        let Command::Monitor(args) = cli.command else {
            panic!("expected monitor subcommand");
        };
        assert!(args.into_config().is_err());
    }
}

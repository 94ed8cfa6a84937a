use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{error, info},
    tracing_subscriber::EnvFilter,
};

#[derive(Parser)]
#[command(name = "parley", about = "parley — distributed chat room platform")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an edge node: WebSocket termination, local fan-out, gRPC
    /// broadcast server.
    Edge {
        /// Config file path.
        #[arg(default_value = "conf.conf")]
        config: PathBuf,
    },
    /// Run the stateless HTTP write ingress.
    Logic {
        /// Config file path.
        #[arg(default_value = "conf.conf")]
        config: PathBuf,
    },
    /// Run the dispatcher consuming the partitioned log.
    Job {
        /// Config file path.
        #[arg(default_value = "conf.conf")]
        config: PathBuf,
    },
}

impl Commands {
    fn config_path(&self) -> &PathBuf {
        match self {
            Self::Edge { config } | Self::Logic { config } | Self::Job { config } => config,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match parley_config::load_or_default(cli.command.config_path()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("parley: {e}");
            std::process::exit(-1);
        },
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());

    let result = match cli.command {
        Commands::Edge { .. } => {
            info!("starting edge");
            parley_edge::run_edge(config, shutdown).await
        },
        Commands::Logic { .. } => {
            info!("starting logic");
            parley_logic::run_logic(config, shutdown).await
        },
        Commands::Job { .. } => {
            info!("starting job");
            parley_job::run_job(config, shutdown).await
        },
    };

    if let Err(e) = result {
        error!(error = %e, "fatal");
        std::process::exit(-1);
    }
}

/// SIGINT/SIGTERM initiate graceful shutdown of every loop; SIGPIPE is
/// already SIG_IGN courtesy of the Rust runtime.
fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {},
                        _ = sigterm.recv() => {},
                    }
                },
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                },
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });
}

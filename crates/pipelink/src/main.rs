//! pipelink - repository backend over a helper's stdio
//!
//! `pipelink serve restic --stdin local:<dir>` is the helper side;
//! `pipelink ls` and `pipelink init` drive a helper as a client.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pipelink::server::{self, ServeOptions, Server};
use pipelink::{Backend, ConfigRegistry, FileType, StorageBackend};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "pipelink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve a repository
    Serve {
        #[command(subcommand)]
        protocol: Protocol,
    },

    /// Create a repository layout through a helper
    Init {
        #[command(flatten)]
        target: Target,
    },

    /// List files of one type through a helper
    Ls {
        #[command(flatten)]
        target: Target,

        /// File type (data, keys, locks, snapshots, index)
        kind: String,
    },
}

#[derive(Subcommand, Debug)]
enum Protocol {
    /// Serve the restic REST protocol
    Restic {
        /// Speak HTTP/2 on stdin/stdout
        #[arg(long)]
        stdin: bool,

        /// Refuse deletes (except locks) and overwrites
        #[arg(long)]
        append_only: bool,

        /// Answer every request with 503
        #[arg(long)]
        unavailable: bool,

        /// Repository, e.g. local:/srv/repo
        remote: String,
    },
}

#[derive(clap::Args, Debug)]
struct Target {
    /// Repository location, e.g. rclone:b2:bucket/repo
    location: String,

    /// Helper command line replacing the default rclone invocation
    #[arg(long)]
    command: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout may be the protocol stream, keep logs on stderr
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Serve {
            protocol:
                Protocol::Restic {
                    stdin,
                    append_only,
                    unavailable,
                    remote,
                },
        } => {
            if !stdin {
                bail!("only --stdin serving is supported");
            }
            let options = ServeOptions {
                append_only,
                unavailable,
            };
            let server = Server::for_remote(&remote, options)
                .with_context(|| format!("cannot serve {remote}"))?;
            server.serve(server::stdio_pipe()).await;
        }
        Commands::Init { target } => {
            let backend = open(&target, true).await?;
            println!("created repository at {}", backend.location());
            backend.close().await?;
        }
        Commands::Ls { target, kind } => {
            let kind: FileType = kind.parse()?;
            let backend = open(&target, false).await?;
            let listed = backend.list(kind).await;
            backend.close().await?;
            for file in listed? {
                println!("{}\t{}", file.size, file.name);
            }
        }
    }

    Ok(())
}

async fn open(target: &Target, create: bool) -> Result<Backend> {
    let (kind, mut config) = ConfigRegistry::with_defaults()
        .parse(&target.location)
        .with_context(|| format!("invalid location {}", target.location))?;
    if let Some(command) = &target.command {
        config = config.with_command(command.clone());
    }
    tracing::debug!(%kind, remote = %config.remote, "opening backend");

    let backend = if create {
        Backend::create(config).await
    } else {
        Backend::open(config).await
    };
    backend.with_context(|| format!("cannot open {}", target.location))
}

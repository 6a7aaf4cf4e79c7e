//! Command-line definitions for the `chunkfs` client and the `chunkfsd` daemon

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Options of the `chunkfsd` server binary
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "chunkfs server: sandboxed chunk store over HTTP")]
pub struct DaemonOpts {
    /// Bind address (host:port); overrides the config file
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory holding every user's root; overrides the config file
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Server config file (TOML)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Debug-level diagnostics
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// `chunkfs` client
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "chunkfs - list, edit and sync files against a chunkfs server, moving only changed chunks"
)]
pub struct ClientArgs {
    /// Server endpoint, e.g. http://127.0.0.1:9040; overrides the config file
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Caller token sent with every request; overrides the config file
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Client config file (default: ~/.config/chunkfs/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level diagnostics
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Append transfer events to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: FsCommand,
}

#[derive(Debug, Subcommand)]
pub enum FsCommand {
    /// List files and directories
    Ls {
        /// Descend into subdirectories
        #[arg(short = 'r')]
        recursive: bool,
        /// Remote path; wildcards allowed
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show one entry
    Stat { path: String },
    /// Create a directory and any missing parents
    Mkdir { path: String },
    /// Remove files; directories need -r
    Rm {
        #[arg(short = 'r')]
        recursive: bool,
        path: String,
    },
    /// Create a file of the given size
    Touch {
        #[arg(short = 's', long, default_value_t = 0)]
        size: u64,
        path: String,
    },
    /// Print the per-window checksums of a remote file
    Chunkmeta {
        #[arg(long = "chunk-size")]
        chunk_size: Option<u64>,
        path: String,
    },
    /// Download a remote file or directory
    Get { src: String, dst: PathBuf },
    /// Upload a local file or directory into an existing remote directory
    Put { src: PathBuf, dst: String },
}

/// Install the stderr `tracing` subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_subcommands_parse() {
        let args = ClientArgs::parse_from(["chunkfs", "ls", "-r", "/data"]);
        assert!(matches!(
            args.command,
            FsCommand::Ls { recursive: true, ref path } if path == "/data"
        ));

        let args = ClientArgs::parse_from([
            "chunkfs",
            "--endpoint",
            "http://h:1",
            "put",
            "./local",
            "/remote",
        ]);
        assert_eq!(args.endpoint.as_deref(), Some("http://h:1"));
        assert!(matches!(args.command, FsCommand::Put { ref dst, .. } if dst == "/remote"));

        let args = ClientArgs::parse_from(["chunkfs", "touch", "-s", "10", "/f", "--token", "t"]);
        assert_eq!(args.token.as_deref(), Some("t"));
        assert!(matches!(args.command, FsCommand::Touch { size: 10, .. }));
    }

    #[test]
    fn daemon_flags_are_optional() {
        let opts = DaemonOpts::parse_from(["chunkfsd"]);
        assert!(opts.bind.is_none() && opts.root.is_none());
        let opts = DaemonOpts::parse_from(["chunkfsd", "--bind", "0.0.0.0:1", "--root", "/srv"]);
        assert_eq!(opts.bind.as_deref(), Some("0.0.0.0:1"));
    }
}

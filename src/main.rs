//! chunkfs client
//!
//! Maps each subcommand onto one store call or a sync, against the server
//! named by `--endpoint` or the active datacenter of the client config.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, TimeZone};
use clap::Parser;

use chunkfs::catalog::ListEntry;
use chunkfs::cli::{init_tracing, ClientArgs, FsCommand};
use chunkfs::client::HttpStore;
use chunkfs::config::ClientConfig;
use chunkfs::logger::{Logger, NoopLogger, TextLogger};
use chunkfs::store::ChunkStore;
use chunkfs::sync::{SyncStats, Syncer};

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted (Ctrl-C). Chunks already written are kept; re-run to resume.");
        std::process::exit(130);
    })
    .context("set Ctrl-C handler")?;

    let args = ClientArgs::parse();
    init_tracing(args.verbose);

    let store = connect(&args)?;
    let logger: Box<dyn Logger> = match &args.log_file {
        Some(path) => Box::new(TextLogger::new(path)?),
        None => Box::new(NoopLogger),
    };

    match &args.command {
        FsCommand::Ls { recursive, path } => {
            let entries = store.list(path, *recursive)?;
            print_entries(&entries);
        }
        FsCommand::Stat { path } => {
            let entry = store.stat(path)?;
            print_entries(std::slice::from_ref(&entry));
        }
        FsCommand::Mkdir { path } => {
            let made = store.mkdir(path)?;
            println!("mkdir {}", made.path);
        }
        FsCommand::Rm { recursive, path } => {
            for removed in store.remove(path, *recursive)? {
                println!("rm {}", removed.path);
            }
        }
        FsCommand::Touch { size, path } => {
            let touched = store.touch(path, *size)?;
            println!("touch {} size={}", touched.path, size);
        }
        FsCommand::Chunkmeta { chunk_size, path } => {
            let window = chunk_size.unwrap_or(store.chunk_config().default_chunk_size);
            for meta in store.chunk_meta(path, window)? {
                println!("{:>12} {:>10} {}", meta.offset, meta.length, meta.checksum);
            }
        }
        FsCommand::Get { src, dst } => {
            let stats = Syncer::new(&store, logger.as_ref())
                .download(src, dst)
                .with_context(|| format!("get {} {}", src, dst.display()))?;
            print_stats("get", &stats);
        }
        FsCommand::Put { src, dst } => {
            let stats = Syncer::new(&store, logger.as_ref())
                .upload(src, dst)
                .with_context(|| format!("put {} {}", src.display(), dst))?;
            print_stats("put", &stats);
        }
    }
    Ok(())
}

/// Flags override the config file's active datacenter.
fn connect(args: &ClientArgs) -> Result<HttpStore> {
    let path = args.config.clone().unwrap_or_else(ClientConfig::default_path);
    let cfg = ClientConfig::load_or_default(&path)?;

    let active = cfg.active().ok();
    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| active.map(|dc| dc.endpoint.clone()))
        .ok_or_else(|| {
            anyhow!(
                "no server endpoint: pass --endpoint or set `current` in {}",
                path.display()
            )
        })?;
    let token = args
        .token
        .clone()
        .or_else(|| active.and_then(|dc| dc.token.clone()));

    tracing::debug!(%endpoint, "using chunkfs server");
    Ok(HttpStore::new(endpoint, token, cfg.chunk))
}

/// `YYYY-MM-DD HH:MM:SS d|f <size> <path>`, sizes right-aligned.
fn format_entries(entries: &[ListEntry]) -> Vec<String> {
    let width = entries
        .iter()
        .map(|e| e.size.to_string().len())
        .max()
        .unwrap_or(1);
    entries
        .iter()
        .map(|e| {
            let when = Local
                .timestamp_nanos(e.mod_time)
                .format("%Y-%m-%d %H:%M:%S");
            let kind = if e.is_dir { "d" } else { "f" };
            format!("{when} {kind} {:>width$} {}", e.size, e.path)
        })
        .collect()
}

fn print_entries(entries: &[ListEntry]) {
    for line in format_entries(entries) {
        println!("{line}");
    }
}

fn print_stats(verb: &str, stats: &SyncStats) {
    println!(
        "{verb}: {} files, {} directories, {} chunks, {} bytes transferred",
        stats.files, stats.directories, stats.chunks, stats.bytes
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ls_lines_align_sizes() {
        let entries = vec![
            ListEntry {
                path: "/a".into(),
                mod_time: 0,
                size: 5,
                is_dir: false,
            },
            ListEntry {
                path: "/dir".into(),
                mod_time: 0,
                size: 12345,
                is_dir: true,
            },
        ];
        let lines = format_entries(&entries);
        assert!(lines[0].ends_with(" f     5 /a"), "{}", lines[0]);
        assert!(lines[1].ends_with(" d 12345 /dir"), "{}", lines[1]);
        assert_eq!(lines[0].len(), lines[1].len() - 2);
    }
}

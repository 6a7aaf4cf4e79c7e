use anyhow::{Context, Result};
use clap::Parser;

use chunkfs::cli::{init_tracing, DaemonOpts};
use chunkfs::config::ServerConfig;
use chunkfs::server::{self, AppState};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    init_tracing(opts.verbose);

    let mut cfg = match &opts.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = opts.bind {
        cfg.bind = bind;
    }
    if let Some(root) = opts.root {
        cfg.base_path = root;
    }

    server::prepare_roots(&cfg.base_path, &cfg.users)
        .with_context(|| format!("prepare base path {}", cfg.base_path.display()))?;
    cfg.base_path = std::fs::canonicalize(&cfg.base_path)
        .with_context(|| format!("canonicalize base path {}", cfg.base_path.display()))?;

    if cfg.users.is_empty() {
        tracing::warn!("no users configured; every request will be rejected as unauthorized");
    }
    if cfg.bind.starts_with("0.0.0.0") {
        tracing::warn!(bind = %cfg.bind, "listening on all interfaces; tokens travel in plain HTTP");
    }
    tracing::info!(
        base = %cfg.base_path.display(),
        users = cfg.users.len(),
        chunk_size = cfg.chunk.default_chunk_size,
        "starting chunkfsd"
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let state = AppState::from_config(&cfg);
    rt.block_on(server::serve(&cfg.bind, state))
}

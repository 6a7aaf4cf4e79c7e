//! Explicit configuration values threaded into catalog, digest and transport calls

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::FsError;

pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 1;
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_MAX_CREATE_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Chunking scheme shared by both ends of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub default_chunk_size: u64,
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub max_create_file_size: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_create_file_size: DEFAULT_MAX_CREATE_FILE_SIZE,
        }
    }
}

impl ChunkConfig {
    pub fn check_chunk_size(&self, size: u64) -> crate::Result<()> {
        if size < self.min_chunk_size || size > self.max_chunk_size {
            return Err(FsError::BadChunkSize(size.to_string()));
        }
        Ok(())
    }

    pub fn check_file_size(&self, size: u64) -> crate::Result<()> {
        if size > self.max_create_file_size {
            return Err(FsError::BadFileSize(size.to_string()));
        }
        Ok(())
    }

    /// Largest request body a chunk upload may carry.
    pub fn max_chunk_body(&self) -> usize {
        self.max_chunk_size as usize + crate::protocol::MULTIPART_OVERHEAD
    }
}

/// One caller the server accepts, keyed by its opaque token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub token: String,
    pub username: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub base_path: PathBuf,
    pub chunk: ChunkConfig,
    pub users: Vec<UserEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:9040".to_string(),
            base_path: PathBuf::from("/var/lib/chunkfs"),
            chunk: ChunkConfig::default(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read server config {}", path.display()))?;
        let cfg: ServerConfig = toml::from_str(&data)
            .with_context(|| format!("parse server config {}", path.display()))?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// Client side settings: which server to talk to and with what token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub current: String,
    pub datacenters: Vec<Datacenter>,
    pub chunk: ChunkConfig,
}

impl ClientConfig {
    pub fn default_path() -> PathBuf {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".config")
                .join("chunkfs")
                .join("config.toml");
        }
        PathBuf::from(".chunkfs").join("config.toml")
    }

    /// Load the config file, or an empty config when none exists at `path`.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => toml::from_str(&data)
                .with_context(|| format!("parse client config {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("read client config {}", path.display())),
        }
    }

    pub fn active(&self) -> Result<&Datacenter> {
        self.datacenters
            .iter()
            .find(|dc| dc.name == self.current)
            .ok_or_else(|| anyhow!("current datacenter '{}' is not defined", self.current))
    }
}

//! Command protocol: every filesystem operation as one value that can be
//! encoded, sent, validated and run on either side of the wire.

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::catalog::{self, ListEntry, PathResult};
use crate::checksum::{compute_chunk_meta, ChunkMeta};
use crate::config::ChunkConfig;
use crate::error::{FsError, Result};
use crate::protocol::method;
use crate::sandbox::{validate_absolute, SyncRoot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCmd {
    #[serde(default)]
    pub r: bool,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCmd {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirCmd {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmCmd {
    #[serde(default)]
    pub r: bool,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchCmd {
    #[serde(default)]
    pub size: u64,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetaCmd {
    pub path: String,
    #[serde(rename = "chunksize")]
    pub chunk_size: u64,
}

/// Tagged by `method` on the wire: `{"method":"mkdir","path":"/a"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Command {
    #[serde(rename = "ls")]
    List(ListCmd),
    #[serde(rename = "stat")]
    Stat(StatCmd),
    #[serde(rename = "mkdir")]
    Mkdir(MkdirCmd),
    #[serde(rename = "rm")]
    Remove(RmCmd),
    #[serde(rename = "touch")]
    Touch(TouchCmd),
    #[serde(rename = "GetChunkMeta")]
    ChunkMeta(ChunkMetaCmd),
}

/// Result of [`Command::run`], serialized as the `results` of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    Entries(Vec<ListEntry>),
    Entry(ListEntry),
    Path(PathResult),
    Paths(Vec<PathResult>),
    ChunkMetas(Vec<ChunkMeta>),
}

/// Accepts the same spellings as the original query-string clients.
fn parse_bool(s: &str) -> Result<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(FsError::Parse(format!("invalid boolean '{s}'"))),
    }
}

struct QueryArgs(Vec<(String, String)>);

impl QueryArgs {
    fn parse(raw: &str) -> Self {
        Self(
            form_urlencoded::parse(raw.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    /// First non-empty value for `key`.
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, key: &str) -> Result<String> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| FsError::NotEnoughArgs(key.to_string()))
    }

    fn flag(&self, key: &str) -> Result<bool> {
        self.get(key).map(parse_bool).unwrap_or(Ok(false))
    }
}

impl Command {
    pub fn method(&self) -> &'static str {
        match self {
            Self::List(_) => method::LS,
            Self::Stat(_) => method::STAT,
            Self::Mkdir(_) => method::MKDIR,
            Self::Remove(_) => method::RM,
            Self::Touch(_) => method::TOUCH,
            Self::ChunkMeta(_) => method::CHUNK_META,
        }
    }

    /// Path the command operates on, as the caller wrote it.
    pub fn path(&self) -> &str {
        match self {
            Self::List(c) => &c.path,
            Self::Stat(c) => &c.path,
            Self::Mkdir(c) => &c.path,
            Self::Remove(c) => &c.path,
            Self::Touch(c) => &c.path,
            Self::ChunkMeta(c) => &c.path,
        }
    }

    pub fn to_query(&self) -> String {
        let mut q = form_urlencoded::Serializer::new(String::new());
        q.append_pair("method", self.method());
        match self {
            Self::List(c) => {
                q.append_pair("r", &c.r.to_string());
            }
            Self::Remove(c) => {
                q.append_pair("r", &c.r.to_string());
            }
            Self::Touch(c) => {
                q.append_pair("size", &c.size.to_string());
            }
            Self::ChunkMeta(c) => {
                q.append_pair("chunksize", &c.chunk_size.to_string());
            }
            Self::Stat(_) | Self::Mkdir(_) => {}
        }
        q.append_pair("path", self.path());
        q.finish()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| FsError::Parse(e.to_string()))
    }

    /// Decode a query string. `ls` and `stat` default to `/`; a missing
    /// `chunksize` falls back to the configured default.
    pub fn from_query(raw: &str, cfg: &ChunkConfig) -> Result<Self> {
        let args = QueryArgs::parse(raw);
        let name = args.require("method")?;
        let cmd = match name.as_str() {
            method::LS => Self::List(ListCmd {
                r: args.flag("r")?,
                path: args.get("path").unwrap_or("/").to_string(),
            }),
            method::STAT => Self::Stat(StatCmd {
                path: args.get("path").unwrap_or("/").to_string(),
            }),
            method::MKDIR => Self::Mkdir(MkdirCmd {
                path: args.require("path")?,
            }),
            method::RM => Self::Remove(RmCmd {
                r: args.flag("r")?,
                path: args.require("path")?,
            }),
            method::TOUCH => Self::Touch(TouchCmd {
                size: match args.get("size") {
                    Some(s) => s.parse().map_err(|_| FsError::BadFileSize(s.to_string()))?,
                    None => 0,
                },
                path: args.require("path")?,
            }),
            method::CHUNK_META => Self::ChunkMeta(ChunkMetaCmd {
                chunk_size: match args.get("chunksize") {
                    Some(s) => s.parse().map_err(|_| FsError::BadChunkSize(s.to_string()))?,
                    None => cfg.default_chunk_size,
                },
                path: args.require("path")?,
            }),
            other => return Err(FsError::IllegalMethod(other.to_string())),
        };
        tracing::debug!(?cmd, "decoded query command");
        Ok(cmd)
    }

    pub fn from_json(body: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| FsError::Parse(e.to_string()))?;
        match value.get("method").and_then(|m| m.as_str()) {
            None | Some("") => return Err(FsError::NotEnoughArgs("method".into())),
            Some(
                method::LS
                | method::STAT
                | method::MKDIR
                | method::RM
                | method::TOUCH
                | method::CHUNK_META,
            ) => {}
            Some(other) => return Err(FsError::IllegalMethod(other.to_string())),
        }
        if value["method"] == method::TOUCH {
            if let Some(size) = value.get("size").and_then(|s| s.as_i64()).filter(|s| *s < 0) {
                return Err(FsError::BadFileSize(size.to_string()));
            }
        }
        serde_json::from_value(value).map_err(|e| FsError::Parse(e.to_string()))
    }

    /// Checks that hold wherever the command runs.
    pub fn validate_local(&self, cfg: &ChunkConfig) -> Result<()> {
        match self {
            Self::List(c) if c.path.is_empty() => Err(FsError::NotEnoughArgs("path".into())),
            Self::Touch(c) => cfg.check_file_size(c.size),
            Self::ChunkMeta(c) => cfg.check_chunk_size(c.chunk_size),
            _ => Ok(()),
        }
    }

    /// Checks applied before running on behalf of a remote caller.
    pub fn validate_remote(&self, cfg: &ChunkConfig) -> Result<()> {
        validate_absolute(self.path())?;
        match self {
            Self::Touch(c) => cfg.check_file_size(c.size),
            Self::ChunkMeta(c) => cfg.check_chunk_size(c.chunk_size),
            _ => Ok(()),
        }
    }

    /// Resolve the command path under `root` and execute it.
    pub fn run(&self, root: &SyncRoot, cfg: &ChunkConfig) -> Result<CommandOutput> {
        let path = root.resolve(self.path())?;
        let out = match self {
            Self::List(c) => CommandOutput::Entries(catalog::list(&path, c.r, root)?),
            Self::Stat(_) => CommandOutput::Entry(catalog::stat(&path, root)?),
            Self::Mkdir(_) => CommandOutput::Path(catalog::make_directory(&path, root)?),
            Self::Remove(c) => CommandOutput::Paths(catalog::remove(&path, c.r, root)?),
            Self::Touch(c) => CommandOutput::Path(catalog::touch(&path, c.size, cfg, root)?),
            Self::ChunkMeta(c) => CommandOutput::ChunkMetas(
                compute_chunk_meta(&path, c.chunk_size, cfg).map_err(|e| e.with_path(&c.path))?,
            ),
        };
        Ok(out)
    }
}

//! Shared wire constants and the JSON response envelope of the chunkfs HTTP surface

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, FsError};

/// Versioned prefix every endpoint lives under.
pub const API_PREFIX: &str = "/api/v1/fs";

pub const FILES_PATH: &str = "/files";
pub const CHUNK_META_PATH: &str = "/chunks";
pub const STORAGE_CHUNKS_PATH: &str = "/storage/chunks";

/// Header carrying the opaque caller-identity token.
pub const TOKEN_HEADER: &str = "token";

// The boundary is fixed on both sides; receivers do not read it from Content-Type.
pub const MULTIPART_BOUNDARY: &str = "8d7b0e5709d756e21e971ff4d9ac3b20";

/// Form field name of every chunk part.
pub const CHUNK_FIELD: &str = "chunk";

// Maximum JSON body accepted by the command endpoints
pub const MAX_JSON_REQUEST_SIZE: usize = 2048;

// Headroom for part headers and delimiters on top of the chunk payload
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub mod method {
    pub const LS: &str = "ls";
    pub const STAT: &str = "stat";
    pub const MKDIR: &str = "mkdir";
    pub const RM: &str = "rm";
    pub const TOUCH: &str = "touch";
    pub const CHUNK_META: &str = "GetChunkMeta";
}

/// Body of every JSON response. Success carries an empty `err`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub kind: Option<ErrorKind>,
    #[serde(default)]
    pub results: serde_json::Value,
}

impl Envelope {
    pub fn ok(results: serde_json::Value) -> Self {
        Self {
            code: 200,
            results,
            ..Self::default()
        }
    }

    pub fn failure(err: &FsError) -> Self {
        Self {
            err: err.to_string(),
            code: err.status_code(),
            kind: Some(err.kind()),
            results: serde_json::Value::Null,
        }
    }

    /// The `results` on success, the server's error rebuilt otherwise.
    pub fn into_results(self) -> crate::Result<serde_json::Value> {
        if self.err.is_empty() {
            return Ok(self.results);
        }
        Err(FsError::Remote {
            kind: self.kind.unwrap_or(ErrorKind::TransportFailure),
            message: self.err,
        })
    }
}

/// Build the full URL of an endpoint from a client endpoint base.
pub fn endpoint_url(base: &str, path: &str) -> String {
    format!("{}{}{}", base.trim_end_matches('/'), API_PREFIX, path)
}

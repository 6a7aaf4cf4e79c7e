//! Chunk addressing: a byte range `(path, offset, size)` of one file and its
//! flat key-value encoding.
//!
//! The same encoding is used for the `GET /storage/chunks` query string and for
//! the file name of every multipart chunk part.

use url::form_urlencoded;

use crate::config::ChunkConfig;
use crate::error::{FsError, Result};
use crate::sandbox::validate_absolute;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub path: String,
    pub offset: u64,
    pub size: u64,
}

impl Chunk {
    pub fn new(path: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            size,
        }
    }

    /// `path=...&offset=...&size=...`
    pub fn to_query(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("path", &self.path)
            .append_pair("offset", &self.offset.to_string())
            .append_pair("size", &self.size.to_string())
            .finish()
    }

    /// Decode without the remote-execution checks.
    ///
    /// `path` and `offset` are required; a missing `size` falls back to the
    /// configured default chunk size, an unparsable one is an error.
    pub fn decode(raw: &str, cfg: &ChunkConfig) -> Result<Self> {
        let mut path = None;
        let mut offset = None;
        let mut size = None;
        for (k, v) in form_urlencoded::parse(raw.as_bytes()) {
            match k.as_ref() {
                "path" if !v.is_empty() => path = Some(v.into_owned()),
                "offset" if !v.is_empty() => offset = Some(v.into_owned()),
                "size" if !v.is_empty() => size = Some(v.into_owned()),
                _ => {}
            }
        }

        let (path, offset) = match (path, offset) {
            (Some(p), Some(o)) => (p, o),
            _ => return Err(FsError::InvalidArgs(format!("chunk descriptor '{raw}'"))),
        };
        let offset = offset
            .parse::<u64>()
            .map_err(|e| FsError::Parse(format!("offset '{offset}': {e}")))?;
        let size = match size {
            Some(s) => s.parse::<u64>().map_err(|_| FsError::BadChunkSize(s))?,
            None => cfg.default_chunk_size,
        };

        Ok(Self { path, offset, size })
    }

    /// Decode and apply the remote-execution checks.
    pub fn parse(raw: &str, cfg: &ChunkConfig) -> Result<Self> {
        let chunk = Self::decode(raw, cfg)?;
        tracing::debug!(?chunk, "parsed chunk");
        chunk.validate_remote(cfg)?;
        Ok(chunk)
    }

    pub fn validate_remote(&self, cfg: &ChunkConfig) -> Result<()> {
        validate_absolute(&self.path)?;
        cfg.check_chunk_size(self.size)
    }

    /// Same byte range, addressed at another path.
    pub fn retarget(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            offset: self.offset,
            size: self.size,
        }
    }
}

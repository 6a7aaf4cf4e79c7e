//! Blocking HTTP client for a chunkfs server.
//!
//! Every call blocks the calling thread until the response is complete. One
//! `ureq::Agent` is kept per store so consecutive chunk requests reuse the
//! connection.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::chunk::Chunk;
use crate::command::Command;
use crate::config::ChunkConfig;
use crate::error::{ErrorKind, FsError, Result};
use crate::multipart;
use crate::protocol::{
    endpoint_url, Envelope, CHUNK_META_PATH, FILES_PATH, MULTIPART_BOUNDARY, STORAGE_CHUNKS_PATH,
    TOKEN_HEADER,
};
use crate::store::ChunkStore;
use crate::transport;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpStore {
    agent: ureq::Agent,
    endpoint: String,
    token: Option<String>,
    cfg: ChunkConfig,
}

/// Non-2xx responses still carry an envelope worth decoding.
fn into_response(result: std::result::Result<ureq::Response, ureq::Error>) -> Result<ureq::Response> {
    match result {
        Ok(resp) => Ok(resp),
        Err(ureq::Error::Status(_, resp)) => Ok(resp),
        Err(ureq::Error::Transport(t)) => Err(FsError::Transport(t.to_string())),
    }
}

fn read_body(resp: ureq::Response, limit: u64) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    resp.into_reader()
        .take(limit)
        .read_to_end(&mut body)
        .map_err(|e| FsError::Transport(format!("read response body: {e}")))?;
    Ok(body)
}

/// Decode an envelope. A body that is not one (e.g. a proxy error page) is
/// reported with the HTTP status.
fn read_envelope(resp: ureq::Response) -> Result<serde_json::Value> {
    let status = resp.status();
    let body = read_body(resp, u64::MAX)?;
    match serde_json::from_slice::<Envelope>(&body) {
        Ok(env) => env.into_results(),
        Err(_) if !(200..300).contains(&status) => Err(FsError::Remote {
            kind: status_kind(status),
            message: format!(
                "http server returned non-200 status: {status} {}",
                String::from_utf8_lossy(&body).trim()
            ),
        }),
        Err(e) => Err(FsError::Parse(format!("response envelope: {e}"))),
    }
}

fn status_kind(status: u16) -> ErrorKind {
    match status {
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::InvalidPath,
        404 => ErrorKind::NotFound,
        405 => ErrorKind::MethodNotAllowed,
        400 | 413 => ErrorKind::InvalidArguments,
        _ => ErrorKind::TransportFailure,
    }
}

impl HttpStore {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, cfg: ChunkConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .build();
        Self {
            agent,
            endpoint: endpoint.into(),
            token,
            cfg,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, method: &str, path: &str, query: Option<&str>) -> ureq::Request {
        let mut url = endpoint_url(&self.endpoint, path);
        if let Some(q) = query {
            url.push('?');
            url.push_str(q);
        }
        let req = self.agent.request(method, &url);
        match &self.token {
            Some(token) => req.set(TOKEN_HEADER, token),
            None => req,
        }
    }
}

impl ChunkStore for HttpStore {
    fn execute(&self, cmd: &Command) -> Result<serde_json::Value> {
        tracing::debug!(method = cmd.method(), path = cmd.path(), "remote command");
        let result = match cmd {
            Command::List(_) | Command::Stat(_) => {
                self.request("GET", FILES_PATH, Some(&cmd.to_query())).call()
            }
            Command::ChunkMeta(_) => self
                .request("GET", CHUNK_META_PATH, Some(&cmd.to_query()))
                .call(),
            Command::Mkdir(_) | Command::Touch(_) => self
                .request("POST", FILES_PATH, None)
                .set("Content-Type", "application/json")
                .send_bytes(&cmd.to_json()?),
            Command::Remove(_) => self
                .request("DELETE", FILES_PATH, None)
                .set("Content-Type", "application/json")
                .send_bytes(&cmd.to_json()?),
        };
        read_envelope(into_response(result)?)
    }

    fn pull_chunk(&self, chunk: &Chunk, local_dst: &Path) -> Result<u64> {
        tracing::debug!(?chunk, dst = %local_dst.display(), "pull chunk");
        let resp = into_response(
            self.request("GET", STORAGE_CHUNKS_PATH, Some(&chunk.to_query()))
                .call(),
        )?;
        if resp.status() != 200 {
            read_envelope(resp)?;
            return Err(FsError::Transport("chunk request failed".into()));
        }
        let body = read_body(resp, self.cfg.max_chunk_body() as u64)?;
        let received =
            transport::receive_chunk_body(&body, &self.cfg, |_| Ok(local_dst.to_path_buf()))?;
        Ok(received.bytes)
    }

    fn push_chunk(&self, local_src: &Path, chunk: &Chunk) -> Result<u64> {
        tracing::debug!(src = %local_src.display(), ?chunk, "push chunk");
        let (body, sent) = transport::encode_chunk_body(chunk, local_src)?;
        let result = self
            .request("POST", STORAGE_CHUNKS_PATH, None)
            .set("Content-Type", &multipart::content_type(MULTIPART_BOUNDARY))
            .send_bytes(&body);
        read_envelope(into_response(result)?)?;
        Ok(sent)
    }

    fn chunk_config(&self) -> &ChunkConfig {
        &self.cfg
    }
}

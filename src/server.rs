//! HTTP surface of the chunkfs server
//!
//! Routes (all under [`API_PREFIX`]):
//!
//! | method | path              | body / query                          |
//! |--------|-------------------|---------------------------------------|
//! | GET    | `/files`          | `method=ls&r=..&path=..`, `method=stat` |
//! | POST   | `/files`          | JSON `mkdir` / `touch`                |
//! | DELETE | `/files`          | JSON `rm`                             |
//! | GET    | `/chunks`         | `method=GetChunkMeta&path=..&chunksize=..` |
//! | GET    | `/storage/chunks` | `path=..&offset=..&size=..`           |
//! | POST   | `/storage/chunks` | multipart, one part per chunk         |
//!
//! Every request resolves its caller from the `token` header, then runs with
//! that caller's [`SyncRoot`]. Filesystem work happens on the blocking pool.

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing, Json, Router};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunk::Chunk;
use crate::command::Command;
use crate::config::{ChunkConfig, ServerConfig, UserEntry};
use crate::error::FsError;
use crate::multipart;
use crate::protocol::{
    method, Envelope, API_PREFIX, CHUNK_META_PATH, FILES_PATH, MAX_JSON_REQUEST_SIZE,
    MULTIPART_BOUNDARY, STORAGE_CHUNKS_PATH, TOKEN_HEADER,
};
use crate::sandbox::{Identity, SyncRoot};
use crate::transport;

/// Maps an opaque request token onto a caller.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Option<Identity>;
}

/// Fixed token table, usually from the server config file.
#[derive(Debug, Default, Clone)]
pub struct StaticTokens {
    users: HashMap<String, Identity>,
}

impl StaticTokens {
    pub fn from_users(users: &[UserEntry]) -> Self {
        let users = users
            .iter()
            .map(|u| {
                let identity = Identity {
                    username: u.username.clone(),
                    admin: u.admin,
                };
                (u.token.clone(), identity)
            })
            .collect();
        Self { users }
    }
}

impl IdentityResolver for StaticTokens {
    fn resolve(&self, token: &str) -> Option<Identity> {
        self.users.get(token).cloned()
    }
}

#[derive(Clone)]
pub struct AppState {
    base: Arc<PathBuf>,
    cfg: ChunkConfig,
    identities: Arc<dyn IdentityResolver>,
}

impl AppState {
    pub fn new(base: PathBuf, cfg: ChunkConfig, identities: Arc<dyn IdentityResolver>) -> Self {
        Self {
            base: Arc::new(base),
            cfg,
            identities,
        }
    }

    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self::new(
            cfg.base_path.clone(),
            cfg.chunk,
            Arc::new(StaticTokens::from_users(&cfg.users)),
        )
    }

    fn caller(&self, headers: &HeaderMap) -> crate::Result<(Identity, SyncRoot)> {
        let identity = headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|token| self.identities.resolve(token))
            .ok_or(FsError::Unauthorized)?;
        let root = SyncRoot::for_identity(&self.base, &identity);
        Ok((identity, root))
    }
}

/// Create the base directory and one root per configured non-admin user.
pub fn prepare_roots(base: &Path, users: &[UserEntry]) -> std::io::Result<()> {
    std::fs::create_dir_all(base)?;
    for user in users.iter().filter(|u| !u.admin) {
        std::fs::create_dir_all(base.join(&user.username))?;
    }
    Ok(())
}

fn status_of(err: &FsError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn reply(result: crate::Result<serde_json::Value>) -> Response {
    match result {
        Ok(results) => (StatusCode::OK, Json(Envelope::ok(results))).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "request failed");
            (status_of(&err), Json(Envelope::failure(&err))).into_response()
        }
    }
}

async fn blocking<T, F>(f: F) -> crate::Result<T>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FsError::Transport(format!("worker task failed: {e}")))?
}

async fn run_command(
    state: &AppState,
    headers: &HeaderMap,
    allowed: &[&str],
    decode: impl FnOnce(&ChunkConfig) -> crate::Result<Command>,
) -> crate::Result<serde_json::Value> {
    let (identity, root) = state.caller(headers)?;
    let cmd = decode(&state.cfg)?;
    if !allowed.contains(&cmd.method()) {
        return Err(FsError::IllegalMethod(cmd.method().to_string()));
    }
    cmd.validate_remote(&state.cfg)?;
    tracing::info!(user = %identity.username, method = cmd.method(), path = cmd.path(), "command");

    let cfg = state.cfg;
    let out = blocking(move || cmd.run(&root, &cfg)).await?;
    serde_json::to_value(out).map_err(|e| FsError::Parse(e.to_string()))
}

async fn handle_files_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let query = query.unwrap_or_default();
    reply(
        run_command(&state, &headers, &[method::LS, method::STAT], |cfg| {
            Command::from_query(&query, cfg)
        })
        .await,
    )
}

async fn handle_files_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    reply(
        run_command(&state, &headers, &[method::MKDIR, method::TOUCH], |_| {
            Command::from_json(&body)
        })
        .await,
    )
}

async fn handle_files_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    reply(run_command(&state, &headers, &[method::RM], |_| Command::from_json(&body)).await)
}

async fn handle_chunk_meta(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let query = query.unwrap_or_default();
    reply(
        run_command(&state, &headers, &[method::CHUNK_META], |cfg| {
            Command::from_query(&query, cfg)
        })
        .await,
    )
}

async fn load_chunk(
    state: &AppState,
    headers: &HeaderMap,
    query: &str,
) -> crate::Result<Vec<u8>> {
    let (identity, root) = state.caller(headers)?;
    let chunk = Chunk::parse(query, &state.cfg)?;
    let path = root.resolve(&chunk.path)?;
    tracing::debug!(user = %identity.username, ?chunk, "load chunk");

    let (body, _) = blocking(move || {
        transport::encode_chunk_body(&chunk, &path).map_err(|e| e.with_path(&chunk.path))
    })
    .await?;
    Ok(body)
}

async fn handle_chunk_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    match load_chunk(&state, &headers, &query.unwrap_or_default()).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, multipart::content_type(MULTIPART_BOUNDARY))],
            body,
        )
            .into_response(),
        Err(err) => reply(Err(err)),
    }
}

async fn save_chunks(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
) -> crate::Result<serde_json::Value> {
    let (identity, root) = state.caller(headers)?;
    let cfg = state.cfg;
    let received = blocking(move || {
        transport::receive_chunk_body(&body, &cfg, |chunk| root.resolve(&chunk.path))
    })
    .await?;
    tracing::debug!(
        user = %identity.username,
        chunks = received.chunks,
        bytes = received.bytes,
        "saved chunks"
    );
    serde_json::to_value(received).map_err(|e| FsError::Parse(e.to_string()))
}

async fn handle_chunk_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    reply(save_chunks(&state, &headers, body).await)
}

pub fn router(state: AppState) -> Router {
    let chunk_body_limit = state.cfg.max_chunk_body();
    Router::new()
        .route(
            &format!("{API_PREFIX}{FILES_PATH}"),
            routing::get(handle_files_get)
                .post(handle_files_post)
                .delete(handle_files_delete)
                .layer(DefaultBodyLimit::max(MAX_JSON_REQUEST_SIZE)),
        )
        .route(
            &format!("{API_PREFIX}{CHUNK_META_PATH}"),
            routing::get(handle_chunk_meta),
        )
        .route(
            &format!("{API_PREFIX}{STORAGE_CHUNKS_PATH}"),
            routing::get(handle_chunk_get)
                .post(handle_chunk_post)
                .layer(DefaultBodyLimit::max(chunk_body_limit)),
        )
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve_listener<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("listener address")?;
    tracing::info!(%addr, base = %state.base.display(), "chunkfs server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server")
}

pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {}", bind))?;
    serve_listener(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Vec<UserEntry> {
        vec![
            UserEntry {
                token: "t-alice".into(),
                username: "alice".into(),
                admin: false,
            },
            UserEntry {
                token: "t-root".into(),
                username: "root".into(),
                admin: true,
            },
        ]
    }

    #[test]
    fn static_tokens_resolve_known_callers() {
        let tokens = StaticTokens::from_users(&users());
        assert_eq!(tokens.resolve("t-alice").unwrap().username, "alice");
        assert!(tokens.resolve("t-root").unwrap().admin);
        assert!(tokens.resolve("nope").is_none());
    }

    #[test]
    fn caller_root_follows_identity() {
        let state = AppState::new(
            PathBuf::from("/srv/fs"),
            ChunkConfig::default(),
            Arc::new(StaticTokens::from_users(&users())),
        );
        let mut headers = HeaderMap::new();
        assert!(matches!(state.caller(&headers), Err(FsError::Unauthorized)));

        headers.insert(TOKEN_HEADER, "t-alice".parse().unwrap());
        let (_, root) = state.caller(&headers).unwrap();
        assert_eq!(root, SyncRoot::jail("/srv/fs/alice"));

        headers.insert(TOKEN_HEADER, "t-root".parse().unwrap());
        let (_, root) = state.caller(&headers).unwrap();
        assert_eq!(root, SyncRoot::jail("/srv/fs"));
    }

    #[test]
    fn prepare_roots_creates_user_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("base");
        prepare_roots(&base, &users()).unwrap();
        assert!(base.join("alice").is_dir());
        assert!(!base.join("root").exists());
    }
}

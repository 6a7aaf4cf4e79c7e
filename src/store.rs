//! The remote side of a sync, as seen by the orchestrator
//!
//! A [`ChunkStore`] executes [`Command`]s and moves chunk bytes. [`DirectStore`]
//! does so in-process against a [`SyncRoot`]; the HTTP client in
//! [`crate::client`] marshals the same calls over the wire.

use serde::de::DeserializeOwned;
use std::path::Path;

use crate::catalog::{ListEntry, PathResult};
use crate::checksum::ChunkMeta;
use crate::chunk::Chunk;
use crate::command::{ChunkMetaCmd, Command, ListCmd, MkdirCmd, RmCmd, StatCmd, TouchCmd};
use crate::config::ChunkConfig;
use crate::error::{FsError, Result};
use crate::sandbox::SyncRoot;
use crate::transport;

pub(crate) fn decode_results<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| FsError::Parse(format!("unexpected results: {e}")))
}

pub trait ChunkStore: Send + Sync {
    /// Run one command and return its JSON `results`.
    fn execute(&self, cmd: &Command) -> Result<serde_json::Value>;

    /// Fetch the byte range `chunk` addresses and write it into `local_dst`
    /// at the same offset. Returns the bytes written.
    fn pull_chunk(&self, chunk: &Chunk, local_dst: &Path) -> Result<u64>;

    /// Send the range `chunk.offset..chunk.offset+chunk.size` of `local_src`
    /// to `chunk.path` on the store. Returns the bytes sent.
    fn push_chunk(&self, local_src: &Path, chunk: &Chunk) -> Result<u64>;

    /// Chunking parameters this store is configured with.
    fn chunk_config(&self) -> &ChunkConfig;

    fn stat(&self, path: &str) -> Result<ListEntry> {
        decode_results(self.execute(&Command::Stat(StatCmd { path: path.into() }))?)
    }

    fn list(&self, path: &str, recursive: bool) -> Result<Vec<ListEntry>> {
        let cmd = Command::List(ListCmd {
            r: recursive,
            path: path.into(),
        });
        decode_results(self.execute(&cmd)?)
    }

    fn mkdir(&self, path: &str) -> Result<PathResult> {
        decode_results(self.execute(&Command::Mkdir(MkdirCmd { path: path.into() }))?)
    }

    fn remove(&self, path: &str, recursive: bool) -> Result<Vec<PathResult>> {
        let cmd = Command::Remove(RmCmd {
            r: recursive,
            path: path.into(),
        });
        decode_results(self.execute(&cmd)?)
    }

    fn touch(&self, path: &str, size: u64) -> Result<PathResult> {
        let cmd = Command::Touch(TouchCmd {
            size,
            path: path.into(),
        });
        decode_results(self.execute(&cmd)?)
    }

    fn chunk_meta(&self, path: &str, chunk_size: u64) -> Result<Vec<ChunkMeta>> {
        let cmd = Command::ChunkMeta(ChunkMetaCmd {
            path: path.into(),
            chunk_size,
        });
        decode_results(self.execute(&cmd)?)
    }
}

/// Runs commands in-process under a sandbox root.
#[derive(Debug, Clone)]
pub struct DirectStore {
    root: SyncRoot,
    cfg: ChunkConfig,
}

impl DirectStore {
    pub fn new(root: SyncRoot, cfg: ChunkConfig) -> Self {
        Self { root, cfg }
    }

    pub fn root(&self) -> &SyncRoot {
        &self.root
    }

    fn validate(&self, cmd: &Command) -> Result<()> {
        match self.root {
            SyncRoot::Local => cmd.validate_local(&self.cfg),
            SyncRoot::Jail(_) => cmd.validate_remote(&self.cfg),
        }
    }
}

impl ChunkStore for DirectStore {
    fn execute(&self, cmd: &Command) -> Result<serde_json::Value> {
        self.validate(cmd)?;
        let out = cmd.run(&self.root, &self.cfg)?;
        serde_json::to_value(out).map_err(|e| FsError::Parse(e.to_string()))
    }

    fn pull_chunk(&self, chunk: &Chunk, local_dst: &Path) -> Result<u64> {
        chunk.validate_remote(&self.cfg)?;
        let src = self.root.resolve(&chunk.path)?;
        let mut data = Vec::with_capacity(chunk.size as usize);
        transport::read_chunk(&src, chunk.offset, chunk.size, &mut data)
            .map_err(|e| e.with_path(&chunk.path))?;
        transport::write_chunk(local_dst, chunk.offset, chunk.size, &mut data.as_slice())
    }

    fn push_chunk(&self, local_src: &Path, chunk: &Chunk) -> Result<u64> {
        chunk.validate_remote(&self.cfg)?;
        let dst = self.root.resolve(&chunk.path)?;
        let mut data = Vec::with_capacity(chunk.size as usize);
        transport::read_chunk(local_src, chunk.offset, chunk.size, &mut data)?;
        transport::write_chunk(&dst, chunk.offset, chunk.size, &mut data.as_slice())
    }

    fn chunk_config(&self) -> &ChunkConfig {
        &self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;

    fn store() -> (tempfile::TempDir, DirectStore) {
        let tmp = tempfile::tempdir().unwrap();
        let s = DirectStore::new(SyncRoot::jail(tmp.path()), ChunkConfig::default());
        (tmp, s)
    }

    #[test]
    fn typed_calls_decode_results() {
        let (tmp, s) = store();
        assert_eq!(s.mkdir("/a/b").unwrap().path, "/a/b");
        assert_eq!(s.touch("/a/b/f", 3).unwrap().path, "/a/b/f");

        let st = s.stat("/a/b/f").unwrap();
        assert_eq!(st.size, 3);
        assert!(!st.is_dir);

        let entries = s.list("/a", true).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(s.chunk_meta("/a/b/f", 2).unwrap().len(), 2);

        let removed = s.remove("/a", true).unwrap();
        assert_eq!(removed[0].path, "/a");
        assert!(!tmp.path().join("a").exists());
    }

    #[test]
    fn jailed_store_rejects_relative_paths() {
        let (_tmp, s) = store();
        let e = s.mkdir("rel").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidPath);
    }

    #[test]
    fn push_then_pull_chunk() {
        let (tmp, s) = store();
        let local = tempfile::tempdir().unwrap();
        let src = local.path().join("src");
        fs::write(&src, b"abcdefgh").unwrap();

        assert_eq!(s.push_chunk(&src, &Chunk::new("/copy", 4, 4)).unwrap(), 4);
        assert_eq!(fs::read(tmp.path().join("copy")).unwrap(), b"\0\0\0\0efgh");

        let back = local.path().join("back");
        assert_eq!(s.pull_chunk(&Chunk::new("/copy", 4, 4), &back).unwrap(), 4);
        assert_eq!(fs::read(&back).unwrap(), b"\0\0\0\0efgh");
    }

    #[test]
    fn pull_missing_reports_caller_path() {
        let (_tmp, s) = store();
        let local = tempfile::tempdir().unwrap();
        let e = s
            .pull_chunk(&Chunk::new("/nope", 0, 1), &local.path().join("x"))
            .unwrap_err();
        assert_eq!(e.to_string(), "no such file or directory: /nope");
    }
}

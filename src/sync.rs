//! Sync orchestrator: replicate a file or tree between the local filesystem
//! and a [`ChunkStore`], sending only the chunks whose checksums differ.
//!
//! Each file goes through `Start -> MetaSrc -> MetaDst -> Diff -> {NoOp |
//! TransferChunks} -> Done`; the first error ends the file and the whole
//! invocation. Files already completed stay completed, so re-running resumes.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::catalog;
use crate::checksum::{compute_chunk_meta, ChunkMeta};
use crate::chunk::Chunk;
use crate::config::ChunkConfig;
use crate::delta::diff_chunk_meta;
use crate::error::{FsError, Result};
use crate::logger::Logger;
use crate::sandbox::{remote_basename, remote_join, SyncRoot};
use crate::store::ChunkStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub files: u64,
    pub directories: u64,
    pub chunks: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSyncState {
    Start,
    MetaSrc,
    MetaDst,
    Diff,
    NoOp,
    TransferChunks,
    Done,
}

pub struct Syncer<'a> {
    store: &'a dyn ChunkStore,
    logger: &'a dyn Logger,
    cfg: ChunkConfig,
}

fn trace_state(state: FileSyncState, src: &str, dst: &str) {
    tracing::debug!(?state, src, dst, "file sync");
}

/// Suffix of `path` below `root`, without a leading `/`.
fn remote_relative<'p>(path: &'p str, root: &str) -> Result<&'p str> {
    let root = root.trim_end_matches('/');
    match path.strip_prefix(root) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => Ok(rest.trim_start_matches('/')),
        _ => Err(FsError::InvalidArgs(format!("{path} is not below {root}"))),
    }
}

/// Relative local path as `/`-separated segments.
fn to_remote_segments(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl<'a> Syncer<'a> {
    /// Windows are computed with the store's default chunk size on both sides.
    pub fn new(store: &'a dyn ChunkStore, logger: &'a dyn Logger) -> Self {
        let cfg = *store.chunk_config();
        Self { store, logger, cfg }
    }

    fn window(&self) -> u64 {
        self.cfg.default_chunk_size
    }

    /// Copy `remote_src` (file or directory) to `local_dst`.
    pub fn download(&self, remote_src: &str, local_dst: &Path) -> Result<SyncStats> {
        let started = Instant::now();
        let mut stats = SyncStats::default();
        self.logger.start(remote_src, &local_dst.display().to_string());

        let result = self.download_inner(remote_src, local_dst, &mut stats);
        self.finish(result, "download", remote_src, stats, started)
    }

    fn download_inner(&self, remote_src: &str, local_dst: &Path, stats: &mut SyncStats) -> Result<()> {
        let src = self.store.stat(remote_src)?;
        let dst_is_dir = local_dst.is_dir();

        if !src.is_dir {
            let target = if dst_is_dir {
                local_dst.join(remote_basename(&src.path))
            } else {
                local_dst.to_path_buf()
            };
            return self.download_file(&src.path, &target, stats);
        }

        if !dst_is_dir {
            return Err(FsError::DestShouldBeDirectory(local_dst.display().to_string()));
        }

        let src_root = match src.path.trim_end_matches('/') {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        let dst_root = match remote_basename(&src_root) {
            "" => local_dst.to_path_buf(),
            name => local_dst.join(name),
        };
        self.make_local_dir(&dst_root, stats)?;

        for entry in self.store.list(&src_root, true)? {
            let rel = remote_relative(&entry.path, &src_root)?;
            let target = dst_root.join(rel);
            if entry.is_dir {
                self.make_local_dir(&target, stats)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            self.download_file(&entry.path, &target, stats)?;
        }
        Ok(())
    }

    fn make_local_dir(&self, path: &Path, stats: &mut SyncStats) -> Result<()> {
        fs::create_dir_all(path)?;
        self.logger.mkdir(&path.display().to_string());
        stats.directories += 1;
        Ok(())
    }

    /// Bring `local` up to date with the remote file `remote`.
    pub fn download_file(&self, remote: &str, local: &Path, stats: &mut SyncStats) -> Result<()> {
        let shown = local.display().to_string();
        trace_state(FileSyncState::Start, remote, &shown);

        trace_state(FileSyncState::MetaSrc, remote, &shown);
        let src_meta = self.store.chunk_meta(remote, self.window())?;

        trace_state(FileSyncState::MetaDst, remote, &shown);
        let dst_meta = match compute_chunk_meta(local, self.window(), &self.cfg) {
            Ok(m) => m,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let needed = self.diff(src_meta, dst_meta, remote, &shown);
        let (mut chunks, mut bytes) = (0, 0);
        if needed.is_empty() {
            trace_state(FileSyncState::NoOp, remote, &shown);
            if !local.exists() {
                File::create(local)?;
            }
        } else {
            trace_state(FileSyncState::TransferChunks, remote, &shown);
            for meta in &needed {
                let chunk = Chunk::new(remote, meta.offset, meta.length);
                let n = self.store.pull_chunk(&chunk, local)?;
                self.logger.chunk_done(&shown, meta.offset, n);
                chunks += 1;
                bytes += n;
            }
        }

        trace_state(FileSyncState::Done, remote, &shown);
        self.logger.file_done(remote, &shown, chunks, bytes);
        stats.files += 1;
        stats.chunks += chunks;
        stats.bytes += bytes;
        Ok(())
    }

    /// Copy `local_src` (file or directory) into the existing remote
    /// directory `remote_dst`.
    pub fn upload(&self, local_src: &Path, remote_dst: &str) -> Result<SyncStats> {
        let started = Instant::now();
        let mut stats = SyncStats::default();
        self.logger.start(&local_src.display().to_string(), remote_dst);

        let result = self.upload_inner(local_src, remote_dst, &mut stats);
        self.finish(result, "upload", remote_dst, stats, started)
    }

    fn upload_inner(&self, local_src: &Path, remote_dst: &str, stats: &mut SyncStats) -> Result<()> {
        match self.store.stat(remote_dst) {
            Ok(entry) if entry.is_dir => {}
            Ok(_) => return Err(FsError::MkdirFirst(remote_dst.to_string())),
            Err(e) if e.is_not_found() => return Err(FsError::MkdirFirst(remote_dst.to_string())),
            Err(e) => return Err(e),
        }

        let src = local_src.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::FileNotFound(local_src.display().to_string()),
            _ => e.into(),
        })?;
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !src.is_dir() {
            let dst = remote_join(remote_dst, &name);
            return self.upload_file(&src, &dst, stats);
        }

        let dst_root = remote_join(remote_dst, &name);
        let mut made = HashSet::new();
        self.make_remote_dir(&dst_root, &mut made, stats)?;

        // listed paths keep the canonical prefix since the root is local
        for entry in catalog::list(&src, true, &SyncRoot::Local)? {
            let path = PathBuf::from(&entry.path);
            let rel = path
                .strip_prefix(&src)
                .map_err(|_| FsError::InvalidArgs(format!("{} is not below {}", entry.path, src.display())))?;
            let dst = remote_join(&dst_root, &to_remote_segments(rel));
            if entry.is_dir {
                self.make_remote_dir(&dst, &mut made, stats)?;
                continue;
            }
            if let Some(parent) = rel.parent() {
                let parent = remote_join(&dst_root, &to_remote_segments(parent));
                self.make_remote_dir(&parent, &mut made, stats)?;
            }
            self.upload_file(&path, &dst, stats)?;
        }
        Ok(())
    }

    fn make_remote_dir(&self, path: &str, made: &mut HashSet<String>, stats: &mut SyncStats) -> Result<()> {
        if made.contains(path) {
            return Ok(());
        }
        self.store.mkdir(path)?;
        self.logger.mkdir(path);
        made.insert(path.to_string());
        stats.directories += 1;
        Ok(())
    }

    /// Bring the remote file `remote` up to date with `local`.
    pub fn upload_file(&self, local: &Path, remote: &str, stats: &mut SyncStats) -> Result<()> {
        let shown = local.display().to_string();
        trace_state(FileSyncState::Start, &shown, remote);

        trace_state(FileSyncState::MetaSrc, &shown, remote);
        let src_meta = compute_chunk_meta(local, self.window(), &self.cfg)?;

        trace_state(FileSyncState::MetaDst, &shown, remote);
        let (dst_meta, dst_missing) = match self.store.chunk_meta(remote, self.window()) {
            Ok(m) => (m, false),
            Err(e) if e.is_not_found() => (Vec::new(), true),
            Err(e) => return Err(e),
        };

        let needed = self.diff(src_meta, dst_meta, &shown, remote);
        let (mut chunks, mut bytes) = (0, 0);
        if needed.is_empty() {
            trace_state(FileSyncState::NoOp, &shown, remote);
            if dst_missing {
                self.store.touch(remote, 0)?;
            }
        } else {
            trace_state(FileSyncState::TransferChunks, &shown, remote);
            for meta in &needed {
                let chunk = Chunk::new(remote, meta.offset, meta.length);
                let n = self.store.push_chunk(local, &chunk)?;
                self.logger.chunk_done(remote, meta.offset, n);
                chunks += 1;
                bytes += n;
            }
        }

        trace_state(FileSyncState::Done, &shown, remote);
        self.logger.file_done(&shown, remote, chunks, bytes);
        stats.files += 1;
        stats.chunks += chunks;
        stats.bytes += bytes;
        Ok(())
    }

    fn diff(&self, src: Vec<ChunkMeta>, dst: Vec<ChunkMeta>, from: &str, to: &str) -> Vec<ChunkMeta> {
        trace_state(FileSyncState::Diff, from, to);
        let (src_windows, dst_windows) = (src.len(), dst.len());
        let needed = diff_chunk_meta(src, dst);
        tracing::debug!(src_windows, dst_windows, needed = needed.len(), from, to, "chunk diff");
        needed
    }

    fn finish(
        &self,
        result: Result<()>,
        context: &str,
        path: &str,
        stats: SyncStats,
        started: Instant,
    ) -> Result<SyncStats> {
        let secs = started.elapsed().as_secs_f64();
        match result {
            Ok(()) => {
                self.logger.done(stats.files, stats.bytes, secs);
                tracing::info!(
                    files = stats.files,
                    chunks = stats.chunks,
                    bytes = stats.bytes,
                    secs,
                    "{context} finished"
                );
                Ok(stats)
            }
            Err(e) => {
                self.logger.error(context, path, &e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::logger::NoopLogger;
    use crate::store::DirectStore;

    fn small_chunks() -> ChunkConfig {
        ChunkConfig {
            default_chunk_size: 4,
            ..ChunkConfig::default()
        }
    }

    struct Fixture {
        remote: tempfile::TempDir,
        local: tempfile::TempDir,
        store: DirectStore,
    }

    fn fixture(cfg: ChunkConfig) -> Fixture {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let store = DirectStore::new(SyncRoot::jail(remote.path()), cfg);
        Fixture { remote, local, store }
    }

    #[test]
    fn upload_requires_existing_remote_dir() {
        let f = fixture(small_chunks());
        let src = f.local.path().join("a.txt");
        fs::write(&src, b"hello").unwrap();
        let syncer = Syncer::new(&f.store, &NoopLogger);

        let e = syncer.upload(&src, "/missing").unwrap_err();
        assert!(matches!(e, FsError::MkdirFirst(_)));
        assert!(e.to_string().contains("chunkfs mkdir /missing"));
    }

    #[test]
    fn file_round_trip_and_idempotent_resync() {
        let f = fixture(small_chunks());
        let src = f.local.path().join("a.txt");
        fs::write(&src, b"Hello, World!").unwrap();
        fs::create_dir(f.remote.path().join("up")).unwrap();
        let syncer = Syncer::new(&f.store, &NoopLogger);

        let stats = syncer.upload(&src, "/up").unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.chunks, 4);
        assert_eq!(stats.bytes, 13);
        assert_eq!(fs::read(f.remote.path().join("up/a.txt")).unwrap(), b"Hello, World!");

        let again = syncer.upload(&src, "/up").unwrap();
        assert_eq!(again.chunks, 0);
        assert_eq!(again.bytes, 0);

        let back = f.local.path().join("back.txt");
        let stats = syncer.download("/up/a.txt", &back).unwrap();
        assert_eq!(stats.chunks, 4);
        assert_eq!(fs::read(&back).unwrap(), b"Hello, World!");

        let again = syncer.download("/up/a.txt", &back).unwrap();
        assert_eq!(again.chunks, 0);
    }

    #[test]
    fn changed_tail_moves_one_window() {
        const MIB: usize = 1024 * 1024;
        let f = fixture(ChunkConfig::default());
        let mut data: Vec<u8> = (0..5 * MIB).map(|i| (i % 253) as u8).collect();
        let src = f.local.path().join("big.bin");
        fs::write(&src, &data).unwrap();
        fs::create_dir(f.remote.path().join("d")).unwrap();
        let syncer = Syncer::new(&f.store, &NoopLogger);
        assert_eq!(syncer.upload(&src, "/d").unwrap().chunks, 3);

        for b in &mut data[4 * MIB..] {
            *b = b.wrapping_add(1);
        }
        fs::write(&src, &data).unwrap();

        let stats = syncer.upload(&src, "/d").unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.bytes, MIB as u64);
        assert_eq!(fs::read(f.remote.path().join("d/big.bin")).unwrap(), data);
    }

    #[test]
    fn shrunk_source_keeps_destination_tail() {
        let f = fixture(small_chunks());
        let syncer = Syncer::new(&f.store, &NoopLogger);
        let local = f.local.path().join("f");
        fs::write(&local, b"abcdefghijklmnop").unwrap();
        fs::write(f.remote.path().join("f"), b"abcdXXXX").unwrap();

        // remote is shorter: only the differing and missing windows come down
        let stats = syncer.download("/f", &local).unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(fs::read(&local).unwrap(), b"abcdXXXXijklmnop");
    }

    #[test]
    fn directory_round_trip() {
        let f = fixture(small_chunks());
        let tree = f.local.path().join("proj");
        fs::create_dir_all(tree.join("src/nested")).unwrap();
        fs::create_dir_all(tree.join("empty")).unwrap();
        fs::write(tree.join("README"), b"readme text").unwrap();
        fs::write(tree.join("src/main.rs"), b"fn main() {}").unwrap();
        fs::write(tree.join("src/nested/zero"), b"").unwrap();
        fs::create_dir(f.remote.path().join("backup")).unwrap();
        let syncer = Syncer::new(&f.store, &NoopLogger);

        let up = syncer.upload(&tree, "/backup").unwrap();
        assert_eq!(up.files, 3);
        let remote_tree = f.remote.path().join("backup/proj");
        assert_eq!(fs::read(remote_tree.join("src/main.rs")).unwrap(), b"fn main() {}");
        assert!(remote_tree.join("empty").is_dir());
        assert_eq!(fs::metadata(remote_tree.join("src/nested/zero")).unwrap().len(), 0);

        let out = tempfile::tempdir().unwrap();
        let down = syncer.download("/backup/proj", out.path()).unwrap();
        assert_eq!(down.files, 3);
        let local_tree = out.path().join("proj");
        assert_eq!(fs::read(local_tree.join("README")).unwrap(), b"readme text");
        assert!(local_tree.join("empty").is_dir());
        assert!(local_tree.join("src/nested/zero").is_file());

        assert_eq!(syncer.upload(&tree, "/backup").unwrap().chunks, 0);
    }

    #[test]
    fn download_file_into_directory_uses_basename() {
        let f = fixture(small_chunks());
        fs::write(f.remote.path().join("data.bin"), b"0123456789").unwrap();
        let syncer = Syncer::new(&f.store, &NoopLogger);

        syncer.download("/data.bin", f.local.path()).unwrap();
        assert_eq!(fs::read(f.local.path().join("data.bin")).unwrap(), b"0123456789");
    }

    #[test]
    fn download_directory_needs_local_directory() {
        let f = fixture(small_chunks());
        fs::create_dir(f.remote.path().join("d")).unwrap();
        let syncer = Syncer::new(&f.store, &NoopLogger);
        let e = syncer
            .download("/d", &f.local.path().join("nope"))
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotADirectory);
    }

    #[test]
    fn missing_remote_source_is_not_found() {
        let f = fixture(small_chunks());
        let syncer = Syncer::new(&f.store, &NoopLogger);
        let e = syncer.download("/ghost", f.local.path()).unwrap_err();
        assert!(e.is_not_found());
    }

    #[test]
    fn relative_paths() {
        assert_eq!(remote_relative("/a/b/c", "/a").unwrap(), "b/c");
        assert_eq!(remote_relative("/a/b", "/").unwrap(), "a/b");
        assert!(remote_relative("/ab/c", "/a").is_err());
        assert_eq!(to_remote_segments(Path::new("x/y")), "x/y");
    }
}

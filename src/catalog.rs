//! Filesystem catalog: listing, stat, directory/file creation and removal.
//!
//! Every function takes already-resolved filesystem paths plus the caller's
//! [`SyncRoot`], which anchors glob expansion and expresses emitted paths the
//! way the caller sees them.

use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, Metadata};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::config::ChunkConfig;
use crate::error::{FsError, Result};
use crate::sandbox::SyncRoot;

/// One listed file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListEntry {
    pub path: String,
    /// Modification time, nanoseconds since the Unix epoch.
    pub mod_time: i64,
    pub size: u64,
    pub is_dir: bool,
}

/// Path touched by a mutating command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathResult {
    pub path: String,
}

fn entry_from(path: &Path, md: &Metadata, root: &SyncRoot) -> ListEntry {
    let mod_time = md
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    ListEntry {
        path: root.strip(path),
        mod_time,
        size: md.len(),
        is_dir: md.is_dir(),
    }
}

fn not_found(path: &Path, root: &SyncRoot) -> FsError {
    FsError::FileNotFound(root.strip(path))
}

pub fn has_glob(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Expand wildcards in `pattern`, a path already resolved under `root`.
///
/// Only the part below the root is treated as a pattern; the root's own
/// components are literal. A pattern without wildcards expands to itself when
/// it exists and to nothing otherwise. Matches that leave the root through a
/// symlink are dropped. Matches come back sorted.
pub fn expand_glob(pattern: &Path, root: &SyncRoot) -> Result<Vec<PathBuf>> {
    let (anchor, rel) = match root.base() {
        Some(base) => match pattern.strip_prefix(base) {
            Ok(rel) => (base.to_path_buf(), rel),
            Err(_) => return Err(FsError::OutsideRoot(pattern.display().to_string())),
        },
        None => (PathBuf::new(), pattern),
    };

    let mut matches = if has_glob(&rel.to_string_lossy()) {
        walk_glob(anchor, rel, pattern)?
    } else {
        match fs::symlink_metadata(pattern) {
            Ok(_) => vec![pattern.to_path_buf()],
            Err(_) => Vec::new(),
        }
    };
    matches.retain(|m| {
        let inside = root.contains(m);
        if !inside {
            tracing::warn!(path = %root.strip(m), "glob match escapes the root, skipped");
        }
        inside
    });
    Ok(matches)
}

fn walk_glob(mut prefix: PathBuf, rel: &Path, pattern: &Path) -> Result<Vec<PathBuf>> {
    let mut rest: Vec<String> = Vec::new();
    for component in rel.components() {
        let s = component.as_os_str().to_string_lossy();
        if rest.is_empty() && !has_glob(&s) {
            prefix.push(component);
        } else {
            rest.push(s.into_owned());
        }
    }

    let matcher = GlobBuilder::new(&rest.join("/"))
        .literal_separator(true)
        .build()
        .map_err(|e| FsError::Parse(format!("bad pattern '{}': {e}", pattern.display())))?
        .compile_matcher();

    let walk_root = if prefix.as_os_str().is_empty() {
        Path::new(".")
    } else {
        prefix.as_path()
    };

    let mut out = Vec::new();
    for entry in WalkDir::new(walk_root)
        .min_depth(rest.len())
        .max_depth(rest.len())
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let Ok(found) = entry.path().strip_prefix(walk_root) else {
            continue;
        };
        if matcher.is_match(found) {
            if prefix.as_os_str().is_empty() {
                out.push(found.to_path_buf());
            } else {
                out.push(entry.into_path());
            }
        }
    }
    Ok(out)
}

fn list_path(path: &Path, recursive: bool, root: &SyncRoot, out: &mut Vec<ListEntry>) -> Result<()> {
    let mut walker = WalkDir::new(path).follow_links(false).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        // A listed directory contributes its children, not itself.
        if entry.depth() == 0 && entry.file_type().is_dir() {
            continue;
        }
        let md = entry.metadata().map_err(io::Error::from)?;
        out.push(entry_from(entry.path(), &md, root));
    }
    Ok(())
}

/// List every match of `pattern`: a file yields itself, a directory yields its
/// immediate children, or all descendants when `recursive`.
pub fn list(pattern: &Path, recursive: bool, root: &SyncRoot) -> Result<Vec<ListEntry>> {
    let matches = expand_glob(pattern, root)?;
    if matches.is_empty() {
        return Err(not_found(pattern, root));
    }
    tracing::info!(path = %root.strip(pattern), recursive, "ls");

    let mut entries = Vec::new();
    for m in &matches {
        list_path(m, recursive, root, &mut entries)?;
    }
    Ok(entries)
}

pub fn stat(path: &Path, root: &SyncRoot) -> Result<ListEntry> {
    match fs::metadata(path) {
        Ok(md) => Ok(entry_from(path, &md, root)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found(path, root)),
        Err(e) => Err(e.into()),
    }
}

/// Create `path` and any missing parents. An existing directory is success.
pub fn make_directory(path: &Path, root: &SyncRoot) -> Result<PathResult> {
    if let Ok(md) = fs::metadata(path) {
        if !md.is_dir() {
            return Err(FsError::AlreadyExists(root.strip(path)));
        }
    }
    fs::create_dir_all(path)?;
    Ok(PathResult {
        path: root.strip(path),
    })
}

/// Remove every match of `pattern`. Directories need `recursive`; all matches
/// are checked before anything is deleted.
pub fn remove(pattern: &Path, recursive: bool, root: &SyncRoot) -> Result<Vec<PathResult>> {
    let matches = expand_glob(pattern, root)?;
    if matches.is_empty() {
        return Err(not_found(pattern, root));
    }

    let mut targets = Vec::with_capacity(matches.len());
    for m in matches {
        let md = fs::symlink_metadata(&m)?;
        if md.is_dir() && !recursive {
            return Err(FsError::CannotDeleteDirectory(root.strip(&m)));
        }
        targets.push((m, md.is_dir()));
    }

    let mut removed = Vec::with_capacity(targets.len());
    for (path, is_dir) in targets {
        if is_dir {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        tracing::info!(path = %root.strip(&path), "rm");
        removed.push(PathResult {
            path: root.strip(&path),
        });
    }
    Ok(removed)
}

/// Create (or truncate) `path` as a sparse file of exactly `size` bytes.
pub fn create_sized_file(path: &Path, size: u64) -> io::Result<()> {
    let mut file = File::create(path)?;
    if size == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(size - 1))?;
    file.write_all(&[0])?;
    Ok(())
}

/// Make sure `path` is a file of `size` bytes. A file already of that size is
/// left untouched.
pub fn touch(path: &Path, size: u64, cfg: &ChunkConfig, root: &SyncRoot) -> Result<PathResult> {
    cfg.check_file_size(size)?;

    let needs_create = match fs::metadata(path) {
        Ok(md) if md.is_dir() => return Err(FsError::DirectoryAlreadyExists(root.strip(path))),
        Ok(md) => md.len() != size,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => return Err(e.into()),
    };
    if needs_create {
        create_sized_file(path, size)?;
    }
    Ok(PathResult {
        path: root.strip(path),
    })
}

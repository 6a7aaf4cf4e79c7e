//! Sandbox roots: mapping caller-visible absolute paths onto the local filesystem
//!
//! Remote paths are always absolute (`/a/b`) and interpreted under the caller's
//! root. Administrators see the whole base; everyone else is confined to
//! `base/<username>`.

use std::path::{Component, Path, PathBuf};

use crate::error::{FsError, Result};

/// Authenticated caller, as resolved by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub admin: bool,
}

pub fn validate_absolute(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(FsError::ShouldBeAbsolutePath(path.to_string()));
    }
    Ok(())
}

/// Join a relative suffix onto a remote path, producing a clean `/`-separated path.
pub fn remote_join(base: &str, rel: &str) -> String {
    let mut out = String::from("/");
    for seg in base.split('/').chain(rel.split('/')) {
        if seg.is_empty() || seg == "." {
            continue;
        }
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(seg);
    }
    out
}

/// Last path segment of a remote path (`/a/b/` -> `b`).
pub fn remote_basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRoot {
    /// Client-side execution: paths are used as given.
    Local,
    /// Server-side execution: paths are confined below this directory.
    Jail(PathBuf),
}

impl SyncRoot {
    pub fn jail(base: impl Into<PathBuf>) -> Self {
        Self::Jail(base.into())
    }

    /// Root for a caller, recomputed per request.
    pub fn for_identity(base: &Path, identity: &Identity) -> Self {
        if identity.admin {
            Self::Jail(base.to_path_buf())
        } else {
            Self::Jail(base.join(&identity.username))
        }
    }

    /// Map a caller path onto the filesystem.
    ///
    /// Under a jail the path must be absolute, may not contain `..`, and must
    /// not leave the root through a symlink.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let base = match self {
            Self::Local => return Ok(PathBuf::from(path)),
            Self::Jail(base) => base,
        };
        validate_absolute(path)?;
        if path.contains('\0') {
            return Err(FsError::OutsideRoot(path.to_string()));
        }

        let mut joined = base.clone();
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(s) => joined.push(s),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(FsError::OutsideRoot(path.to_string()));
                }
            }
        }

        // Symlinks: the deepest existing ancestor must still be under the root.
        if let Ok(canon_base) = base.canonicalize() {
            let mut probe = joined.as_path();
            loop {
                if let Ok(canon) = probe.canonicalize() {
                    if !canon.starts_with(&canon_base) {
                        return Err(FsError::OutsideRoot(path.to_string()));
                    }
                    break;
                }
                match probe.parent() {
                    Some(parent) if parent.starts_with(base) => probe = parent,
                    _ => break,
                }
            }
        }

        Ok(joined)
    }

    /// Directory the jail is anchored at; `None` for local execution.
    pub fn base(&self) -> Option<&Path> {
        match self {
            Self::Local => None,
            Self::Jail(base) => Some(base),
        }
    }

    /// Whether an existing `path` really lives under the root once symlinks
    /// are followed. A dangling link is judged by the directory holding it.
    pub fn contains(&self, path: &Path) -> bool {
        let Some(base) = self.base() else {
            return true;
        };
        let Ok(canon_base) = base.canonicalize() else {
            return false;
        };
        match path.canonicalize() {
            Ok(canon) => canon.starts_with(&canon_base),
            Err(_) => path
                .parent()
                .and_then(|p| p.canonicalize().ok())
                .is_some_and(|p| p.starts_with(&canon_base)),
        }
    }

    /// Express a filesystem path the way the caller sees it.
    pub fn strip(&self, path: &Path) -> String {
        let base = match self {
            Self::Local => return path.display().to_string(),
            Self::Jail(base) => base,
        };
        match path.strip_prefix(base) {
            Ok(rel) => {
                let rel = rel.to_string_lossy();
                if rel.is_empty() {
                    "/".to_string()
                } else {
                    format!("/{rel}")
                }
            }
            Err(_) => path.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn identity_roots() {
        let base = Path::new("/srv/fs");
        let alice = Identity {
            username: "alice".into(),
            admin: false,
        };
        let root = Identity {
            username: "root".into(),
            admin: true,
        };
        assert_eq!(
            SyncRoot::for_identity(base, &alice),
            SyncRoot::Jail(PathBuf::from("/srv/fs/alice"))
        );
        assert_eq!(
            SyncRoot::for_identity(base, &root),
            SyncRoot::Jail(PathBuf::from("/srv/fs"))
        );
    }

    #[test]
    fn resolve_and_strip_are_inverse() {
        let tmp = tempfile::tempdir().unwrap();
        let root = SyncRoot::jail(tmp.path());
        let p = root.resolve("/a/b.txt").unwrap();
        assert_eq!(p, tmp.path().join("a").join("b.txt"));
        assert_eq!(root.strip(&p), "/a/b.txt");
        assert_eq!(root.strip(tmp.path()), "/");
        assert_eq!(root.resolve("/").unwrap(), tmp.path());
    }

    #[test]
    fn resolve_rejects_escapes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = SyncRoot::jail(tmp.path().join("alice"));
        std::fs::create_dir_all(tmp.path().join("alice")).unwrap();

        let e = root.resolve("relative/x").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidPath);
        let e = root.resolve("/../bob/secret").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidPath);
        let e = root.resolve("/a/../../bob").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidPath);
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let jail = tmp.path().join("alice");
        let outside = tmp.path().join("bob");
        std::fs::create_dir_all(&jail).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, jail.join("link")).unwrap();

        let root = SyncRoot::jail(&jail);
        let e = root.resolve("/link/new-file").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidPath);
        assert!(root.resolve("/plain/new-file").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn contains_follows_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let jail = tmp.path().join("alice");
        let outside = tmp.path().join("bob");
        std::fs::create_dir_all(jail.join("inner")).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, jail.join("out")).unwrap();
        std::os::unix::fs::symlink(jail.join("inner"), jail.join("in")).unwrap();

        let root = SyncRoot::jail(&jail);
        assert!(root.contains(&jail.join("inner")));
        assert!(root.contains(&jail.join("in")));
        assert!(!root.contains(&jail.join("out")));
        assert!(!root.contains(&outside));
        assert!(SyncRoot::Local.contains(&outside));
    }

    #[test]
    fn local_root_passes_paths_through() {
        let root = SyncRoot::Local;
        assert_eq!(root.resolve("rel/x").unwrap(), PathBuf::from("rel/x"));
        assert_eq!(root.strip(Path::new("/tmp/x")), "/tmp/x");
    }

    #[test]
    fn remote_path_helpers() {
        assert_eq!(remote_join("/data", "sub/a.txt"), "/data/sub/a.txt");
        assert_eq!(remote_join("/data/", "/sub//a.txt"), "/data/sub/a.txt");
        assert_eq!(remote_join("/", ""), "/");
        assert_eq!(remote_basename("/a/b/"), "b");
        assert_eq!(remote_basename("/a/b.txt"), "b.txt");
        assert_eq!(remote_basename("/"), "");
    }
}

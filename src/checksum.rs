//! Per-window checksums of a file, used to decide which chunks differ

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use crate::config::ChunkConfig;
use crate::error::{FsError, Result};

/// One fixed-size window of a file. Windows produced by a single digest run are
/// contiguous and ascending by offset; only the last may be shorter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub offset: u64,
    pub checksum: String,
    #[serde(rename = "len")]
    pub length: u64,
}

/// Lowercase hex MD5 of a window.
pub fn window_checksum(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Fill `buf` from `reader`, stopping early only at end of file.
fn read_window<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Walk `path` sequentially in `window`-byte windows and checksum each one.
pub fn compute_chunk_meta(path: &Path, window: u64, cfg: &ChunkConfig) -> Result<Vec<ChunkMeta>> {
    cfg.check_chunk_size(window)?;

    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(FsError::FileNotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if meta.is_dir() {
        return Err(FsError::DirectoryNotAFile(path.display().to_string()));
    }

    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; window as usize];
    let mut metas = Vec::with_capacity((meta.len() / window + 1) as usize);
    let mut offset = 0u64;

    loop {
        let n = read_window(&mut file, &mut buffer)?;
        if n == 0 {
            break;
        }
        metas.push(ChunkMeta {
            offset,
            checksum: window_checksum(&buffer[..n]),
            length: n as u64,
        });
        offset += n as u64;
    }

    tracing::debug!(path = %path.display(), windows = metas.len(), "computed chunk meta");
    Ok(metas)
}

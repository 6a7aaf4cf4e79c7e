//! Chunk transport: byte-range reads and writes, and their multipart framing
//!
//! A pull frames `size` bytes of a file as one `chunk` part; a push body is the
//! same framing, possibly with several parts. The receiver of either decodes
//! each part's file name back into a [`Chunk`] and writes the payload at its
//! offset.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::chunk::Chunk;
use crate::config::ChunkConfig;
use crate::error::{FsError, Result};
use crate::multipart::{self, PartWriter};
use crate::protocol::{CHUNK_FIELD, MULTIPART_BOUNDARY};

/// Open `path` for reading, positioned at `offset`.
fn open_at(path: &Path, offset: u64) -> Result<File> {
    match fs::metadata(path) {
        Ok(md) if md.is_dir() => {
            return Err(FsError::DirectoryNotAFile(path.display().to_string()))
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(FsError::FileNotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    }
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    Ok(file)
}

/// Copy up to `size` bytes starting at `offset` of `path` into `w`.
/// Reaching end of file first is not an error.
pub fn read_chunk<W: Write>(path: &Path, offset: u64, size: u64, w: &mut W) -> Result<u64> {
    let file = open_at(path, offset)?;
    let n = io::copy(&mut file.take(size), w)?;
    Ok(n)
}

/// Write up to `size` bytes from `r` into `path` at `offset`, creating the
/// file when absent. Existing bytes outside the range are kept.
pub fn write_chunk<R: Read>(path: &Path, offset: u64, size: u64, r: &mut R) -> Result<u64> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let n = io::copy(&mut r.take(size), &mut file)?;
    tracing::debug!(path = %path.display(), offset, size, written = n, "saved chunk");
    Ok(n)
}

/// Frame `descriptor.size` bytes of `source` (from `descriptor.offset`) as one
/// multipart body. The part's file name is `descriptor` encoded, telling the
/// receiver where the bytes belong. Returns the body and the payload length.
pub fn encode_chunk_body(descriptor: &Chunk, source: &Path) -> Result<(Vec<u8>, u64)> {
    let mut file = open_at(source, descriptor.offset)?;
    let capacity = descriptor.size as usize + 512;
    let mut writer = PartWriter::new(Vec::with_capacity(capacity), MULTIPART_BOUNDARY);
    let n = writer.write_file_part(CHUNK_FIELD, &descriptor.to_query(), &mut file, descriptor.size)?;
    Ok((writer.finish()?, n))
}

/// Totals for one received multipart body.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Received {
    pub chunks: u64,
    pub bytes: u64,
}

/// Write every `chunk` part of `body`. `target` maps each decoded descriptor to
/// the file it is written into; the first failing part aborts the rest.
pub fn receive_chunk_body<F>(body: &[u8], cfg: &ChunkConfig, mut target: F) -> Result<Received>
where
    F: FnMut(&Chunk) -> Result<PathBuf>,
{
    let mut received = Received::default();
    for part in multipart::parse_parts(body, MULTIPART_BOUNDARY)? {
        if part.name.as_deref() != Some(CHUNK_FIELD) {
            continue;
        }
        let name = part
            .filename
            .as_deref()
            .ok_or_else(|| FsError::Multipart("chunk part has no file name".into()))?;
        let chunk = Chunk::parse(name, cfg)?;
        let path = target(&chunk)?;
        let mut data = part.data;
        received.bytes += write_chunk(&path, chunk.offset, chunk.size, &mut data)?;
        received.chunks += 1;
    }
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn read_range_and_short_tail() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f");
        fs::write(&p, b"0123456789").unwrap();

        let mut out = Vec::new();
        assert_eq!(read_chunk(&p, 2, 3, &mut out).unwrap(), 3);
        assert_eq!(out, b"234");

        let mut out = Vec::new();
        assert_eq!(read_chunk(&p, 8, 100, &mut out).unwrap(), 2);
        assert_eq!(out, b"89");

        let mut out = Vec::new();
        assert_eq!(read_chunk(&p, 50, 4, &mut out).unwrap(), 0);
    }

    #[test]
    fn read_errors() {
        let dir = tempfile::tempdir().unwrap();
        let e = read_chunk(&dir.path().join("nope"), 0, 1, &mut Vec::new()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotFound);
        let e = read_chunk(dir.path(), 0, 1, &mut Vec::new()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotAFile);
    }

    #[test]
    fn write_creates_and_patches_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f");
        write_chunk(&p, 4, 4, &mut &b"WXYZ"[..]).unwrap();
        assert_eq!(fs::read(&p).unwrap(), b"\0\0\0\0WXYZ");

        write_chunk(&p, 0, 2, &mut &b"abcdef"[..]).unwrap();
        assert_eq!(fs::read(&p).unwrap(), b"ab\0\0WXYZ");

        // short source at EOF still succeeds
        let n = write_chunk(&p, 6, 10, &mut &b"!"[..]).unwrap();
        assert_eq!(n, 1);
        assert_eq!(fs::read(&p).unwrap(), b"ab\0\0WX!Z");
    }

    #[test]
    fn framed_chunk_lands_at_descriptor_offset() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"hello world").unwrap();
        fs::write(&dst, b"HELLO WORLD").unwrap();

        let (body, n) = encode_chunk_body(&Chunk::new("/remote/dst", 6, 5), &src).unwrap();
        assert_eq!(n, 5);
        let cfg = ChunkConfig::default();
        let got = receive_chunk_body(&body, &cfg, |chunk| {
            assert_eq!(chunk.path, "/remote/dst");
            Ok(dst.clone())
        })
        .unwrap();

        assert_eq!(got, Received { chunks: 1, bytes: 5 });
        assert_eq!(fs::read(&dst).unwrap(), b"HELLO world");
    }

    #[test]
    fn bad_descriptor_aborts_receive() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::write(&src, b"abc").unwrap();
        let (body, _) = encode_chunk_body(&Chunk::new("relative", 0, 3), &src).unwrap();
        let e = receive_chunk_body(&body, &ChunkConfig::default(), |_| {
            Ok(dir.path().join("never"))
        })
        .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidPath);
        assert!(!dir.path().join("never").exists());
    }
}

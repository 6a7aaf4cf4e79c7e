use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Transfer events reported by the sync orchestrator.
pub trait Logger: Send + Sync {
    fn start(&self, _src: &str, _dst: &str) {}
    fn chunk_done(&self, _dst: &str, _offset: u64, _bytes: u64) {}
    fn file_done(&self, _src: &str, _dst: &str, _chunks: u64, _bytes: u64) {}
    fn mkdir(&self, _path: &str) {}
    fn error(&self, _context: &str, _path: &str, _msg: &str) {}
    fn done(&self, _files: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Appends one timestamped line per event to a file.
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn start(&self, src: &str, dst: &str) {
        self.line(&format!("START src={src} dst={dst}"));
    }
    fn chunk_done(&self, dst: &str, offset: u64, bytes: u64) {
        self.line(&format!("CHUNK dst={dst} offset={offset} bytes={bytes}"));
    }
    fn file_done(&self, src: &str, dst: &str, chunks: u64, bytes: u64) {
        self.line(&format!(
            "FILE src={src} dst={dst} chunks={chunks} bytes={bytes}"
        ));
    }
    fn mkdir(&self, path: &str) {
        self.line(&format!("MKDIR path={path}"));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.line(&format!("ERROR ctx={context} path={path} msg={msg}"));
    }
    fn done(&self, files: u64, bytes: u64, seconds: f64) {
        self.line(&format!("DONE files={files} bytes={bytes} seconds={seconds:.3}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_logger_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/sync.log");
        let logger = TextLogger::new(&path).unwrap();
        logger.start("/remote/a", "/tmp/a");
        logger.file_done("/remote/a", "/tmp/a", 2, 10);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("START src=/remote/a dst=/tmp/a"));
        assert!(lines[1].ends_with("FILE src=/remote/a dst=/tmp/a chunks=2 bytes=10"));
    }
}

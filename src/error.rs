//! Error taxonomy shared by the catalog, transport and HTTP layers

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T> = std::result::Result<T, FsError>;

/// Coarse error categories. This is what crosses the wire next to the message,
/// so a client can branch on it without matching message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    NotAFile,
    NotADirectory,
    AlreadyExists,
    BadSize,
    InvalidPath,
    InvalidArguments,
    TransportFailure,
    ParseFailure,
    Unauthorized,
    MethodNotAllowed,
}

impl ErrorKind {
    /// HTTP status used when an error of this kind leaves the server.
    pub fn status_code(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::NotAFile | Self::NotADirectory => 400,
            Self::AlreadyExists => 409,
            Self::BadSize | Self::InvalidArguments | Self::ParseFailure => 400,
            Self::InvalidPath => 403,
            Self::TransportFailure => 500,
            Self::Unauthorized => 401,
            Self::MethodNotAllowed => 405,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::NotAFile => "not a file",
            Self::NotADirectory => "not a directory",
            Self::AlreadyExists => "already exists",
            Self::BadSize => "bad size",
            Self::InvalidPath => "invalid path",
            Self::InvalidArguments => "invalid arguments",
            Self::TransportFailure => "transport failure",
            Self::ParseFailure => "parse failure",
            Self::Unauthorized => "unauthorized",
            Self::MethodNotAllowed => "method not allowed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    FileNotFound(String),

    #[error("should be a file not a directory: {0}")]
    DirectoryNotAFile(String),

    #[error("dest should be a directory: {0}")]
    DestShouldBeDirectory(String),

    #[error("the destination path: {0} should be directory, you must create it first\n\n\tchunkfs mkdir {0}\n")]
    MkdirFirst(String),

    #[error("bad file size: {0}")]
    BadFileSize(String),

    #[error("directory already exist: {0}")]
    DirectoryAlreadyExists(String),

    #[error("already exist: {0}")]
    AlreadyExists(String),

    #[error("chunksize error: {0}")]
    BadChunkSize(String),

    #[error("fs path should be begin with /: {0}")]
    ShouldBeAbsolutePath(String),

    #[error("path escapes the sandbox root: {0}")]
    OutsideRoot(String),

    #[error("not enough arguments: {0}")]
    NotEnoughArgs(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("can't del directory: {0}")]
    CannotDeleteDirectory(String),

    #[error("illegal method: {0}")]
    IllegalMethod(String),

    #[error("what you request is unauthorized")]
    Unauthorized,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("malformed multipart body: {0}")]
    Multipart(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http transport error: {0}")]
    Transport(String),

    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },
}

impl FsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileNotFound(_) => ErrorKind::NotFound,
            Self::DirectoryNotAFile(_) => ErrorKind::NotAFile,
            Self::DestShouldBeDirectory(_) | Self::MkdirFirst(_) => ErrorKind::NotADirectory,
            Self::BadFileSize(_) | Self::BadChunkSize(_) => ErrorKind::BadSize,
            Self::DirectoryAlreadyExists(_) | Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::ShouldBeAbsolutePath(_) | Self::OutsideRoot(_) => ErrorKind::InvalidPath,
            Self::NotEnoughArgs(_) | Self::InvalidArgs(_) => ErrorKind::InvalidArguments,
            Self::CannotDeleteDirectory(_) => ErrorKind::NotAFile,
            Self::IllegalMethod(_) => ErrorKind::MethodNotAllowed,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Parse(_) | Self::Multipart(_) => ErrorKind::ParseFailure,
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                _ => ErrorKind::TransportFailure,
            },
            Self::Transport(_) => ErrorKind::TransportFailure,
            Self::Remote { kind, .. } => *kind,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Replace the filesystem path carried by a lookup error with the path the
    /// caller asked for, so server-side locations never reach the client.
    pub fn with_path(self, shown: &str) -> Self {
        match self {
            Self::FileNotFound(_) => Self::FileNotFound(shown.to_string()),
            Self::DirectoryNotAFile(_) => Self::DirectoryNotAFile(shown.to_string()),
            other => other,
        }
    }
}

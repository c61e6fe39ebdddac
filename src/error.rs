use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MorbError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("example {id:?} not found in index")]
    NotFound { id: String },

    #[error("metadata for example {id:?} is missing required field {key:?}")]
    MissingMetadata { id: String, key: String },

    #[error("integrity check failed for {url} (expected {expected}, got {actual})")]
    #[diagnostic(help("the remote file changed or the download was truncated; nothing was cached"))]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("remote source {url} unavailable: {reason}")]
    RemoteUnavailable { url: String, reason: String },

    #[error("example {id:?} declares size {declared} which exceeds max_filesize {limit}")]
    #[diagnostic(help("raise max_filesize in the config or unset it to allow the download"))]
    SizeLimitExceeded {
        id: String,
        declared: String,
        limit: String,
    },

    #[error("payload does not match any dataset variant (fields present: {present})")]
    SchemaMismatch { present: String },

    #[error("field {field:?} has unsupported element kind: {kind}")]
    UnsupportedElementKind { field: String, kind: String },

    #[error("field {field:?} is not a two-dimensional array (dims {dims:?})")]
    UnsupportedShape { field: String, dims: Vec<usize> },

    #[error("cached file {path} could not be loaded: {reason}")]
    #[diagnostic(help("delete the file to fetch it again"))]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("downloaded file from {url} could not be loaded: {reason}")]
    #[diagnostic(help("the file matched its published hash but is not a readable MAT file; nothing was cached"))]
    InvalidDownload { url: String, reason: String },

    #[error("invalid size string: {0:?}")]
    SizeFormat(String),

    #[error("invalid content hash: {0:?}")]
    HashFormat(String),

    #[error("invalid setting {field}: {value:?} ({expected})")]
    ConfigFormat {
        field: String,
        value: String,
        expected: String,
    },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("index file {path} is unreadable: {reason}")]
    IndexFormat { path: PathBuf, reason: String },

    #[error("no field {key:?} in metadata; dataset not retrieved yet (call retrieve first)")]
    DataNotRetrieved { key: String },

    #[error("no field {key:?} in metadata or dataset")]
    NoSuchField { key: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("unknown toolkit {0:?} (available: morlab, mmess)")]
    UnknownToolkit(String),

    #[error("{toolkit} version {version:?} not found; available versions: {available}")]
    UnknownToolkitVersion {
        toolkit: String,
        version: String,
        available: String,
    },

    #[error("release archive error: {0}")]
    ReleaseArchive(String),
}

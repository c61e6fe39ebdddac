use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use tempfile::Builder;

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::MorbError;
use crate::integrity::ContentHash;
use crate::remote::RemoteSource;

/// On-disk cache layout rooted at `Settings::cache`.
///
/// ```text
/// {cache}/data/{indexfile}
/// {cache}/data/{category}/{id}.mat
/// {cache}/{toolkit}/{toolkit}-{version}/
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new(cache_root: Utf8PathBuf) -> Self {
        Self { cache_root }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn data_dir(&self) -> Utf8PathBuf {
        self.cache_root.join("data")
    }

    pub fn index_path(&self, indexfile: &str) -> Utf8PathBuf {
        self.data_dir().join(indexfile)
    }

    pub fn example_path(&self, category: &str, id: &str) -> Result<Utf8PathBuf, MorbError> {
        check_segment("category", category)?;
        check_segment("id", id)?;
        Ok(self.data_dir().join(category).join(format!("{id}.mat")))
    }

    pub fn toolkit_dir(&self, name: &str) -> Utf8PathBuf {
        self.cache_root.join(name)
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), MorbError> {
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| MorbError::Filesystem(format!("create {path}: {err}")))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), MorbError> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Downloads `url` into a temporary file beside `dest`, checks it against
    /// `expected`, runs `accept` on the verified temporary file, and only then
    /// moves it to `dest`. On any failure `dest` is left untouched.
    pub fn fetch_verified<T>(
        remote: &dyn RemoteSource,
        url: &Url,
        expected: &ContentHash,
        dest: &Utf8Path,
        sink: &dyn ProgressSink,
        accept: impl FnOnce(&Path) -> Result<T, MorbError>,
    ) -> Result<T, MorbError> {
        let parent = dest
            .parent()
            .ok_or_else(|| MorbError::Filesystem(format!("invalid destination path {dest}")))?;
        Self::ensure_dir(parent)?;
        let temp = Builder::new()
            .prefix(".morb-fetch")
            .suffix(".part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;

        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {url}"),
            elapsed: None,
        });
        let bytes = remote.download(url, temp.path(), sink)?;

        sink.event(ProgressEvent {
            message: "phase=Verify; checking sha256".to_string(),
            elapsed: None,
        });
        let actual = ContentHash::of_file(temp.path())?;
        if &actual != expected {
            tracing::warn!(%url, %expected, %actual, "hash mismatch, discarding download");
            return Err(MorbError::Integrity {
                url: url.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        let accepted = accept(temp.path()).inspect_err(|err| {
            tracing::warn!(%url, error = %err, "verified download rejected, discarding");
        })?;

        sink.event(ProgressEvent {
            message: format!("phase=Store; {dest}"),
            elapsed: None,
        });
        temp.persist(dest.as_std_path())
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;
        tracing::info!(%url, path = %dest, bytes, "stored verified file");
        Ok(accepted)
    }
}

fn check_segment(field: &str, value: &str) -> Result<(), MorbError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.contains('\0');
    if invalid {
        return Err(MorbError::InvalidArgument(format!(
            "{field} {value:?} cannot be used as a cache path segment"
        )));
    }
    Ok(())
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

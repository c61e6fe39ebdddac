//! Versioned MATLAB toolkit releases archived on Zenodo.

use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tempfile::Builder;

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::MorbError;
use crate::fs_util::{extract_zip, validate_zip};
use crate::remote::RemoteSource;
use crate::store::{Store, atomic_rename_dir};

const DOI_RESOLVER: &str = "https://doi.org/";
const ZENODO_RECORDS_API: &str = "https://zenodo.org/api/records/";

static DOI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^doi:(10\.\d{4,9}/[-._;()/:A-Z0-9]+)$").expect("doi pattern is valid")
});

/// A toolkit and its known releases, newest first.
#[derive(Debug)]
pub struct Toolkit {
    key: &'static str,
    name: &'static str,
    registry: &'static [(&'static str, &'static str)],
}

pub const MORLAB: Toolkit = Toolkit {
    key: "MORLAB",
    name: "morlab",
    registry: &[
        ("6.0", "doi:10.5281/zenodo.7072831"),
        ("5.0", "doi:10.5281/zenodo.3332716"),
        ("4.0", "doi:10.5281/zenodo.1574083"),
        ("3.0", "doi:10.5281/zenodo.842659"),
    ],
};

pub const MMESS: Toolkit = Toolkit {
    key: "MMESS",
    name: "MMESS",
    registry: &[
        ("3.1", "doi:10.5281/zenodo.14929081"),
        ("3.0", "doi:10.5281/zenodo.7701424"),
        ("2.2", "doi:10.5281/zenodo.5938237"),
        ("2.1", "doi:10.5281/zenodo.4719688"),
        ("2.0.1", "doi:10.5281/zenodo.3606345"),
        ("2.0", "doi:10.5281/zenodo.3368844"),
        ("1.0.1", "doi:10.5281/zenodo.50575"),
    ],
};

pub const TOOLKITS: &[&Toolkit] = &[&MORLAB, &MMESS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolkitAction {
    Cache,
    Download,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolkitOutcome {
    pub toolkit: String,
    pub version: String,
    pub action: ToolkitAction,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolkitVersions {
    pub toolkit: String,
    pub versions: Vec<String>,
}

impl Toolkit {
    /// Finds a toolkit by key or directory name, ignoring case.
    pub fn by_name(name: &str) -> Result<&'static Toolkit, MorbError> {
        TOOLKITS
            .iter()
            .copied()
            .find(|toolkit| {
                toolkit.key.eq_ignore_ascii_case(name) || toolkit.name.eq_ignore_ascii_case(name)
            })
            .ok_or_else(|| MorbError::UnknownToolkit(name.to_string()))
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn list_versions(&self) -> Vec<&'static str> {
        self.registry.iter().map(|(version, _)| *version).collect()
    }

    pub fn versions(&self) -> ToolkitVersions {
        ToolkitVersions {
            toolkit: self.key.to_string(),
            versions: self.list_versions().into_iter().map(str::to_string).collect(),
        }
    }

    pub fn doi(&self, version: &str) -> Result<&'static str, MorbError> {
        self.registry
            .iter()
            .find(|(known, _)| *known == version)
            .map(|(_, doi)| *doi)
            .ok_or_else(|| MorbError::UnknownToolkitVersion {
                toolkit: self.key.to_string(),
                version: version.to_string(),
                available: self.list_versions().join(", "),
            })
    }

    pub fn archive_name(&self, version: &str) -> String {
        format!("{}-{version}.zip", self.name)
    }

    /// `{cache}/{name}/{name}-{version}`
    pub fn install_dir(&self, store: &Store, version: &str) -> Utf8PathBuf {
        store
            .toolkit_dir(self.name)
            .join(format!("{}-{version}", self.name))
    }

    /// Returns the extracted release, downloading it when it is not cached.
    pub fn retrieve_version(
        &self,
        version: &str,
        store: &Store,
        remote: &dyn RemoteSource,
        sink: &dyn ProgressSink,
    ) -> Result<ToolkitOutcome, MorbError> {
        let doi = self.doi(version)?;
        let target = self.install_dir(store, version);
        let outcome = |action| ToolkitOutcome {
            toolkit: self.key.to_string(),
            version: version.to_string(),
            action,
            path: target.to_string(),
        };
        if target.as_std_path().is_dir() {
            tracing::debug!(toolkit = self.key, version, path = %target, "toolkit already extracted");
            return Ok(outcome(ToolkitAction::Cache));
        }

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {doi}"),
            elapsed: None,
        });
        let record_id = resolve_record_id(remote, doi)?;
        let record_url = Url::parse(ZENODO_RECORDS_API)
            .and_then(|base| base.join(&record_id))
            .map_err(|err| MorbError::InvalidArgument(err.to_string()))?;
        let record = remote.fetch_json(&record_url)?;
        let archive_name = self.archive_name(version);
        let archive_url = find_archive_link(&record, &archive_name)?;

        let toolkit_dir = store.toolkit_dir(self.name);
        Store::ensure_dir(&toolkit_dir)?;
        let archive = Builder::new()
            .prefix(".morb-fetch")
            .suffix(".zip")
            .tempfile_in(toolkit_dir.as_std_path())
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {archive_url}"),
            elapsed: None,
        });
        remote.download(&archive_url, archive.path(), sink)?;

        sink.event(ProgressEvent {
            message: "phase=Verify; validating archive".to_string(),
            elapsed: None,
        });
        validate_zip(archive.path())?;

        sink.event(ProgressEvent {
            message: format!("phase=Store; extracting to {toolkit_dir}"),
            elapsed: None,
        });
        let staging = Builder::new()
            .prefix(".morb-fetch-extract")
            .tempdir_in(toolkit_dir.as_std_path())
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;
        let files = extract_zip(archive.path(), staging.path())?;
        install_extracted(staging.path(), &target, &archive_name)?;
        tracing::info!(toolkit = self.key, version, files, path = %target, "toolkit extracted");
        Ok(outcome(ToolkitAction::Download))
    }
}

/// Moves the release into `target`. Archives normally carry a single
/// `{name}-{version}/` folder; archives without it are moved as a whole.
fn install_extracted(
    staging: &std::path::Path,
    target: &Utf8Path,
    archive_name: &str,
) -> Result<(), MorbError> {
    let folder = target
        .file_name()
        .ok_or_else(|| MorbError::Filesystem(format!("invalid toolkit path {target}")))?;
    let nested = staging.join(folder);
    let source = if nested.is_dir() {
        nested
    } else {
        tracing::debug!(archive_name, "archive has no top-level release folder");
        staging.to_path_buf()
    };
    atomic_rename_dir(&source, target.as_std_path())
        .map_err(|err| MorbError::Filesystem(format!("install {target}: {err}")))
}

/// Follows the DOI redirect and returns the Zenodo record id it lands on.
fn resolve_record_id(remote: &dyn RemoteSource, doi: &str) -> Result<String, MorbError> {
    let captures = DOI_RE
        .captures(doi)
        .ok_or_else(|| MorbError::InvalidArgument(format!("malformed DOI {doi:?}")))?;
    let doi_url = Url::parse(DOI_RESOLVER)
        .and_then(|base| base.join(&captures[1]))
        .map_err(|err| MorbError::InvalidArgument(err.to_string()))?;
    let landing = remote.resolve_location(&doi_url)?;
    record_id_from_url(&landing).ok_or_else(|| MorbError::ReleaseArchive(format!(
        "{doi} resolved to {landing}, which is not a Zenodo record"
    )))
}

fn record_id_from_url(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [.., "record" | "records", id] if id.chars().all(|c| c.is_ascii_digit()) => {
            Some(id.to_string())
        }
        _ => None,
    }
}

fn find_archive_link(record: &Value, archive_name: &str) -> Result<Url, MorbError> {
    let files = record
        .get("files")
        .and_then(Value::as_array)
        .ok_or_else(|| MorbError::ReleaseArchive("record lists no files".to_string()))?;
    let link = files
        .iter()
        .find(|file| file.get("key").and_then(Value::as_str) == Some(archive_name))
        .and_then(|file| file.pointer("/links/self"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MorbError::ReleaseArchive(format!("record has no file named {archive_name}"))
        })?;
    Url::parse(link).map_err(|err| MorbError::ReleaseArchive(format!("bad link {link:?}: {err}")))
}

use std::collections::BTreeMap;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::Settings;
use crate::error::MorbError;
use crate::remote::RemoteSource;
use crate::store::Store;

pub const ID_COLUMN: &str = "id";
pub const CATEGORY_COLUMN: &str = "category";
pub const FILEHASH_COLUMN: &str = "sourceFilehash";
pub const FILESIZE_COLUMN: &str = "sourceFilesize";
pub const LINK_COLUMN: &str = "zenodoLink";

/// One row of the index. Columns the resolver depends on are typed; all other
/// columns are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "sourceFilehash", skip_serializing_if = "Option::is_none")]
    pub source_filehash: Option<String>,
    #[serde(rename = "sourceFilesize", skip_serializing_if = "Option::is_none")]
    pub source_filesize: Option<String>,
    #[serde(rename = "zenodoLink", skip_serializing_if = "Option::is_none")]
    pub zenodo_link: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl IndexRecord {
    /// Builds a record from column/value pairs. Only `id` is required here;
    /// the resolver checks the remaining keys when it needs them.
    pub fn from_fields<I>(fields: I) -> Result<Self, MorbError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut id = None;
        let mut record = Self {
            id: String::new(),
            category: None,
            source_filehash: None,
            source_filesize: None,
            zenodo_link: None,
            extra: BTreeMap::new(),
        };
        for (key, value) in fields {
            match key.as_str() {
                ID_COLUMN => id = Some(value),
                CATEGORY_COLUMN => record.category = Some(value),
                FILEHASH_COLUMN => record.source_filehash = Some(value),
                FILESIZE_COLUMN => record.source_filesize = Some(value),
                LINK_COLUMN => record.zenodo_link = Some(value),
                _ => {
                    record.extra.insert(key, value);
                }
            }
        }
        record.id = id.ok_or_else(|| MorbError::MissingMetadata {
            id: "<unknown>".to_string(),
            key: ID_COLUMN.to_string(),
        })?;
        Ok(record)
    }

    /// Value of `key`, looking at the typed columns first.
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            ID_COLUMN => Some(&self.id),
            CATEGORY_COLUMN => self.category.as_deref(),
            FILEHASH_COLUMN => self.source_filehash.as_deref(),
            FILESIZE_COLUMN => self.source_filesize.as_deref(),
            LINK_COLUMN => self.zenodo_link.as_deref(),
            _ => self.extra.get(key).map(String::as_str),
        }
    }

    /// Like [`IndexRecord::get`], but a missing or blank value is an error.
    pub fn require(&self, key: &str) -> Result<&str, MorbError> {
        self.get(key)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| MorbError::MissingMetadata {
                id: self.id.clone(),
                key: key.to_string(),
            })
    }
}

/// Identifier lookup over the cached index table.
#[derive(Debug, Clone)]
pub struct IndexDatabase {
    path: Utf8PathBuf,
    cache_dir: Utf8PathBuf,
    records: Vec<IndexRecord>,
}

impl IndexDatabase {
    /// Loads the index from the cache, fetching and verifying it first when the
    /// local copy is missing or unreadable.
    pub fn open(
        settings: &Settings,
        remote: &dyn RemoteSource,
        sink: &dyn ProgressSink,
    ) -> Result<Self, MorbError> {
        let store = Store::new(settings.cache().to_path_buf());
        let cache_dir = store.data_dir();
        Store::ensure_dir(&cache_dir)?;
        let path = store.index_path(settings.indexfile());

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; index {path}"),
            elapsed: None,
        });
        if path.as_std_path().is_file() {
            match read_table(path.as_std_path()) {
                Ok(records) => {
                    tracing::debug!(%path, rows = records.len(), "loaded cached index");
                    return Ok(Self {
                        path,
                        cache_dir,
                        records,
                    });
                }
                Err(err) => tracing::warn!(%path, error = %err, "cached index unreadable, refetching"),
            }
        }

        let url = settings.index_url()?;
        // A table that does not parse is rejected before it reaches the cache.
        let accept = |temp: &Path| {
            read_table(temp).map_err(|err| match err {
                MorbError::IndexFormat { reason, .. } => MorbError::IndexFormat {
                    path: path.clone().into_std_path_buf(),
                    reason,
                },
                other => other,
            })
        };
        let records =
            Store::fetch_verified(remote, &url, settings.indexfilehash(), &path, sink, accept)?;
        tracing::info!(%path, rows = records.len(), "index fetched");
        Ok(Self {
            path,
            cache_dir,
            records,
        })
    }

    /// All identifiers in table order, duplicates included.
    pub fn list_ids(&self) -> Vec<&str> {
        self.records.iter().map(|record| record.id.as_str()).collect()
    }

    /// First record whose `id` equals `id` exactly.
    pub fn lookup(&self, id: &str) -> Result<&IndexRecord, MorbError> {
        self.records
            .iter()
            .find(|record| record.id == id)
            .ok_or_else(|| MorbError::NotFound { id: id.to_string() })
    }

    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn cache_dir(&self) -> &Utf8Path {
        &self.cache_dir
    }
}

fn read_table(path: &Path) -> Result<Vec<IndexRecord>, MorbError> {
    let format_error = |reason: String| MorbError::IndexFormat {
        path: path.to_path_buf(),
        reason,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|err| format_error(err.to_string()))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| format_error(err.to_string()))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    if !headers.iter().any(|header| header == ID_COLUMN) {
        return Err(format_error(format!("no {ID_COLUMN:?} column")));
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| format_error(err.to_string()))?;
        // Short rows are padded with empty cells.
        let fields = headers.iter().enumerate().map(|(i, header)| {
            (header.clone(), row.get(i).unwrap_or_default().to_string())
        });
        records.push(IndexRecord::from_fields(fields)?);
    }
    Ok(records)
}

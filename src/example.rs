use std::fmt;
use std::path::Path;

use camino::Utf8PathBuf;
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use crate::app::{App, ProgressEvent, ProgressSink};
use crate::dataset::{self, Dataset, DatasetKind, Matrix};
use crate::error::MorbError;
use crate::index::{
    CATEGORY_COLUMN, FILEHASH_COLUMN, FILESIZE_COLUMN, ID_COLUMN, IndexDatabase, IndexRecord,
    LINK_COLUMN,
};
use crate::integrity::ContentHash;
use crate::mat;
use crate::remote::RemoteSource;
use crate::size::parse_human_size;
use crate::store::Store;

/// How an [`Example`] is identified: by index id, or by a record supplied directly.
#[derive(Debug, Clone)]
pub enum ExampleSource {
    Id(String),
    Meta(IndexRecord),
}

impl From<&str> for ExampleSource {
    fn from(id: &str) -> Self {
        ExampleSource::Id(id.to_string())
    }
}

impl From<String> for ExampleSource {
    fn from(id: String) -> Self {
        ExampleSource::Id(id)
    }
}

impl From<IndexRecord> for ExampleSource {
    fn from(record: IndexRecord) -> Self {
        ExampleSource::Meta(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieveAction {
    Cache,
    Download,
}

impl fmt::Display for RetrieveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrieveAction::Cache => write!(f, "cache"),
            RetrieveAction::Download => write!(f, "download"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveOutcome {
    pub action: RetrieveAction,
    pub path: Utf8PathBuf,
    pub kind: DatasetKind,
}

/// Result of [`Example::field`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<'a> {
    Meta(&'a str),
    Matrix(&'a Matrix),
}

/// A benchmark example: its index record and, once retrieved, its dataset.
#[derive(Debug, Clone)]
pub struct Example {
    meta: IndexRecord,
    data: Option<Dataset>,
}

impl Example {
    pub fn new(source: impl Into<ExampleSource>, database: &IndexDatabase) -> Result<Self, MorbError> {
        let meta = match source.into() {
            ExampleSource::Id(id) => database.lookup(&id)?.clone(),
            ExampleSource::Meta(record) => record,
        };
        Ok(Self { meta, data: None })
    }

    /// Accepts a JSON string (an id) or a JSON object (a metadata record).
    /// Non-string scalar values inside an object are kept in their JSON text form.
    pub fn from_value(value: &Value, database: &IndexDatabase) -> Result<Self, MorbError> {
        match value {
            Value::String(id) => Self::new(id.as_str(), database),
            Value::Object(map) => {
                let fields = map.iter().map(|(key, value)| {
                    let text = match value {
                        Value::String(text) => text.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (key.clone(), text)
                });
                Self::new(IndexRecord::from_fields(fields)?, database)
            }
            other => Err(MorbError::InvalidArgument(format!(
                "expected an example id or a metadata object, got {}",
                json_type(other)
            ))),
        }
    }

    pub fn meta(&self) -> &IndexRecord {
        &self.meta
    }

    pub fn data(&self) -> Option<&Dataset> {
        self.data.as_ref()
    }

    /// Loads the dataset from the cache, downloading and verifying it first
    /// when it is not cached. A cached file is trusted without rehashing.
    pub fn retrieve<R: RemoteSource>(
        &mut self,
        app: &App<R>,
        sink: &dyn ProgressSink,
    ) -> Result<RetrieveOutcome, MorbError> {
        let id = self.meta.require(ID_COLUMN)?;
        let category = self.meta.require(CATEGORY_COLUMN)?;
        let filehash = self.meta.require(FILEHASH_COLUMN)?;
        let filesize = self.meta.require(FILESIZE_COLUMN)?;

        let path = app.store().example_path(category, id)?;
        if let Some(parent) = path.parent() {
            Store::ensure_dir(parent)?;
        }

        let (action, dataset) = if path.as_std_path().exists() {
            tracing::debug!(id, %path, "using cached example");
            sink.event(ProgressEvent {
                message: format!("phase=Store; using cached {path}"),
                elapsed: None,
            });
            let payload = mat::read_mat_file(path.as_std_path()).map_err(|err| {
                MorbError::CacheCorrupt {
                    path: path.clone().into_std_path_buf(),
                    reason: err.to_string(),
                }
            })?;
            (RetrieveAction::Cache, dataset::validate(&payload)?)
        } else {
            let url = match self.meta.get(LINK_COLUMN).map(str::trim) {
                Some(link) if !link.is_empty() => Url::parse(link).map_err(|err| {
                    MorbError::InvalidArgument(format!("{LINK_COLUMN} {link:?} of {id}: {err}"))
                })?,
                _ => app.settings().example_url(category, id)?,
            };

            let declared = parse_human_size(filesize)?;
            if let Some(limit) = app.settings().max_filesize()
                && declared > limit.bytes()
            {
                return Err(MorbError::SizeLimitExceeded {
                    id: id.to_string(),
                    declared: filesize.to_string(),
                    limit: limit.to_string(),
                });
            }

            let expected: ContentHash = filehash.parse()?;
            // Only a payload that classifies is moved into the cache.
            let accept = |temp: &Path| -> Result<Dataset, MorbError> {
                let payload =
                    mat::read_mat_file(temp).map_err(|err| MorbError::InvalidDownload {
                        url: url.to_string(),
                        reason: err.to_string(),
                    })?;
                dataset::validate(&payload)
            };
            let dataset =
                Store::fetch_verified(app.remote(), &url, &expected, &path, sink, accept)?;
            (RetrieveAction::Download, dataset)
        };

        let kind = dataset.kind();
        self.data = Some(dataset);
        Ok(RetrieveOutcome { action, path, kind })
    }

    /// Looks `key` up in the metadata first and then in the retrieved dataset.
    pub fn field(&self, key: &str) -> Result<Field<'_>, MorbError> {
        if let Some(value) = self.meta.get(key) {
            return Ok(Field::Meta(value));
        }
        let dataset = self.data.as_ref().ok_or_else(|| MorbError::DataNotRetrieved {
            key: key.to_string(),
        })?;
        dataset
            .field(key)
            .map(Field::Matrix)
            .ok_or_else(|| MorbError::NoSuchField {
                key: key.to_string(),
            })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

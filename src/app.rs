use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::Settings;
use crate::dataset::{DatasetKind, ElementKind};
use crate::error::MorbError;
use crate::example::{Example, ExampleSource, RetrieveAction};
use crate::index::{IndexDatabase, IndexRecord};
use crate::remote::RemoteSource;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub index: String,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub record: IndexRecord,
    pub cache_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub id: String,
    pub kind: DatasetKind,
    pub action: RetrieveAction,
    pub path: String,
    pub fields: Vec<FieldSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSummary {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub element_kind: ElementKind,
    pub sparse: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Settings, cache layout, index and remote source for one session.
pub struct App<R: RemoteSource> {
    settings: Settings,
    store: Store,
    database: IndexDatabase,
    remote: R,
}

impl<R: RemoteSource> App<R> {
    /// Opens the index (fetching it if needed) and returns the ready context.
    pub fn open(settings: Settings, remote: R, sink: &dyn ProgressSink) -> Result<Self, MorbError> {
        let database = IndexDatabase::open(&settings, &remote, sink)?;
        let store = Store::new(settings.cache().to_path_buf());
        Ok(Self {
            settings,
            store,
            database,
            remote,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn database(&self) -> &IndexDatabase {
        &self.database
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn example(&self, source: impl Into<ExampleSource>) -> Result<Example, MorbError> {
        Example::new(source, &self.database)
    }

    pub fn list(&self, sink: &dyn ProgressSink) -> ListResult {
        sink.event(ProgressEvent {
            message: "phase=Resolve; listing index".to_string(),
            elapsed: None,
        });
        ListResult {
            index: self.database.path().to_string(),
            ids: self
                .database
                .list_ids()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn info(&self, id: &str, sink: &dyn ProgressSink) -> Result<InfoResult, MorbError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; looking up {id}"),
            elapsed: None,
        });
        let record = self.database.lookup(id)?.clone();
        let cache_path = match record.category.as_deref() {
            Some(category) if !category.trim().is_empty() => self
                .store
                .example_path(category, &record.id)
                .ok()
                .filter(|path| path.as_std_path().is_file())
                .map(|path| path.to_string()),
            _ => None,
        };
        Ok(InfoResult { record, cache_path })
    }

    pub fn fetch(&self, id: &str, sink: &dyn ProgressSink) -> Result<FetchResult, MorbError> {
        let start = Instant::now();
        let mut example = self.example(id)?;
        let outcome = example.retrieve(self, sink)?;
        sink.event(ProgressEvent {
            message: format!("phase=Done; {id} ({})", outcome.kind),
            elapsed: Some(start.elapsed()),
        });

        let fields = example
            .data()
            .map(|dataset| {
                dataset
                    .fields()
                    .into_iter()
                    .map(|(name, matrix)| {
                        let (rows, cols) = matrix.shape();
                        FieldSummary {
                            name: name.to_string(),
                            rows,
                            cols,
                            element_kind: matrix.element_kind(),
                            sparse: matrix.is_sparse(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(FetchResult {
            id: example.meta().id.clone(),
            kind: outcome.kind,
            action: outcome.action,
            path: outcome.path.to_string(),
            fields,
        })
    }
}


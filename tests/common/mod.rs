#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use reqwest::Url;
use serde_json::Value;

use morb_fetch::app::{ProgressEvent, ProgressSink};
use morb_fetch::config::Settings;
use morb_fetch::error::MorbError;
use morb_fetch::integrity::ContentHash;
use morb_fetch::remote::RemoteSource;

pub const SERVER: &str = "https://morb.test/data/";
pub const INDEXFILE: &str = "examples.csv";

/// In-memory remote keyed by URL, counting every call.
#[derive(Default)]
pub struct MockRemote {
    files: BTreeMap<String, Vec<u8>>,
    json: BTreeMap<String, Value>,
    redirects: BTreeMap<String, String>,
    calls: Mutex<usize>,
}

impl MockRemote {
    pub fn with_file(mut self, url: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(url.to_string(), bytes.into());
        self
    }

    pub fn with_json(mut self, url: &str, value: Value) -> Self {
        self.json.insert(url.to_string(), value);
        self
    }

    pub fn with_redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn count(&self) {
        let mut guard = self.calls.lock().unwrap();
        *guard += 1;
    }

    fn missing(url: &Url) -> MorbError {
        MorbError::RemoteUnavailable {
            url: url.to_string(),
            reason: "status 404: not found".to_string(),
        }
    }
}

impl RemoteSource for MockRemote {
    fn download(
        &self,
        url: &Url,
        destination: &Path,
        _sink: &dyn ProgressSink,
    ) -> Result<u64, MorbError> {
        self.count();
        let bytes = self.files.get(url.as_str()).ok_or_else(|| Self::missing(url))?;
        std::fs::write(destination, bytes).unwrap();
        Ok(bytes.len() as u64)
    }

    fn fetch_json(&self, url: &Url) -> Result<Value, MorbError> {
        self.count();
        self.json
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| Self::missing(url))
    }

    fn resolve_location(&self, url: &Url) -> Result<Url, MorbError> {
        self.count();
        let target = self
            .redirects
            .get(url.as_str())
            .ok_or_else(|| Self::missing(url))?;
        Ok(Url::parse(target).unwrap())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

pub fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

pub fn settings(cache: &Path, index_hash: &ContentHash, max_filesize: Option<&str>) -> Settings {
    Settings::new(
        SERVER,
        INDEXFILE,
        &index_hash.to_string(),
        max_filesize,
        utf8(cache).as_str(),
    )
    .unwrap()
}

pub fn index_url() -> String {
    format!("{SERVER}{INDEXFILE}")
}

pub fn example_url(category: &str, id: &str) -> String {
    format!("{SERVER}{category}/{id}.mat")
}

/// One index row: id, category, hash, size, link.
pub struct Row<'a> {
    pub id: &'a str,
    pub category: &'a str,
    pub hash: String,
    pub size: &'a str,
    pub link: &'a str,
}

pub fn index_csv(rows: &[Row<'_>]) -> String {
    let mut out =
        String::from("id,category,sourceFilehash,sourceFilesize,zenodoLink,description\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},benchmark {}\n",
            row.id, row.category, row.hash, row.size, row.link, row.id
        ));
    }
    out
}

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_DOUBLE: u32 = 9;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

const MX_CHAR: u32 = 4;
const MX_SPARSE: u32 = 5;
const MX_DOUBLE: u32 = 6;
const MX_UINT8: u32 = 9;
const MX_INT32: u32 = 12;

/// Little-endian Level 5 MAT writer for fixtures.
#[derive(Default)]
pub struct MatBuilder {
    matrices: Vec<Vec<u8>>,
    compress: bool,
}

fn element(data_type: u32, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    out.extend_from_slice(&data_type.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    while out.len() % 8 != 0 {
        out.push(0);
    }
    out
}

fn f64s(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn i32s(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

impl MatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    fn matrix(
        mut self,
        name: &str,
        class: u32,
        flags: u32,
        dims: &[i32],
        parts: Vec<Vec<u8>>,
    ) -> Self {
        let mut body = element(MI_UINT32, &i32s(&[(class | (flags << 8)) as i32, 0]));
        body.extend(element(MI_INT32, &i32s(dims)));
        body.extend(element(MI_INT8, name.as_bytes()));
        for part in parts {
            body.extend(part);
        }
        self.matrices.push(element(MI_MATRIX, &body));
        self
    }

    pub fn dense(self, name: &str, rows: usize, cols: usize, values: &[f64]) -> Self {
        assert_eq!(values.len(), rows * cols);
        self.matrix(
            name,
            MX_DOUBLE,
            0,
            &[rows as i32, cols as i32],
            vec![element(MI_DOUBLE, &f64s(values))],
        )
    }

    /// Dense double array of any rank, stored column-major.
    pub fn array(self, name: &str, dims: &[i32], values: &[f64]) -> Self {
        self.matrix(name, MX_DOUBLE, 0, dims, vec![element(MI_DOUBLE, &f64s(values))])
    }

    pub fn complex(self, name: &str, rows: usize, cols: usize, re: &[f64], im: &[f64]) -> Self {
        self.matrix(
            name,
            MX_DOUBLE,
            0x08,
            &[rows as i32, cols as i32],
            vec![element(MI_DOUBLE, &f64s(re)), element(MI_DOUBLE, &f64s(im))],
        )
    }

    pub fn int32(self, name: &str, rows: usize, cols: usize, values: &[i32]) -> Self {
        self.matrix(
            name,
            MX_INT32,
            0,
            &[rows as i32, cols as i32],
            vec![element(MI_INT32, &i32s(values))],
        )
    }

    pub fn logical(self, name: &str, rows: usize, cols: usize, values: &[u8]) -> Self {
        self.matrix(
            name,
            MX_UINT8,
            0x02,
            &[rows as i32, cols as i32],
            vec![element(MI_UINT8, values)],
        )
    }

    pub fn sparse(
        self,
        name: &str,
        rows: usize,
        cols: usize,
        col_ptr: &[i32],
        row_indices: &[i32],
        values: &[f64],
    ) -> Self {
        self.matrix(
            name,
            MX_SPARSE,
            0,
            &[rows as i32, cols as i32],
            vec![
                element(MI_INT32, &i32s(row_indices)),
                element(MI_INT32, &i32s(col_ptr)),
                element(MI_DOUBLE, &f64s(values)),
            ],
        )
    }

    pub fn text(self, name: &str, text: &str) -> Self {
        let units: Vec<u8> = text
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        self.matrix(
            name,
            MX_CHAR,
            0,
            &[1, text.encode_utf16().count() as i32],
            vec![element(MI_UINT16, &units)],
        )
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = vec![b' '; 116];
        let text = b"MATLAB 5.0 MAT-file, written by morb-fetch tests";
        out[..text.len()].copy_from_slice(text);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&0x0100u16.to_le_bytes());
        out.extend_from_slice(b"IM");
        for matrix in self.matrices {
            if self.compress {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&matrix).unwrap();
                let compressed = encoder.finish().unwrap();
                out.extend_from_slice(&MI_COMPRESSED.to_le_bytes());
                out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
                out.extend_from_slice(&compressed);
            } else {
                out.extend_from_slice(&matrix);
            }
        }
        out
    }
}

/// A steel-profile-like first-order system: sparse A and E, dense B and C.
pub fn steel_profile_mat() -> Vec<u8> {
    MatBuilder::new()
        .compressed()
        .sparse("A", 3, 3, &[0, 1, 2, 3], &[0, 1, 2], &[-1.0, -2.0, -3.0])
        .dense("B", 3, 1, &[1.0, 0.0, 0.0])
        .dense("C", 1, 3, &[0.0, 0.0, 1.0])
        .sparse("E", 3, 3, &[0, 1, 2, 3], &[0, 1, 2], &[1.0, 1.0, 1.0])
        .text("description", "steel profile")
        .build()
}

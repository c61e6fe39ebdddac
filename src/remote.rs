use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::MorbError;

const CHUNK_SIZE: usize = 64 * 1024;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Where remote bytes come from. The HTTP implementation is the only one used
/// outside tests.
pub trait RemoteSource: Send + Sync {
    /// Streams `url` into `destination` and returns the number of bytes written.
    fn download(
        &self,
        url: &Url,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, MorbError>;

    fn fetch_json(&self, url: &Url) -> Result<Value, MorbError>;

    /// Final location of `url` after following redirects.
    fn resolve_location(&self, url: &Url) -> Result<Url, MorbError>;
}

#[derive(Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new() -> Result<Self, MorbError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("morb-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MorbError::InvalidArgument(err.to_string()))?,
        );
        // Data files can be hundreds of megabytes; only connecting is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .map_err(|err| MorbError::RemoteUnavailable {
                url: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self { client })
    }

    fn handle_status(
        url: &Url,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, MorbError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .ok()
            .map(|text| text.chars().take(200).collect::<String>())
            .unwrap_or_default();
        Err(MorbError::RemoteUnavailable {
            url: url.to_string(),
            reason: format!("status {status}: {}", message.trim()),
        })
    }

    fn send_with_retries(
        &self,
        url: &Url,
        timeout: Option<Duration>,
    ) -> Result<reqwest::blocking::Response, MorbError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let mut request = self.client.get(url.clone());
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            let response = request.send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(%url, status, attempt, "retrying request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(%url, error = %err, attempt, "retrying request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(MorbError::RemoteUnavailable {
                        url: url.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

impl RemoteSource for HttpSource {
    fn download(
        &self,
        url: &Url,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, MorbError> {
        let start = Instant::now();
        let response = self.send_with_retries(url, None)?;
        let mut response = Self::handle_status(url, response)?;
        let total = response.content_length();

        let mut file =
            File::create(destination).map_err(|err| MorbError::Filesystem(err.to_string()))?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        let mut last_report = Instant::now();
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| MorbError::RemoteUnavailable {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|err| MorbError::Filesystem(err.to_string()))?;
            written += read as u64;
            if last_report.elapsed() >= PROGRESS_INTERVAL {
                last_report = Instant::now();
                sink.event(ProgressEvent {
                    message: download_progress(written, total),
                    elapsed: Some(start.elapsed()),
                });
            }
        }
        file.flush()
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;
        sink.event(ProgressEvent {
            message: download_progress(written, total),
            elapsed: Some(start.elapsed()),
        });
        Ok(written)
    }

    fn fetch_json(&self, url: &Url) -> Result<Value, MorbError> {
        let response = self.send_with_retries(url, Some(METADATA_TIMEOUT))?;
        let response = Self::handle_status(url, response)?;
        response.json().map_err(|err| MorbError::RemoteUnavailable {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }

    fn resolve_location(&self, url: &Url) -> Result<Url, MorbError> {
        let response = self.send_with_retries(url, Some(METADATA_TIMEOUT))?;
        let response = Self::handle_status(url, response)?;
        Ok(response.url().clone())
    }
}

fn download_progress(written: u64, total: Option<u64>) -> String {
    match total {
        Some(total) => format!("phase=Fetch; {written}/{total} bytes"),
        None => format!("phase=Fetch; {written} bytes"),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

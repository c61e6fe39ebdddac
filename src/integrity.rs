use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::MorbError;

static HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sha256:([a-fA-F0-9]{64})$").expect("hash pattern is valid"));

/// Expected SHA-256 digest of a file, written as `sha256:<64 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    hex: String,
}

impl ContentHash {
    /// Hashes the raw bytes of the file at `path`.
    pub fn of_file(path: &Path) -> Result<Self, MorbError> {
        let mut file = File::open(path)
            .map_err(|err| MorbError::Filesystem(format!("open {}: {err}", path.display())))?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)
            .map_err(|err| MorbError::Filesystem(format!("read {}: {err}", path.display())))?;
        Ok(Self::from_digest(&hasher.finalize()))
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::from_digest(&Sha256::digest(bytes))
    }

    fn from_digest(digest: &[u8]) -> Self {
        Self {
            hex: hex::encode(digest),
        }
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.hex)
    }
}

impl FromStr for ContentHash {
    type Err = MorbError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let captures = HASH_RE
            .captures(value.trim())
            .ok_or_else(|| MorbError::HashFormat(value.to_string()))?;
        Ok(Self {
            hex: captures[1].to_ascii_lowercase(),
        })
    }
}

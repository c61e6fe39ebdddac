use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::MorbError;

// Longest units first so `B` never shadows `KB` or `KIB`.
static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([0-9]+(?:\.[0-9]+)?)\s*(KIB|MIB|GIB|TIB|KB|MB|GB|TB|B)\s*$")
        .expect("size pattern is valid")
});

fn unit_multiplier(unit: &str) -> Option<u64> {
    let multiplier = match unit.to_ascii_uppercase().as_str() {
        "B" => 1,
        "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "TB" => 1_000_000_000_000,
        "KIB" => 1 << 10,
        "MIB" => 1 << 20,
        "GIB" => 1 << 30,
        "TIB" => 1 << 40,
        _ => return None,
    };
    Some(multiplier)
}

/// Parses a human-readable size such as `"10 MB"` or `"1.5 GiB"` into bytes.
///
/// Decimal units are powers of 1000 and binary units powers of 1024. A
/// fractional byte count is truncated.
pub fn parse_human_size(value: &str) -> Result<u64, MorbError> {
    let captures = SIZE_RE
        .captures(value)
        .ok_or_else(|| MorbError::SizeFormat(value.to_string()))?;
    let number: f64 = captures[1]
        .parse()
        .map_err(|_| MorbError::SizeFormat(value.to_string()))?;
    let multiplier =
        unit_multiplier(&captures[2]).ok_or_else(|| MorbError::SizeFormat(value.to_string()))?;
    Ok((number * multiplier as f64) as u64)
}

/// A validated size string that remembers how it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanSize {
    text: String,
    bytes: u64,
}

impl HumanSize {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text.trim())
    }
}

impl FromStr for HumanSize {
    type Err = MorbError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes = parse_human_size(value)?;
        Ok(Self {
            text: value.to_string(),
            bytes,
        })
    }
}

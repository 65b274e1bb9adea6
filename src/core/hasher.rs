use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;

use crate::error::{PdfDiffError, Result};

/// Hex-encoded SHA-256 digest of a file's raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    #[cfg(test)]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Hash a file by streaming its contents
    pub fn of_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(s: &str) -> bool {
        s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = PdfDiffError;

    fn from_str(s: &str) -> Result<Self> {
        if Self::is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(PdfDiffError::InvalidComparisonId(s.to_string()))
        }
    }
}

/// Identity of one comparison job: the ordered pair of document hashes.
///
/// `(A, B)` and `(B, A)` are distinct jobs; the result is always B tinted
/// where it differs from A.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComparisonId {
    pub first: ContentHash,
    pub second: ContentHash,
}

impl ComparisonId {
    pub fn new(first: ContentHash, second: ContentHash) -> Self {
        Self { first, second }
    }
}

impl fmt::Display for ComparisonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

impl FromStr for ComparisonId {
    type Err = PdfDiffError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PdfDiffError::InvalidComparisonId(s.to_string());
        let (first, second) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            first: first.parse().map_err(|_| invalid())?,
            second: second.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for ComparisonId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ComparisonId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

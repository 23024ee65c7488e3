use std::fmt;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tokio::io::AsyncReadExt;

use crate::core::error::{EngineError, EngineResult};

/// Digest algorithms accepted in download descriptors and cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Md5,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Md5 => "md5",
        }
    }

    /// Length of a hex digest produced by this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Md5 => 32,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "md5" => Ok(HashAlgorithm::Md5),
            other => Err(EngineError::Configuration(format!(
                "unsupported hash algorithm '{other}'"
            ))),
        }
    }
}

/// Expected digest of a file: algorithm plus lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    algorithm: HashAlgorithm,
    hex_digest: String,
}

impl Checksum {
    pub fn new(algorithm: HashAlgorithm, hex_digest: &str) -> EngineResult<Self> {
        let hex_digest = hex_digest.trim().to_ascii_lowercase();
        if hex_digest.len() != algorithm.hex_len()
            || !hex_digest.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(EngineError::Configuration(format!(
                "'{hex_digest}' is not a valid {algorithm} digest"
            )));
        }
        Ok(Self {
            algorithm,
            hex_digest,
        })
    }

    pub fn sha1(hex_digest: &str) -> EngineResult<Self> {
        Self::new(HashAlgorithm::Sha1, hex_digest)
    }

    /// Wraps a digest this crate just computed.
    pub(crate) fn computed(algorithm: HashAlgorithm, hex_digest: String) -> Self {
        Self {
            algorithm,
            hex_digest,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hex_digest(&self) -> &str {
        &self.hex_digest
    }

    /// Case-insensitive comparison against a hex digest.
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.hex_digest.eq_ignore_ascii_case(actual_hex)
    }

    /// Cache key derived from the digest, e.g. `sha1:2fd4e1c6...`.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex_digest)
    }
}

/// Parses `algo:hex`; a bare 40 character digest is taken as SHA-1.
impl FromStr for Checksum {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((algorithm, hex_digest)) => Checksum::new(algorithm.parse()?, hex_digest),
            None => Checksum::sha1(s),
        }
    }
}

// ─── Streaming digests ──────────────────────────────────

pub(crate) enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Md5(Md5),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Md5 => Hasher::Md5(Md5::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Md5(h) => h.update(data),
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

pub fn digest_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(bytes);
    hasher.finalize_hex()
}

/// Hashes a file without loading it into memory.
pub async fn digest_file(algorithm: HashAlgorithm, path: &Path) -> EngineResult<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| EngineError::io(path, e))?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buf)
            .await
            .map_err(|e| EngineError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize_hex())
}

// ABOUTME: Content digest in OCI form ("sha256:<hex>").
// ABOUTME: Identifies artifacts; computed with SHA-256 over the content.

use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

const PREFIX: &str = "sha256:";

#[derive(Debug, Error)]
pub enum ParseDigestError {
    #[error("digest must start with \"sha256:\": {0}")]
    MissingAlgorithm(String),

    #[error("digest must have 64 hex characters: {0}")]
    InvalidHex(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Digest of the given bytes.
    pub fn of(content: impl AsRef<[u8]>) -> Self {
        use sha2::Digest as _;
        let mut hasher = Sha256::new();
        hasher.update(content.as_ref());
        Self(format!("{PREFIX}{}", hex::encode(hasher.finalize())))
    }

    pub fn parse(input: &str) -> Result<Self, ParseDigestError> {
        let input = input.trim();
        let hex_part = input
            .strip_prefix(PREFIX)
            .ok_or_else(|| ParseDigestError::MissingAlgorithm(input.to_string()))?;
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseDigestError::InvalidHex(input.to_string()));
        }
        Ok(Self(format!("{PREFIX}{}", hex_part.to_ascii_lowercase())))
    }

    /// Find the first digest embedded in free text, such as `docker push`
    /// output or a pod's `imageID`.
    pub fn find_in(text: &str) -> Option<Self> {
        text.match_indices(PREFIX).find_map(|(start, _)| {
            let candidate: String = text[start..]
                .chars()
                .take(PREFIX.len() + 64)
                .collect();
            Self::parse(&candidate).ok()
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[PREFIX.len()..PREFIX.len() + 12]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = ParseDigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Digest::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}

// ABOUTME: Names of namespaces, deployments and secrets in the cluster.
// ABOUTME: Validated as RFC 1123 labels: lowercase alphanumerics and inner hyphens, 63 bytes at most.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MAX_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum ResourceNameError {
    #[error("resource name cannot be empty")]
    Empty,

    #[error("resource name is longer than {MAX_LEN} characters")]
    TooLong,

    #[error("resource name cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("resource name cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("resource name must be lowercase")]
    NotLowercase,

    #[error("invalid character in resource name: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(value: &str) -> Result<Self, ResourceNameError> {
        match value.as_bytes() {
            [] => return Err(ResourceNameError::Empty),
            bytes if bytes.len() > MAX_LEN => return Err(ResourceNameError::TooLong),
            [b'-', ..] => return Err(ResourceNameError::StartsWithHyphen),
            [.., b'-'] => return Err(ResourceNameError::EndsWithHyphen),
            _ => {}
        }

        if let Some(c) = value
            .chars()
            .find(|c| !matches!(c, 'a'..='z' | '0'..='9' | '-'))
        {
            return Err(if c.is_ascii_uppercase() {
                ResourceNameError::NotLowercase
            } else {
                ResourceNameError::InvalidChar(c)
            });
        }

        Ok(Self(value.to_owned()))
    }

    /// Namespace used when none is configured.
    pub fn default_namespace() -> Self {
        Self("default".to_owned())
    }

    /// Pull secret name used when none is configured.
    pub fn default_pull_secret() -> Self {
        Self("reg-cred".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ResourceName {
    type Err = ResourceNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ResourceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

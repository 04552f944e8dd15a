// ABOUTME: Secret values that can be literal or pulled from the environment.
// ABOUTME: CI systems inject registry tokens as env vars, so that is the usual form.

use crate::error::{Error, Result};
use crate::types::SecretString;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SecretValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl SecretValue {
    pub fn resolve(&self) -> Result<SecretString> {
        match self {
            SecretValue::Literal(s) => Ok(SecretString::new(s.clone())),
            SecretValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(SecretString::new(val)),
                Err(_) => default
                    .clone()
                    .map(SecretString::new)
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }
}

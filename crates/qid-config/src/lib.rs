//! Pipeline definition decoding.
//!
//! Pipelines are declared in HCL with top-level `variable`,
//! `resource_type`, `resource`, `runner` and `job` blocks. Decoding is
//! two-pass: the first pass collects the `variable` declarations, the
//! second re-evaluates the whole document with `var.<name>` bound to the
//! resolved values. The decoder is side-effect-free.

mod decode;

pub use decode::{decode, decode_variables};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("hcl parse error: {0}")]
    Parse(#[from] hcl::Error),

    #[error("invalid config in {location}: {message}")]
    InvalidConfig { location: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(location: impl Into<String>, message: impl Into<String>) -> ConfigError {
        ConfigError::InvalidConfig {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl From<ConfigError> for qid_core::Error {
    fn from(err: ConfigError) -> Self {
        qid_core::Error::InvalidInput(err.to_string())
    }
}

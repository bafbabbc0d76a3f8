//! Process-level knobs for the query engine.
//!
//! Everything here has a sensible [`Default`], and the whole configuration can be deserialized from
//! the same JSON document that carries the descriptors, so embedding applications rarely need to
//! build one by hand.

use crate::graphql::loader::DEFAULT_MAX_BATCH_SIZE;
use serde::Deserialize;

/// Configuration of a [`Service`](crate::graphql::service::Service).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Report internal error details to clients.
    ///
    /// When this is off, failures in the underlying store are logged in full but clients only see
    /// a generic message.
    pub debug: bool,
    /// Limits on the shape of incoming requests.
    pub limits: Limits,
    /// The maximum number of keys coalesced into a single batched lookup.
    pub max_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            limits: Limits::default(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

/// Request-shape limits, checked before any part of a request executes.
///
/// A limit of [`None`] disables that check.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Limits {
    /// The maximum number of lexical tokens in the query document.
    pub max_tokens: Option<usize>,
    /// The maximum nesting depth of field selections.
    pub max_depth: Option<usize>,
    /// The maximum number of aliased fields.
    pub max_aliases: Option<usize>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tokens: Some(5000),
            max_depth: Some(16),
            max_aliases: Some(30),
        }
    }
}

impl Limits {
    /// Limits which accept any request.
    pub fn unlimited() -> Self {
        Self {
            max_tokens: None,
            max_depth: None,
            max_aliases: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: Config = serde_json::from_str(r#"{"limits": {"max_depth": 3}}"#).unwrap();
        assert_eq!(
            config,
            Config {
                limits: Limits {
                    max_depth: Some(3),
                    ..Default::default()
                },
                ..Default::default()
            }
        );
    }
}

//! Plugin configuration parsing.
//!
//! Root contexts receive their configuration as a string in `on_configure`.
//! Most plugins carry JSON there; [`parse_json`] turns it into a typed value
//! and treats a blank string as "use the defaults".

use anyhow::Context as _;
use serde::de::DeserializeOwned;

/// Deserialize a configuration string, or return `T::default()` when it is blank.
pub fn parse_json<T>(raw: &str) -> anyhow::Result<T>
where T: DeserializeOwned + Default {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(raw).context("invalid plugin configuration")
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct RateLimit {
        requests_per_second: u32,
        header: Option<String>,
    }

    #[test]
    fn blank_configuration_uses_defaults() {
        assert_eq!(parse_json::<RateLimit>("").expect("blank"), RateLimit::default());
        assert_eq!(parse_json::<RateLimit>("  \n").expect("whitespace"), RateLimit::default());
    }

    #[test]
    fn partial_configuration_fills_defaults() {
        let config: RateLimit = parse_json(r#"{"requests_per_second": 20}"#).expect("parse");
        assert_eq!(config, RateLimit {
            requests_per_second: 20,
            header: None,
        });
    }

    #[test]
    fn malformed_configuration_is_an_error() {
        let err = parse_json::<RateLimit>("{not json").expect_err("must fail");
        assert!(err.to_string().contains("invalid plugin configuration"));

        assert!(parse_json::<RateLimit>(r#"{"burst": 1}"#).is_err());
    }
}

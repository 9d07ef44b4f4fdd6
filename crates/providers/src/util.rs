//! Shared utility functions for provider adapters.

use ac_domain::config::llm::{AuthConfig, AuthMode};
use ac_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve the secret value for an [`AuthConfig`] in `ApiKey`/`QueryParam`
/// mode: `key` (plaintext, config-only) takes precedence over `env`.
/// `AuthMode::None` never calls this — callers check the mode first.
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    if let Some(ref key) = auth.key {
        return Ok(key.clone());
    }
    if let Some(ref env_var) = auth.env {
        return std::env::var(env_var).map_err(|_| {
            Error::Auth(format!(
                "environment variable '{env_var}' not set or not valid UTF-8"
            ))
        });
    }
    Err(Error::Auth(
        "no API key configured: set 'key' or 'env' in the provider's auth config".into(),
    ))
}

/// Apply a resolved [`AuthConfig`] to an outgoing request builder, per its
/// `mode`: a header (the common case) or a query parameter.
pub fn apply_auth(
    builder: reqwest::RequestBuilder,
    auth: &AuthConfig,
) -> Result<reqwest::RequestBuilder> {
    match auth.mode {
        AuthMode::None => Ok(builder),
        AuthMode::ApiKey => {
            let key = resolve_api_key(auth)?;
            let header = auth.header.as_deref().unwrap_or("Authorization");
            let prefix = auth.prefix.as_deref().unwrap_or("Bearer ");
            Ok(builder.header(header, format!("{prefix}{key}")))
        }
        AuthMode::QueryParam => {
            let key = resolve_api_key(auth)?;
            let param = auth.header.as_deref().unwrap_or("key");
            Ok(builder.query(&[(param, key)]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_prefers_plaintext_key() {
        let auth = AuthConfig {
            key: Some("plaintext-wins".into()),
            env: Some("AC_TEST_SHOULD_NOT_BE_READ".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "plaintext-wins");
    }

    #[test]
    fn resolve_api_key_falls_back_to_env() {
        let var = "AC_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var, "env-secret-value");
        let auth = AuthConfig {
            env: Some(var.into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "env-secret-value");
        std::env::remove_var(var);
    }

    #[test]
    fn resolve_api_key_errors_with_no_source_configured() {
        let auth = AuthConfig::default();
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(err.to_string().contains("no API key configured"));
    }

    #[test]
    fn apply_auth_none_mode_leaves_request_untouched() {
        let client = reqwest::Client::new();
        let auth = AuthConfig {
            mode: AuthMode::None,
            ..Default::default()
        };
        assert!(apply_auth(client.get("http://localhost"), &auth).is_ok());
    }
}

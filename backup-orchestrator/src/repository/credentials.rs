//! Credentials and the engine environment built from them.

use super::{ProviderKind, RepositoryTarget};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

pub const ENV_ACCESS_KEY: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const ENV_REPOSITORY: &str = "RESTIC_REPOSITORY";
pub const ENV_PASSWORD: &str = "RESTIC_PASSWORD";

/// Secrets for one operation. Never persisted and never logged.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    pub password: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn static_keys(access_key: impl Into<String>, secret_key: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn password_only(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            ..Self::default()
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &redact(&self.access_key))
            .field("secret_key", &redact(&self.secret_key))
            .field("session_token", &self.session_token.as_deref().map(redact))
            .field("password", &redact(&self.password))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

/// Variables injected into an engine process.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EngineEnv(BTreeMap<String, String>);

impl EngineEnv {
    /// The five repository variables. Empty values are left out.
    pub fn for_repository(target: &RepositoryTarget, credentials: &Credentials) -> Self {
        let mut env = Self::default();
        if target.kind != ProviderKind::Filesystem {
            env.insert(ENV_ACCESS_KEY, &credentials.access_key);
            env.insert(ENV_SECRET_KEY, &credentials.secret_key);
            if let Some(token) = &credentials.session_token {
                env.insert(ENV_SESSION_TOKEN, token);
            }
        }
        env.insert(ENV_REPOSITORY, &target.url);
        env.insert(ENV_PASSWORD, &credentials.password);
        env
    }

    /// Insert unless `value` is empty.
    pub fn insert(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.0.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_vars(self) -> BTreeMap<String, String> {
        self.0
    }

    /// `KEY=VALUE` lines, base64 encoded, for debug-level diagnostics.
    pub fn diagnostic_dump(&self) -> String {
        let plain = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        general_purpose::STANDARD.encode(plain.as_bytes())
    }
}

impl fmt::Debug for EngineEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.keys()).finish()
    }
}

//! Login credentials and where they come from.

use std::fmt;

use base64::Engine;

use crate::error::ConfigError;

/// Environment variable holding the bot's login name.
pub const LOGIN_VAR: &str = "BOT_LOGIN";
/// Environment variable holding the bot's password.
pub const PASSWORD_VAR: &str = "BOT_PASSWORD";

/// An immutable (login, password) pair for the `basic` auth scheme.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    login: String,
    password: String,
}

impl Credentials {
    /// Build credentials, rejecting empty values.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        Self::from_parts(Some(login.into()), Some(password.into()))
    }

    /// Build credentials from optional parts, e.g. two environment lookups.
    /// A missing or blank part is a [`ConfigError::MissingCredential`].
    pub fn from_parts(login: Option<String>, password: Option<String>) -> Result<Self, ConfigError> {
        let login = login
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("login"))?;
        let password = password
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingCredential("password"))?;
        Ok(Self { login, password })
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    /// The `basic` scheme secret: base64 of `login:password`.
    pub fn basic_secret(&self) -> String {
        let raw = format!("{}:{}", self.login, self.password);
        base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Supplies credentials to the supervisor before every attempt.
pub trait CredentialSource: Send + Sync {
    fn load(&self) -> Result<Credentials, ConfigError>;
}

impl CredentialSource for Credentials {
    fn load(&self) -> Result<Credentials, ConfigError> {
        Ok(self.clone())
    }
}

impl<F> CredentialSource for F
where
    F: Fn() -> Result<Credentials, ConfigError> + Send + Sync,
{
    fn load(&self) -> Result<Credentials, ConfigError> {
        self()
    }
}

/// Reads credentials from two environment variables on every load.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    pub login_var: String,
    pub password_var: String,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self {
            login_var: LOGIN_VAR.to_string(),
            password_var: PASSWORD_VAR.to_string(),
        }
    }
}

impl CredentialSource for EnvCredentials {
    fn load(&self) -> Result<Credentials, ConfigError> {
        Credentials::from_parts(
            std::env::var(&self.login_var).ok(),
            std::env::var(&self.password_var).ok(),
        )
    }
}

//! Bearer-token sources.

use parlor_shared::transport::TokenSource;

/// Environment variable read by [`EnvToken::default`].
pub const TOKEN_ENV: &str = "PARLOR_TOKEN";

/// A token fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// A source that never yields a token.
    pub fn none() -> Self {
        Self(None)
    }
}

impl From<Option<String>> for StaticToken {
    fn from(token: Option<String>) -> Self {
        Self(token)
    }
}

impl TokenSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        usable(self.0.as_deref())
    }
}

/// Reads the token from an environment variable on every call, so a login
/// that happens after startup is picked up.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(TOKEN_ENV)
    }
}

impl TokenSource for EnvToken {
    fn bearer_token(&self) -> Option<String> {
        usable(std::env::var(&self.var).ok().as_deref())
    }
}

fn usable(token: Option<&str>) -> Option<String> {
    token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

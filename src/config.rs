//! Client configuration: endpoints, credential and transport trust mode.

use crate::error::CompletionsError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const COMPLETIONS_STREAM_PATH: &str = ".api/completions/stream";
pub const CODE_COMPLETIONS_PATH: &str = ".api/completions/code";

/// Deployment mode. Anything but `Production` relaxes TLS verification so
/// local instances with self-signed certificates can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Production,
    Development,
}

impl Mode {
    /// `"production"` maps to `Production`; every other value is
    /// `Development`.
    pub fn from_name(name: &str) -> Self {
        if name == "production" {
            Self::Production
        } else {
            Self::Development
        }
    }

    pub fn verifies_certificates(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Mode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
        }
    }
}

/// What a stream does when a complete frame fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorPolicy {
    /// Log the frame, drop it, keep delivering later frames.
    #[default]
    LogAndContinue,
    /// Report the parse error through `on_error` and end the stream.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

/// An endpoint URL validated once, with its scheme resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    scheme: Scheme,
}

impl Endpoint {
    pub fn parse(input: &str) -> Result<Self, CompletionsError> {
        let url = Url::parse(input)
            .map_err(|e| CompletionsError::Config(format!("invalid endpoint {input:?}: {e}")))?;
        Self::from_url(url)
    }

    pub fn from_url(url: Url) -> Result<Self, CompletionsError> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(CompletionsError::Config(format!(
                    "unsupported scheme {other:?} in endpoint {url}"
                )))
            }
        };
        Ok(Self { url, scheme })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Resolve `path` below this endpoint, treating it as a directory.
    fn join_dir(&self, path: &str) -> Result<Self, CompletionsError> {
        let mut base = self.url.clone();
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }
        let url = base
            .join(path)
            .map_err(|e| CompletionsError::Config(format!("cannot join {path:?} onto {base}: {e}")))?;
        Self::from_url(url)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Static client configuration. Build once, then share.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    instance: Endpoint,
    completions: Endpoint,
    code_completions: Endpoint,
    access_token: Option<String>,
    mode: Mode,
    parse_error_policy: ParseErrorPolicy,
}

impl ClientConfig {
    /// Configure a client for an instance; both completion endpoints are
    /// derived from `instance_url`.
    pub fn new(instance_url: &str) -> Result<Self, CompletionsError> {
        let instance = Endpoint::parse(instance_url)?;
        let completions = instance.join_dir(COMPLETIONS_STREAM_PATH)?;
        let code_completions = instance.join_dir(CODE_COMPLETIONS_PATH)?;
        Ok(Self {
            instance,
            completions,
            code_completions,
            access_token: None,
            mode: Mode::default(),
            parse_error_policy: ParseErrorPolicy::default(),
        })
    }

    /// Read `SRC_ENDPOINT`, `SRC_ACCESS_TOKEN` and `SRC_COMPLETIONS_MODE`.
    pub fn from_env() -> Result<Self, CompletionsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CompletionsError> {
        let endpoint = lookup("SRC_ENDPOINT")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CompletionsError::Config("SRC_ENDPOINT is not set".into()))?;
        let mut config = Self::new(&endpoint)?;
        if let Some(token) = lookup("SRC_ACCESS_TOKEN").filter(|v| !v.is_empty()) {
            config = config.with_access_token(token);
        }
        if let Some(mode) = lookup("SRC_COMPLETIONS_MODE").filter(|v| !v.is_empty()) {
            config = config.with_mode(Mode::from_name(&mode));
        }
        Ok(config)
    }

    // -- Builder-style setters --

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_parse_error_policy(mut self, policy: ParseErrorPolicy) -> Self {
        self.parse_error_policy = policy;
        self
    }

    pub fn with_completions_endpoint(mut self, url: &str) -> Result<Self, CompletionsError> {
        self.completions = Endpoint::parse(url)?;
        Ok(self)
    }

    pub fn with_code_completions_endpoint(mut self, url: &str) -> Result<Self, CompletionsError> {
        self.code_completions = Endpoint::parse(url)?;
        Ok(self)
    }

    // -- Accessors --

    pub fn instance(&self) -> &Endpoint {
        &self.instance
    }

    pub fn completions_endpoint(&self) -> &Endpoint {
        &self.completions
    }

    pub fn code_completions_endpoint(&self) -> &Endpoint {
        &self.code_completions
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn parse_error_policy(&self) -> ParseErrorPolicy {
        self.parse_error_policy
    }

    /// Whether the HTTP client must skip certificate validation: only
    /// outside production, and only when an endpoint actually uses TLS.
    pub fn accepts_invalid_certs(&self) -> bool {
        !self.mode.verifies_certificates()
            && (self.completions.is_secure() || self.code_completions.is_secure())
    }
}

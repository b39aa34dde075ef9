//! Unified error types for the probe engine.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorDetails
// ---------------------------------------------------------------------------

/// Serializable error payload attached to a settled request.
///
/// Providers may run out-of-process, so failures cross the bridge as plain
/// data instead of live error values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetails {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorDetails {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Errors raised by a provider while resolving a request.
#[derive(Debug)]
pub enum ProviderError {
    /// The provider ran but could not produce a response.
    Failed(String),
    /// The remote provider reported structured error details.
    Remote(ErrorDetails),
    /// The bridge to an out-of-process provider broke down.
    Transport(BridgeError),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "provider failed: {msg}"),
            Self::Remote(details) => write!(f, "remote provider failed: {details}"),
            Self::Transport(e) => write!(f, "provider transport: {e}"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<BridgeError> for ProviderError {
    fn from(e: BridgeError) -> Self {
        Self::Transport(e)
    }
}

impl ProviderError {
    /// Convert into the payload attached to a settled request.
    pub fn to_details(&self) -> ErrorDetails {
        match self {
            Self::Remote(details) => details.clone(),
            Self::Failed(msg) => ErrorDetails::new(msg.clone()).with_code("provider"),
            Self::Transport(e) => ErrorDetails::new(e.to_string()).with_code("transport"),
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

/// Errors from provider registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A provider with this id is already registered.
    Duplicate(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(id) => write!(f, "provider `{id}` is already registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

// ---------------------------------------------------------------------------
// ProbeError
// ---------------------------------------------------------------------------

/// Errors surfaced by the session coordinator and session model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// No provider is registered under the configured id.
    NoProvider(String),
    /// A request is already in flight for this session id.
    RequestPending(String),
    /// The session was disposed and can no longer be used.
    SessionDisposed(String),
    /// The session is not in a state that allows the operation.
    InvalidState(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProvider(id) => write!(f, "no provider registered for `{id}`"),
            Self::RequestPending(id) => {
                write!(f, "session {id} already has a request in flight")
            }
            Self::SessionDisposed(id) => write!(f, "session {id} has been disposed"),
            Self::InvalidState(msg) => write!(f, "invalid session state: {msg}"),
        }
    }
}

impl std::error::Error for ProbeError {}

// ---------------------------------------------------------------------------
// BridgeError
// ---------------------------------------------------------------------------

/// Errors from the cross-process bridge transport.
#[derive(Debug)]
pub enum BridgeError {
    /// The connection closed before a reply arrived.
    Closed,
    /// Reading or writing the underlying stream failed.
    Io(std::io::Error),
    /// A frame could not be encoded or decoded.
    Codec(serde_json::Error),
    /// The peer answered with an error.
    Remote(String),
    /// The peer answered with a reply of the wrong shape.
    UnexpectedReply(String),
    /// The peer did not answer in time.
    Timeout,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "bridge connection closed"),
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Remote(msg) => write!(f, "remote error: {msg}"),
            Self::UnexpectedReply(msg) => write!(f, "unexpected reply: {msg}"),
            Self::Timeout => write!(f, "bridge call timed out"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

// ---------------------------------------------------------------------------
// ImportError
// ---------------------------------------------------------------------------

/// Errors when importing a session document.
#[derive(Debug)]
pub enum ImportError {
    /// The document is not valid JSON or does not match the expected shape.
    Parse(serde_json::Error),
    /// The document was written by an unknown format version.
    UnsupportedVersion(u32),
    /// The document parsed but violates a structural rule.
    Invalid(String),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "malformed session document: {e}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported session document version {v}"),
            Self::Invalid(msg) => write!(f, "invalid session document: {msg}"),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<serde_json::Error> for ImportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display() {
        assert_eq!(
            ProviderError::Failed("boom".into()).to_string(),
            "provider failed: boom"
        );
        assert_eq!(
            ProviderError::Transport(BridgeError::Closed).to_string(),
            "provider transport: bridge connection closed"
        );
    }

    #[test]
    fn provider_error_details_keep_remote_payload() {
        let details = ErrorDetails::new("quota exceeded").with_code("429");
        let err = ProviderError::Remote(details.clone());
        assert_eq!(err.to_details(), details);
        assert_eq!(
            ProviderError::Failed("x".into()).to_details().code.as_deref(),
            Some("provider")
        );
    }

    #[test]
    fn error_details_display_includes_code() {
        assert_eq!(ErrorDetails::new("nope").to_string(), "nope");
        assert_eq!(
            ErrorDetails::new("nope").with_code("E1").to_string(),
            "nope (E1)"
        );
    }

    #[test]
    fn registry_error_names_provider() {
        let e = RegistryError::Duplicate("probe".into());
        assert_eq!(e.to_string(), "provider `probe` is already registered");
    }

    #[test]
    fn probe_error_display_variants() {
        assert_eq!(
            ProbeError::NoProvider("probe".into()).to_string(),
            "no provider registered for `probe`"
        );
        assert!(ProbeError::RequestPending("abcd".into())
            .to_string()
            .contains("abcd"));
    }

    #[test]
    fn config_error_from_toml() {
        let toml_err: toml::de::Error = toml::from_str::<toml::Value>("x = [unclosed").unwrap_err();
        let e = ConfigError::from(toml_err);
        assert!(e.to_string().starts_with("toml:"));
    }

    #[test]
    fn bridge_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let e = BridgeError::from(io_err);
        assert!(e.to_string().starts_with("io:"), "got: {e}");
    }

    #[test]
    fn import_error_version_message() {
        assert_eq!(
            ImportError::UnsupportedVersion(9).to_string(),
            "unsupported session document version 9"
        );
    }
}

//! Error taxonomy for the extraction core.
//!
//! Only [`HarvestError::BindingUnavailable`] escapes a call as a hard failure.
//! Every other variant is folded into a structured response by the harvester.

/// All errors the extraction core can raise.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HarvestError {
    /// The page never settled before the ceiling (or the wait was cancelled).
    #[error("page did not stabilise within {elapsed_ms}ms ({stable_ticks} stable ticks)")]
    StabilityTimeout { elapsed_ms: u64, stable_ticks: u32 },

    /// Every strategy was inapplicable or gated out.
    #[error("no extraction strategy produced an acceptable record")]
    NoStrategySucceeded,

    /// A candidate lacked a name or any of price / availability / id.
    #[error("record is missing core fields")]
    MissingCoreFields,

    /// The browser binding could not be reached.
    #[error("browser binding unavailable: {0}")]
    BindingUnavailable(String),

    /// A captured response or page blob could not be parsed.
    #[error("malformed capture from {source_hint}: {reason}")]
    MalformedCapture { source_hint: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The session hit a cap or was ended; a new session id is required.
    #[error("session {0} is complete")]
    SessionComplete(String),

    #[error("unknown session {0}")]
    UnknownSession(String),

    #[error("payload encoding failed: {0}")]
    Encoding(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl HarvestError {
    /// Whether this error must abort the whole call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarvestError::BindingUnavailable(_))
    }

    /// Stable machine-readable code used in protocol errors and diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            HarvestError::StabilityTimeout { .. } => "stability_timeout",
            HarvestError::NoStrategySucceeded => "no_strategy_succeeded",
            HarvestError::MissingCoreFields => "missing_core_fields",
            HarvestError::BindingUnavailable(_) => "binding_unavailable",
            HarvestError::MalformedCapture { .. } => "malformed_capture",
            HarvestError::InvalidRequest(_) => "invalid_request",
            HarvestError::SessionComplete(_) => "session_complete",
            HarvestError::UnknownSession(_) => "unknown_session",
            HarvestError::Encoding(_) => "encoding",
            HarvestError::Config(_) => "config",
        }
    }

    /// Wrap any binding-side failure.
    pub fn binding(err: impl std::fmt::Display) -> Self {
        HarvestError::BindingUnavailable(err.to_string())
    }
}

pub type HarvestResult<T> = Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_binding_errors_are_fatal() {
        assert!(HarvestError::binding("socket closed").is_fatal());
        assert!(!HarvestError::NoStrategySucceeded.is_fatal());
        assert!(!HarvestError::StabilityTimeout {
            elapsed_ms: 15_000,
            stable_ticks: 1
        }
        .is_fatal());
        assert!(!HarvestError::MissingCoreFields.is_fatal());
    }

    #[test]
    fn test_codes_are_snake_case() {
        let err = HarvestError::MalformedCapture {
            source_hint: "https://x.test/api".into(),
            reason: "eof".into(),
        };
        assert_eq!(err.code(), "malformed_capture");
        assert!(err.to_string().contains("https://x.test/api"));
        assert_eq!(HarvestError::SessionComplete("s".into()).code(), "session_complete");
        assert_eq!(HarvestError::UnknownSession("s".into()).code(), "unknown_session");
    }
}

use {
    zapgate_channels::ProviderError,
    zapgate_common::InstanceKey,
    zapgate_sessions::SessionError,
};

#[derive(Debug, thiserror::Error)]
pub enum PhoneError {
    #[error("invalid phone number '{input}': {reason}")]
    InvalidFormat { input: String, reason: String },

    #[error("unsupported numbering plan for '{number}': {reason}")]
    UnsupportedPlan { number: String, reason: String },

    #[error("no registered account matches '{0}'")]
    NotFound(String),

    #[error("no phone number is known for linked identity '{0}'")]
    UnknownLid(String),

    #[error("existence check for '{0}' timed out")]
    ResolutionTimeout(String),

    #[error("instance '{0}' is not connected")]
    SessionNotConnected(InstanceKey),

    #[error(transparent)]
    Session(SessionError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl PhoneError {
    pub(crate) fn invalid(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(number: &str, reason: impl Into<String>) -> Self {
        Self::UnsupportedPlan {
            number: number.to_string(),
            reason: reason.into(),
        }
    }

    /// Only a timed-out resolution may be retried as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResolutionTimeout(_))
    }
}

impl From<SessionError> for PhoneError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionNotConnected(key) => Self::SessionNotConnected(key),
            other => Self::Session(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_retryable() {
        assert!(PhoneError::ResolutionTimeout("1".into()).is_retryable());
        assert!(!PhoneError::NotFound("1".into()).is_retryable());
        assert!(!PhoneError::invalid("x", "too short").is_retryable());
        assert!(!PhoneError::SessionNotConnected("t".into()).is_retryable());
    }

    #[test]
    fn session_not_connected_is_flattened() {
        let err = PhoneError::from(SessionError::SessionNotConnected("t".into()));
        assert!(matches!(err, PhoneError::SessionNotConnected(_)));

        let err = PhoneError::from(SessionError::UnknownInstance("t".into()));
        assert!(matches!(
            err,
            PhoneError::Session(SessionError::UnknownInstance(_))
        ));
    }
}

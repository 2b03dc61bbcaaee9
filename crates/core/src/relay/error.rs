use std::borrow::Cow;
use std::fmt::{self, Display};

use farm_chat_model::ErrorKind as ProviderErrorKind;

use super::SendStage;

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The upstream asked us to slow down.
    RateLimited,
    /// The workspace ran out of credits.
    QuotaExceeded,
    /// The upstream failed, or the stream broke while reading.
    UpstreamUnavailable,
    /// The stream finished without any text.
    EmptyResponse,
    /// Another send is in flight for the same conversation.
    Busy,
}

impl ErrorKind {
    /// Returns `true` if retrying later may succeed without the user doing
    /// anything about their account.
    #[inline]
    pub fn is_transient(&self) -> bool {
        !matches!(self, ErrorKind::QuotaExceeded)
    }

    /// Returns the title of the notice shown to the user.
    pub fn notice_title(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "Too Many Requests",
            ErrorKind::QuotaExceeded => "Usage Limit Reached",
            ErrorKind::UpstreamUnavailable => "Error",
            ErrorKind::EmptyResponse => "No response",
            ErrorKind::Busy => "Please wait",
        }
    }

    /// Returns the body of the notice shown to the user.
    pub fn notice_description(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "Please wait a moment and try again.",
            ErrorKind::QuotaExceeded => "Please check your account credits.",
            ErrorKind::UpstreamUnavailable => {
                "Failed to get a response. Please try again."
            }
            ErrorKind::EmptyResponse => {
                "The assistant did not reply. Please try again."
            }
            ErrorKind::Busy => "The previous reply is still being written.",
        }
    }
}

impl From<ProviderErrorKind> for ErrorKind {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::RateLimited => ErrorKind::RateLimited,
            ProviderErrorKind::QuotaExceeded => ErrorKind::QuotaExceeded,
            ProviderErrorKind::Unavailable => ErrorKind::UpstreamUnavailable,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::RateLimited => write!(f, "Rate limited"),
            ErrorKind::QuotaExceeded => write!(f, "Quota exceeded"),
            ErrorKind::UpstreamUnavailable => write!(f, "Upstream unavailable"),
            ErrorKind::EmptyResponse => write!(f, "Empty response"),
            ErrorKind::Busy => write!(f, "Busy"),
        }
    }
}

/// Describes why a send failed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    stage: SendStage,
    reason: Option<String>,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind, stage: SendStage) -> Self {
        Self {
            kind,
            stage,
            reason: None,
        }
    }

    #[inline]
    pub(crate) fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            reason: Some(reason.into()),
            ..self
        }
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the stage the send ended in.
    #[inline]
    pub fn stage(&self) -> SendStage {
        self.stage
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.stage)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::RateLimited.is_transient());
        assert!(ErrorKind::UpstreamUnavailable.is_transient());
        assert!(ErrorKind::EmptyResponse.is_transient());
        assert!(ErrorKind::Busy.is_transient());
        assert!(!ErrorKind::QuotaExceeded.is_transient());
    }

    #[test]
    fn test_display() {
        let err = Error::new(ErrorKind::RateLimited, SendStage::Rejected);
        assert_eq!(err.to_string(), "Rate limited (rejected)");

        let err = err.with_reason("too many requests");
        assert_eq!(err.to_string(), "too many requests (rejected)");
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }
}

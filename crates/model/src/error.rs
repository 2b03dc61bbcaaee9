use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The provider is rate limited (HTTP 429).
    RateLimited,
    /// The account has run out of credits (HTTP 402).
    QuotaExceeded,
    /// Any other failure: bad status, transport error, missing or broken
    /// body.
    Unavailable,
}

impl ErrorKind {
    /// Classifies an upstream HTTP status code.
    ///
    /// Returns `None` for success statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(Self::RateLimited),
            402 => Some(Self::QuotaExceeded),
            _ => Some(Self::Unavailable),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::RateLimited => write!(f, "Rate limited"),
            ErrorKind::QuotaExceeded => write!(f, "Quota exceeded"),
            ErrorKind::Unavailable => write!(f, "Upstream unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(ErrorKind::from_status(200), None);
        assert_eq!(ErrorKind::from_status(204), None);
        assert_eq!(ErrorKind::from_status(429), Some(ErrorKind::RateLimited));
        assert_eq!(
            ErrorKind::from_status(402),
            Some(ErrorKind::QuotaExceeded)
        );
        assert_eq!(ErrorKind::from_status(500), Some(ErrorKind::Unavailable));
        assert_eq!(ErrorKind::from_status(400), Some(ErrorKind::Unavailable));
    }
}

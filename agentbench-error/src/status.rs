//! Error status: how a caller should react to an error

use std::fmt;

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatus {
    /// Retrying will not help (bad arguments, unknown tool, ...)
    Permanent,
    /// Retrying may succeed (network hiccup, rate limit, ...)
    Temporary,
    /// Was temporary, but retries have been exhausted
    Persistent,
}

impl ErrorStatus {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorStatus::Temporary)
    }

    /// Temporary errors become persistent; other statuses are unchanged.
    pub fn persist(self) -> Self {
        match self {
            ErrorStatus::Temporary => ErrorStatus::Persistent,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::Permanent => "permanent",
            ErrorStatus::Temporary => "temporary",
            ErrorStatus::Persistent => "persistent",
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist() {
        assert_eq!(ErrorStatus::Temporary.persist(), ErrorStatus::Persistent);
        assert_eq!(ErrorStatus::Permanent.persist(), ErrorStatus::Permanent);
        assert!(!ErrorStatus::Persistent.is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorStatus::Temporary.to_string(), "temporary");
    }
}

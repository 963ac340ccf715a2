use thiserror::Error;

/// Failures reported by a transport collaborator (REST or live channel).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not authenticated: no session token available")]
    NotAuthenticated,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server responded with status {status}")]
    Http { status: u16 },

    #[error("Request timed out")]
    Timeout,

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Live channel closed")]
    ChannelClosed,
}

impl TransportError {
    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::NotAuthenticated,
            _ => Self::Http { status },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::NotAuthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses_map_to_not_authenticated() {
        assert_eq!(TransportError::from_status(401), TransportError::NotAuthenticated);
        assert_eq!(TransportError::from_status(403), TransportError::NotAuthenticated);
        assert_eq!(
            TransportError::from_status(502),
            TransportError::Http { status: 502 }
        );
    }
}

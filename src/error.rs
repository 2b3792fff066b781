use thiserror::Error;

/// Errors surfaced by the connection-lifecycle and transaction core.
///
/// Every fallible operation in this crate returns this enum. Adapter
/// implementations are expected to map their driver errors onto it, in
/// particular onto [`SqlConduitError::ConnectionFailure`] for failures that
/// make the physical connection unusable (the pool invalidates such
/// connections instead of recycling them).
#[derive(Debug, Error)]
pub enum SqlConduitError {
    /// Unknown URI scheme, missing configuration, or a required adapter
    /// primitive that the concrete adapter does not implement.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The connection factory failed to produce a physical connection, or an
    /// existing connection failed at the connection level.
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// `acquire` timed out waiting for a pool slot.
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    /// A transaction-level failure reported by the adapter.
    #[error("Transaction failure: {0}")]
    TransactionFailure(String),

    /// A value with no SQL representation for the target adapter.
    #[error("Unsupported literal: {0}")]
    UnsupportedLiteral(String),

    /// Any failure that does not fit a recognized kind.
    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlConduitError {
    /// Classify a foreign error at a domain boundary.
    ///
    /// Recognized domain failures pass through unchanged; anything else is
    /// downgraded to [`SqlConduitError::Other`] carrying only the original
    /// message, so implementation-specific control signals never leak past
    /// the boundary.
    pub fn classify(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        match err.into().downcast::<SqlConduitError>() {
            Ok(domain) => *domain,
            Err(other) => SqlConduitError::Other(other.to_string()),
        }
    }

    /// Whether this failure means the physical connection is no longer
    /// usable and should be invalidated rather than recycled.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, SqlConduitError::ConnectionFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_passes_domain_errors_through() {
        let err = SqlConduitError::classify(SqlConduitError::PoolExhausted("t".into()));
        assert!(matches!(err, SqlConduitError::PoolExhausted(_)));
    }

    #[test]
    fn classify_downgrades_foreign_errors() {
        let io = std::io::Error::other("socket gone");
        let err = SqlConduitError::classify(io);
        match err {
            SqlConduitError::Other(msg) => assert!(msg.contains("socket gone")),
            other => panic!("expected Other, got {other:?}"),
        }
    }
}

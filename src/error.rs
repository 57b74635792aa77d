//! Typed failures for exchange calls and lifecycle runs.
//!
//! Skips are not errors: they travel as `Decision` values. Everything here is
//! a genuine failure that ends a lifecycle run and gets reported.

use thiserror::Error;

/// Failure of a single Execution Gateway call.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("exchange returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Api { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Rejected(_) | GatewayError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Failure that terminates one symbol's lifecycle run.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{op} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        #[source]
        source: GatewayError,
    },

    #[error("{op} failed: {source}")]
    Gateway {
        op: &'static str,
        #[source]
        source: GatewayError,
    },

    #[error("exchange rejected order: {0}")]
    Rejected(String),
}

impl LifecycleError {
    /// Wrap the final gateway error of a retried call.
    pub fn from_gateway(op: &'static str, attempts: u32, source: GatewayError) -> Self {
        match source {
            GatewayError::Rejected(reason) => LifecycleError::Rejected(reason),
            source if source.is_transient() => LifecycleError::RetriesExhausted {
                op,
                attempts,
                source,
            },
            source => LifecycleError::Gateway { op, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Transport("reset".into()).is_transient());
        assert!(GatewayError::Api { status: 503, body: String::new() }.is_transient());
        assert!(GatewayError::Api { status: 429, body: String::new() }.is_transient());
        assert!(!GatewayError::Api { status: 400, body: String::new() }.is_transient());
        assert!(!GatewayError::Rejected("min notional".into()).is_transient());
    }

    #[test]
    fn test_rejection_is_not_reported_as_exhausted() {
        let err = LifecycleError::from_gateway(
            "create_market_order",
            1,
            GatewayError::Rejected("Filter failure: NOTIONAL".into()),
        );
        assert!(matches!(err, LifecycleError::Rejected(_)));

        let err = LifecycleError::from_gateway("fetch_ticker", 3, GatewayError::Transport("timeout".into()));
        assert_eq!(
            err.to_string(),
            "fetch_ticker failed after 3 attempt(s): transport error: timeout"
        );
    }
}

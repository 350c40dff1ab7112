use thiserror::Error;

/// Aggregator / on-chain error fragments that mean the price moved past the tolerance.
const SLIPPAGE_SIGNATURES: &[&str] = &[
    "0x1771",
    "slippagetoleranceexceeded",
    "slippage tolerance exceeded",
    "custom program error: 6001",
];

/// Fragments that mean the route itself could not be built or executed.
const ROUTING_SIGNATURES: &[&str] = &[
    "could_not_find_any_route",
    "no_routes_found",
    "route_not_found",
    "route_plan_does_not_consume_all_the_amount",
    "0x1788",
    "0x1789",
    "custom program error: 6024",
    "custom program error: 6025",
];

#[derive(Error, Debug)]
pub enum TradeError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("slippage tolerance exceeded: {0}")]
    SlippageExceeded(String),

    #[error("routing failed: {0}")]
    Routing(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rpc error: {0}")]
    TransientRpc(String),

    #[error("swap failed: {0}")]
    Swap(String),

    #[error("swap failed after {attempts} attempts, up to {final_slippage_bps} bps: {last_error}")]
    Exhausted {
        final_slippage_bps: u16,
        attempts: usize,
        last_error: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TradeError {
    /// Maps raw aggregator or chain error text onto the retry taxonomy.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if SLIPPAGE_SIGNATURES.iter().any(|s| lower.contains(s)) {
            TradeError::SlippageExceeded(message)
        } else if ROUTING_SIGNATURES.iter().any(|s| lower.contains(s)) {
            TradeError::Routing(message)
        } else {
            TradeError::Swap(message)
        }
    }

    /// Only slippage and routing failures may be retried at a higher tolerance.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TradeError::SlippageExceeded(_) | TradeError::Routing(_))
    }

    pub fn is_routing(&self) -> bool {
        matches!(self, TradeError::Routing(_))
    }
}

impl From<sqlx::Error> for TradeError {
    fn from(err: sqlx::Error) -> Self {
        TradeError::Storage(err.to_string())
    }
}

impl From<solana_client::client_error::ClientError> for TradeError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        TradeError::TransientRpc(err.to_string())
    }
}

impl From<reqwest::Error> for TradeError {
    fn from(err: reqwest::Error) -> Self {
        TradeError::TransientRpc(err.to_string())
    }
}

//! Price oracle abstraction: live quote lookups for spot and futures markets.

use crate::domain::{Decimal, Symbol};
use async_trait::async_trait;
use std::fmt;

pub mod http;
pub mod mock;

pub use http::HttpPriceOracle;
pub use mock::MockOracle;

/// External price-quote service keyed by symbol.
///
/// The engine makes one call per lookup and assumes no caching guarantee.
/// Implementations must bound their call time; a hung oracle must not stall
/// the trigger monitor.
#[async_trait]
pub trait PriceOracle: Send + Sync + fmt::Debug {
    /// Current spot price for a symbol.
    async fn spot_price(&self, symbol: &Symbol) -> Result<Decimal, OracleError>;

    /// Current futures (mark) price for a symbol.
    async fn futures_price(&self, symbol: &Symbol) -> Result<Decimal, OracleError>;
}

/// Error type for oracle lookups.
#[derive(Debug, Clone)]
pub enum OracleError {
    /// The oracle does not quote this symbol.
    SymbolNotFound(String),
    /// Network error (connection refused, DNS failure).
    Network(String),
    /// Non-success HTTP status from the quote service.
    Http { status: u16, message: String },
    /// Malformed response body.
    Parse(String),
    /// The bounded request timeout elapsed.
    Timeout,
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::SymbolNotFound(symbol) => write!(f, "Symbol not found: {}", symbol),
            OracleError::Network(msg) => write!(f, "Network error: {}", msg),
            OracleError::Http { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            OracleError::Parse(msg) => write!(f, "Parse error: {}", msg),
            OracleError::Timeout => write!(f, "Oracle request timed out"),
        }
    }
}

impl std::error::Error for OracleError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_error_display() {
        let err = OracleError::SymbolNotFound("XYZ/USDT".to_string());
        assert_eq!(err.to_string(), "Symbol not found: XYZ/USDT");

        let err = OracleError::Http {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 503: unavailable");

        assert_eq!(OracleError::Timeout.to_string(), "Oracle request timed out");
    }
}

//! Mock price oracle for testing without network calls.

use super::{OracleError, PriceOracle};
use crate::domain::{Decimal, Symbol};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Mock oracle with settable prices and failure injection.
///
/// Prices live behind a mutex so tests can move them while the trigger
/// monitor is running.
#[derive(Debug, Default)]
pub struct MockOracle {
    prices: Mutex<HashMap<String, Decimal>>,
    fail_with: Mutex<Option<OracleError>>,
    fail_symbols: Mutex<HashMap<String, OracleError>>,
}

impl MockOracle {
    /// Create a new mock oracle with no quotes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: set a quote for a symbol.
    pub fn with_price(self, symbol: &str, price: &str) -> Self {
        self.set_price(symbol, price);
        self
    }

    /// Set (or move) the quote for a symbol.
    pub fn set_price(&self, symbol: &str, price: &str) {
        let price = Decimal::from_str_canonical(price).expect("invalid mock price");
        self.prices
            .lock()
            .expect("mock price lock poisoned")
            .insert(symbol.to_string(), price);
    }

    /// Make every lookup fail with the given error until cleared.
    pub fn fail_with(&self, err: OracleError) {
        *self.fail_with.lock().expect("mock failure lock poisoned") = Some(err);
    }

    /// Clear a previously injected failure.
    pub fn clear_failure(&self) {
        *self.fail_with.lock().expect("mock failure lock poisoned") = None;
    }

    /// Make lookups for one symbol fail while others keep working.
    pub fn fail_symbol_with(&self, symbol: &str, err: OracleError) {
        self.fail_symbols
            .lock()
            .expect("mock failure lock poisoned")
            .insert(symbol.to_string(), err);
    }

    /// Clear a per-symbol failure.
    pub fn clear_symbol_failure(&self, symbol: &str) {
        self.fail_symbols
            .lock()
            .expect("mock failure lock poisoned")
            .remove(symbol);
    }

    fn lookup(&self, symbol: &Symbol) -> Result<Decimal, OracleError> {
        if let Some(err) = self
            .fail_with
            .lock()
            .expect("mock failure lock poisoned")
            .clone()
        {
            return Err(err);
        }
        if let Some(err) = self
            .fail_symbols
            .lock()
            .expect("mock failure lock poisoned")
            .get(symbol.as_str())
            .cloned()
        {
            return Err(err);
        }

        self.prices
            .lock()
            .expect("mock price lock poisoned")
            .get(symbol.as_str())
            .copied()
            .ok_or_else(|| OracleError::SymbolNotFound(symbol.as_str().to_string()))
    }
}

#[async_trait]
impl PriceOracle for MockOracle {
    async fn spot_price(&self, symbol: &Symbol) -> Result<Decimal, OracleError> {
        self.lookup(symbol)
    }

    async fn futures_price(&self, symbol: &Symbol) -> Result<Decimal, OracleError> {
        self.lookup(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s.to_string())
    }

    #[tokio::test]
    async fn test_mock_returns_set_price() {
        let oracle = MockOracle::new().with_price("BTC/USDT", "50000");
        let price = oracle.spot_price(&sym("BTC/USDT")).await.unwrap();
        assert_eq!(price, Decimal::from_str_canonical("50000").unwrap());
    }

    #[tokio::test]
    async fn test_mock_unknown_symbol() {
        let oracle = MockOracle::new();
        let err = oracle.spot_price(&sym("XYZ/USDT")).await.unwrap_err();
        assert!(matches!(err, OracleError::SymbolNotFound(_)));
    }

    #[tokio::test]
    async fn test_mock_price_can_move() {
        let oracle = MockOracle::new().with_price("ETH/USDT", "3000");
        oracle.set_price("ETH/USDT", "2900");
        let price = oracle.futures_price(&sym("ETH/USDT")).await.unwrap();
        assert_eq!(price, Decimal::from_str_canonical("2900").unwrap());
    }

    #[tokio::test]
    async fn test_mock_failure_injection_and_recovery() {
        let oracle = MockOracle::new().with_price("BTC/USDT", "50000");
        oracle.fail_with(OracleError::Timeout);
        assert!(oracle.spot_price(&sym("BTC/USDT")).await.is_err());

        oracle.clear_failure();
        assert!(oracle.spot_price(&sym("BTC/USDT")).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_per_symbol_failure_leaves_others_working() {
        let oracle = MockOracle::new()
            .with_price("BTC/USDT", "50000")
            .with_price("ETH/USDT", "3000");
        oracle.fail_symbol_with("ETH/USDT", OracleError::Timeout);

        assert!(oracle.spot_price(&sym("BTC/USDT")).await.is_ok());
        assert!(oracle.spot_price(&sym("ETH/USDT")).await.is_err());

        oracle.clear_symbol_failure("ETH/USDT");
        assert!(oracle.spot_price(&sym("ETH/USDT")).await.is_ok());
    }
}

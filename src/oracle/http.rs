//! HTTP price oracle client.

use super::{OracleError, PriceOracle};
use crate::domain::{Decimal, Symbol};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Quote client against an exchange-style ticker API.
///
/// Every request carries a bounded timeout; transient failures are retried
/// with exponential backoff capped well below the monitor tick interval.
#[derive(Debug, Clone)]
pub struct HttpPriceOracle {
    client: Client,
    base_url: String,
}

impl HttpPriceOracle {
    /// Create a new oracle client with the given base URL and per-request
    /// timeout in milliseconds.
    pub fn new(base_url: String, timeout_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, base_url }
    }

    async fn fetch_ticker(&self, path: &str, symbol: &Symbol) -> Result<Decimal, OracleError> {
        // The ticker API expects the pair without the separator.
        let pair = symbol.as_str().replace('/', "");
        let url = format!("{}{}?symbol={}", self.base_url, path, pair);

        debug!(symbol = %symbol, url = %url, "Fetching quote");

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(5)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self.client.get(&url).send().await.map_err(|e| {
                if e.is_timeout() {
                    backoff::Error::transient(OracleError::Timeout)
                } else {
                    backoff::Error::transient(OracleError::Network(e.to_string()))
                }
            })?;

            let status = response.status();
            if status == 404 {
                return Err(backoff::Error::permanent(OracleError::SymbolNotFound(
                    symbol.as_str().to_string(),
                )));
            }
            if status.is_server_error() || status == 429 {
                return Err(backoff::Error::transient(OracleError::Http {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(OracleError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            let body = response.json::<serde_json::Value>().await.map_err(|e| {
                backoff::Error::permanent(OracleError::Parse(e.to_string()))
            })?;

            parse_price(&body).map_err(backoff::Error::permanent)
        })
        .await
    }
}

fn parse_price(body: &serde_json::Value) -> Result<Decimal, OracleError> {
    let price_str = body
        .get("price")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OracleError::Parse("Missing price field".to_string()))?;

    let price = Decimal::from_str_canonical(price_str)
        .map_err(|e| OracleError::Parse(format!("Invalid price: {}", e)))?;

    if !price.is_positive() {
        return Err(OracleError::Parse(format!(
            "Non-positive price: {}",
            price
        )));
    }
    Ok(price)
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn spot_price(&self, symbol: &Symbol) -> Result<Decimal, OracleError> {
        self.fetch_ticker("/api/v3/ticker/price", symbol).await
    }

    async fn futures_price(&self, symbol: &Symbol) -> Result<Decimal, OracleError> {
        self.fetch_ticker("/fapi/v1/ticker/price", symbol).await
    }
}

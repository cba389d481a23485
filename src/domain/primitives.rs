//! Domain primitives: UserId, Symbol, Side, Market.

use serde::{Deserialize, Serialize};

/// Opaque authenticated user identifier, issued by the (external) auth layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create a UserId from a string.
    pub fn new(id: String) -> Self {
        UserId(id)
    }

    /// Get the id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trading pair in `BASE/QUOTE` form (e.g. "BTC/USDT", "ETH/EUR").
///
/// A bare symbol without a slash is treated as quoted in the display
/// currency, so `quote_asset` returns None for it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    /// Create a Symbol from a string.
    pub fn new(symbol: String) -> Self {
        Symbol(symbol)
    }

    /// Get the symbol as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base asset (the part before the slash), or the whole symbol.
    pub fn base_asset(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Quote asset (the part after the slash), if the symbol carries one.
    pub fn quote_asset(&self) -> Option<&str> {
        let mut parts = self.0.splitn(2, '/');
        parts.next();
        parts.next().filter(|q| !q.is_empty())
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position direction.
///
/// Spot requests use `buy`/`sell`, futures use `long`/`short`; both pairs
/// deserialize to the same two variants since the PnL sign is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Long (spot buy).
    #[serde(alias = "buy", alias = "BUY", alias = "LONG")]
    Long,
    /// Short (spot sell).
    #[serde(alias = "sell", alias = "SELL", alias = "SHORT")]
    Short,
}

impl Side {
    /// Database/text representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// Parse from the database/text representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "long" | "buy" => Some(Side::Long),
            "short" | "sell" => Some(Side::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market variant a position was opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    /// Unleveraged, no margin reserved at open.
    Spot,
    /// Leveraged, margin debited at open.
    Futures,
}

impl Market {
    /// Database/text representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Spot => "spot",
            Market::Futures => "futures",
        }
    }

    /// Parse from the database/text representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spot" => Some(Market::Spot),
            "futures" => Some(Market::Futures),
            _ => None,
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// src/types/market_data.rs - Synthetic market data types

use serde::{Deserialize, Serialize};

/// One OHLC price bar for one simulated tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    /// Structural invariant: high covers both ends, low undercuts both ends,
    /// and the close stays positive.
    pub fn is_well_formed(&self) -> bool {
        self.close > 0.0
            && self.low > 0.0
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }
}

/// One synthetic order book level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Full synthetic book view, regenerated every tick. Decorative only;
/// never consulted by matching logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Rows above mid, furthest first
    pub asks: Vec<BookLevel>,
    /// Rows below mid, nearest first
    pub bids: Vec<BookLevel>,
    pub mid: f64,
}

impl BookSnapshot {
    pub fn empty(mid: f64) -> Self {
        Self { asks: Vec::new(), bids: Vec::new(), mid }
    }
}

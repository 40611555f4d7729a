//! Common enums shared by the simulator engine and facades

use serde::{Deserialize, Serialize};

/// Instrument kind a simulator instance trades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    /// Spot market (no leverage, holdings-based)
    Spot,
    /// Margin market (borrowed quote funds, long-biased)
    Margin,
    /// Futures market (long/short, full TP/SL/trailing)
    Futures,
}

impl InstrumentKind {
    pub fn to_api_string(&self) -> &'static str {
        match self {
            InstrumentKind::Spot => "spot",
            InstrumentKind::Margin => "margin",
            InstrumentKind::Futures => "futures",
        }
    }

    pub fn from_api_string(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "spot" => Some(InstrumentKind::Spot),
            "margin" => Some(InstrumentKind::Margin),
            "futures" => Some(InstrumentKind::Futures),
            _ => None,
        }
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn to_api_string(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn from_api_string(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "long" => Some(Direction::Long),
            "short" => Some(Direction::Short),
            _ => None,
        }
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn to_api_string(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn from_api_string(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Some(OrderSide::Buy),
            "sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn to_api_string(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }

    pub fn from_api_string(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "market" => Some(OrderType::Market),
            "limit" => Some(OrderType::Limit),
            _ => None,
        }
    }
}

/// Margin mode label shown on leveraged positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginMode {
    Isolated,
    Cross,
}

impl MarginMode {
    pub fn to_api_string(&self) -> &'static str {
        match self {
            MarginMode::Isolated => "isolated",
            MarginMode::Cross => "cross",
        }
    }

    pub fn from_api_string(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "isolated" => Some(MarginMode::Isolated),
            "cross" => Some(MarginMode::Cross),
            _ => None,
        }
    }
}

/// Reason a position left the open set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// User-initiated close
    Manual,
    /// Take-profit trigger (including trailing pullback)
    TakeProfit,
    /// Stop-loss trigger
    StopLoss,
    /// Margin fully consumed, force-closed with no payout
    Liquidated,
    /// Closed as the first half of a reversal
    Reversed,
}

impl CloseReason {
    pub fn to_api_string(&self) -> &'static str {
        match self {
            CloseReason::Manual => "manual",
            CloseReason::TakeProfit => "tp",
            CloseReason::StopLoss => "sl",
            CloseReason::Liquidated => "liquidated",
            CloseReason::Reversed => "reversed",
        }
    }

    pub fn from_api_string(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Some(CloseReason::Manual),
            "tp" => Some(CloseReason::TakeProfit),
            "sl" => Some(CloseReason::StopLoss),
            "liquidated" => Some(CloseReason::Liquidated),
            "reversed" => Some(CloseReason::Reversed),
            _ => None,
        }
    }
}

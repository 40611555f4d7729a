// src/types/orders.rs - Order request and pending order types

use serde::{Deserialize, Serialize};

use super::common::{OrderSide, OrderType};

/// User order input after facade-level parsing. Market orders execute
/// immediately; limit orders are queued until the price crosses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Base-asset quantity
    pub amount: f64,
    /// Limit price; ignored for market orders
    pub price: Option<f64>,
    pub leverage: f64,
}

impl OrderRequest {
    pub fn market(side: OrderSide, amount: f64, leverage: f64) -> Self {
        Self { side, order_type: OrderType::Market, amount, price: None, leverage }
    }

    pub fn limit(side: OrderSide, amount: f64, price: f64, leverage: f64) -> Self {
        Self { side, order_type: OrderType::Limit, amount, price: Some(price), leverage }
    }
}

/// A pending limit order. All-or-nothing at tick evaluation time; no
/// partial fills, no expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrder {
    pub id: u64,
    pub side: OrderSide,
    pub price: f64,
    pub amount: f64,
    pub leverage: f64,
    /// Unix millis at placement
    pub placed_at: i64,
}

impl LimitOrder {
    /// Fill condition: buys fill at or below the limit, sells at or above.
    pub fn is_triggered(&self, price: f64) -> bool {
        match self.side {
            OrderSide::Buy => price <= self.price,
            OrderSide::Sell => price >= self.price,
        }
    }
}

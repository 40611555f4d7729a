//! Spot simulator facade
//!
//! Unleveraged buying and selling of a single pair. Exposure is tracked as
//! holdings with a volume-weighted average cost; a 0.1% taker fee applies
//! on both sides.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::engine::{HistoryBus, KvStore};
use crate::sim::{MarketView, SimCore};
use crate::types::{
    AccountSummary, EngineEvent, HistoryRecord, InstrumentKind, OrderRequest, OrderSide, SimError,
};

pub struct SpotSimulator {
    core: SimCore,
}

impl SpotSimulator {
    /// Starts the simulator and its tick task. Must run inside a tokio
    /// runtime.
    pub fn start(config: &Config, kv: Arc<dyn KvStore>, bus: HistoryBus) -> Self {
        Self {
            core: SimCore::start(InstrumentKind::Spot, config, kv, bus),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.core.subscribe()
    }

    pub async fn buy_market(&self, amount: f64) -> Result<(), SimError> {
        let req = OrderRequest::market(OrderSide::Buy, amount, 1.0);
        self.core.ledger().lock().await.place_order(&req)
    }

    pub async fn sell_market(&self, amount: f64) -> Result<(), SimError> {
        let req = OrderRequest::market(OrderSide::Sell, amount, 1.0);
        self.core.ledger().lock().await.place_order(&req)
    }

    pub async fn place_limit(&self, side: OrderSide, amount: f64, price: f64) -> Result<(), SimError> {
        let req = OrderRequest::limit(side, amount, price, 1.0);
        self.core.ledger().lock().await.place_order(&req)
    }

    pub async fn cancel_order(&self, order_id: u64) -> Result<(), SimError> {
        self.core.ledger().lock().await.cancel_order(order_id)
    }

    /// Current holdings as `(quantity, average cost)`.
    pub async fn holdings(&self) -> (f64, f64) {
        self.core.ledger().lock().await.holdings()
    }

    pub async fn summary(&self) -> AccountSummary {
        self.core.ledger().lock().await.summary()
    }

    pub async fn market_view(&self) -> MarketView {
        self.core.market_view().await
    }

    pub async fn history(&self) -> Vec<HistoryRecord> {
        self.core.history_records().await
    }

    pub async fn reset(&self, clear_history: bool) {
        self.core.reset(clear_history).await;
    }

    pub fn pause(&self) {
        self.core.clock().pause();
    }

    pub fn resume(&self) {
        self.core.clock().resume();
    }

    pub fn set_fast(&self, fast: bool) {
        self.core.clock().set_fast(fast);
    }
}

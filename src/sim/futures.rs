//! Futures simulator facade
//!
//! Full two-sided leveraged trading: longs and shorts, isolated or cross
//! margin labels, TP/SL, trailing take-profit and one-click reversal.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::config::Config;
use crate::engine::{HistoryBus, KvStore};
use crate::sim::{check_leverage_tier, MarketView, SimCore};
use crate::types::{
    AccountSummary, CloseReason, Direction, EngineEvent, HistoryRecord, InstrumentKind,
    MarginMode, OrderRequest, OrderSide, Position, SimError,
};

pub struct FuturesSimulator {
    core: SimCore,
    tiers: Vec<f64>,
    leverage: Mutex<f64>,
}

impl FuturesSimulator {
    /// Starts the simulator and its tick task. Must run inside a tokio
    /// runtime.
    pub fn start(config: &Config, kv: Arc<dyn KvStore>, bus: HistoryBus) -> Self {
        let profile = config.profile(InstrumentKind::Futures);
        let default_leverage = profile.leverage_tiers.first().copied().unwrap_or(1.0);
        Self {
            core: SimCore::start(InstrumentKind::Futures, config, kv, bus),
            tiers: profile.leverage_tiers.clone(),
            leverage: Mutex::new(default_leverage),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.core.subscribe()
    }

    pub fn leverage_tiers(&self) -> &[f64] {
        &self.tiers
    }

    pub async fn selected_leverage(&self) -> f64 {
        *self.leverage.lock().await
    }

    pub async fn set_leverage(&self, leverage: f64) -> Result<(), SimError> {
        check_leverage_tier(&self.tiers, leverage)?;
        *self.leverage.lock().await = leverage;
        Ok(())
    }

    pub async fn margin_mode(&self) -> MarginMode {
        self.core.ledger().lock().await.margin_mode()
    }

    /// Mode label stamped on positions opened afterwards; existing positions
    /// keep the label they were opened with.
    pub async fn set_margin_mode(&self, mode: MarginMode) {
        self.core.ledger().lock().await.set_margin_mode(mode);
    }

    /// Opens a position at the current price: buys go long, sells go short.
    pub async fn open_market(&self, direction: Direction, amount: f64) -> Result<(), SimError> {
        let leverage = self.selected_leverage().await;
        let side = match direction {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        };
        let req = OrderRequest::market(side, amount, leverage);
        self.core.ledger().lock().await.place_order(&req)
    }

    pub async fn place_limit(&self, side: OrderSide, amount: f64, price: f64) -> Result<(), SimError> {
        let leverage = self.selected_leverage().await;
        let req = OrderRequest::limit(side, amount, price, leverage);
        self.core.ledger().lock().await.place_order(&req)
    }

    pub async fn cancel_order(&self, order_id: u64) -> Result<(), SimError> {
        self.core.ledger().lock().await.cancel_order(order_id)
    }

    pub async fn close_position(&self, position_id: u64) -> Result<f64, SimError> {
        self.core
            .ledger()
            .lock()
            .await
            .close_position(position_id, CloseReason::Manual)
    }

    /// Closes the position and reopens the same size on the opposite side at
    /// the current price. The close stands even when the reopen is rejected
    /// for margin.
    pub async fn reverse_position(&self, position_id: u64) -> Result<u64, SimError> {
        self.core.ledger().lock().await.reverse_position(position_id)
    }

    pub async fn set_tp_sl(
        &self,
        position_id: u64,
        tp_price: Option<f64>,
        sl_price: Option<f64>,
    ) -> Result<(), SimError> {
        self.core
            .ledger()
            .lock()
            .await
            .set_tp_sl(position_id, tp_price, sl_price)
    }

    pub async fn set_trailing(
        &self,
        position_id: u64,
        activation: Option<f64>,
        callback_pct: Option<f64>,
    ) -> Result<(), SimError> {
        self.core
            .ledger()
            .lock()
            .await
            .set_trailing(position_id, activation, callback_pct)
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.core.ledger().lock().await.positions().to_vec()
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

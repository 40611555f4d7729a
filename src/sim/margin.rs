//! Margin simulator facade
//!
//! Long-biased leveraged trading with a quote-funds loan desk. Buys open
//! leveraged longs at the selected tier; a market sell closes the oldest
//! open long. Interest on the outstanding loan is display-only and never
//! accrues into the balance.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::config::Config;
use crate::engine::{HistoryBus, KvStore};
use crate::sim::{check_leverage_tier, MarketView, SimCore};
use crate::types::{
    AccountSummary, EngineEvent, HistoryRecord, InstrumentKind, OrderRequest, OrderSide, Position,
    SimError,
};

pub struct MarginSimulator {
    core: SimCore,
    tiers: Vec<f64>,
    hourly_interest_rate: f64,
    leverage: Mutex<f64>,
}

impl MarginSimulator {
    /// Starts the simulator and its tick task. Must run inside a tokio
    /// runtime.
    pub fn start(config: &Config, kv: Arc<dyn KvStore>, bus: HistoryBus) -> Self {
        let profile = config.profile(InstrumentKind::Margin);
        let default_leverage = profile.leverage_tiers.first().copied().unwrap_or(1.0);
        Self {
            core: SimCore::start(InstrumentKind::Margin, config, kv, bus),
            tiers: profile.leverage_tiers.clone(),
            hourly_interest_rate: profile.hourly_interest_rate,
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

    /// Opens a leveraged long at the current price.
    pub async fn buy_market(&self, amount: f64) -> Result<(), SimError> {
        let leverage = self.selected_leverage().await;
        let req = OrderRequest::market(OrderSide::Buy, amount, leverage);
        self.core.ledger().lock().await.place_order(&req)
    }

    /// Closes the oldest open long at the current price.
    pub async fn sell_market(&self) -> Result<(), SimError> {
        let leverage = self.selected_leverage().await;
        let req = OrderRequest::market(OrderSide::Sell, 1.0, leverage);
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

    pub async fn close_position(&self, position_id: u64) -> Result<f64, SimError> {
        self.core
            .ledger()
            .lock()
            .await
            .close_position(position_id, crate::types::CloseReason::Manual)
    }

    /// Closes the position and reopens the same size on the opposite side at
    /// the current price. The close stands even when the reopen is rejected
    /// for margin.
    pub async fn reverse_position(&self, position_id: u64) -> Result<u64, SimError> {
        self.core.ledger().lock().await.reverse_position(position_id)
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

    // ------------------------------------------------------------------
    // Loan desk
    // ------------------------------------------------------------------

    pub async fn max_borrow(&self) -> f64 {
        let leverage = self.selected_leverage().await;
        self.core.ledger().lock().await.max_borrow(leverage)
    }

    pub async fn borrow(&self, amount: f64) -> Result<(), SimError> {
        let leverage = self.selected_leverage().await;
        self.core.ledger().lock().await.borrow(amount, leverage)
    }

    /// Repays the full outstanding loan.
    pub async fn repay(&self) -> Result<f64, SimError> {
        self.core.ledger().lock().await.repay()
    }

    /// Interest the outstanding loan would accrue per hour, for display.
    pub async fn hourly_interest(&self) -> f64 {
        let borrowed = self.core.ledger().lock().await.borrowed();
        borrowed * self.hourly_interest_rate
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryKvStore;

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.general.tick_interval_ms = 60_000;
        config
    }

    #[tokio::test]
    async fn test_leverage_selection_validated_against_tiers() {
        let config = quiet_config();
        let sim = MarginSimulator::start(&config, Arc::new(MemoryKvStore::new()), HistoryBus::new());
        assert_eq!(sim.selected_leverage().await, 3.0);

        sim.set_leverage(10.0).await.unwrap();
        assert_eq!(sim.selected_leverage().await, 10.0);

        let err = sim.set_leverage(7.0).await.unwrap_err();
        assert!(matches!(err, SimError::UnsupportedOperation(_)));
    }

    #[tokio::test]
    async fn test_buy_then_sell_closes_oldest_long() {
        let config = quiet_config();
        let sim = MarginSimulator::start(&config, Arc::new(MemoryKvStore::new()), HistoryBus::new());
        sim.set_leverage(10.0).await.unwrap();

        sim.buy_market(1.0).await.unwrap();
        sim.buy_market(2.0).await.unwrap();
        let positions = sim.positions().await;
        assert_eq!(positions.len(), 2);
        let oldest = positions[0].id;

        sim.sell_market().await.unwrap();
        let positions = sim.positions().await;
        assert_eq!(positions.len(), 1);
        assert_ne!(positions[0].id, oldest);
        assert_eq!(sim.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reverse_and_trailing_available() {
        let config = quiet_config();
        let sim = MarginSimulator::start(&config, Arc::new(MemoryKvStore::new()), HistoryBus::new());
        sim.set_leverage(10.0).await.unwrap();
        sim.buy_market(1.0).await.unwrap();
        let id = sim.positions().await[0].id;

        sim.set_trailing(id, Some(2500.0), Some(2.0)).await.unwrap();
        let pos = &sim.positions().await[0];
        assert_eq!(pos.trail_activation, Some(2500.0));
        assert_eq!(pos.trail_callback_pct, Some(2.0));

        let new_id = sim.reverse_position(id).await.unwrap();
        let positions = sim.positions().await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].id, new_id);
        assert_eq!(positions[0].direction, crate::types::Direction::Short);
        assert_eq!(sim.history().await[0].close_reason, "reversed");
    }

    #[tokio::test]
    async fn test_loan_desk_flow() {
        let config = quiet_config();
        let sim = MarginSimulator::start(&config, Arc::new(MemoryKvStore::new()), HistoryBus::new());

        // default 3x tier: 10000 * (3 - 1)
        assert_eq!(sim.max_borrow().await, 20000.0);
        sim.borrow(5000.0).await.unwrap();
        assert_eq!(sim.summary().await.borrowed, 5000.0);
        assert!(sim.hourly_interest().await > 0.0);

        sim.repay().await.unwrap();
        assert_eq!(sim.summary().await.borrowed, 0.0);
    }
}

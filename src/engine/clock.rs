//! Tick driver for a ledger
//!
//! Spawns a tokio task that ticks the shared ledger at a fixed cadence.
//! Pausing skips ticks rather than buffering them, so there is no catch-up
//! burst on resume. The speed toggle only changes the sleep between ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::engine::ledger::PositionLedger;

pub struct MarketClock {
    handle: JoinHandle<()>,
    paused: Arc<AtomicBool>,
    fast: Arc<AtomicBool>,
}

impl MarketClock {
    pub fn spawn(ledger: Arc<Mutex<PositionLedger>>, normal_ms: u64, fast_ms: u64) -> Self {
        let paused = Arc::new(AtomicBool::new(false));
        let fast = Arc::new(AtomicBool::new(false));

        let paused_flag = paused.clone();
        let fast_flag = fast.clone();
        let handle = tokio::spawn(async move {
            loop {
                let interval = if fast_flag.load(Ordering::Relaxed) {
                    fast_ms
                } else {
                    normal_ms
                };
                tokio::time::sleep(Duration::from_millis(interval)).await;
                if paused_flag.load(Ordering::Relaxed) {
                    continue;
                }
                ledger.lock().await.tick();
            }
        });

        Self { handle, paused, fast }
    }

    pub fn pause(&self) {
        debug!("market clock paused");
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        debug!("market clock resumed");
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Switches between the normal and the fast cadence. Takes effect on the
    /// next sleep.
    pub fn set_fast(&self, fast: bool) {
        self.fast.store(fast, Ordering::Relaxed);
    }

    pub fn is_fast(&self) -> bool {
        self.fast.load(Ordering::Relaxed)
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for MarketClock {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PriceModelConfig, SimulatorProfile};
    use crate::engine::history::{HistoryBus, HistoryStore, MemoryKvStore};
    use crate::market::PriceProcess;
    use crate::types::InstrumentKind;
    use tokio::sync::broadcast;

    fn shared_ledger() -> Arc<Mutex<PositionLedger>> {
        let profile = SimulatorProfile {
            symbol: "TST/USDT".to_string(),
            start_price: 1000.0,
            initial_balance: 10000.0,
            leverage_tiers: vec![1.0],
            fee_rate: 0.0,
            hourly_interest_rate: 0.0,
        };
        let history = HistoryStore::new(
            "futures",
            Arc::new(MemoryKvStore::new()),
            HistoryBus::new(),
            200,
        );
        let (tx, _) = broadcast::channel(16);
        Arc::new(Mutex::new(PositionLedger::new(
            InstrumentKind::Futures,
            profile,
            PriceProcess::with_seed(PriceModelConfig::default(), 3),
            history,
            tx,
        )))
    }

    #[tokio::test]
    async fn test_clock_advances_candles() {
        let ledger = shared_ledger();
        let before = ledger.lock().await.candles().len();
        let clock = MarketClock::spawn(ledger.clone(), 10, 5);
        tokio::time::sleep(Duration::from_millis(120)).await;
        let after = ledger.lock().await.candles().len();
        assert!(after > before, "expected ticks to accumulate candles");
        clock.shutdown();
    }

    #[tokio::test]
    async fn test_paused_clock_skips_ticks() {
        let ledger = shared_ledger();
        let clock = MarketClock::spawn(ledger.clone(), 10, 5);
        clock.pause();
        assert!(clock.is_paused());
        let price_before = ledger.lock().await.current_price();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let price_after = ledger.lock().await.current_price();
        assert_eq!(price_before, price_after);
        clock.shutdown();
    }

    #[tokio::test]
    async fn test_speed_toggle_flag() {
        let ledger = shared_ledger();
        let clock = MarketClock::spawn(ledger, 1000, 10);
        assert!(!clock.is_fast());
        clock.set_fast(true);
        assert!(clock.is_fast());
        clock.shutdown();
    }
}

//! User-facing simulator facades
//!
//! One facade per instrument kind, each wrapping a shared `PositionLedger`
//! and a `MarketClock`. Facades validate user input against their trading
//! profile, delegate to the ledger, and expose read snapshots for display.

pub mod futures;
pub mod margin;
pub mod spot;

pub use futures::FuturesSimulator;
pub use margin::MarginSimulator;
pub use spot::SpotSimulator;

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::config::Config;
use crate::engine::{HistoryBus, HistoryStore, KvStore, MarketClock, PositionLedger};
use crate::market::{ema, PriceProcess};
use crate::types::{
    BookSnapshot, Candle, EngineEvent, HistoryRecord, InstrumentKind, SimError,
};

/// Indicator periods rendered on the candle chart.
pub const EMA_PERIODS: [usize; 4] = [5, 25, 45, 144];

/// Read-only market snapshot for one render pass.
#[derive(Debug, Clone)]
pub struct MarketView {
    pub candles: Vec<Candle>,
    pub book: BookSnapshot,
    pub last_price: f64,
    /// Latest EMA value per period in `EMA_PERIODS`, None until enough data
    pub emas: Vec<(usize, Option<f64>)>,
}

/// Shared plumbing behind every facade.
pub(crate) struct SimCore {
    ledger: Arc<Mutex<PositionLedger>>,
    clock: MarketClock,
    events: broadcast::Sender<EngineEvent>,
}

impl SimCore {
    pub(crate) fn start(
        kind: InstrumentKind,
        config: &Config,
        kv: Arc<dyn KvStore>,
        bus: HistoryBus,
    ) -> Self {
        let profile = config.profile(kind).clone();
        let history = HistoryStore::new(
            kind.to_api_string(),
            kv,
            bus,
            config.history.max_records,
        );
        let (events, _) = broadcast::channel(256);
        let ledger = Arc::new(Mutex::new(PositionLedger::new(
            kind,
            profile,
            PriceProcess::new(config.price_model.clone()),
            history,
            events.clone(),
        )));
        let clock = MarketClock::spawn(
            ledger.clone(),
            config.general.tick_interval_ms,
            config.general.fast_tick_interval_ms,
        );
        Self { ledger, clock, events }
    }

    pub(crate) fn ledger(&self) -> &Arc<Mutex<PositionLedger>> {
        &self.ledger
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub(crate) fn clock(&self) -> &MarketClock {
        &self.clock
    }

    pub(crate) async fn market_view(&self) -> MarketView {
        let ledger = self.ledger.lock().await;
        let candles: Vec<Candle> = ledger.candles().to_vec();
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let emas = EMA_PERIODS
            .iter()
            .map(|&p| {
                let series = ema(&closes, p);
                (p, if closes.len() >= p { series.last().copied() } else { None })
            })
            .collect();
        MarketView {
            book: ledger.book().clone(),
            last_price: ledger.current_price(),
            candles,
            emas,
        }
    }

    pub(crate) async fn history_records(&self) -> Vec<HistoryRecord> {
        self.ledger.lock().await.history().list_all()
    }

    pub(crate) async fn reset(&self, clear_history: bool) {
        let mut ledger = self.ledger.lock().await;
        ledger.reset();
        if clear_history {
            ledger.history().reset();
        }
    }
}

/// Validates a leverage selection against the profile's offered tiers.
pub(crate) fn check_leverage_tier(tiers: &[f64], leverage: f64) -> Result<(), SimError> {
    if tiers.iter().any(|&t| (t - leverage).abs() < f64::EPSILON) {
        Ok(())
    } else {
        Err(SimError::UnsupportedOperation(format!(
            "leverage {leverage}x is not an offered tier"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leverage_tier_check() {
        let tiers = [3.0, 5.0, 10.0, 20.0];
        assert!(check_leverage_tier(&tiers, 10.0).is_ok());
        assert!(check_leverage_tier(&tiers, 7.0).is_err());
    }
}

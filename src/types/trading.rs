// src/types/trading.rs - Position, history and account summary types

use serde::{Deserialize, Serialize};

use super::common::{CloseReason, Direction, InstrumentKind, MarginMode};

/// Safety buffer applied to the theoretical full-loss price so liquidation
/// lands slightly before the margin is mathematically exhausted.
pub const LIQUIDATION_BUFFER: f64 = 0.9;

/// Liquidation price for a position opened at `entry` with `leverage`:
/// longs liquidate below entry, shorts above.
pub fn liquidation_price(entry: f64, leverage: f64, direction: Direction) -> f64 {
    match direction {
        Direction::Long => entry * (1.0 - 1.0 / leverage * LIQUIDATION_BUFFER),
        Direction::Short => entry * (1.0 + 1.0 / leverage * LIQUIDATION_BUFFER),
    }
}

/// An open leveraged position. Spot exposure is tracked as holdings on the
/// ledger instead, never as a `Position`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub kind: InstrumentKind,
    pub direction: Direction,
    /// Base-asset quantity, always > 0
    pub size: f64,
    pub entry_price: f64,
    pub leverage: f64,
    /// Quote collateral reserved at open
    pub margin: f64,
    pub liquidation_price: f64,
    pub margin_mode: MarginMode,
    pub tp_price: Option<f64>,
    pub sl_price: Option<f64>,
    /// Trailing take-profit activation threshold
    pub trail_activation: Option<f64>,
    /// Pullback percent from the tracked peak that triggers the close
    pub trail_callback_pct: Option<f64>,
    /// Best price seen since trailing activated; None until activation
    pub trail_peak: Option<f64>,
    /// Unix millis at open
    pub opened_at: i64,
}

impl Position {
    /// Signed PnL at `exit_price`: long `(exit-entry)*size`, short mirrored.
    pub fn pnl_at(&self, exit_price: f64) -> f64 {
        match self.direction {
            Direction::Long => (exit_price - self.entry_price) * self.size,
            Direction::Short => (self.entry_price - exit_price) * self.size,
        }
    }

    /// PnL as a percentage of committed margin, guarded against zero margin.
    pub fn pnl_pct_at(&self, exit_price: f64) -> f64 {
        if self.margin <= 0.0 {
            return 0.0;
        }
        self.pnl_at(exit_price) / self.margin * 100.0
    }

    pub fn is_liquidated_at(&self, price: f64) -> bool {
        match self.direction {
            Direction::Long => price <= self.liquidation_price,
            Direction::Short => price >= self.liquidation_price,
        }
    }

    pub fn tp_triggered_at(&self, price: f64) -> bool {
        match (self.tp_price, self.direction) {
            (Some(tp), Direction::Long) => price >= tp,
            (Some(tp), Direction::Short) => price <= tp,
            (None, _) => false,
        }
    }

    pub fn sl_triggered_at(&self, price: f64) -> bool {
        match (self.sl_price, self.direction) {
            (Some(sl), Direction::Long) => price <= sl,
            (Some(sl), Direction::Short) => price >= sl,
            (None, _) => false,
        }
    }
}

/// Immutable snapshot of a closed trade, persisted through the history store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub sim_type: String,
    pub symbol: String,
    pub direction: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub leverage: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub close_reason: String,
    /// Unix millis
    pub opened_at: i64,
    /// Unix millis
    pub closed_at: i64,
}

impl HistoryRecord {
    pub fn close_reason(&self) -> Option<CloseReason> {
        CloseReason::from_api_string(&self.close_reason)
    }
}

/// Display-only aggregates re-derived by facades after every tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub balance: f64,
    pub borrowed: f64,
    pub unrealized_pnl: f64,
    /// balance + unrealized - borrowed (+ holdings value for spot)
    pub equity: f64,
    /// Committed margin over equity; 0 when flat or equity is non-positive
    pub margin_ratio: f64,
    pub open_positions: usize,
    pub pending_orders: usize,
}

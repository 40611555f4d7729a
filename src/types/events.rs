//! Engine event types broadcast to in-process subscribers

use serde::{Deserialize, Serialize};

use super::common::{CloseReason, Direction, InstrumentKind, OrderSide};

/// Events emitted by a simulator engine over a broadcast channel. The UI
/// layer (or the demo binary) subscribes and re-renders; sends are
/// fire-and-forget and a missing subscriber is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Toast-style user notification; `positive` selects the sentiment
    Notice {
        text: String,
        positive: bool,
    },
    PositionOpened {
        kind: InstrumentKind,
        position_id: u64,
        direction: Direction,
        size: f64,
        entry_price: f64,
        leverage: f64,
    },
    PositionClosed {
        kind: InstrumentKind,
        position_id: u64,
        reason: CloseReason,
        exit_price: f64,
        pnl: f64,
    },
    OrderPlaced {
        kind: InstrumentKind,
        order_id: u64,
        side: OrderSide,
        price: f64,
        amount: f64,
    },
    OrderFilled {
        kind: InstrumentKind,
        order_id: u64,
        fill_price: f64,
    },
    OrderCancelled {
        kind: InstrumentKind,
        order_id: u64,
    },
    BalanceChanged {
        kind: InstrumentKind,
        balance: f64,
        borrowed: f64,
    },
    /// The persisted history list for this simulator type changed
    HistoryChanged {
        sim_type: String,
    },
}

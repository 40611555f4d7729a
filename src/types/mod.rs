// src/types/mod.rs - Type system for the simulator core

pub mod common;
pub mod errors;
pub mod events;
pub mod market_data;
pub mod orders;
pub mod trading;

pub use common::{CloseReason, Direction, InstrumentKind, MarginMode, OrderSide, OrderType};
pub use errors::SimError;
pub use events::EngineEvent;
pub use market_data::{BookLevel, BookSnapshot, Candle};
pub use orders::{LimitOrder, OrderRequest};
pub use trading::{liquidation_price, AccountSummary, HistoryRecord, Position, LIQUIDATION_BUFFER};

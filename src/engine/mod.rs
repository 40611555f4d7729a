//! Simulator engine: ledger state machine, tick driver and trade history

pub mod clock;
pub mod history;
pub mod ledger;

pub use clock::MarketClock;
pub use history::{HistoryBus, HistoryStore, KvStore, MemoryKvStore};
pub use ledger::PositionLedger;

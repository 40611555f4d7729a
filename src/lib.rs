// Define modules
pub mod config;
pub mod engine;
pub mod market;
pub mod sim;
pub mod types;

// Re-export key components for easier usage
pub use config::{get_config, init_config, Config};
pub use engine::{HistoryBus, HistoryStore, KvStore, MarketClock, MemoryKvStore, PositionLedger};
pub use market::{ema, synth_book, PriceProcess};
pub use sim::{FuturesSimulator, MarginSimulator, MarketView, SpotSimulator, EMA_PERIODS};
pub use types::{
    AccountSummary, BookLevel, BookSnapshot, Candle, CloseReason, Direction, EngineEvent,
    HistoryRecord, InstrumentKind, LimitOrder, MarginMode, OrderRequest, OrderSide, OrderType,
    Position, SimError,
};

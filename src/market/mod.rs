// src/market/mod.rs - Synthetic market data generation

pub mod indicators;
pub mod order_book;
pub mod price_process;

pub use indicators::ema;
pub use order_book::synth_book;
pub use price_process::PriceProcess;

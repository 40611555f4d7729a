// main.rs - Headless demo session for the trading simulator

use std::sync::Arc;

use env_logger::Env;
use log::{info, warn};

use papertrade::config::{get_config, init_config};
use papertrade::engine::{HistoryBus, MemoryKvStore};
use papertrade::sim::FuturesSimulator;
use papertrade::types::{Direction, EngineEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from file before the logger so the configured log
    // level applies; report the outcome once logging is up
    let config_load = init_config("config.toml").await;

    env_logger::Builder::from_env(
        Env::default().default_filter_or(&get_config().general.log_level),
    )
    .format_timestamp_millis()
    .format_module_path(false)
    .init();

    match config_load {
        Ok(_) => info!("Configuration loaded successfully"),
        Err(e) => warn!("Error loading configuration: {e}; falling back to defaults"),
    }

    let config = get_config();
    let kv = Arc::new(MemoryKvStore::new());
    let bus = HistoryBus::new();

    let futures_sim = FuturesSimulator::start(config, kv, bus);
    let mut events = futures_sim.subscribe();

    // Print engine events as they happen
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::Notice { text, positive } => {
                    let tag = if positive { "OK " } else { "WARN" };
                    println!("[{tag}] {text}");
                }
                EngineEvent::PositionClosed { position_id, reason, pnl, .. } => {
                    println!(
                        "position {position_id} closed ({}) PnL {pnl:+.2}",
                        reason.to_api_string()
                    );
                }
                _ => {}
            }
        }
    });

    // Scripted session: open a long with a TP/SL bracket and let the market
    // clock decide the outcome.
    futures_sim.set_leverage(10.0).await?;
    futures_sim.open_market(Direction::Long, 0.05).await?;
    let positions = futures_sim.positions().await;
    let position = &positions[0];
    let entry = position.entry_price;
    futures_sim
        .set_tp_sl(position.id, Some(entry * 1.03), Some(entry * 0.98))
        .await?;
    info!(
        "opened demo long @ {entry:.2}, bracket [{:.2}, {:.2}]",
        entry * 0.98,
        entry * 1.03
    );

    futures_sim.set_fast(true);
    tokio::signal::ctrl_c().await?;

    let summary = futures_sim.summary().await;
    println!(
        "final balance {:.2} USDT, equity {:.2}, {} trade(s) recorded",
        summary.balance,
        summary.equity,
        futures_sim.history().await.len()
    );
    Ok(())
}

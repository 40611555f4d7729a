// config.rs - Centralized configuration system

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::types::InstrumentKind;

/// Global configuration singleton
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Returns a reference to the global configuration.
/// If not yet initialized, uses the default configuration.
pub fn get_config() -> &'static Config {
    CONFIG.get().unwrap_or_else(|| {
        static DEFAULT_CONFIG: once_cell::sync::OnceCell<Config> = once_cell::sync::OnceCell::new();
        DEFAULT_CONFIG.get_or_init(Config::default)
    })
}

/// Initializes configuration from the given file path.
pub async fn init_config<P: AsRef<Path>>(path: P) -> Result<(), String> {
    let file_format = path.as_ref().extension().and_then(|os| os.to_str());

    let mut file = File::open(path.as_ref())
        .await
        .map_err(|e| format!("Failed to open config file: {e}"))?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .await
        .map_err(|e| format!("Failed to read config file: {e}"))?;

    let config = match file_format {
        Some("toml") => toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse TOML config: {e:?}")),
        Some("json") => serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse JSON config: {e:?}")),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e:?}")),
        _ => Err("Unsupported config file format".to_string()),
    }?;

    CONFIG
        .set(config)
        .map_err(|_| "Configuration already initialized".to_string())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub price_model: PriceModelConfig,
    pub history: HistoryConfig,
    pub spot: SimulatorProfile,
    pub margin: SimulatorProfile,
    pub futures: SimulatorProfile,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Normal tick interval
    pub tick_interval_ms: u64,
    /// Interval used while the speed toggle is on
    pub fast_tick_interval_ms: u64,
}

/// Parameters of the synthetic random walk
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceModelConfig {
    /// Lower bound of the per-step volatility band, as a fraction of price
    pub vol_min: f64,
    /// Upper bound of the per-step volatility band
    pub vol_max: f64,
    /// Base center of the random walk before bias (slight downward drift)
    pub base_drift: f64,
    /// Hard clamp applied to the bias parameter
    pub bias_clamp: f64,
    /// Bias magnitude applied after a position opens
    pub bias_magnitude: f64,
    /// Probability the bias favors the user's direction
    pub bias_win_rate: f64,
    /// Wall-clock lifetime of a bias window
    pub bias_duration_ms: u64,
    /// A close can never drop below this fraction of the previous close
    pub floor_ratio: f64,
    /// Random extension applied to the candle high/low wicks
    pub wick_extension: f64,
    /// Candle window length kept in memory
    pub candle_window: usize,
    /// Candles pre-generated at engine start
    pub seed_candles: usize,
    /// Synthetic book rows per side
    pub book_rows: usize,
    /// Price increment between book rows
    pub book_step: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    /// Ring-buffer cap on persisted records per simulator type
    pub max_records: usize,
}

/// Per-facade trading profile
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatorProfile {
    pub symbol: String,
    pub start_price: f64,
    pub initial_balance: f64,
    /// Selectable leverage tiers; spot is fixed at [1]
    pub leverage_tiers: Vec<f64>,
    /// Taker fee charged per spot fill; leveraged kinds charge none
    pub fee_rate: f64,
    /// Display-only hourly interest rate on borrowed funds, as a fraction
    pub hourly_interest_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                log_level: "info".to_string(),
                tick_interval_ms: 1000,
                fast_tick_interval_ms: 350,
            },
            price_model: PriceModelConfig::default(),
            history: HistoryConfig { max_records: 200 },
            spot: SimulatorProfile {
                symbol: "BTC/USDT".to_string(),
                start_price: 65000.0,
                initial_balance: 10000.0,
                leverage_tiers: vec![1.0],
                fee_rate: 0.001,
                hourly_interest_rate: 0.0,
            },
            margin: SimulatorProfile {
                symbol: "ETH/USDT".to_string(),
                start_price: 1893.0,
                initial_balance: 10000.0,
                leverage_tiers: vec![3.0, 5.0, 10.0, 20.0],
                fee_rate: 0.0,
                hourly_interest_rate: 0.000413,
            },
            futures: SimulatorProfile {
                symbol: "BTC/USDT".to_string(),
                start_price: 65000.0,
                initial_balance: 10000.0,
                leverage_tiers: vec![3.0, 5.0, 10.0, 20.0, 50.0, 100.0],
                fee_rate: 0.0,
                hourly_interest_rate: 0.0,
            },
        }
    }
}

impl Default for PriceModelConfig {
    fn default() -> Self {
        Self {
            vol_min: 0.002,
            vol_max: 0.011,
            base_drift: -0.48,
            bias_clamp: 0.35,
            bias_magnitude: 0.22,
            bias_win_rate: 0.7,
            bias_duration_ms: 15_000,
            floor_ratio: 0.7,
            wick_extension: 0.003,
            candle_window: 100,
            seed_candles: 80,
            book_rows: 5,
            book_step: 0.2,
        }
    }
}

impl Config {
    pub fn profile(&self, kind: InstrumentKind) -> &SimulatorProfile {
        match kind {
            InstrumentKind::Spot => &self.spot,
            InstrumentKind::Margin => &self.margin,
            InstrumentKind::Futures => &self.futures,
        }
    }
}

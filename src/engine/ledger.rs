//! Position ledger and per-tick lifecycle evaluation
//!
//! One `PositionLedger` backs one simulator instance. It owns the candle
//! window, the synthetic book, balances, open positions, pending limit
//! orders and the post-entry price bias, and it runs the fixed evaluation
//! order on every tick: liquidations, then take-profits, then stop-losses,
//! then trailing stops, then limit fills.

use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info};
use tokio::sync::broadcast;

use crate::config::{PriceModelConfig, SimulatorProfile};
use crate::engine::history::HistoryStore;
use crate::market::{synth_book, PriceProcess};
use crate::types::{
    liquidation_price, AccountSummary, BookSnapshot, Candle, CloseReason, Direction, EngineEvent,
    HistoryRecord, InstrumentKind, LimitOrder, MarginMode, OrderRequest, OrderSide, OrderType,
    Position, SimError,
};

/// Residual holdings below this are treated as fully closed out.
const DUST_QTY: f64 = 1e-9;

pub struct PositionLedger {
    kind: InstrumentKind,
    profile: SimulatorProfile,
    model: PriceModelConfig,

    balance: f64,
    borrowed: f64,
    /// Spot base-asset holdings and their volume-weighted average cost
    held_qty: f64,
    avg_cost: f64,

    positions: Vec<Position>,
    orders: Vec<LimitOrder>,
    next_position_id: u64,
    next_order_id: u64,
    margin_mode: MarginMode,

    price: PriceProcess,
    candles: Vec<Candle>,
    book: BookSnapshot,
    current_price: f64,

    bias: f64,
    bias_deadline: Option<Instant>,

    history: HistoryStore,
    events: broadcast::Sender<EngineEvent>,
}

impl PositionLedger {
    pub fn new(
        kind: InstrumentKind,
        profile: SimulatorProfile,
        mut price: PriceProcess,
        history: HistoryStore,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let model = price.params().clone();
        let candles = price.seed_candles(model.seed_candles, profile.start_price);
        let current_price = candles.last().map(|c| c.close).unwrap_or(profile.start_price);
        let book = synth_book(&mut price, current_price, model.book_rows, model.book_step);

        Self {
            kind,
            balance: profile.initial_balance,
            borrowed: 0.0,
            held_qty: 0.0,
            avg_cost: 0.0,
            positions: Vec::new(),
            orders: Vec::new(),
            next_position_id: 1,
            next_order_id: 1,
            margin_mode: MarginMode::Isolated,
            price,
            candles,
            book,
            current_price,
            bias: 0.0,
            bias_deadline: None,
            history,
            events,
            profile,
            model,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn symbol(&self) -> &str {
        &self.profile.symbol
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn borrowed(&self) -> f64 {
        self.borrowed
    }

    /// Spot holdings as `(quantity, average cost)`.
    pub fn holdings(&self) -> (f64, f64) {
        (self.held_qty, self.avg_cost)
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn orders(&self) -> &[LimitOrder] {
        &self.orders
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn book(&self) -> &BookSnapshot {
        &self.book
    }

    pub fn current_price(&self) -> f64 {
        self.current_price
    }

    pub fn current_bias(&self) -> f64 {
        self.bias
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn margin_mode(&self) -> MarginMode {
        self.margin_mode
    }

    pub fn set_margin_mode(&mut self, mode: MarginMode) {
        self.margin_mode = mode;
    }

    /// EMA over the candle closes currently in the window.
    pub fn ema_series(&self, period: usize) -> Vec<f64> {
        let closes: Vec<f64> = self.candles.iter().map(|c| c.close).collect();
        crate::market::ema(&closes, period)
    }

    pub fn summary(&self) -> AccountSummary {
        let unrealized_pnl = self.unrealized_pnl();
        let equity = match self.kind {
            InstrumentKind::Spot => self.balance + self.held_qty * self.current_price,
            _ => self.balance + unrealized_pnl - self.borrowed,
        };
        let used_margin: f64 = self.positions.iter().map(|p| p.margin).sum();
        let margin_ratio = if equity > 0.0 { used_margin / equity } else { 0.0 };
        AccountSummary {
            balance: self.balance,
            borrowed: self.borrowed,
            unrealized_pnl,
            equity,
            margin_ratio,
            open_positions: self.positions.len(),
            pending_orders: self.orders.len(),
        }
    }

    pub fn unrealized_pnl(&self) -> f64 {
        match self.kind {
            InstrumentKind::Spot => {
                if self.held_qty > DUST_QTY {
                    (self.current_price - self.avg_cost) * self.held_qty
                } else {
                    0.0
                }
            }
            _ => self
                .positions
                .iter()
                .map(|p| p.pnl_at(self.current_price))
                .sum(),
        }
    }

    // ------------------------------------------------------------------
    // Ticking
    // ------------------------------------------------------------------

    /// Advances the market one step under the current bias, then runs the
    /// lifecycle evaluation at the new price.
    pub fn tick(&mut self) {
        self.expire_bias();
        let candle = self.price.next_candle(self.current_price, self.bias);
        let close = candle.close;
        self.push_candle(candle);
        self.finish_tick(close);
    }

    /// Deterministic variant: drives the market straight to `price` and runs
    /// the same lifecycle evaluation. Used by scenario tests and replay.
    pub fn tick_with_price(&mut self, price: f64) {
        self.expire_bias();
        let prev = self.current_price;
        self.push_candle(Candle {
            open: prev,
            high: prev.max(price),
            low: prev.min(price),
            close: price,
        });
        self.finish_tick(price);
    }

    fn push_candle(&mut self, candle: Candle) {
        self.candles.push(candle);
        let window = self.model.candle_window;
        if self.candles.len() > window {
            let excess = self.candles.len() - window;
            self.candles.drain(..excess);
        }
    }

    fn finish_tick(&mut self, price: f64) {
        self.current_price = price;
        self.book = synth_book(&mut self.price, price, self.model.book_rows, self.model.book_step);
        self.evaluate_positions(price);
    }

    fn expire_bias(&mut self) {
        if let Some(deadline) = self.bias_deadline {
            if Instant::now() >= deadline {
                self.bias = 0.0;
                self.bias_deadline = None;
            }
        }
    }

    fn arm_bias(&mut self, favorable_up: bool) {
        self.bias = self.price.draw_entry_bias(favorable_up);
        self.bias_deadline =
            Some(Instant::now() + Duration::from_millis(self.model.bias_duration_ms));
    }

    /// Lifecycle evaluation in fixed order. Each stage works off an id
    /// snapshot so closes from an earlier stage are never re-examined.
    fn evaluate_positions(&mut self, price: f64) {
        let liquidated: Vec<u64> = self
            .positions
            .iter()
            .filter(|p| p.is_liquidated_at(price))
            .map(|p| p.id)
            .collect();
        for id in liquidated {
            self.force_liquidate(id);
        }

        let take_profits: Vec<u64> = self
            .positions
            .iter()
            .filter(|p| p.tp_triggered_at(price))
            .map(|p| p.id)
            .collect();
        for id in take_profits {
            let _ = self.close_position(id, CloseReason::TakeProfit);
        }

        let stop_losses: Vec<u64> = self
            .positions
            .iter()
            .filter(|p| p.sl_triggered_at(price))
            .map(|p| p.id)
            .collect();
        for id in stop_losses {
            let _ = self.close_position(id, CloseReason::StopLoss);
        }

        self.evaluate_trailing(price);
        self.fill_triggered_orders(price);
    }

    fn evaluate_trailing(&mut self, price: f64) {
        let mut to_close = Vec::new();
        for p in &mut self.positions {
            let (Some(activation), Some(callback_pct)) = (p.trail_activation, p.trail_callback_pct)
            else {
                continue;
            };
            match p.direction {
                Direction::Long => {
                    if p.trail_peak.is_none() && price >= activation {
                        p.trail_peak = Some(price);
                    }
                    if let Some(peak) = p.trail_peak {
                        let peak = peak.max(price);
                        p.trail_peak = Some(peak);
                        if price <= peak * (1.0 - callback_pct / 100.0) {
                            to_close.push(p.id);
                        }
                    }
                }
                Direction::Short => {
                    if p.trail_peak.is_none() && price <= activation {
                        p.trail_peak = Some(price);
                    }
                    if let Some(peak) = p.trail_peak {
                        let peak = peak.min(price);
                        p.trail_peak = Some(peak);
                        if price >= peak * (1.0 + callback_pct / 100.0) {
                            to_close.push(p.id);
                        }
                    }
                }
            }
        }
        for id in to_close {
            let _ = self.close_position(id, CloseReason::TakeProfit);
        }
    }

    /// Fills every crossed limit order that the account can afford at its
    /// limit price. Unaffordable orders stay pending for a later tick.
    fn fill_triggered_orders(&mut self, price: f64) {
        let triggered: Vec<LimitOrder> = self
            .orders
            .iter()
            .filter(|o| o.is_triggered(price))
            .cloned()
            .collect();

        for order in triggered {
            // tick-driven fills never arm the price bias; only user-initiated
            // market entries do
            let filled = match (self.kind, order.side) {
                (InstrumentKind::Spot, OrderSide::Buy) => {
                    self.spot_buy(order.amount, order.price).is_ok()
                }
                (InstrumentKind::Spot, OrderSide::Sell) => {
                    self.spot_sell(order.amount, order.price).is_ok()
                }
                (InstrumentKind::Margin | InstrumentKind::Futures, OrderSide::Buy) => self
                    .open_at(Direction::Long, order.amount, order.price, order.leverage, false)
                    .is_ok(),
                (InstrumentKind::Margin | InstrumentKind::Futures, OrderSide::Sell) => self
                    .open_at(Direction::Short, order.amount, order.price, order.leverage, false)
                    .is_ok(),
            };

            if filled {
                self.orders.retain(|o| o.id != order.id);
                info!(
                    "{} limit order {} filled @ {:.2}",
                    self.kind.to_api_string(),
                    order.id,
                    order.price
                );
                self.emit(EngineEvent::OrderFilled {
                    kind: self.kind,
                    order_id: order.id,
                    fill_price: order.price,
                });
                self.notice(format!("Limit order filled @ {:.2}", order.price), true);
            } else {
                debug!(
                    "{} limit order {} crossed but not affordable, still pending",
                    self.kind.to_api_string(),
                    order.id
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Order entry
    // ------------------------------------------------------------------

    pub fn place_order(&mut self, req: &OrderRequest) -> Result<(), SimError> {
        if !req.amount.is_finite() || req.amount <= 0.0 {
            return Err(SimError::InvalidAmount(format!(
                "order amount must be positive, got {}",
                req.amount
            )));
        }
        if req.leverage < 1.0 || !req.leverage.is_finite() {
            return Err(SimError::InvalidAmount(format!(
                "leverage must be at least 1x, got {}",
                req.leverage
            )));
        }

        match req.order_type {
            OrderType::Market => self.execute_market(req.side, req.amount, req.leverage),
            OrderType::Limit => {
                let price = req.price.ok_or_else(|| {
                    SimError::InvalidPrice("limit order requires a price".to_string())
                })?;
                if !price.is_finite() || price <= 0.0 {
                    return Err(SimError::InvalidPrice(format!(
                        "limit price must be positive, got {price}"
                    )));
                }
                self.queue_limit(req.side, req.amount, price, req.leverage)
            }
        }
    }

    fn execute_market(&mut self, side: OrderSide, amount: f64, leverage: f64) -> Result<(), SimError> {
        let price = self.current_price;
        match (self.kind, side) {
            (InstrumentKind::Spot, OrderSide::Buy) => {
                self.spot_buy(amount, price)?;
                self.arm_bias(true);
                self.notice(
                    format!("Bought {:.4} {} @ {:.2}", amount, self.profile.symbol, price),
                    true,
                );
            }
            (InstrumentKind::Spot, OrderSide::Sell) => {
                let pnl = self.spot_sell(amount, price)?;
                self.notice(format!("Sold {amount:.4}, PnL {pnl:+.2} USDT"), pnl >= 0.0);
            }
            (InstrumentKind::Margin, OrderSide::Buy) | (InstrumentKind::Futures, OrderSide::Buy) => {
                self.open_at(Direction::Long, amount, price, leverage, true)?;
                self.notice(
                    format!("Opened long {:.4} {} @ {:.2}", amount, self.profile.symbol, price),
                    true,
                );
            }
            (InstrumentKind::Margin, OrderSide::Sell) => {
                let pnl = self.close_oldest_long(CloseReason::Manual)?;
                self.notice(format!("Position closed, PnL {pnl:+.2} USDT"), pnl >= 0.0);
            }
            (InstrumentKind::Futures, OrderSide::Sell) => {
                self.open_at(Direction::Short, amount, price, leverage, true)?;
                self.notice(
                    format!("Opened short {:.4} {} @ {:.2}", amount, self.profile.symbol, price),
                    true,
                );
            }
        }
        Ok(())
    }

    fn queue_limit(
        &mut self,
        side: OrderSide,
        amount: f64,
        price: f64,
        leverage: f64,
    ) -> Result<(), SimError> {
        let id = self.next_order_id;
        self.next_order_id += 1;
        self.orders.push(LimitOrder {
            id,
            side,
            price,
            amount,
            leverage,
            placed_at: Utc::now().timestamp_millis(),
        });
        info!(
            "{} queued limit {} {:.4} @ {:.2}",
            self.kind.to_api_string(),
            side.to_api_string(),
            amount,
            price
        );
        self.emit(EngineEvent::OrderPlaced {
            kind: self.kind,
            order_id: id,
            side,
            price,
            amount,
        });
        self.notice(format!("Limit order placed @ {price:.2}"), true);
        Ok(())
    }

    pub fn cancel_order(&mut self, order_id: u64) -> Result<(), SimError> {
        let before = self.orders.len();
        self.orders.retain(|o| o.id != order_id);
        if self.orders.len() == before {
            return Err(SimError::OrderNotFound(order_id));
        }
        self.emit(EngineEvent::OrderCancelled { kind: self.kind, order_id });
        self.notice("Order cancelled".to_string(), true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Spot primitives
    // ------------------------------------------------------------------

    fn spot_buy(&mut self, amount: f64, price: f64) -> Result<(), SimError> {
        let cost = amount * price;
        let total = cost * (1.0 + self.profile.fee_rate);
        if total > self.balance {
            return Err(SimError::InsufficientBalance(format!(
                "need {total:.2} USDT, have {:.2}",
                self.balance
            )));
        }
        // volume-weighted average cost across this and prior fills
        let held_value = self.avg_cost * self.held_qty;
        self.held_qty += amount;
        self.avg_cost = (held_value + cost) / self.held_qty;
        self.balance -= total;
        self.emit_balance();
        Ok(())
    }

    fn spot_sell(&mut self, amount: f64, price: f64) -> Result<f64, SimError> {
        if amount > self.held_qty + DUST_QTY {
            return Err(SimError::InsufficientHoldings(format!(
                "tried to sell {amount:.4}, holding {:.4}",
                self.held_qty
            )));
        }
        let entry = self.avg_cost;
        let proceeds = amount * price * (1.0 - self.profile.fee_rate);
        let pnl = (price - entry) * amount;
        let pnl_pct = if entry > 0.0 { (price / entry - 1.0) * 100.0 } else { 0.0 };
        self.balance += proceeds;
        self.held_qty -= amount;
        if self.held_qty <= DUST_QTY {
            // fully flat: average cost resets and the bias window ends
            self.held_qty = 0.0;
            self.avg_cost = 0.0;
            self.bias = 0.0;
            self.bias_deadline = None;
        }

        let now = Utc::now().timestamp_millis();
        self.append_history(HistoryRecord {
            id: now,
            sim_type: self.kind.to_api_string().to_string(),
            symbol: self.profile.symbol.clone(),
            direction: Direction::Long.to_api_string().to_string(),
            entry_price: entry,
            exit_price: price,
            size: amount,
            leverage: 1.0,
            pnl,
            pnl_pct,
            close_reason: CloseReason::Manual.to_api_string().to_string(),
            opened_at: now,
            closed_at: now,
        });
        self.emit_balance();
        Ok(pnl)
    }

    // ------------------------------------------------------------------
    // Leveraged primitives
    // ------------------------------------------------------------------

    fn open_at(
        &mut self,
        direction: Direction,
        size: f64,
        entry: f64,
        leverage: f64,
        draw_bias: bool,
    ) -> Result<u64, SimError> {
        let margin = size * entry / leverage;
        if margin > self.balance {
            return Err(SimError::InsufficientMargin(format!(
                "need {margin:.2} USDT margin, have {:.2}",
                self.balance
            )));
        }

        let id = self.next_position_id;
        self.next_position_id += 1;
        self.balance -= margin;
        self.positions.push(Position {
            id,
            symbol: self.profile.symbol.clone(),
            kind: self.kind,
            direction,
            size,
            entry_price: entry,
            leverage,
            margin,
            liquidation_price: liquidation_price(entry, leverage, direction),
            margin_mode: self.margin_mode,
            tp_price: None,
            sl_price: None,
            trail_activation: None,
            trail_callback_pct: None,
            trail_peak: None,
            opened_at: Utc::now().timestamp_millis(),
        });

        if draw_bias {
            self.arm_bias(direction == Direction::Long);
        }

        info!(
            "{} opened {} {:.4} @ {:.2} ({}x, margin {:.2})",
            self.kind.to_api_string(),
            direction.to_api_string(),
            size,
            entry,
            leverage,
            margin
        );
        self.emit(EngineEvent::PositionOpened {
            kind: self.kind,
            position_id: id,
            direction,
            size,
            entry_price: entry,
            leverage,
        });
        self.emit_balance();
        Ok(id)
    }

    /// Closes at the current price, returning margin plus signed PnL to the
    /// balance and recording the trade.
    pub fn close_position(&mut self, position_id: u64, reason: CloseReason) -> Result<f64, SimError> {
        let idx = self
            .positions
            .iter()
            .position(|p| p.id == position_id)
            .ok_or(SimError::PositionNotFound(position_id))?;
        let pos = self.positions.remove(idx);
        let exit = self.current_price;
        let pnl = pos.pnl_at(exit);
        let pnl_pct = pos.pnl_pct_at(exit);
        self.balance += pos.margin + pnl;

        info!(
            "{} closed position {} ({}) @ {:.2}, PnL {:+.2}",
            self.kind.to_api_string(),
            pos.id,
            reason.to_api_string(),
            exit,
            pnl
        );
        self.record_position_close(&pos, exit, pnl, pnl_pct, reason);
        self.emit(EngineEvent::PositionClosed {
            kind: self.kind,
            position_id: pos.id,
            reason,
            exit_price: exit,
            pnl,
        });
        self.emit_balance();

        match reason {
            CloseReason::TakeProfit => {
                self.notice(format!("Take-profit hit, PnL {pnl:+.2} USDT"), true)
            }
            CloseReason::StopLoss => {
                self.notice(format!("Stop-loss hit, PnL {pnl:+.2} USDT"), false)
            }
            _ => {}
        }
        Ok(pnl)
    }

    /// Liquidation forfeits the whole margin; nothing returns to balance.
    fn force_liquidate(&mut self, position_id: u64) {
        let Some(idx) = self.positions.iter().position(|p| p.id == position_id) else {
            return;
        };
        let pos = self.positions.remove(idx);
        info!(
            "{} position {} liquidated @ {:.2}, margin {:.2} lost",
            self.kind.to_api_string(),
            pos.id,
            pos.liquidation_price,
            pos.margin
        );
        self.record_position_close(
            &pos,
            pos.liquidation_price,
            -pos.margin,
            -100.0,
            CloseReason::Liquidated,
        );
        self.emit(EngineEvent::PositionClosed {
            kind: self.kind,
            position_id: pos.id,
            reason: CloseReason::Liquidated,
            exit_price: pos.liquidation_price,
            pnl: -pos.margin,
        });
        self.notice("Position liquidated".to_string(), false);
    }

    fn close_oldest_long(&mut self, reason: CloseReason) -> Result<f64, SimError> {
        let id = self
            .positions
            .iter()
            .find(|p| p.direction == Direction::Long)
            .map(|p| p.id)
            .ok_or_else(|| {
                SimError::InsufficientHoldings("no open long position to sell".to_string())
            })?;
        self.close_position(id, reason)
    }

    /// Close-then-reopen in the opposite direction at the current price.
    /// The close always stands; a reopen rejected for margin leaves the
    /// account flat and returns the error.
    pub fn reverse_position(&mut self, position_id: u64) -> Result<u64, SimError> {
        let pos = self
            .positions
            .iter()
            .find(|p| p.id == position_id)
            .ok_or(SimError::PositionNotFound(position_id))?;
        let direction = pos.direction;
        let size = pos.size;
        let leverage = pos.leverage;

        let pnl = self.close_position(position_id, CloseReason::Reversed)?;
        match self.open_at(direction.opposite(), size, self.current_price, leverage, false) {
            Ok(new_id) => {
                self.notice(
                    format!(
                        "Reversed to {} {:.4}, realized {pnl:+.2} USDT",
                        direction.opposite().to_api_string(),
                        size
                    ),
                    true,
                );
                Ok(new_id)
            }
            Err(e) => {
                self.notice(
                    "Position closed, but reopening the reverse side failed: insufficient margin"
                        .to_string(),
                    false,
                );
                Err(e)
            }
        }
    }

    pub fn set_tp_sl(
        &mut self,
        position_id: u64,
        tp_price: Option<f64>,
        sl_price: Option<f64>,
    ) -> Result<(), SimError> {
        for price in [tp_price, sl_price].into_iter().flatten() {
            if !price.is_finite() || price <= 0.0 {
                return Err(SimError::InvalidPrice(format!(
                    "trigger price must be positive, got {price}"
                )));
            }
        }
        let pos = self
            .positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or(SimError::PositionNotFound(position_id))?;
        pos.tp_price = tp_price;
        pos.sl_price = sl_price;
        self.notice("TP/SL updated".to_string(), true);
        Ok(())
    }

    pub fn set_trailing(
        &mut self,
        position_id: u64,
        activation: Option<f64>,
        callback_pct: Option<f64>,
    ) -> Result<(), SimError> {
        for v in [activation, callback_pct].into_iter().flatten() {
            if !v.is_finite() || v <= 0.0 {
                return Err(SimError::InvalidPrice(format!(
                    "trailing parameter must be positive, got {v}"
                )));
            }
        }
        let pos = self
            .positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or(SimError::PositionNotFound(position_id))?;
        pos.trail_activation = activation;
        pos.trail_callback_pct = callback_pct;
        pos.trail_peak = None;
        self.notice("Trailing take-profit updated".to_string(), true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Margin funding
    // ------------------------------------------------------------------

    /// Borrowable headroom at the given leverage tier.
    pub fn max_borrow(&self, leverage: f64) -> f64 {
        (self.balance * (leverage - 1.0) - self.borrowed).max(0.0)
    }

    pub fn borrow(&mut self, amount: f64, leverage: f64) -> Result<(), SimError> {
        if self.kind != InstrumentKind::Margin {
            return Err(SimError::UnsupportedOperation(format!(
                "{} accounts cannot borrow",
                self.kind.to_api_string()
            )));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(SimError::InvalidAmount(format!(
                "borrow amount must be positive, got {amount}"
            )));
        }
        let headroom = self.max_borrow(leverage);
        if amount > headroom {
            return Err(SimError::ExceedsMaxBorrow(format!(
                "requested {amount:.2}, max borrowable {headroom:.2}"
            )));
        }
        self.balance += amount;
        self.borrowed += amount;
        info!("margin borrowed {:.2} USDT, outstanding {:.2}", amount, self.borrowed);
        self.emit_balance();
        self.notice(format!("Borrowed {amount:.2} USDT"), true);
        Ok(())
    }

    /// Repays the full outstanding amount; partial repayment is not offered.
    pub fn repay(&mut self) -> Result<f64, SimError> {
        if self.borrowed <= 0.0 {
            return Err(SimError::NothingToRepay);
        }
        if self.balance < self.borrowed {
            return Err(SimError::InsufficientBalance(format!(
                "need {:.2} USDT to repay, have {:.2}",
                self.borrowed, self.balance
            )));
        }
        let repaid = self.borrowed;
        self.balance -= repaid;
        self.borrowed = 0.0;
        info!("margin repaid {repaid:.2} USDT");
        self.emit_balance();
        self.notice(format!("Repaid {repaid:.2} USDT"), true);
        Ok(repaid)
    }

    // ------------------------------------------------------------------
    // Session control
    // ------------------------------------------------------------------

    /// Restores the session to its initial state. Persisted history is left
    /// alone; callers reset it separately when asked to.
    pub fn reset(&mut self) {
        self.balance = self.profile.initial_balance;
        self.borrowed = 0.0;
        self.held_qty = 0.0;
        self.avg_cost = 0.0;
        self.positions.clear();
        self.orders.clear();
        self.next_position_id = 1;
        self.next_order_id = 1;
        self.bias = 0.0;
        self.bias_deadline = None;
        self.candles = self
            .price
            .seed_candles(self.model.seed_candles, self.profile.start_price);
        self.current_price = self
            .candles
            .last()
            .map(|c| c.close)
            .unwrap_or(self.profile.start_price);
        self.book = synth_book(
            &mut self.price,
            self.current_price,
            self.model.book_rows,
            self.model.book_step,
        );
        self.emit_balance();
        self.notice("Session reset".to_string(), true);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn record_position_close(
        &mut self,
        pos: &Position,
        exit: f64,
        pnl: f64,
        pnl_pct: f64,
        reason: CloseReason,
    ) {
        let now = Utc::now().timestamp_millis();
        self.append_history(HistoryRecord {
            id: now,
            sim_type: self.kind.to_api_string().to_string(),
            symbol: pos.symbol.clone(),
            direction: pos.direction.to_api_string().to_string(),
            entry_price: pos.entry_price,
            exit_price: exit,
            size: pos.size,
            leverage: pos.leverage,
            pnl,
            pnl_pct,
            close_reason: reason.to_api_string().to_string(),
            opened_at: pos.opened_at,
            closed_at: now,
        });
    }

    fn append_history(&mut self, record: HistoryRecord) {
        self.history.append(record);
        self.emit(EngineEvent::HistoryChanged {
            sim_type: self.kind.to_api_string().to_string(),
        });
    }

    fn emit(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_balance(&self) {
        self.emit(EngineEvent::BalanceChanged {
            kind: self.kind,
            balance: self.balance,
            borrowed: self.borrowed,
        });
    }

    fn notice(&self, text: String, positive: bool) {
        self.emit(EngineEvent::Notice { text, positive });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::history::{HistoryBus, MemoryKvStore};
    use std::sync::Arc;

    fn test_ledger(
        kind: InstrumentKind,
        balance: f64,
        start: f64,
    ) -> (PositionLedger, broadcast::Receiver<EngineEvent>) {
        let model = PriceModelConfig::default();
        let profile = SimulatorProfile {
            symbol: "TST/USDT".to_string(),
            start_price: start,
            initial_balance: balance,
            leverage_tiers: vec![1.0, 3.0, 5.0, 10.0, 20.0],
            fee_rate: if kind == InstrumentKind::Spot { 0.001 } else { 0.0 },
            hourly_interest_rate: 0.0,
        };
        let history = HistoryStore::new(
            kind.to_api_string(),
            Arc::new(MemoryKvStore::new()),
            HistoryBus::new(),
            200,
        );
        let (tx, rx) = broadcast::channel(256);
        let ledger = PositionLedger::new(
            kind,
            profile,
            PriceProcess::with_seed(model, 7),
            history,
            tx,
        );
        (ledger, rx)
    }

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-6, "expected {b}, got {a}");
    }

    #[test]
    fn test_liquidation_forfeits_margin() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1893.0);
        ledger.tick_with_price(1893.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        approx(ledger.balance(), 10000.0 - 189.3);
        approx(ledger.positions()[0].liquidation_price, 1722.63);

        // crossing the liquidation price returns nothing to the balance
        ledger.tick_with_price(1700.0);
        assert!(ledger.positions().is_empty());
        approx(ledger.balance(), 10000.0 - 189.3);

        let records = ledger.history().list_all();
        assert_eq!(records.len(), 1);
        approx(records[0].pnl, -189.3);
        approx(records[0].pnl_pct, -100.0);
        assert_eq!(records[0].close_reason, "liquidated");
    }

    #[test]
    fn test_limit_buy_fills_at_limit_price() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 65000.0);
        ledger.tick_with_price(65000.0);
        ledger
            .place_order(&OrderRequest::limit(OrderSide::Buy, 0.1, 64000.0, 5.0))
            .unwrap();

        ledger.tick_with_price(64500.0);
        assert_eq!(ledger.orders().len(), 1);
        assert!(ledger.positions().is_empty());

        ledger.tick_with_price(63900.0);
        assert!(ledger.orders().is_empty());
        let pos = &ledger.positions()[0];
        // fills at the limit price, not the tick price
        approx(pos.entry_price, 64000.0);
        approx(pos.margin, 0.1 * 64000.0 / 5.0);
    }

    #[test]
    fn test_margin_limit_sell_opens_short_at_limit_price() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Margin, 10000.0, 2000.0);
        ledger.tick_with_price(2000.0);
        ledger
            .place_order(&OrderRequest::limit(OrderSide::Sell, 1.0, 1950.0, 10.0))
            .unwrap();

        // fills even with no long open, as a fresh short
        ledger.tick_with_price(1980.0);
        assert!(ledger.orders().is_empty());
        let pos = &ledger.positions()[0];
        assert_eq!(pos.direction, Direction::Short);
        approx(pos.entry_price, 1950.0);
        approx(pos.margin, 1950.0 / 10.0);
    }

    #[test]
    fn test_margin_limit_sell_leaves_open_long_alone() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Margin, 10000.0, 2000.0);
        ledger.tick_with_price(2000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        let long_id = ledger.positions()[0].id;
        ledger
            .place_order(&OrderRequest::limit(OrderSide::Sell, 1.0, 1950.0, 10.0))
            .unwrap();

        ledger.tick_with_price(1980.0);
        let positions = ledger.positions();
        assert_eq!(positions.len(), 2);
        assert!(positions.iter().any(|p| p.id == long_id));
        let short = positions.iter().find(|p| p.direction == Direction::Short).unwrap();
        approx(short.entry_price, 1950.0);
        assert!(ledger.history().list_all().is_empty());
    }

    #[test]
    fn test_limit_fills_do_not_arm_bias() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 65000.0);
        ledger.tick_with_price(65000.0);
        ledger
            .place_order(&OrderRequest::limit(OrderSide::Buy, 0.1, 64000.0, 5.0))
            .unwrap();
        ledger.tick_with_price(63900.0);
        assert_eq!(ledger.positions().len(), 1);
        assert_eq!(ledger.current_bias(), 0.0);

        let (mut spot, _rx) = test_ledger(InstrumentKind::Spot, 200_000.0, 65000.0);
        spot.tick_with_price(65000.0);
        spot.place_order(&OrderRequest::limit(OrderSide::Buy, 1.0, 64000.0, 1.0))
            .unwrap();
        spot.tick_with_price(63900.0);
        let (qty, _) = spot.holdings();
        approx(qty, 1.0);
        assert_eq!(spot.current_bias(), 0.0);
    }

    #[test]
    fn test_spot_vwap_average_cost() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Spot, 200_000.0, 65000.0);
        ledger.tick_with_price(65000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 1.0))
            .unwrap();
        assert!(ledger.current_bias() != 0.0);
        ledger.tick_with_price(66000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 1.0))
            .unwrap();

        let (qty, avg) = ledger.holdings();
        approx(qty, 2.0);
        approx(avg, 65500.0);

        // full exit resets the average cost
        ledger
            .place_order(&OrderRequest::market(OrderSide::Sell, 2.0, 1.0))
            .unwrap();
        let (qty, avg) = ledger.holdings();
        approx(qty, 0.0);
        approx(avg, 0.0);

        let records = ledger.history().list_all();
        assert_eq!(records.len(), 1);
        approx(records[0].pnl, (66000.0 - 65500.0) * 2.0);
    }

    #[test]
    fn test_spot_fees_charged_both_sides() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Spot, 200_000.0, 65000.0);
        ledger.tick_with_price(65000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 1.0))
            .unwrap();
        approx(ledger.balance(), 200_000.0 - 65000.0 * 1.001);

        ledger
            .place_order(&OrderRequest::market(OrderSide::Sell, 1.0, 1.0))
            .unwrap();
        approx(ledger.balance(), 200_000.0 - 65000.0 * 1.001 + 65000.0 * 0.999);
    }

    #[test]
    fn test_take_profit_closes_at_market_price() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        ledger.tick_with_price(1000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        let id = ledger.positions()[0].id;
        ledger.set_tp_sl(id, Some(1050.0), None).unwrap();

        ledger.tick_with_price(1020.0);
        assert_eq!(ledger.positions().len(), 1);

        ledger.tick_with_price(1050.0);
        assert!(ledger.positions().is_empty());
        // margin back plus 50 profit
        approx(ledger.balance(), 10000.0 - 100.0 + 100.0 + 50.0);
        assert_eq!(ledger.history().list_all()[0].close_reason, "tp");
    }

    #[test]
    fn test_stop_loss_closes_at_market_price() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        ledger.tick_with_price(1000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        let id = ledger.positions()[0].id;
        ledger.set_tp_sl(id, None, Some(980.0)).unwrap();

        ledger.tick_with_price(975.0);
        assert!(ledger.positions().is_empty());
        approx(ledger.balance(), 10000.0 - 100.0 + 100.0 - 25.0);
        assert_eq!(ledger.history().list_all()[0].close_reason, "sl");
    }

    #[test]
    fn test_manual_close_balance_identity() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        ledger.tick_with_price(1000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Sell, 2.0, 5.0))
            .unwrap();
        let id = ledger.positions()[0].id;
        let margin = ledger.positions()[0].margin;
        let balance_open = ledger.balance();

        ledger.tick_with_price(960.0);
        let pnl = ledger.close_position(id, CloseReason::Manual).unwrap();
        // short gains as price falls
        approx(pnl, (1000.0 - 960.0) * 2.0);
        approx(ledger.balance(), balance_open + margin + pnl);
        assert_eq!(ledger.history().list_all()[0].close_reason, "manual");
    }

    #[test]
    fn test_trailing_take_profit_tracks_peak() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        ledger.tick_with_price(1000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        let id = ledger.positions()[0].id;
        ledger.set_trailing(id, Some(1100.0), Some(2.0)).unwrap();

        // below activation: nothing armed
        ledger.tick_with_price(1050.0);
        assert!(ledger.positions()[0].trail_peak.is_none());

        ledger.tick_with_price(1100.0);
        assert_eq!(ledger.positions()[0].trail_peak, Some(1100.0));

        ledger.tick_with_price(1150.0);
        assert_eq!(ledger.positions()[0].trail_peak, Some(1150.0));

        // pullback smaller than the callback keeps the position open
        ledger.tick_with_price(1130.0);
        assert_eq!(ledger.positions().len(), 1);

        // 1126 <= 1150 * 0.98
        ledger.tick_with_price(1126.0);
        assert!(ledger.positions().is_empty());
        approx(ledger.balance(), 10000.0 - 100.0 + 100.0 + 126.0);
        assert_eq!(ledger.history().list_all()[0].close_reason, "tp");
    }

    #[test]
    fn test_reversal_flips_direction_at_market() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        ledger.tick_with_price(1000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        let id = ledger.positions()[0].id;

        let new_id = ledger.reverse_position(id).unwrap();
        assert_ne!(new_id, id);
        let pos = &ledger.positions()[0];
        assert_eq!(pos.direction, Direction::Short);
        approx(pos.entry_price, 1000.0);
        approx(pos.size, 1.0);
        // flat PnL reversal leaves the balance where it was
        approx(ledger.balance(), 10000.0 - 100.0);
        assert_eq!(ledger.history().list_all()[0].close_reason, "reversed");
    }

    #[test]
    fn test_reversal_close_survives_failed_reopen() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 100.0, 1000.0);
        ledger.tick_with_price(1000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        let id = ledger.positions()[0].id;
        approx(ledger.balance(), 0.0);

        // loss shrinks the freed margin below what the reverse side needs
        ledger.tick_with_price(950.0);
        let err = ledger.reverse_position(id).unwrap_err();
        assert!(matches!(err, SimError::InsufficientMargin(_)));

        // the close stands even though the reopen failed
        assert!(ledger.positions().is_empty());
        approx(ledger.balance(), 50.0);
        let records = ledger.history().list_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].close_reason, "reversed");
    }

    #[test]
    fn test_margin_market_sell_closes_oldest_long() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Margin, 10000.0, 1893.0);
        ledger.tick_with_price(1893.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 2.0, 10.0))
            .unwrap();
        let oldest = ledger.positions()[0].id;

        ledger
            .place_order(&OrderRequest::market(OrderSide::Sell, 1.0, 10.0))
            .unwrap();
        assert_eq!(ledger.positions().len(), 1);
        assert!(ledger.positions().iter().all(|p| p.id != oldest));

        // no long left after closing the second one
        ledger
            .place_order(&OrderRequest::market(OrderSide::Sell, 1.0, 10.0))
            .unwrap();
        let err = ledger
            .place_order(&OrderRequest::market(OrderSide::Sell, 1.0, 10.0))
            .unwrap_err();
        assert!(matches!(err, SimError::InsufficientHoldings(_)));
    }

    #[test]
    fn test_borrow_ceiling_and_full_repay() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Margin, 10000.0, 1893.0);

        let err = ledger.borrow(25000.0, 3.0).unwrap_err();
        assert!(matches!(err, SimError::ExceedsMaxBorrow(_)));

        ledger.borrow(5000.0, 3.0).unwrap();
        approx(ledger.balance(), 15000.0);
        approx(ledger.borrowed(), 5000.0);
        approx(ledger.max_borrow(3.0), 15000.0 * 2.0 - 5000.0);

        approx(ledger.repay().unwrap(), 5000.0);
        approx(ledger.balance(), 10000.0);
        approx(ledger.borrowed(), 0.0);
        assert!(matches!(ledger.repay().unwrap_err(), SimError::NothingToRepay));
    }

    #[test]
    fn test_borrow_rejected_outside_margin() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        let err = ledger.borrow(100.0, 3.0).unwrap_err();
        assert!(matches!(err, SimError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_unaffordable_limit_order_stays_pending() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Spot, 100.0, 65000.0);
        ledger.tick_with_price(65000.0);
        ledger
            .place_order(&OrderRequest::limit(OrderSide::Buy, 1.0, 64000.0, 1.0))
            .unwrap();
        ledger
            .place_order(&OrderRequest::limit(OrderSide::Sell, 1.0, 66000.0, 1.0))
            .unwrap();

        // both orders cross but neither the balance nor the holdings cover them
        ledger.tick_with_price(63000.0);
        ledger.tick_with_price(67000.0);
        assert_eq!(ledger.orders().len(), 2);
        let (qty, _) = ledger.holdings();
        approx(qty, 0.0);
    }

    #[test]
    fn test_cancel_order() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        ledger
            .place_order(&OrderRequest::limit(OrderSide::Buy, 1.0, 900.0, 5.0))
            .unwrap();
        let id = ledger.orders()[0].id;
        ledger.cancel_order(id).unwrap();
        assert!(ledger.orders().is_empty());
        assert!(matches!(
            ledger.cancel_order(id).unwrap_err(),
            SimError::OrderNotFound(_)
        ));
    }

    #[test]
    fn test_order_validation() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        assert!(matches!(
            ledger
                .place_order(&OrderRequest::market(OrderSide::Buy, 0.0, 10.0))
                .unwrap_err(),
            SimError::InvalidAmount(_)
        ));
        assert!(matches!(
            ledger
                .place_order(&OrderRequest::limit(OrderSide::Buy, 1.0, -5.0, 10.0))
                .unwrap_err(),
            SimError::InvalidPrice(_)
        ));
        assert!(matches!(
            ledger
                .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 0.5))
                .unwrap_err(),
            SimError::InvalidAmount(_)
        ));
    }

    #[test]
    fn test_open_arms_price_bias() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        ledger.tick_with_price(1000.0);
        assert_eq!(ledger.current_bias(), 0.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        let bias = ledger.current_bias();
        approx(bias.abs(), PriceModelConfig::default().bias_magnitude);
    }

    #[test]
    fn test_candle_window_is_bounded() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        for _ in 0..150 {
            ledger.tick();
        }
        assert_eq!(ledger.candles().len(), PriceModelConfig::default().candle_window);
        // book follows the latest close
        approx(ledger.book().mid, ledger.current_price());
    }

    #[test]
    fn test_events_emitted_on_open_and_close() {
        let (mut ledger, mut rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        ledger.tick_with_price(1000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        let id = ledger.positions()[0].id;
        ledger.close_position(id, CloseReason::Manual).unwrap();

        let mut saw_open = false;
        let mut saw_close = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                EngineEvent::PositionOpened { position_id, .. } if position_id == id => {
                    saw_open = true
                }
                EngineEvent::PositionClosed { position_id, reason, .. } if position_id == id => {
                    assert_eq!(reason, CloseReason::Manual);
                    saw_close = true;
                }
                _ => {}
            }
        }
        assert!(saw_open && saw_close);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        ledger.tick_with_price(1000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        ledger
            .place_order(&OrderRequest::limit(OrderSide::Buy, 1.0, 900.0, 5.0))
            .unwrap();

        ledger.reset();
        approx(ledger.balance(), 10000.0);
        assert!(ledger.positions().is_empty());
        assert!(ledger.orders().is_empty());
        assert_eq!(ledger.current_bias(), 0.0);
        assert_eq!(ledger.candles().len(), PriceModelConfig::default().seed_candles);
        // history survives a session reset
        assert_eq!(ledger.history().list_all().len(), 0);
    }

    #[test]
    fn test_summary_equity_includes_unrealized() {
        let (mut ledger, _rx) = test_ledger(InstrumentKind::Futures, 10000.0, 1000.0);
        ledger.tick_with_price(1000.0);
        ledger
            .place_order(&OrderRequest::market(OrderSide::Buy, 1.0, 10.0))
            .unwrap();
        ledger.tick_with_price(1030.0);

        let summary = ledger.summary();
        approx(summary.unrealized_pnl, 30.0);
        approx(summary.equity, (10000.0 - 100.0) + 30.0);
        approx(summary.margin_ratio, 100.0 / 9930.0);
        assert_eq!(summary.open_positions, 1);
    }
}

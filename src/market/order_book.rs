//! Synthetic order book generation
//!
//! Representative depth around the mid price for display. Regenerated in
//! full every tick and never consulted by matching logic.

use crate::market::price_process::PriceProcess;
use crate::types::{BookLevel, BookSnapshot};

/// Builds a book with `rows` levels per side at fixed `step` increments.
/// Asks run strictly above mid (furthest first, matching the display
/// order), bids strictly below (nearest first).
pub fn synth_book(pp: &mut PriceProcess, mid: f64, rows: usize, step: f64) -> BookSnapshot {
    let mut asks = Vec::with_capacity(rows);
    let mut bids = Vec::with_capacity(rows);
    for i in (1..=rows).rev() {
        asks.push(BookLevel { price: mid + i as f64 * step, quantity: pp.book_quantity() });
    }
    for i in 1..=rows {
        bids.push(BookLevel { price: mid - i as f64 * step, quantity: pp.book_quantity() });
    }
    BookSnapshot { asks, bids, mid }
}

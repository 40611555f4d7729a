//! Close-price indicators

/// Exponential moving average over `closes` with smoothing `k = 2/(period+1)`.
/// Output has the same length as the input and `out[0] == closes[0]`.
/// Callers recompute over the full visible window every tick; O(n) is fine
/// at the window sizes used (<= 100 candles).
pub fn ema(closes: &[f64], period: usize) -> Vec<f64> {
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(closes.len());
    for (i, v) in closes.iter().enumerate() {
        if i == 0 {
            out.push(*v);
        } else {
            out.push(v * k + out[i - 1] * (1.0 - k));
        }
    }
    out
}

//! Peso amounts are stored as integer centavos so balance arithmetic and the
//! paid/partial status flip stay exact.

/// Upper bound on any single amount: one billion pesos, in centavos.
/// Keeps component sums far away from i64 overflow.
pub const MAX_CENTS: i64 = 100_000_000_000;

pub fn pesos_to_cents(amount: f64) -> Option<i64> {
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let cents = (amount * 100.0).round();
    if cents > MAX_CENTS as f64 {
        return None;
    }
    Some(cents as i64)
}

pub fn cents_to_pesos(cents: i64) -> f64 {
    cents as f64 / 100.0
}

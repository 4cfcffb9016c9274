use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

// Simulation / classification constants
pub const ROLLING_WINDOW_SIZE: usize = 20;
pub const MIN_TXNS_FOR_ANOMALY_CHECK: usize = 10;
pub const ANOMALY_CHANCE: f64 = 0.35;
pub const ANOMALY_MULTIPLIER: u32 = 5;

const ANOMALY_FLOOR: f64 = 5000.0;
const NORMAL_MIN: f64 = 10.0;
const NORMAL_MAX: f64 = 500.0;

/// Whether a realized amount is anomalous against the user's rolling mean.
///
/// Pure decision: anomalous iff the window holds enough history, the mean is
/// positive, and the amount exceeds `ANOMALY_MULTIPLIER` times the mean.
pub fn is_anomaly(amount: Decimal, rolling_mean: Decimal, window_count: usize) -> bool {
    window_count >= MIN_TXNS_FOR_ANOMALY_CHECK
        && rolling_mean > Decimal::ZERO
        && amount > rolling_mean * Decimal::from(ANOMALY_MULTIPLIER)
}

/// Draw a candidate transaction amount, rounded to 2 decimal places.
///
/// With `spike` set the draw is biased toward values above the anomaly
/// threshold; the realized amount is still re-classified independently by
/// `is_anomaly`, so intent and verdict can disagree.
pub fn simulate_amount<R: Rng>(rng: &mut R, rolling_mean: Decimal, spike: bool) -> Decimal {
    let raw = if spike {
        let base = (rolling_mean * Decimal::from(ANOMALY_MULTIPLIER))
            .to_f64()
            .unwrap_or(0.0)
            .max(ANOMALY_FLOOR);
        rng.gen_range(base..base * 2.0)
    } else {
        rng.gen_range(NORMAL_MIN..NORMAL_MAX)
    };

    Decimal::from_f64(raw)
        .unwrap_or(Decimal::ZERO)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

//! Payment to credit conversion

/// Tolerance for amounts like 0.3 / 0.1 that land just under a whole credit
const FLOOR_EPSILON: f64 = 1e-9;

/// Credits bought by `amount` currency units: `floor(amount / price)`,
/// capped at `max`. Non-positive or non-finite inputs buy nothing.
pub fn credits_for_amount(amount: f64, price_per_credit: f64, max: u32) -> u32 {
    if !(amount.is_finite() && price_per_credit.is_finite()) {
        return 0;
    }
    if amount <= 0.0 || price_per_credit <= 0.0 {
        return 0;
    }

    let credits = (amount / price_per_credit + FLOOR_EPSILON).floor();
    if credits >= f64::from(max) {
        max
    } else {
        credits as u32
    }
}

/// Cap a requested grant at the per-payment maximum
pub fn cap_credits(requested: u32, max: u32) -> u32 {
    requested.min(max)
}

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds to the cent, half away from zero.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds up to the next cent.
pub fn ceil_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity)
}

/// `basic / divisor` at full precision.
pub fn day_rate(basic_salary: Decimal, divisor: u32) -> Decimal {
    if divisor == 0 {
        return Decimal::ZERO;
    }
    basic_salary / Decimal::from(divisor)
}

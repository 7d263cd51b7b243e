//! Static currency conversion through a USD pivot.

use crate::money::round_half_up_2dp;
use rust_decimal::Decimal;

/// Default wallet currency when no preference is known.
pub const DEFAULT_CURRENCY: &str = "INR";

/// Units of `code` per one USD. Unknown codes convert at 1.
pub fn rate_per_usd(code: &str) -> Decimal {
    match code {
        "USD" => Decimal::new(100, 2),
        "INR" => Decimal::new(8320, 2),
        "EUR" => Decimal::new(92, 2),
        "GBP" => Decimal::new(79, 2),
        "JPY" => Decimal::new(14950, 2),
        "AUD" => Decimal::new(152, 2),
        "CAD" => Decimal::new(136, 2),
        "SGD" => Decimal::new(134, 2),
        "AED" => Decimal::new(367, 2),
        "CHF" => Decimal::new(88, 2),
        _ => Decimal::ONE,
    }
}

/// Trimmed, upper-cased currency code; empty input falls back to the default.
pub fn normalize_code(code: &str) -> String {
    let code = code.trim().to_ascii_uppercase();
    if code.is_empty() {
        DEFAULT_CURRENCY.to_string()
    } else {
        code
    }
}

/// Converts `amount` from one currency into another.
///
/// Equal codes return the amount untouched; otherwise the result is
/// `amount / rate(from) * rate(to)` rounded HALF_UP to 2 decimals.
pub fn convert_currency(amount: Decimal, from: &str, to: &str) -> Decimal {
    let from = normalize_code(from);
    let to = normalize_code(to);
    if from == to {
        return amount;
    }
    let usd = amount / rate_per_usd(&from);
    round_half_up_2dp(usd * rate_per_usd(&to))
}

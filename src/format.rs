// Currency formatting/parsing and rate arithmetic helpers

use chrono::NaiveDate;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrencyInfo {
    pub code: &'static str,
    pub symbol: &'static str,
    pub minor_digits: u32,
}

const CURRENCIES: &[CurrencyInfo] = &[
    CurrencyInfo {
        code: "USD",
        symbol: "$",
        minor_digits: 2,
    },
    CurrencyInfo {
        code: "EUR",
        symbol: "€",
        minor_digits: 2,
    },
    CurrencyInfo {
        code: "GBP",
        symbol: "£",
        minor_digits: 2,
    },
    CurrencyInfo {
        code: "JPY",
        symbol: "¥",
        minor_digits: 0,
    },
];

pub fn currency_info(code: &str) -> Option<&'static CurrencyInfo> {
    CURRENCIES
        .iter()
        .find(|info| info.code.eq_ignore_ascii_case(code))
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

// Renders an amount with the currency symbol and thousands separators, e.g. "$1,234.50"
pub fn format_currency(amount: f64, currency: &str) -> Result<String, ValidationError> {
    let info = currency_info(currency)
        .ok_or_else(|| ValidationError::UnsupportedCurrency(currency.to_string()))?;
    if !amount.is_finite() {
        return Err(ValidationError::InvalidAmount(amount.to_string()));
    }

    let rounded = round_to(amount.abs(), info.minor_digits);
    let fixed = format!("{:.*}", info.minor_digits as usize, rounded);
    let (whole, fraction) = match fixed.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && rounded > 0.0 { "-" } else { "" };
    Ok(match fraction {
        Some(fraction) => format!("{}{}{}.{}", sign, info.symbol, grouped, fraction),
        None => format!("{}{}{}", sign, info.symbol, grouped),
    })
}

// Inverse of format_currency; tolerates a missing symbol and surrounding whitespace
pub fn parse_currency(text: &str) -> Result<f64, ValidationError> {
    let trimmed = text.trim();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let rest = CURRENCIES
        .iter()
        .find_map(|info| rest.strip_prefix(info.symbol))
        .unwrap_or(rest);
    let digits: String = rest.chars().filter(|c| *c != ',').collect();

    let value: f64 = digits
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidAmount(text.to_string()))?;
    if !value.is_finite() {
        return Err(ValidationError::InvalidAmount(text.to_string()));
    }
    Ok(if negative { -value } else { value })
}

pub fn nights_between(check_in: NaiveDate, check_out: NaiveDate) -> i64 {
    (check_out - check_in).num_days()
}

// total = rate * nights * (1 + tax_rate) + flat_fee, rounded to cents
pub fn calculate_total_rate(rate: f64, nights: u32, tax_rate: f64, flat_fee: f64) -> f64 {
    round2(rate * nights as f64 * (1.0 + tax_rate) + flat_fee)
}

// Applies a percentage discount (0..=100); the result never exceeds the base rate
pub fn apply_discount(base_rate: f64, discount_percent: f64) -> f64 {
    let pct = discount_percent.clamp(0.0, 100.0);
    round2(base_rate * (1.0 - pct / 100.0)).min(base_rate)
}

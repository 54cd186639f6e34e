//! Fixed-point money using decimal arithmetic.
//!
//! Amounts are held in major currency units (rand, not cents). Rounding to two
//! decimal places happens only at the edges: order snapshots, provider
//! amounts and display strings.

use core::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount {0} does not fit in minor units")]
    Overflow(Decimal),
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

/// Round to cents, midpoint away from zero.
#[must_use]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a major-unit amount into integer minor units (cents).
///
/// # Errors
///
/// Returns [`MoneyError::Overflow`] if the amount does not fit in an `i64`.
pub fn to_minor_units(amount: Decimal) -> Result<i64, MoneyError> {
    let cents = round_money(amount) * Decimal::ONE_HUNDRED;
    i64::try_from(cents).map_err(|_| MoneyError::Overflow(amount))
}

/// ISO 4217 currency codes the shop can charge in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    ZAR,
    USD,
    EUR,
    GBP,
}

impl CurrencyCode {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ZAR => "ZAR",
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::ZAR => "R",
            Self::USD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
        }
    }

    /// Lower-case code as payment providers expect it (`zar`).
    #[must_use]
    pub fn provider_code(self) -> String {
        self.code().to_ascii_lowercase()
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ZAR" => Ok(Self::ZAR),
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            _ => Err(MoneyError::UnsupportedCurrency(s.to_owned())),
        }
    }
}

/// An amount with its currency, used for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: CurrencyCode,
}

impl Money {
    #[must_use]
    pub const fn new(amount: Decimal, currency: CurrencyCode) -> Self {
        Self { amount, currency }
    }

    #[must_use]
    pub fn rounded(self) -> Self {
        Self::new(round_money(self.amount), self.currency)
    }
}

impl fmt::Display for Money {
    /// `R2,598.00`, `-$12.50`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rounded = round_money(self.amount);
        let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
            "-"
        } else {
            ""
        };
        let plain = format!("{:.2}", rounded.abs());
        let (whole, cents) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));
        write!(
            f,
            "{sign}{}{}.{cents}",
            self.currency.symbol(),
            group_thousands(whole)
        )
    }
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

use crate::error::{PaymentError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

/// Largest amount a single payment, refund or processed result may carry.
pub const MAX_AMOUNT: Decimal = dec!(999999.99);

/// Money never carries more than cent precision.
pub const MONEY_SCALE: u32 = 2;

/// Returns true iff `0 < amount <= 999999.99`.
pub fn validate_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO && amount <= MAX_AMOUNT
}

/// Returns true iff `code` is exactly three uppercase ASCII letters.
pub fn validate_currency(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Computes `amount * rate_percent / 100`, rounded half-up to cents.
///
/// The rounding mode is fixed explicitly instead of relying on the library
/// default (banker's rounding): `0.005` always becomes `0.01`.
pub fn compute_commission(amount: Decimal, rate_percent: Decimal) -> Result<Decimal> {
    if !validate_amount(amount) {
        return Err(PaymentError::InvalidAmount(amount));
    }
    if rate_percent.is_sign_negative() {
        return Err(PaymentError::Validation(format!(
            "Commission rate must not be negative, got {}",
            rate_percent
        )));
    }
    Ok((amount * rate_percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

/// A validated, strictly positive payment amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if validate_amount(value) {
            Ok(Self(value))
        } else {
            Err(PaymentError::InvalidAmount(value))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// ISO-4217 style currency code: three uppercase ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        if validate_currency(&code) {
            Ok(Self(code))
        } else {
            Err(PaymentError::InvalidCurrency(code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An amount in a given currency. Both halves are validated on construction,
/// so a `Money` value can be handed to a provider as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Amount,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Result<Self> {
        Ok(Self {
            amount: Amount::new(amount)?,
            currency: Currency::new(currency)?,
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// A ledger balance. Unlike [`Amount`] it may be zero, and arithmetic is
/// unchecked: callers assert non-negativity before committing.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_amount_bounds() {
        assert!(validate_amount(dec!(0.01)));
        assert!(validate_amount(dec!(50.00)));
        assert!(validate_amount(dec!(999999.99)));

        assert!(!validate_amount(dec!(0)));
        assert!(!validate_amount(dec!(-1.00)));
        assert!(!validate_amount(dec!(1000000.00)));
        assert!(!validate_amount(dec!(999999.991)));
    }

    #[test]
    fn test_validate_currency() {
        assert!(validate_currency("USD"));
        assert!(validate_currency("EUR"));

        assert!(!validate_currency("usd"));
        assert!(!validate_currency("US"));
        assert!(!validate_currency("USDT"));
        assert!(!validate_currency("U$D"));
        assert!(!validate_currency(""));
        assert!(!validate_currency("ÉUR"));
    }

    #[test]
    fn test_compute_commission() {
        assert_eq!(compute_commission(dec!(100.00), dec!(2.9)).unwrap(), dec!(2.90));
        assert_eq!(compute_commission(dec!(10.005), dec!(10)).unwrap(), dec!(1.00));
        assert_eq!(compute_commission(dec!(50.00), dec!(3)).unwrap(), dec!(1.50));
    }

    #[test]
    fn test_compute_commission_rounds_half_up() {
        // 0.05 * 10% = 0.005, banker's rounding would give 0.00
        assert_eq!(compute_commission(dec!(0.05), dec!(10)).unwrap(), dec!(0.01));
        // 0.25 * 10% = 0.025, banker's rounding would give 0.02
        assert_eq!(compute_commission(dec!(0.25), dec!(10)).unwrap(), dec!(0.03));
        assert_eq!(compute_commission(dec!(0.25), dec!(10)).unwrap().scale(), 2);
    }

    #[test]
    fn test_compute_commission_rejects_invalid_input() {
        assert!(matches!(
            compute_commission(dec!(0), dec!(2.9)),
            Err(PaymentError::InvalidAmount(_))
        ));
        assert!(matches!(
            compute_commission(dec!(10), dec!(-1)),
            Err(PaymentError::Validation(_))
        ));
    }

    #[test]
    fn test_money_construction() {
        let money = Money::new(dec!(50.00), "USD").unwrap();
        assert_eq!(money.amount.value(), dec!(50.00));
        assert_eq!(money.currency.as_str(), "USD");

        assert!(matches!(
            Money::new(dec!(50.00), "usd"),
            Err(PaymentError::InvalidCurrency(_))
        ));
        assert!(matches!(
            Money::new(dec!(-5), "USD"),
            Err(PaymentError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_amount_deserialization_is_validated() {
        let ok: Amount = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(ok.value(), dec!(12.50));
        assert!(serde_json::from_str::<Amount>("\"0\"").is_err());
        assert!(serde_json::from_str::<Currency>("\"eur\"").is_err());
    }

    #[test]
    fn test_balance_arithmetic() {
        let b1 = Balance::new(dec!(10.0));
        let b2 = Balance::new(dec!(15.0));
        assert_eq!(b1 + b2, Balance::new(dec!(25.0)));
        assert!((b1 - b2).is_negative());
    }
}

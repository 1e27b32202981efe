//! Decimal amounts with a currency.
//!
//! The analysis service encodes prices as `"<amount>:<ISO code>"`, e.g.
//! `"12.34:EUR"`. A bare amount takes the session's default currency.

use crate::error::PriceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub value: Decimal,
    pub currency_code: String,
}

impl Price {
    pub fn new(value: Decimal, currency_code: impl Into<String>) -> Self {
        Self {
            value,
            currency_code: currency_code.into(),
        }
    }

    /// A zero amount in `currency_code`.
    pub fn zero(currency_code: impl Into<String>) -> Self {
        Self::new(Decimal::ZERO, currency_code)
    }

    /// Parse `"12.34"` or `"12.34:EUR"`.
    pub fn parse(s: &str, default_currency: &str) -> Result<Self, PriceError> {
        let unparseable = || PriceError::Unparseable(s.to_string());
        let (amount, code) = match s.trim().split_once(':') {
            Some((amount, code)) => (amount.trim(), code.trim()),
            None => (s.trim(), default_currency),
        };
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(unparseable());
        }
        let value = Decimal::from_str(amount).map_err(|_| unparseable())?;
        Ok(Self::new(value, code.to_ascii_uppercase()))
    }

    /// The wire form, always with two decimals: `"29.97:EUR"`.
    pub fn extraction_string(&self) -> String {
        format!("{:.2}:{}", self.value.round_dp(2), self.currency_code)
    }

    /// Sum of two prices in the same currency.
    pub fn checked_add(&self, other: &Price) -> Result<Price, PriceError> {
        if self.currency_code != other.currency_code {
            return Err(PriceError::CurrencyMismatch {
                left: self.currency_code.clone(),
                right: other.currency_code.clone(),
            });
        }
        let value = self
            .value
            .checked_add(other.value)
            .ok_or(PriceError::Overflow)?;
        Ok(Self::new(value, self.currency_code.clone()))
    }

    /// `self × quantity`.
    pub fn checked_mul(&self, quantity: u32) -> Result<Price, PriceError> {
        let value = self
            .value
            .checked_mul(Decimal::from(quantity))
            .ok_or(PriceError::Overflow)?;
        Ok(Self::new(value, self.currency_code.clone()))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value.round_dp(2), self.currency_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_coded_amounts() {
        let bare = Price::parse("9.99", "EUR").unwrap();
        assert_eq!(bare.value, Decimal::from_str("9.99").unwrap());
        assert_eq!(bare.currency_code, "EUR");

        let coded = Price::parse("12.5:usd", "EUR").unwrap();
        assert_eq!(coded.currency_code, "USD");
        assert_eq!(coded.extraction_string(), "12.50:USD");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Price::parse("abc", "EUR").is_err());
        assert!(Price::parse("1.00:EURO", "EUR").is_err());
        assert!(Price::parse("", "EUR").is_err());
    }

    #[test]
    fn multiplication_is_exact() {
        let price = Price::parse("9.99", "EUR").unwrap();
        let total = price.checked_mul(3).unwrap();
        assert_eq!(total.value, Decimal::from_str("29.97").unwrap());
        assert_eq!(total.extraction_string(), "29.97:EUR");
    }

    #[test]
    fn addition_checks_currency() {
        let eur = Price::parse("1.00:EUR", "EUR").unwrap();
        let usd = Price::parse("1.00:USD", "EUR").unwrap();
        assert!(matches!(
            eur.checked_add(&usd),
            Err(PriceError::CurrencyMismatch { .. })
        ));
        assert_eq!(eur.checked_add(&eur).unwrap().extraction_string(), "2.00:EUR");
    }

    #[test]
    fn overflow_is_an_error() {
        let max = Price::new(Decimal::MAX, "EUR");
        assert_eq!(max.checked_mul(2), Err(PriceError::Overflow));
        assert_eq!(max.checked_add(&max), Err(PriceError::Overflow));
        assert_eq!(max.checked_mul(1).unwrap().value, Decimal::MAX);
    }
}

use std::fmt::Display;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CURRENCY: &str = "RUB";

/// Amount in minor currency units (kopecks, cents) tagged with a currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
}

impl Money {
    pub fn new(amount: i64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(0, currency)
    }

    pub fn has_currency(&self) -> bool {
        !self.currency.trim().is_empty()
    }

    /// Fills an empty currency with `fallback`; an explicit currency is kept as given.
    pub fn or_currency(self, fallback: &str) -> Self {
        if self.has_currency() {
            self
        } else {
            Self::new(self.amount, fallback)
        }
    }

    pub fn negated(&self) -> Option<Self> {
        self.amount
            .checked_neg()
            .map(|amount| Self::new(amount, self.currency.clone()))
    }

    pub fn same_currency(&self, other: &Money) -> bool {
        self.currency == other.currency
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_currency_deserializes_as_empty() {
        let money: Money = serde_json::from_str(r#"{"amount": 500}"#).unwrap();
        assert_eq!(money, Money::new(500, ""));
        assert!(!money.has_currency());
    }

    #[test]
    fn or_currency_only_fills_blank_codes() {
        assert_eq!(Money::new(10, "").or_currency("RUB"), Money::new(10, "RUB"));
        assert_eq!(
            Money::new(10, "USD").or_currency("RUB"),
            Money::new(10, "USD")
        );
    }

    #[test]
    fn negation_guards_overflow() {
        assert_eq!(Money::new(300, "RUB").negated(), Some(Money::new(-300, "RUB")));
        assert_eq!(Money::new(i64::MIN, "RUB").negated(), None);
    }

    #[test]
    fn display_uses_minor_units() {
        assert_eq!(Money::new(12_345, "RUB").to_string(), "123.45 RUB");
        assert_eq!(Money::new(-5, "RUB").to_string(), "-0.05 RUB");
    }
}

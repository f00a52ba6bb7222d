use crate::models::minor_units_for_currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Currency comparison tolerance. Two amounts are equal when they differ by
/// strictly less than one minor unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tolerance(Decimal);

impl Tolerance {
    pub const DEFAULT_MINOR_UNITS: u32 = 2;
    /// Largest scale `Decimal` can represent.
    pub const MAX_MINOR_UNITS: u32 = 28;

    pub fn for_minor_units(minor_units: u32) -> Self {
        Self(Decimal::new(1, minor_units.min(Self::MAX_MINOR_UNITS)))
    }

    pub fn for_currency(currency: &str) -> Self {
        Self::for_minor_units(minor_units_for_currency(currency))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self, value: Decimal) -> bool {
        value.abs() < self.0
    }

    pub fn amounts_equal(&self, a: Decimal, b: Decimal) -> bool {
        self.is_zero(a - b)
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::for_minor_units(Self::DEFAULT_MINOR_UNITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_one_cent() {
        assert_eq!(Tolerance::default().amount(), Decimal::new(1, 2));
    }

    #[test]
    fn test_boundary_is_exclusive() {
        let tolerance = Tolerance::default();
        assert!(tolerance.is_zero(Decimal::new(9, 3)));
        assert!(!tolerance.is_zero(Decimal::new(1, 2)));
        assert!(!tolerance.is_zero(Decimal::new(-2, 2)));
    }

    #[test]
    fn test_for_currency() {
        assert_eq!(Tolerance::for_currency("JPY").amount(), Decimal::ONE);
        assert_eq!(Tolerance::for_currency("KWD").amount(), Decimal::new(1, 3));
        assert!(Tolerance::for_currency("USD").amounts_equal(Decimal::new(9500, 2), Decimal::new(95, 0)));
    }
}

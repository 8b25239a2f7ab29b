//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Every venue-bound
//! value passes through explicit tick/lot rounding at the boundary;
//! estimator math that needs transcendental functions runs in `f64` and
//! converts back through these types.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Price with exact decimal precision.
///
/// Wraps `Decimal` to provide type safety and prevent mixing
/// prices with sizes in calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to the nearest tick (bid direction).
    #[inline]
    pub fn floor_to_tick(&self, tick: Price) -> Self {
        if tick.is_zero() {
            return *self;
        }
        Self((self.0 / tick.0).floor() * tick.0)
    }

    /// Round up to the nearest tick (ask direction).
    #[inline]
    pub fn ceil_to_tick(&self, tick: Price) -> Self {
        if tick.is_zero() {
            return *self;
        }
        Self((self.0 / tick.0).ceil() * tick.0)
    }

    /// Absolute difference from another price.
    #[inline]
    pub fn abs_diff(&self, other: Price) -> Decimal {
        (self.0 - other.0).abs()
    }

    /// Signed basis-points difference from another price.
    #[inline]
    pub fn bps_from(&self, other: Price) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        Some((self.0 - other.0) / other.0 * Decimal::from(10000))
    }

    /// Lossy conversion for estimator math.
    #[inline]
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Size/quantity with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to the nearest lot step.
    #[inline]
    pub fn floor_to_lot(&self, lot: Size) -> Self {
        if lot.is_zero() {
            return *self;
        }
        Self((self.0 / lot.0).floor() * lot.0)
    }

    /// Notional value: size * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }

    /// Lossy conversion for estimator math.
    #[inline]
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Size {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Size {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_floor_to_tick() {
        let price = Price::new(dec!(100.057));
        let tick = Price::new(dec!(0.01));
        assert_eq!(price.floor_to_tick(tick).0, dec!(100.05));
    }

    #[test]
    fn test_price_ceil_to_tick() {
        let price = Price::new(dec!(100.051));
        let tick = Price::new(dec!(0.01));
        assert_eq!(price.ceil_to_tick(tick).0, dec!(100.06));
    }

    #[test]
    fn test_price_bps() {
        let p1 = Price::new(dec!(100));
        let p2 = Price::new(dec!(101));
        assert_eq!(p2.bps_from(p1).unwrap(), dec!(100)); // 1% = 100 bps
        assert_eq!(p1.bps_from(p2).unwrap().round_dp(2), dec!(-99.01));
    }

    #[test]
    fn test_size_floor_to_lot() {
        let size = Size::new(dec!(1.2345));
        let lot = Size::new(dec!(0.001));
        assert_eq!(size.floor_to_lot(lot).0, dec!(1.234));
    }

    #[test]
    fn test_notional() {
        let size = Size::new(dec!(0.5));
        let price = Price::new(dec!(50000));
        assert_eq!(size.notional(price), dec!(25000));
    }

    #[test]
    fn test_zero_tick_is_identity() {
        let price = Price::new(dec!(123.456));
        assert_eq!(price.floor_to_tick(Price::ZERO), price);
        assert_eq!(price.ceil_to_tick(Price::ZERO), price);
    }
}

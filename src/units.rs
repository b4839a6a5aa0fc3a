//! Physical units for electrochemical quantities
//!
//! A [`Unit`] is a scale factor relative to the coherent SI unit plus a
//! [`Dimension`] made of integer exponents for current, time, voltage and
//! mass. A [`Quantity`] pairs an `f64` magnitude with a unit.
//!
//! Multiplication and division always succeed and combine dimensions.
//! Addition, subtraction, comparison and conversion require compatible
//! dimensions and fail with [`DimensionError`] otherwise.
//!
//! There is no unit registry: units are plain immutable values built on
//! demand, so nothing here is shared or mutated between callers.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Div, Mul, Neg};
use std::str::FromStr;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Operation attempted between two quantities of incompatible dimension
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot {operation} '{left}' and '{right}': incompatible dimensions")]
pub struct DimensionError {
    pub operation: &'static str,
    pub left: String,
    pub right: String,
}

/// Unit symbol that could not be recognized
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unrecognized unit '{0}'")]
pub struct UnknownUnitError(pub String);

/// Exponents of the base dimensions used by cycler data
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dimension {
    pub current: i8,
    pub time: i8,
    pub voltage: i8,
    pub mass: i8,
}

impl Dimension {
    pub const DIMENSIONLESS: Self = Self::new(0, 0, 0, 0);
    pub const CURRENT: Self = Self::new(1, 0, 0, 0);
    pub const TIME: Self = Self::new(0, 1, 0, 0);
    pub const VOLTAGE: Self = Self::new(0, 0, 1, 0);
    pub const MASS: Self = Self::new(0, 0, 0, 1);

    const fn new(current: i8, time: i8, voltage: i8, mass: i8) -> Self {
        Self {
            current,
            time,
            voltage,
            mass,
        }
    }

    pub fn is_dimensionless(&self) -> bool {
        *self == Self::DIMENSIONLESS
    }
}

impl Mul for Dimension {
    type Output = Dimension;
    fn mul(self, rhs: Self) -> Self::Output {
        Dimension {
            current: self.current + rhs.current,
            time: self.time + rhs.time,
            voltage: self.voltage + rhs.voltage,
            mass: self.mass + rhs.mass,
        }
    }
}

impl Div for Dimension {
    type Output = Dimension;
    fn div(self, rhs: Self) -> Self::Output {
        Dimension {
            current: self.current - rhs.current,
            time: self.time - rhs.time,
            voltage: self.voltage - rhs.voltage,
            mass: self.mass - rhs.mass,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            (self.current, "A"),
            (self.time, "s"),
            (self.voltage, "V"),
            (self.mass, "g"),
        ]
        .iter()
        .filter(|(exp, _)| *exp != 0)
        .map(|(exp, sym)| {
            if *exp == 1 {
                sym.to_string()
            } else {
                format!("{sym}^{exp}")
            }
        })
        .collect();
        if parts.is_empty() {
            write!(f, "1")
        } else {
            write!(f, "{}", parts.join("·"))
        }
    }
}

/// A named unit: symbol, scale to the coherent SI unit, and dimension
///
/// Mass is the exception to "coherent SI": its base is the gram, since
/// specific capacities are quoted per gram.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Unit {
    symbol: String,
    scale: f64,
    dimension: Dimension,
}

impl Unit {
    pub fn new(symbol: impl Into<String>, scale: f64, dimension: Dimension) -> Self {
        Self {
            symbol: symbol.into(),
            scale,
            dimension,
        }
    }

    pub fn dimensionless() -> Self {
        Self::new("", 1.0, Dimension::DIMENSIONLESS)
    }

    pub fn ampere() -> Self {
        Self::new("A", 1.0, Dimension::CURRENT)
    }

    pub fn milliampere() -> Self {
        Self::new("mA", 1e-3, Dimension::CURRENT)
    }

    pub fn microampere() -> Self {
        Self::new("µA", 1e-6, Dimension::CURRENT)
    }

    pub fn second() -> Self {
        Self::new("s", 1.0, Dimension::TIME)
    }

    pub fn minute() -> Self {
        Self::new("min", 60.0, Dimension::TIME)
    }

    pub fn hour() -> Self {
        Self::new("h", 3600.0, Dimension::TIME)
    }

    pub fn volt() -> Self {
        Self::new("V", 1.0, Dimension::VOLTAGE)
    }

    pub fn millivolt() -> Self {
        Self::new("mV", 1e-3, Dimension::VOLTAGE)
    }

    pub fn coulomb() -> Self {
        Self::new("C", 1.0, Dimension::CURRENT * Dimension::TIME)
    }

    pub fn ampere_hour() -> Self {
        Self::new("A·h", 3600.0, Dimension::CURRENT * Dimension::TIME)
    }

    pub fn milliampere_hour() -> Self {
        Self::new("mA·h", 3.6, Dimension::CURRENT * Dimension::TIME)
    }

    pub fn microampere_hour() -> Self {
        Self::new("µA·h", 3.6e-3, Dimension::CURRENT * Dimension::TIME)
    }

    pub fn gram() -> Self {
        Self::new("g", 1.0, Dimension::MASS)
    }

    pub fn milligram() -> Self {
        Self::new("mg", 1e-3, Dimension::MASS)
    }

    pub fn kilogram() -> Self {
        Self::new("kg", 1e3, Dimension::MASS)
    }

    /// mA·h per gram, the usual specific capacity unit
    pub fn specific_capacity() -> Self {
        Self::milliampere_hour() / Self::gram()
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn is_compatible_with(&self, other: &Unit) -> bool {
        self.dimension == other.dimension
    }

    /// Factor that converts a magnitude in `self` to a magnitude in `to`
    pub fn conversion_factor(&self, to: &Unit) -> Result<f64, DimensionError> {
        if !self.is_compatible_with(to) {
            return Err(DimensionError {
                operation: "convert",
                left: self.symbol.clone(),
                right: to.symbol.clone(),
            });
        }
        Ok(self.scale / to.scale)
    }
}

fn wrap_compound(symbol: &str) -> String {
    if symbol.contains('·') || symbol.contains('/') {
        format!("({symbol})")
    } else {
        symbol.to_string()
    }
}

impl Mul for Unit {
    type Output = Unit;
    fn mul(self, rhs: Unit) -> Unit {
        &self * &rhs
    }
}

impl Mul<&Unit> for &Unit {
    type Output = Unit;
    fn mul(self, rhs: &Unit) -> Unit {
        let symbol = match (self.symbol.is_empty(), rhs.symbol.is_empty()) {
            (true, _) => rhs.symbol.clone(),
            (_, true) => self.symbol.clone(),
            _ => format!("{}·{}", self.symbol, rhs.symbol),
        };
        Unit::new(symbol, self.scale * rhs.scale, self.dimension * rhs.dimension)
    }
}

impl Div for Unit {
    type Output = Unit;
    fn div(self, rhs: Unit) -> Unit {
        &self / &rhs
    }
}

impl Div<&Unit> for &Unit {
    type Output = Unit;
    fn div(self, rhs: &Unit) -> Unit {
        let symbol = match (self.symbol.is_empty(), rhs.symbol.is_empty()) {
            (_, true) => self.symbol.clone(),
            (true, false) => format!("1/{}", wrap_compound(&rhs.symbol)),
            _ => format!("{}/{}", self.symbol, wrap_compound(&rhs.symbol)),
        };
        Unit::new(symbol, self.scale / rhs.scale, self.dimension / rhs.dimension)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

impl FromStr for Unit {
    type Err = UnknownUnitError;

    /// Parse the unit spellings that appear in cycler exports
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace(['µ', 'μ'], "u").replace('·', ".");
        let unit = match normalized.as_str() {
            "" | "1" => Unit::dimensionless(),
            "A" => Unit::ampere(),
            "mA" => Unit::milliampere(),
            "uA" => Unit::microampere(),
            "s" | "sec" => Unit::second(),
            "min" | "minute" => Unit::minute(),
            "h" | "hr" | "hour" => Unit::hour(),
            "V" => Unit::volt(),
            "mV" => Unit::millivolt(),
            "C" => Unit::coulomb(),
            "A.h" | "Ah" => Unit::ampere_hour(),
            "mA.h" | "mAh" => Unit::milliampere_hour(),
            "uA.h" | "uAh" => Unit::microampere_hour(),
            "g" => Unit::gram(),
            "mg" => Unit::milligram(),
            "kg" => Unit::kilogram(),
            _ => return Err(UnknownUnitError(s.trim().to_string())),
        };
        Ok(unit)
    }
}

/// A magnitude tagged with a unit
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn is_compatible_with(&self, other: &Quantity) -> bool {
        self.unit.is_compatible_with(&other.unit)
    }

    /// Same physical value expressed in `unit`
    pub fn to(&self, unit: &Unit) -> Result<Quantity, DimensionError> {
        let factor = self.unit.conversion_factor(unit)?;
        Ok(Quantity::new(self.value * factor, unit.clone()))
    }

    /// Magnitude after conversion to `unit`
    pub fn value_in(&self, unit: &Unit) -> Result<f64, DimensionError> {
        Ok(self.value * self.unit.conversion_factor(unit)?)
    }

    pub fn abs(&self) -> Quantity {
        Quantity::new(self.value.abs(), self.unit.clone())
    }

    /// Sum, expressed in the unit of `self`
    pub fn try_add(&self, other: &Quantity) -> Result<Quantity, DimensionError> {
        let rhs = other.value_in(&self.unit).map_err(|e| DimensionError {
            operation: "add",
            ..e
        })?;
        Ok(Quantity::new(self.value + rhs, self.unit.clone()))
    }

    /// Difference, expressed in the unit of `self`
    pub fn try_sub(&self, other: &Quantity) -> Result<Quantity, DimensionError> {
        let rhs = other.value_in(&self.unit).map_err(|e| DimensionError {
            operation: "subtract",
            ..e
        })?;
        Ok(Quantity::new(self.value - rhs, self.unit.clone()))
    }

    pub fn try_cmp(&self, other: &Quantity) -> Result<Option<Ordering>, DimensionError> {
        let rhs = other.value_in(&self.unit).map_err(|e| DimensionError {
            operation: "compare",
            ..e
        })?;
        Ok(self.value.partial_cmp(&rhs))
    }
}

impl Mul for Quantity {
    type Output = Quantity;
    fn mul(self, rhs: Quantity) -> Quantity {
        Quantity::new(self.value * rhs.value, self.unit * rhs.unit)
    }
}

impl Div for Quantity {
    type Output = Quantity;
    fn div(self, rhs: Quantity) -> Quantity {
        Quantity::new(self.value / rhs.value, self.unit / rhs.unit)
    }
}

impl Mul<f64> for Quantity {
    type Output = Quantity;
    fn mul(self, rhs: f64) -> Quantity {
        Quantity::new(self.value * rhs, self.unit)
    }
}

impl Div<f64> for Quantity {
    type Output = Quantity;
    fn div(self, rhs: f64) -> Quantity {
        Quantity::new(self.value / rhs, self.unit)
    }
}

impl Neg for Quantity {
    type Output = Quantity;
    fn neg(self) -> Quantity {
        Quantity::new(-self.value, self.unit)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.symbol().is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_milliamp_hour_is_scaled_coulomb() {
        let mah = Quantity::new(1.0, Unit::milliampere_hour());
        let coulombs = mah.to(&Unit::coulomb()).unwrap();
        assert!(close(coulombs.value, 3.6));

        let amp_second = Unit::ampere() * Unit::second();
        assert!(mah.unit.is_compatible_with(&amp_second));
        assert!(close(mah.value_in(&amp_second).unwrap(), 3.6));

        let bigger = Quantity::new(4.0, amp_second);
        assert_eq!(mah.try_cmp(&bigger).unwrap(), Some(Ordering::Less));
    }

    #[test]
    fn test_capacity_over_current_gives_hours() {
        let capacity = Quantity::new(10.0, Unit::milliampere_hour());
        let current = Quantity::new(200.0, Unit::microampere());
        let duration = capacity / current;
        assert_eq!(duration.unit.dimension(), Dimension::TIME);
        assert!(close(duration.value_in(&Unit::hour()).unwrap(), 50.0));
    }

    #[test]
    fn test_incompatible_add_fails() {
        let volts = Quantity::new(1.0, Unit::volt());
        let amps = Quantity::new(1.0, Unit::ampere());
        let err = volts.try_add(&amps).unwrap_err();
        assert_eq!(err.operation, "add");
        assert!(volts.try_cmp(&amps).is_err());
        assert!(volts.to(&Unit::milliampere()).is_err());
    }

    #[test]
    fn test_add_converts_to_left_unit() {
        let a = Quantity::new(1.0, Unit::volt());
        let b = Quantity::new(500.0, Unit::millivolt());
        let sum = a.try_add(&b).unwrap();
        assert_eq!(sum.unit, Unit::volt());
        assert!(close(sum.value, 1.5));
    }

    #[test]
    fn test_compound_symbols() {
        let specific = Unit::specific_capacity();
        assert_eq!(specific.symbol(), "mA·h/g");
        assert_eq!(
            specific.dimension(),
            Dimension::CURRENT * Dimension::TIME / Dimension::MASS
        );
        let per_volt = Unit::milliampere_hour() / (Unit::volt() * Unit::gram());
        assert_eq!(per_volt.symbol(), "mA·h/(V·g)");
    }

    #[test]
    fn test_parse_file_spellings() {
        assert_eq!("mA.h".parse::<Unit>().unwrap(), Unit::milliampere_hour());
        assert_eq!("µA".parse::<Unit>().unwrap(), Unit::microampere());
        assert_eq!("uA".parse::<Unit>().unwrap(), Unit::microampere());
        assert_eq!("mg".parse::<Unit>().unwrap(), Unit::milligram());
        assert!("furlong".parse::<Unit>().is_err());
    }
}

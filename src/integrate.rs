//! Cumulative trapezoidal integration
//!
//! `x` is expected to be non-decreasing. Decreasing steps are not
//! rejected: they contribute negative area, exactly as the trapezoidal
//! rule says. Callers that concatenate runs must sort first.
//!
//! A NaN in either input propagates to every later output value.

use crate::error::{CyclerError, Result};
use crate::types::Column;
use crate::units::Unit;

/// Running trapezoidal integral of `y` over `x`; element 0 is always 0
pub fn cumulative_trapezoid(y: &[f64], x: &[f64], absolute: bool) -> Result<Vec<f64>> {
    if y.len() != x.len() {
        return Err(CyclerError::LengthMismatch {
            expected: x.len(),
            found: y.len(),
        });
    }
    let mut out = Vec::with_capacity(y.len());
    if y.is_empty() {
        return Ok(out);
    }
    let magnitude = |v: f64| if absolute { v.abs() } else { v };
    let mut total = 0.0;
    out.push(total);
    for k in 1..y.len() {
        total += (x[k] - x[k - 1]) * (magnitude(y[k - 1]) + magnitude(y[k])) / 2.0;
        out.push(total);
    }
    Ok(out)
}

/// Integrate one column over another, carrying the product unit
///
/// A side without a unit counts as dimensionless; the result has no unit
/// only when neither side has one.
pub fn integrate_columns(
    name: &str,
    y: &Column,
    x: &Column,
    absolute: bool,
) -> Result<Column> {
    let values = cumulative_trapezoid(&y.values, &x.values, absolute)?;
    let unit = match (&y.unit, &x.unit) {
        (None, None) => None,
        (y_unit, x_unit) => {
            let one = Unit::dimensionless();
            Some(y_unit.as_ref().unwrap_or(&one) * x_unit.as_ref().unwrap_or(&one))
        }
    };
    Ok(Column::new(name, unit, values))
}

/// Charge passed, from current and time columns
///
/// `absolute = false` gives the net charge relative to the first sample,
/// `absolute = true` the total charge moved in either direction.
pub fn calculate_capacity(time: &Column, current: &Column, absolute: bool) -> Result<Column> {
    let name = if absolute { "charge_total" } else { "charge_net" };
    integrate_columns(name, current, time, absolute)
}

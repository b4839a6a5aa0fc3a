//! Row selection helpers for the unified table
//!
//! Long cycling runs log far more points than are useful for capacity
//! curves. These helpers thin the table and pick rows without ever
//! reordering them.
//!
//! # Usage
//!
//! `Experiment::load` calls [`downsample`] straight after decoding, before
//! any derived column exists, so capacities are integrated over the
//! thinned timeline.

use crate::types::DataTable;
use log::debug;

/// Stride that brings `len` rows down to at most `nmax`
///
/// Returns 1 when no thinning is needed.
pub fn stride_for(len: usize, nmax: usize) -> usize {
    if nmax == 0 || len <= nmax {
        return 1;
    }
    (len + nmax - 1) / nmax
}

/// Keep rows 0, stride, 2·stride, ... so the table has at most `nmax` rows
///
/// # Arguments
/// * `table` - The decoded table
/// * `nmax` - Row cap; `None` (or zero) disables capping
///
/// # Returns
/// The thinned table; row labels and timestamps follow their rows
pub fn downsample(table: DataTable, nmax: Option<usize>) -> DataTable {
    let Some(nmax) = nmax else {
        return table;
    };
    let stride = stride_for(table.len(), nmax);
    if stride == 1 {
        return table;
    }
    let rows: Vec<usize> = (0..table.len()).step_by(stride).collect();
    debug!(
        "Downsampling {} rows with stride {} to {}",
        table.len(),
        stride,
        rows.len()
    );
    table.take_rows(&rows)
}

/// Paired values where both sides are present
pub fn drop_missing(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(a, b)| (*a, *b))
        .unzip()
}

/// Position of the value closest to `target`, ignoring NaN
///
/// Ties go to the earliest row.
pub fn closest_row(values: &[f64], target: f64) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (row, v)| {
            let distance = (v - target).abs();
            match best {
                Some((_, d)) if d <= distance => best,
                _ => Some((row, distance)),
            }
        })
        .map(|(row, _)| row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, Column};
    use chrono::{Duration, NaiveDate};

    fn long_table(len: usize) -> DataTable {
        let mut table = DataTable::with_len(len);
        let values: Vec<f64> = (0..len).map(|i| i as f64).collect();
        table
            .synthesize(Channel::Time, values.clone(), "test")
            .unwrap();
        table.insert_column(Column::new("x", None, values)).unwrap();
        let start = NaiveDate::from_ymd_opt(2019, 3, 14)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let stamps = (0..len).map(|i| start + Duration::seconds(i as i64)).collect();
        table.set_timestamps(stamps).unwrap();
        table
    }

    #[test]
    fn test_downsample_bounds_and_order() {
        let table = long_table(2501);
        let thinned = downsample(table, Some(1000));
        assert!(thinned.len() <= 1000);
        assert_eq!(thinned.len(), 834);
        assert_eq!(&thinned.index()[..3], &[0, 3, 6]);
        let stamps = thinned.timestamps().unwrap();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(thinned.values("x").unwrap()[1], 3.0);
    }

    #[test]
    fn test_downsample_noop() {
        let table = long_table(10);
        assert_eq!(downsample(table.clone(), Some(10)), table);
        assert_eq!(downsample(table.clone(), None), table);
        assert_eq!(downsample(table.clone(), Some(0)), table);
    }

    #[test]
    fn test_stride() {
        assert_eq!(stride_for(5000, 5000), 1);
        assert_eq!(stride_for(5001, 5000), 2);
        assert_eq!(stride_for(15000, 5000), 3);
    }

    #[test]
    fn test_drop_missing() {
        let (x, y) = drop_missing(&[1.0, f64::NAN, 3.0, 4.0], &[1.0, 2.0, f64::NAN, 4.0]);
        assert_eq!(x, vec![1.0, 4.0]);
        assert_eq!(y, vec![1.0, 4.0]);
    }

    #[test]
    fn test_closest_row() {
        let values = [0.0, 10.0, f64::NAN, 20.0, 30.0];
        assert_eq!(closest_row(&values, 19.0), Some(3));
        assert_eq!(closest_row(&values, 15.0), Some(1));
        assert_eq!(closest_row(&[f64::NAN], 1.0), None);
    }
}

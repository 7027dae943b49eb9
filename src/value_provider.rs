//! C2 — value providers. Given a match, return the scalar value to be
//! aggregated (or tested as a candidate split), abstracting over where that
//! value comes from. `spec.md` §4.2.
//!
//! Grounded in the teacher's `ml_engine::features::Transformation` enum,
//! which dispatches `fit_transform`/`transform` over a closed set of
//! variants the same way `ValueProvider` dispatches `value`.

use crate::column::{PopulationView, Table};
use crate::matches::Match;
use std::collections::HashMap;

/// Stateless once bound to its table references — cheap to call in the
/// aggregator's innermost loop (`spec.md` §4.2).
pub trait ValueProvider: Send + Sync {
    fn value(&self, m: &Match) -> f64;
}

pub struct PeripheralNumerical<'a> {
    pub column: &'a [f64],
}

impl<'a> ValueProvider for PeripheralNumerical<'a> {
    fn value(&self, m: &Match) -> f64 {
        self.column[m.ix_peripheral as usize]
    }
}

pub struct PeripheralDiscrete<'a> {
    pub column: &'a [i64],
}

impl<'a> ValueProvider for PeripheralDiscrete<'a> {
    fn value(&self, m: &Match) -> f64 {
        self.column[m.ix_peripheral as usize] as f64
    }
}

pub struct PeripheralCategorical<'a> {
    pub column: &'a [i32],
}

impl<'a> ValueProvider for PeripheralCategorical<'a> {
    fn value(&self, m: &Match) -> f64 {
        self.column[m.ix_peripheral as usize] as f64
    }
}

pub struct PopulationNumerical<'a> {
    pub column: &'a [f64],
}

impl<'a> ValueProvider for PopulationNumerical<'a> {
    fn value(&self, m: &Match) -> f64 {
        self.column[m.ix_population as usize]
    }
}

pub struct PopulationDiscrete<'a> {
    pub column: &'a [i64],
}

impl<'a> ValueProvider for PopulationDiscrete<'a> {
    fn value(&self, m: &Match) -> f64 {
        self.column[m.ix_population as usize] as f64
    }
}

pub struct PopulationCategorical<'a> {
    pub column: &'a [i32],
}

impl<'a> ValueProvider for PopulationCategorical<'a> {
    fn value(&self, m: &Match) -> f64 {
        self.column[m.ix_population as usize] as f64
    }
}

/// `population.ts[ix_population] - peripheral.ts[ix_peripheral]`.
pub struct TimeStampsDiff<'a> {
    pub population_ts: &'a [f64],
    pub peripheral_ts: &'a [f64],
}

impl<'a> ValueProvider for TimeStampsDiff<'a> {
    fn value(&self, m: &Match) -> f64 {
        self.population_ts[m.ix_population as usize]
            - self.peripheral_ts[m.ix_peripheral as usize]
    }
}

/// Side the "other" (same-unit) column for a `SameUnit*` provider lives on.
pub enum OtherSide<'a, T> {
    Population(&'a [T]),
    Peripheral(&'a [T]),
}

/// `other.value[index] - peripheral.num[perip_col][ix_peripheral]`
/// (`spec.md` §4.2). `other` may itself be a population or peripheral
/// column sharing the declared unit.
pub struct SameUnitNumerical<'a> {
    pub peripheral_column: &'a [f64],
    pub other: OtherSide<'a, f64>,
}

impl<'a> ValueProvider for SameUnitNumerical<'a> {
    fn value(&self, m: &Match) -> f64 {
        let other_value = match &self.other {
            OtherSide::Population(col) => col[m.ix_population as usize],
            OtherSide::Peripheral(col) => col[m.ix_peripheral as usize],
        };
        other_value - self.peripheral_column[m.ix_peripheral as usize]
    }
}

pub struct SameUnitDiscrete<'a> {
    pub peripheral_column: &'a [i64],
    pub other: OtherSide<'a, i64>,
}

impl<'a> ValueProvider for SameUnitDiscrete<'a> {
    fn value(&self, m: &Match) -> f64 {
        let other_value = match &self.other {
            OtherSide::Population(col) => col[m.ix_population as usize],
            OtherSide::Peripheral(col) => col[m.ix_peripheral as usize],
        };
        (other_value - self.peripheral_column[m.ix_peripheral as usize]) as f64
    }
}

/// Looks up a value in a previously generated sub-feature matrix, indexed
/// by `ix_peripheral` through a sparse map (`spec.md` §4.2/§9 — "keep that
/// map contiguous ... because the lookup is inside the aggregator's
/// innermost loop"). A dense `Vec<Option<f64>>` is used when sub-features
/// cover most peripheral rows; `Sparse` falls back to a hash map otherwise.
pub enum Subfeature {
    Dense(Vec<f64>),
    Sparse(HashMap<u32, f64>),
}

pub struct SubfeatureProvider<'a> {
    pub map: &'a Subfeature,
}

impl<'a> ValueProvider for SubfeatureProvider<'a> {
    fn value(&self, m: &Match) -> f64 {
        match self.map {
            Subfeature::Dense(v) => v.get(m.ix_peripheral as usize).copied().unwrap_or(f64::NAN),
            Subfeature::Sparse(map) => map.get(&m.ix_peripheral).copied().unwrap_or(f64::NAN),
        }
    }
}

/// Resolves a column on the peripheral table by name into a borrowed
/// `ValueProvider`, for use by the split enumerator (C6) when it needs to
/// rewrite every match's candidate-split value.
pub fn peripheral_numerical<'a>(table: &'a Table, column: &str) -> Option<PeripheralNumerical<'a>> {
    table
        .column(column)
        .and_then(|c| c.as_numerical())
        .map(|column| PeripheralNumerical { column })
}

pub fn peripheral_discrete<'a>(table: &'a Table, column: &str) -> Option<PeripheralDiscrete<'a>> {
    table
        .column(column)
        .and_then(|c| c.as_discrete())
        .map(|column| PeripheralDiscrete { column })
}

pub fn peripheral_categorical<'a>(
    table: &'a Table,
    column: &str,
) -> Option<PeripheralCategorical<'a>> {
    table
        .column(column)
        .and_then(|c| c.as_categorical())
        .map(|column| PeripheralCategorical { column })
}

pub fn time_stamps_diff<'a>(
    population: &'a PopulationView,
    peripheral: &'a Table,
    peripheral_ts_column: &str,
) -> Option<TimeStampsDiff<'a>> {
    let population_ts = population.time_stamp.as_deref()?;
    let peripheral_ts = peripheral.column(peripheral_ts_column)?.as_time_stamp()?;
    Some(TimeStampsDiff {
        population_ts,
        peripheral_ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peripheral_numerical_reads_by_peripheral_index() {
        let col = vec![10.0, 20.0, 30.0];
        let provider = PeripheralNumerical { column: &col };
        let m = Match::new(2, 0);
        assert_eq!(provider.value(&m), 30.0);
    }

    #[test]
    fn time_stamps_diff_subtracts_peripheral_from_population() {
        let pop_ts = vec![100.0];
        let perip_ts = vec![10.0, 40.0];
        let provider = TimeStampsDiff {
            population_ts: &pop_ts,
            peripheral_ts: &perip_ts,
        };
        let m = Match::new(1, 0);
        assert_eq!(provider.value(&m), 60.0);
    }

    #[test]
    fn same_unit_numerical_computes_difference() {
        let perip_col = vec![5.0, 8.0];
        let pop_col = vec![20.0];
        let provider = SameUnitNumerical {
            peripheral_column: &perip_col,
            other: OtherSide::Population(&pop_col),
        };
        let m = Match::new(1, 0);
        assert_eq!(provider.value(&m), 12.0);
    }

    #[test]
    fn subfeature_dense_lookup() {
        let sf = Subfeature::Dense(vec![1.0, 2.0, 3.0]);
        let provider = SubfeatureProvider { map: &sf };
        let m = Match::new(1, 0);
        assert_eq!(provider.value(&m), 2.0);
    }
}

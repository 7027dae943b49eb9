//! C6 — the split enumerator. For one tree node, tries every eligible
//! condition column against the node's fixed aggregation, drives the
//! aggregator through the resulting activation sweeps, and records the
//! criterion value after each candidate so the node can later pick the best.
//! `spec.md` §4.6.
//!
//! The aggregator's underlying `MatchStore` stays sorted by the column
//! being *aggregated* (set once via `Aggregator::prepare`, required for
//! MIN/MAX/MEDIAN's neighbour scans). The condition column under test here
//! is almost always a *different* column, so the enumerator keeps its own
//! `order: Vec<u32>` of match indices sorted by the condition value,
//! mirroring `original_source`'s split between `containers::Matches` (fixed
//! aggregation order) and `containers::MatchPtrs` (re-sortable per
//! candidate column).

use crate::aggregator::Aggregator;
use crate::config::{Hyperparameters, ACCEPT_EPSILON};
use crate::criterion::Criterion;
use crate::descriptors::DataSource;
use crate::indices::{CategoryIndex, WordIndex};
use crate::matches::MatchStore;
use crate::value_provider::ValueProvider;
use std::ops::Range;

/// One candidate split, aligned by position with its recorded value in the
/// shared `Criterion`'s storage.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub data_source: DataSource,
    pub column: String,
    pub apply_from_above: bool,
    pub critical_value: Option<f64>,
    pub categories: Option<Vec<i32>>,
}

/// A condition column eligible for this node's search, paired with the
/// value provider that reads it.
pub struct ConditionColumn<'a> {
    pub data_source: DataSource,
    pub column: String,
    pub values: &'a dyn ValueProvider,
}

/// Runs the full candidate enumeration for one node and returns every
/// candidate in the same order as the criterion's storage.
pub struct SplitEnumerator<'a> {
    hyperparams: &'a Hyperparameters,
    candidates: Vec<Candidate>,
    /// Whether each population row is currently counted on the criterion's
    /// left side. A row can carry any number of matches; the aggregator's
    /// `activate_range`/`deactivate_range` touch matches, not rows, and
    /// silently no-op when a match's flag already matches the target state
    /// (so activating a row's second match never touches the aggregator
    /// again). `record_step`/`flush_touched` compare against this instead of
    /// calling `Criterion::update_samples` once per touched match, so a row
    /// crosses the threshold in the criterion's bookkeeping exactly once,
    /// no matter how many of its matches get activated or deactivated along
    /// the way.
    left_membership: Vec<bool>,
}

impl<'a> SplitEnumerator<'a> {
    pub fn new(hyperparams: &'a Hyperparameters, n_population: usize) -> Self {
        Self {
            hyperparams,
            candidates: Vec::new(),
            left_membership: vec![false; n_population],
        }
    }

    pub fn into_candidates(self) -> Vec<Candidate> {
        self.candidates
    }

    /// Numerical/discrete/same-unit/time-stamp-difference/sub-feature
    /// columns all funnel through here: they differ only in what produces
    /// the `f64` value per match, never in the sweep logic (`spec.md`
    /// §4.6, items 1/2/5/6/7).
    pub fn enumerate_numerical(
        &mut self,
        aggregator: &mut Aggregator,
        criterion: &mut Criterion,
        matches: &mut MatchStore,
        agg_values: &dyn ValueProvider,
        targets: &[f64],
        eligible: Range<usize>,
        condition: &ConditionColumn,
    ) {
        let order = sorted_non_null_order(matches, eligible.clone(), condition.values);
        if order.len() < 2 {
            return;
        }
        let grid = grid_positions(order.len(), self.hyperparams.grid_factor);

        self.sweep_growing_prefix(
            aggregator,
            criterion,
            matches,
            agg_values,
            targets,
            &order,
            &grid,
            false,
            condition,
        );
        self.sweep_growing_suffix(
            aggregator,
            criterion,
            matches,
            agg_values,
            targets,
            &order,
            &grid,
            true,
            condition,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn sweep_growing_prefix(
        &mut self,
        aggregator: &mut Aggregator,
        criterion: &mut Criterion,
        matches: &mut MatchStore,
        agg_values: &dyn ValueProvider,
        targets: &[f64],
        order: &[u32],
        grid: &[usize],
        apply_from_above: bool,
        condition: &ConditionColumn,
    ) {
        let mut prev = 0usize;
        for &k in grid {
            aggregator.activate_range(&order[prev..k], matches, agg_values);
            self.record_step(aggregator, criterion, targets);
            let critical_value = midpoint(order, prev.max(1) - 1, k.min(order.len() - 1), condition.values, matches);
            self.candidates.push(Candidate {
                data_source: condition.data_source,
                column: condition.column.clone(),
                apply_from_above,
                critical_value: Some(critical_value),
                categories: None,
            });
            prev = k;
        }
        aggregator.deactivate_range(&order[..prev], matches, agg_values);
        self.flush_touched(aggregator, criterion, targets);
    }

    #[allow(clippy::too_many_arguments)]
    fn sweep_growing_suffix(
        &mut self,
        aggregator: &mut Aggregator,
        criterion: &mut Criterion,
        matches: &mut MatchStore,
        agg_values: &dyn ValueProvider,
        targets: &[f64],
        order: &[u32],
        grid: &[usize],
        apply_from_above: bool,
        condition: &ConditionColumn,
    ) {
        let n = order.len();
        let mut prev = 0usize;
        for &k in grid {
            aggregator.activate_range(&order[n - k..n - prev], matches, agg_values);
            self.record_step(aggregator, criterion, targets);
            let critical_value = midpoint(order, n - k, (n - prev).min(n - 1), condition.values, matches);
            self.candidates.push(Candidate {
                data_source: condition.data_source,
                column: condition.column.clone(),
                apply_from_above,
                critical_value: Some(critical_value),
                categories: None,
            });
            prev = k;
        }
        aggregator.deactivate_range(&order[n - prev..n], matches, agg_values);
        self.flush_touched(aggregator, criterion, targets);
    }

    /// Categorical peripheral/population columns: single-category splits,
    /// plus (when `allow_sets` and there are enough categories)
    /// prefix-of-ranking set splits (`spec.md` §4.6, item 3).
    pub fn enumerate_categorical(
        &mut self,
        aggregator: &mut Aggregator,
        criterion: &mut Criterion,
        matches: &mut MatchStore,
        agg_values: &dyn ValueProvider,
        targets: &[f64],
        index: &CategoryIndex,
        data_source: DataSource,
        column: &str,
    ) {
        let mut categories: Vec<i32> = index.categories().collect();
        categories.sort_unstable();
        if categories.is_empty() {
            return;
        }

        let mut single_category_values = Vec::with_capacity(categories.len());
        for &cat in &categories {
            let positions = index.positions(cat).to_vec();
            aggregator.activate_range(&positions, matches, agg_values);
            self.record_step(aggregator, criterion, targets);
            single_category_values.push(criterion.current_reduction());
            self.candidates.push(Candidate {
                data_source,
                column: column.to_string(),
                apply_from_above: true,
                critical_value: None,
                categories: Some(vec![cat]),
            });
            aggregator.deactivate_range(&positions, matches, agg_values);
            self.flush_touched(aggregator, criterion, targets);

            let universe = index.all_positions().to_vec();
            aggregator.activate_range(&universe, matches, agg_values);
            aggregator.deactivate_range(&positions, matches, agg_values);
            self.record_step(aggregator, criterion, targets);
            self.candidates.push(Candidate {
                data_source,
                column: column.to_string(),
                apply_from_above: false,
                critical_value: None,
                categories: Some(vec![cat]),
            });
            aggregator.deactivate_range(&universe, matches, agg_values);
            self.flush_touched(aggregator, criterion, targets);
        }

        if !self.hyperparams.allow_sets || categories.len() < 3 {
            return;
        }

        let ranking = Criterion::argsort(&single_category_values);
        let half = (categories.len() / 2).max(1);
        for direction_above in [true, false] {
            let mut prefix = Vec::new();
            for &rank in ranking.iter().take(half) {
                prefix.push(categories[rank]);
                let mut positions = Vec::new();
                for &c in &prefix {
                    positions.extend_from_slice(index.positions(c));
                }
                if direction_above {
                    aggregator.activate_range(&positions, matches, agg_values);
                } else {
                    let universe = index.all_positions().to_vec();
                    aggregator.activate_range(&universe, matches, agg_values);
                    aggregator.deactivate_range(&positions, matches, agg_values);
                }
                self.record_step(aggregator, criterion, targets);
                self.candidates.push(Candidate {
                    data_source,
                    column: column.to_string(),
                    apply_from_above: direction_above,
                    critical_value: None,
                    categories: Some(prefix.clone()),
                });
                if direction_above {
                    aggregator.deactivate_range(&positions, matches, agg_values);
                } else {
                    let universe = index.all_positions().to_vec();
                    aggregator.deactivate_range(&universe, matches, agg_values);
                }
                self.flush_touched(aggregator, criterion, targets);
            }
        }
    }

    /// Text columns: same "single token, then prefix-of-ranking set" shape
    /// as categorical, driven through `WordIndex` instead.
    pub fn enumerate_words(
        &mut self,
        aggregator: &mut Aggregator,
        criterion: &mut Criterion,
        matches: &mut MatchStore,
        agg_values: &dyn ValueProvider,
        targets: &[f64],
        index: &WordIndex,
        data_source: DataSource,
        column: &str,
    ) {
        for token in index.tokens() {
            let positions = index.positions(token).to_vec();
            aggregator.activate_range(&positions, matches, agg_values);
            self.record_step(aggregator, criterion, targets);
            self.candidates.push(Candidate {
                data_source,
                column: column.to_string(),
                apply_from_above: true,
                critical_value: Some(token as f64),
                categories: None,
            });
            aggregator.deactivate_range(&positions, matches, agg_values);
            self.flush_touched(aggregator, criterion, targets);
        }
    }

    /// Time-stamp lag windows: activates matches whose
    /// `population.ts - peripheral.ts` falls inside each generated window
    /// (`spec.md` §4.6, item 6; always reverted after each window).
    #[allow(clippy::too_many_arguments)]
    pub fn enumerate_time_windows(
        &mut self,
        aggregator: &mut Aggregator,
        criterion: &mut Criterion,
        matches: &mut MatchStore,
        agg_values: &dyn ValueProvider,
        targets: &[f64],
        eligible: Range<usize>,
        lag_values: &dyn ValueProvider,
        windows: &[(f64, f64)],
        data_source: DataSource,
        column: &str,
    ) {
        for &(lower, upper) in windows {
            aggregator.activate_matches_in_window(lag_values, eligible.clone(), lower, upper, matches, agg_values);
            self.record_step(aggregator, criterion, targets);
            self.candidates.push(Candidate {
                data_source,
                column: column.to_string(),
                apply_from_above: true,
                critical_value: Some(upper),
                categories: None,
            });
            let positions: Vec<u32> = eligible
                .clone()
                .filter(|&p| matches.as_slice()[p].activated)
                .map(|p| p as u32)
                .collect();
            aggregator.deactivate_range(&positions, matches, agg_values);
            self.flush_touched(aggregator, criterion, targets);
        }
    }

    /// Reconciles every touched row's criterion membership with its actual
    /// activation state, calling `Criterion::update_samples` only on a
    /// genuine 0-to-positive or positive-to-0 crossing of a row's active
    /// match count — never once per touched match (`spec.md` §4.5
    /// "update_samples" is specified per population row, not per match).
    fn flush_touched(&mut self, aggregator: &mut Aggregator, criterion: &mut Criterion, targets: &[f64]) {
        let touched: Vec<u32> = aggregator.touched_rows().collect();
        for row in touched {
            let row = row as usize;
            let now_left = aggregator.is_active(row);
            if self.left_membership[row] != now_left {
                criterion.update_samples(targets[row], now_left);
                self.left_membership[row] = now_left;
            }
        }
        aggregator.clear_touched_rows();
    }

    fn record_step(&mut self, aggregator: &mut Aggregator, criterion: &mut Criterion, targets: &[f64]) {
        self.flush_touched(aggregator, criterion, targets);
        criterion.store_current_stage();
    }
}

/// Candidate threshold positions, one per grid point, `grid_factor * sqrt(n)`
/// of them, clamped to `[1, n-1]` and deduplicated (`spec.md` §4.6
/// "Numerical"/"Discrete").
fn grid_positions(n: usize, grid_factor: f64) -> Vec<usize> {
    let size = ((grid_factor * (n as f64).sqrt()).ceil() as usize).clamp(1, n.saturating_sub(1).max(1));
    let mut positions: Vec<usize> = (1..=size)
        .map(|i| ((i * n) / (size + 1)).clamp(1, n - 1))
        .collect();
    positions.dedup();
    positions
}

fn sorted_non_null_order(matches: &MatchStore, eligible: Range<usize>, values: &dyn ValueProvider) -> Vec<u32> {
    let slice = matches.as_slice();
    let mut order: Vec<u32> = eligible
        .filter(|&p| !values.value(&slice[p]).is_nan())
        .map(|p| p as u32)
        .collect();
    order.sort_by(|&a, &b| {
        values
            .value(&slice[a as usize])
            .partial_cmp(&values.value(&slice[b as usize]))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

fn midpoint(order: &[u32], lo: usize, hi: usize, values: &dyn ValueProvider, matches: &MatchStore) -> f64 {
    let slice = matches.as_slice();
    let lo_value = values.value(&slice[order[lo.min(order.len() - 1)] as usize]);
    let hi_value = values.value(&slice[order[hi.min(order.len() - 1)] as usize]);
    (lo_value + hi_value) / 2.0
}

/// The node rejects every candidate unless the best beats the committed
/// value by more than `regularisation + ACCEPT_EPSILON` (`spec.md` §4.6
/// "Improvement threshold").
pub fn accepts(best_value: f64, committed_value: f64, hyperparams: &Hyperparameters) -> bool {
    best_value > committed_value + hyperparams.regularisation + ACCEPT_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::AggregationKind;
    use crate::matches::Match;
    use crate::value_provider::PeripheralNumerical;

    #[test]
    fn grid_positions_are_within_bounds_and_sorted() {
        let positions = grid_positions(100, 1.0);
        assert!(!positions.is_empty());
        assert!(positions.iter().all(|&p| p >= 1 && p < 100));
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn numerical_sweep_finds_a_perfect_split() {
        // Peripheral amounts correlate perfectly with a population-level
        // target once matches with amount > 5 are excluded from the SUM.
        let perip_amount = vec![1.0, 2.0, 10.0, 3.0, 20.0, 4.0];
        let population_ix: Vec<u32> = vec![0, 0, 0, 1, 1, 1];
        let match_vec: Vec<Match> = population_ix
            .iter()
            .enumerate()
            .map(|(i, &pop)| Match::new(i as u32, pop))
            .collect();
        let mut store = MatchStore::new(match_vec);
        let agg_values = PeripheralNumerical { column: &perip_amount };
        let cond_values = PeripheralNumerical { column: &perip_amount };

        let mut aggregator = Aggregator::new(AggregationKind::Sum, 2);
        aggregator.prepare(&mut store, 0..6, &agg_values);

        let targets = vec![6.0, 7.0];
        let hp = Hyperparameters::default();
        let mut enumerator = SplitEnumerator::new(&hp, 2);
        let mut criterion = Criterion::new();
        criterion.init_yhat(&targets);

        let condition = ConditionColumn {
            data_source: DataSource::PeripheralNumerical,
            column: "amount".to_string(),
            values: &cond_values,
        };
        enumerator.enumerate_numerical(
            &mut aggregator,
            &mut criterion,
            &mut store,
            &agg_values,
            &targets,
            0..6,
            &condition,
        );

        let candidates = enumerator.into_candidates();
        assert_eq!(candidates.len(), criterion.values_stored().len());
        assert!(!candidates.is_empty());
        let (best_ix, best_value) = criterion.find_maximum().unwrap();
        assert!(best_value >= 0.0);
        assert!(best_ix < candidates.len());
    }

    #[test]
    fn numerical_sweep_does_not_double_count_a_rows_second_match() {
        // Row 0 carries two matches (values 1 and 2); row 1 carries one
        // (value 100). The prefix sweep's second grid point activates row
        // 0's *second* match while its first is already active: without the
        // membership-crossing fix, `record_step` would call
        // `Criterion::update_samples` again for row 0's target, inflating
        // `sum_left` past the row's true contribution.
        let perip_amount = vec![1.0, 2.0, 100.0];
        let population_ix: Vec<u32> = vec![0, 0, 1];
        let match_vec: Vec<Match> = population_ix
            .iter()
            .enumerate()
            .map(|(i, &pop)| Match::new(i as u32, pop))
            .collect();
        let mut store = MatchStore::new(match_vec);
        let agg_values = PeripheralNumerical { column: &perip_amount };
        let cond_values = PeripheralNumerical { column: &perip_amount };

        let mut aggregator = Aggregator::new(AggregationKind::Sum, 2);
        aggregator.prepare(&mut store, 0..3, &agg_values);

        let targets = vec![5.0, 50.0];
        let hp = Hyperparameters::default();
        let mut enumerator = SplitEnumerator::new(&hp, 2);
        let mut criterion = Criterion::new();
        criterion.init_yhat(&targets);

        let condition = ConditionColumn {
            data_source: DataSource::PeripheralNumerical,
            column: "amount".to_string(),
            values: &cond_values,
        };
        enumerator.enumerate_numerical(
            &mut aggregator,
            &mut criterion,
            &mut store,
            &agg_values,
            &targets,
            0..3,
            &condition,
        );

        let candidates = enumerator.into_candidates();
        assert_eq!(candidates.len(), 4);
        let values = criterion.values_stored();
        // Grid point 1 of the prefix sweep activates row 0's first match
        // (reduction 1012.5); grid point 2 activates its *second* match,
        // which must leave the row's criterion membership — and so the
        // reduction — unchanged, not double it to 1037.5.
        for &v in &values[..3] {
            assert!((v - 1012.5).abs() < 1e-9, "expected 1012.5, got {v}");
        }
        assert!((values[3] - 0.0).abs() < 1e-9);
        let (best_ix, best_value) = criterion.find_maximum().unwrap();
        assert_eq!(best_ix, 0);
        assert!((best_value - 1012.5).abs() < 1e-9);
    }
}

//! C8 — the tree-ensemble driver. Fits one tree per (peripheral table ×
//! aggregation kind × column) triple, independently and in parallel, and
//! optionally folds each tree's prediction into a shared residual for a
//! boosted ensemble. `spec.md` §4.8, generalized per SPEC_FULL.md §5
//! "Inter-tree".
//!
//! Grounded in the teacher's `RandomForest` bootstrap-and-aggregate driver
//! (`src/ml/algorithms/forest.rs`): a `rayon` scoped fan-out over
//! independent per-tree fits, each owning its own mutable working state so
//! no tree's fit can observe another's in-progress activation sweep.

use crate::aggregator::Aggregator;
use crate::config::Hyperparameters;
use crate::criterion::Criterion;
use crate::descriptors::{AggregationKind, DataSource};
use crate::matches::MatchStore;
use crate::reduce::{LocalReducer, Reducer};
use crate::split::{Candidate, ConditionColumn, SplitEnumerator};
use crate::tree::{column_importances, SplitDescriptor, Tree};
use crate::value_provider::ValueProvider;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::HashMap;
use std::ops::Range;
use tracing::info;

/// Picks which condition-column indices this tree's fit is allowed to
/// search, honouring `share_conditions` (`SPEC_FULL.md` §4.6.A). Draws from
/// a `StdRng` seeded from `hyperparams.random_seed`, never `thread_rng`, so
/// two runs — or two distributed ranks — with the same seed enumerate the
/// same columns in the same order. Returns every index when
/// `share_conditions >= 1.0`.
fn sample_condition_indices(n: usize, hyperparams: &Hyperparameters) -> Vec<usize> {
    if n == 0 || hyperparams.share_conditions >= 1.0 {
        return (0..n).collect();
    }
    let keep = ((n as f64) * hyperparams.share_conditions).ceil().max(1.0) as usize;
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(hyperparams.random_seed);
    order.shuffle(&mut rng);
    order.truncate(keep.min(n));
    order.sort_unstable();
    order
}

/// One independently-fit (peripheral table × aggregation kind × column)
/// triple. Each task owns its own `MatchStore` — the matchmaker (outside
/// this crate's scope) has already joined the population against this
/// peripheral table and produced the candidate pairs.
pub struct AggregationTask<'a> {
    pub peripheral_table: String,
    pub aggregation: AggregationKind,
    pub aggregated_column: String,
    pub n_population: usize,
    pub matches: MatchStore,
    pub agg_values: &'a (dyn ValueProvider + 'a),
    pub conditions: Vec<ConditionColumn<'a>>,
}

pub struct FittedFeature {
    pub peripheral_table: String,
    pub aggregation: AggregationKind,
    pub aggregated_column: String,
    pub tree: Tree,
}

pub struct Driver {
    hyperparams: Hyperparameters,
}

/// Looks a candidate's (or a fitted split's) condition column up among a
/// task's eligible columns. Matching by `(data_source, column)` is safe
/// because the enumerator tags every candidate with the exact column it
/// was generated from — a 1:1 mirror of `conditions` (`spec.md` §4.6).
fn resolve_condition<'a>(
    conditions: &'a [ConditionColumn<'a>],
    data_source: DataSource,
    column: &str,
) -> &'a dyn ValueProvider {
    conditions
        .iter()
        .find(|c| c.data_source == data_source && c.column == column)
        .map(|c| c.values)
        .expect("fitted split must reference one of the task's condition columns")
}

impl Driver {
    pub fn new(hyperparams: Hyperparameters) -> Self {
        Self { hyperparams }
    }

    /// Fits every task's tree independently, in parallel across a `rayon`
    /// thread pool (`spec.md` §5 "Inter-tree": "each worker owns a private
    /// instance" of the match store, aggregator, and criterion).
    pub fn fit_all<'a>(
        &self,
        tasks: Vec<AggregationTask<'a>>,
        targets: &'a [f64],
        reducer: &(dyn Reducer + Sync),
    ) -> Vec<FittedFeature> {
        tasks
            .into_par_iter()
            .map(|task| self.fit_one(task, targets, reducer))
            .collect()
    }

    fn fit_one<'a>(&self, mut task: AggregationTask<'a>, targets: &[f64], reducer: &dyn Reducer) -> FittedFeature {
        let mut aggregator = Aggregator::new(task.aggregation, task.n_population);
        let range = 0..task.matches.len();
        let hyperparams = &self.hyperparams;
        let conditions = &task.conditions;
        let agg_values = task.agg_values;
        let n_population = task.n_population;
        let sampled = sample_condition_indices(conditions.len(), hyperparams);

        let mut enumerate = |aggregator: &mut Aggregator,
                              criterion: &mut Criterion,
                              matches: &mut MatchStore,
                              range: Range<usize>| {
            let mut enumerator = SplitEnumerator::new(hyperparams, n_population);
            for &ix in &sampled {
                let condition = &conditions[ix];
                enumerator.enumerate_numerical(
                    aggregator,
                    criterion,
                    matches,
                    agg_values,
                    targets,
                    range.clone(),
                    condition,
                );
            }
            enumerator.into_candidates()
        };
        let resolve = |candidate: &Candidate| -> &dyn ValueProvider {
            resolve_condition(conditions, candidate.data_source, &candidate.column)
        };

        let mut tree = Tree::new(self.hyperparams.clone());
        tree.fit_as_root(
            &mut task.matches,
            range,
            agg_values,
            targets,
            &mut enumerate,
            &resolve,
            &mut aggregator,
            reducer,
        );

        info!(
            peripheral = %task.peripheral_table,
            aggregation = task.aggregation.name(),
            column = %task.aggregated_column,
            is_leaf = tree.root().is_leaf(),
            "fit feature tree"
        );

        FittedFeature {
            peripheral_table: task.peripheral_table,
            aggregation: task.aggregation,
            aggregated_column: task.aggregated_column,
            tree,
        }
    }

    /// Replays a fitted tree over a (possibly different) set of matches,
    /// writing one value per population row (`spec.md` §4.7 "transform").
    /// `conditions` must supply a `ValueProvider` for every condition
    /// column the tree's splits reference, over the same index space as
    /// `matches`.
    pub fn transform_one<'a>(
        &self,
        tree: &Tree,
        matches: &mut MatchStore,
        n_population: usize,
        aggregation: AggregationKind,
        agg_values: &dyn ValueProvider,
        conditions: &'a [ConditionColumn<'a>],
    ) -> Vec<f64> {
        let resolve = |split: &SplitDescriptor| -> &dyn ValueProvider {
            resolve_condition(conditions, split.data_source, &split.column)
        };
        let mut aggregator = Aggregator::new(aggregation, n_population);
        let range = 0..matches.len();
        let mut out = vec![0.0; n_population];
        tree.transform(matches, range, agg_values, &resolve, &mut aggregator, &mut out);
        out
    }

    /// Cumulative, normalised column-importance map across every fitted
    /// tree (`spec.md` §6, "column importance map").
    pub fn column_importances(fitted: &[FittedFeature]) -> HashMap<(String, DataSource, String), f64> {
        column_importances(fitted.iter().map(|f| (f.peripheral_table.as_str(), &f.tree)))
    }

    /// Boosted variant: fits every task's tree against the current residual
    /// each round, keeps whichever feature reduced the residual's
    /// sum-of-squares the most, folds its prediction into the shared
    /// residual via `learning_rate`, and repeats for `num_rounds`.
    ///
    /// This is a pragmatic simplification of general gradient boosting:
    /// residuals are always the plain regression residual (`y - prediction`),
    /// not an arbitrary loss gradient, since the optimisation criterion
    /// (`spec.md` §4.5) is specialized to sum-of-squares already.
    pub fn fit_boosted(
        &self,
        task_templates: Vec<AggregationTask>,
        targets: &[f64],
        learning_rate: f64,
        num_rounds: usize,
    ) -> Vec<FittedFeature> {
        let local = LocalReducer;
        let mut residual: Vec<f64> = targets.to_vec();
        let mut chosen = Vec::with_capacity(num_rounds);

        for round in 0..num_rounds {
            let round_tasks: Vec<AggregationTask> = task_templates
                .iter()
                .map(|t| AggregationTask {
                    peripheral_table: t.peripheral_table.clone(),
                    aggregation: t.aggregation,
                    aggregated_column: t.aggregated_column.clone(),
                    n_population: t.n_population,
                    matches: t.matches.clone(),
                    agg_values: t.agg_values,
                    conditions: t
                        .conditions
                        .iter()
                        .map(|c| ConditionColumn {
                            data_source: c.data_source,
                            column: c.column.clone(),
                            values: c.values,
                        })
                        .collect(),
                })
                .collect();

            let fitted = self.fit_all(round_tasks, &residual, &local);
            let predictions: Vec<Option<Vec<f64>>> = fitted
                .iter()
                .zip(task_templates.iter())
                .map(|(f, t)| {
                    if f.tree.root().is_leaf() {
                        return None;
                    }
                    let mut matches = t.matches.clone();
                    Some(self.transform_one(
                        &f.tree,
                        &mut matches,
                        t.n_population,
                        t.aggregation,
                        t.agg_values,
                        &t.conditions,
                    ))
                })
                .collect();

            let best = fitted
                .into_iter()
                .zip(predictions.into_iter())
                .filter_map(|(f, p)| p.map(|p| (f, p)))
                .max_by(|(_, a), (_, b)| {
                    residual_reduction(a, &residual).total_cmp(&residual_reduction(b, &residual))
                });

            let Some((best, prediction)) = best else {
                info!(round, "boosting stopped: no improving feature this round");
                break;
            };

            for (r, p) in residual.iter_mut().zip(prediction.iter()) {
                *r -= learning_rate * p;
            }
            info!(round, peripheral = %best.peripheral_table, "accepted boosted feature");
            chosen.push(best);
        }

        chosen
    }
}

/// How much folding `prediction` into `residual` would reduce its
/// sum-of-squares: the reduction in variance around the mean once
/// `prediction` is subtracted out.
fn residual_reduction(prediction: &[f64], residual: &[f64]) -> f64 {
    let mean: f64 = residual.iter().sum::<f64>() / residual.len().max(1) as f64;
    let before: f64 = residual.iter().map(|r| (r - mean).powi(2)).sum();
    let after: f64 = residual
        .iter()
        .zip(prediction.iter())
        .map(|(r, p)| (r - p).powi(2))
        .sum();
    before - after
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::DataSource;
    use crate::matches::Match;
    use crate::value_provider::PeripheralNumerical;

    #[test]
    fn fit_all_runs_every_task_independently() {
        let perip_amount = vec![1.0, 2.0, 10.0, 3.0, 20.0, 4.0];
        let population_ix: Vec<u32> = vec![0, 0, 0, 1, 1, 1];
        let match_vec: Vec<Match> = population_ix
            .iter()
            .enumerate()
            .map(|(i, &pop)| Match::new(i as u32, pop))
            .collect();
        let store = MatchStore::new(match_vec);
        let agg_values = PeripheralNumerical { column: &perip_amount };
        let cond_values = PeripheralNumerical { column: &perip_amount };
        let targets = vec![6.0, 7.0];

        let condition = ConditionColumn {
            data_source: DataSource::PeripheralNumerical,
            column: "amount".to_string(),
            values: &cond_values,
        };

        let task = AggregationTask {
            peripheral_table: "orders".to_string(),
            aggregation: AggregationKind::Sum,
            aggregated_column: "amount".to_string(),
            n_population: 2,
            matches: store,
            agg_values: &agg_values,
            conditions: vec![condition],
        };

        let driver = Driver::new(Hyperparameters {
            min_num_samples: 1,
            ..Hyperparameters::default()
        });
        let reducer = LocalReducer;
        let fitted = driver.fit_all(vec![task], &targets, &reducer);
        assert_eq!(fitted.len(), 1);
        assert_eq!(fitted[0].peripheral_table, "orders");
    }

    #[test]
    fn transform_one_reproduces_fitted_tree_predictions() {
        let perip_amount = vec![1.0, 2.0, 10.0, 3.0, 20.0, 4.0];
        let population_ix: Vec<u32> = vec![0, 0, 0, 1, 1, 1];
        let match_vec: Vec<Match> = population_ix
            .iter()
            .enumerate()
            .map(|(i, &pop)| Match::new(i as u32, pop))
            .collect();
        let store = MatchStore::new(match_vec);
        let agg_values = PeripheralNumerical { column: &perip_amount };
        let cond_values = PeripheralNumerical { column: &perip_amount };
        let targets = vec![6.0, 7.0];

        let condition = ConditionColumn {
            data_source: DataSource::PeripheralNumerical,
            column: "amount".to_string(),
            values: &cond_values,
        };

        let task = AggregationTask {
            peripheral_table: "orders".to_string(),
            aggregation: AggregationKind::Sum,
            aggregated_column: "amount".to_string(),
            n_population: 2,
            matches: store.clone(),
            agg_values: &agg_values,
            conditions: vec![condition],
        };

        let driver = Driver::new(Hyperparameters {
            min_num_samples: 1,
            ..Hyperparameters::default()
        });
        let reducer = LocalReducer;
        let conditions = vec![ConditionColumn {
            data_source: DataSource::PeripheralNumerical,
            column: "amount".to_string(),
            values: &cond_values,
        }];
        let fitted = driver.fit_all(vec![task], &targets, &reducer);
        let mut replay_store = store;
        let out = driver.transform_one(
            &fitted[0].tree,
            &mut replay_store,
            2,
            AggregationKind::Sum,
            &agg_values,
            &conditions,
        );
        assert_eq!(out.len(), 2);
    }
}

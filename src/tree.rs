//! C7 — the decision-tree node and tree. A node is either a leaf or a split
//! descriptor plus two children; `fit` drives the split enumerator and
//! optimisation criterion to grow a tree greedily by physically partitioning
//! its match range at every accepted split, `transform` replays a fitted
//! tree's conditions over a fresh match range the same way. `spec.md` §4.7.
//!
//! Grounded in the teacher's `ml::algorithms::trees::TreeNode`/
//! `DecisionTree` (`src/ml/algorithms/trees.rs`) for the node/tree shape,
//! and in `original_source`'s `DecisionTreeNode::{fit,commit,
//! spawn_child_nodes,transform}` for the recursion itself: every node
//! carries an `activated` polarity (whether its sub-range currently
//! contributes to the aggregate), an accepted split always partitions the
//! node's match range into a "greater" (`value > critical_value`, or
//! "category ∈ set") and "smaller" side — fixed regardless of which side is
//! activated — and `apply_from_above XOR activated` decides which side
//! inherits `activated = true` for its own children. A leaf's `activated`
//! flag is purely informational: the aggregator's activation state for
//! every match in its range has already been set correctly by the time
//! recursion reaches it, by exactly this toggling rule.

use crate::aggregator::Aggregator;
use crate::config::Hyperparameters;
use crate::criterion::Criterion;
use crate::descriptors::DataSource;
use crate::matches::{Match, MatchStore};
use crate::reduce::Reducer;
use crate::split::{accepts, Candidate};
use crate::value_provider::ValueProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;

/// The fitted split stored at an internal node, matching the wire format
/// the surrounding pipeline's transpiler expects (`spec.md` §4.7/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitDescriptor {
    #[serde(rename = "app_")]
    pub apply_from_above: bool,
    #[serde(rename = "data_used_")]
    pub data_source: DataSource,
    #[serde(rename = "column_used_")]
    pub column: String,
    #[serde(rename = "critical_value_")]
    pub critical_value: Option<f64>,
    #[serde(rename = "categories_used_")]
    pub categories: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "act_")]
    pub activated: bool,
    #[serde(rename = "imp_")]
    pub imposes_condition: bool,
    #[serde(flatten)]
    pub split: Option<SplitDescriptor>,
    #[serde(rename = "sub1_", skip_serializing_if = "Option::is_none")]
    pub child_greater: Option<Box<Node>>,
    #[serde(rename = "sub2_", skip_serializing_if = "Option::is_none")]
    pub child_smaller: Option<Box<Node>>,
}

impl Node {
    fn leaf(activated: bool) -> Self {
        Self {
            activated,
            imposes_condition: false,
            split: None,
            child_greater: None,
            child_smaller: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }
}

/// Whether `m`'s condition-column value routes it to the "greater" side of
/// `candidate`'s predicate (`value > critical_value`, or category
/// membership). A `NaN` condition value — the column under test is missing
/// for this match, a different concern from the aggregated value's own
/// null handling in `spec.md` §3 — is routed to whichever side will end up
/// deactivated, so a missing condition value never forces a match into the
/// active aggregate (documented resolution, see `DESIGN.md`).
fn satisfies_greater(
    m: &Match,
    condition_values: &dyn ValueProvider,
    critical_value: Option<f64>,
    categories: &Option<Vec<i32>>,
    greater_activated: bool,
) -> bool {
    let v = condition_values.value(m);
    if let Some(cats) = categories {
        if v.is_nan() {
            return !greater_activated;
        }
        cats.iter().any(|&c| c as f64 == v)
    } else if let Some(cv) = critical_value {
        if v.is_nan() {
            return !greater_activated;
        }
        v > cv
    } else {
        false
    }
}

/// Physically partitions `range` into `(smaller, greater)` contiguous
/// sub-ranges by the candidate's predicate, then brings the aggregator's
/// activation state for each sub-range in line with whichever polarity it
/// inherits, toggling only where that polarity differs from the state the
/// range already had coming in (`spec.md` §4.7, `identify_parameters` /
/// `spawn_child_nodes`).
#[allow(clippy::too_many_arguments)]
fn partition_and_apply(
    matches: &mut MatchStore,
    range: Range<usize>,
    apply_from_above: bool,
    critical_value: Option<f64>,
    categories: &Option<Vec<i32>>,
    activated: bool,
    condition_values: &dyn ValueProvider,
    agg_values: &dyn ValueProvider,
    aggregator: &mut Aggregator,
) -> (Range<usize>, Range<usize>, bool, bool) {
    let greater_activated = apply_from_above != activated;
    let smaller_activated = !greater_activated;

    let split_point = matches.partition_null_front(range.clone(), |m| {
        !satisfies_greater(m, condition_values, critical_value, categories, greater_activated)
    });
    let smaller_range = range.start..split_point;
    let greater_range = split_point..range.end;

    // Re-derive row_ranges for the two new sub-ranges before toggling any
    // activation within them: deactivate's extremum/positional/median
    // bookkeeping scans neighbours through row_ranges, which must already
    // reflect each match's post-partition position.
    aggregator.reindex_row_ranges(matches, smaller_range.clone());
    aggregator.reindex_row_ranges(matches, greater_range.clone());

    if greater_activated != activated {
        if greater_activated {
            aggregator.activate_all(matches, greater_range.clone(), agg_values);
        } else {
            aggregator.deactivate_all(matches, greater_range.clone(), agg_values);
        }
    }
    if smaller_activated != activated {
        if smaller_activated {
            aggregator.activate_all(matches, smaller_range.clone(), agg_values);
        } else {
            aggregator.deactivate_all(matches, smaller_range.clone(), agg_values);
        }
    }

    (smaller_range, greater_range, smaller_activated, greater_activated)
}

/// One aggregation tree: fixed aggregation kind + column to aggregate
/// (`spec.md` §4.8's per-triple driver unit), grown node by node. Accumulates
/// the per-split criterion gain by `(data_source, column)` as it fits, for
/// the driver's column-importance map (`spec.md` §6).
pub struct Tree {
    hyperparams: Hyperparameters,
    root: Node,
    importances: Vec<(DataSource, String, f64)>,
}

impl Tree {
    pub fn new(hyperparams: Hyperparameters) -> Self {
        Self {
            hyperparams,
            root: Node::leaf(false),
            importances: Vec::new(),
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn importances(&self) -> &[(DataSource, String, f64)] {
        &self.importances
    }

    /// Activates every non-null match, commits once, then fits from the
    /// root (`spec.md` §4.7 "fit_as_root"). `resolve` maps an accepted
    /// candidate back to the `ValueProvider` that reads its condition
    /// column, so the winning split can be physically applied (the search
    /// itself, driven through `enumerate`, only ever reads cached scratch
    /// values — it never needs `resolve`).
    #[allow(clippy::too_many_arguments)]
    pub fn fit_as_root<'a>(
        &mut self,
        matches: &mut MatchStore,
        range: Range<usize>,
        agg_values: &dyn ValueProvider,
        targets: &[f64],
        enumerate: &mut dyn FnMut(&mut Aggregator, &mut Criterion, &mut MatchStore, Range<usize>) -> Vec<Candidate>,
        resolve: &dyn Fn(&Candidate) -> &'a dyn ValueProvider,
        aggregator: &mut Aggregator,
        reducer: &dyn Reducer,
    ) {
        let separator = aggregator.prepare(matches, range.clone(), agg_values);
        let active_range = separator..range.end;
        aggregator.activate_all(matches, active_range.clone(), agg_values);
        aggregator.commit();
        self.importances.clear();
        self.root = self.fit_node(
            matches,
            active_range,
            true,
            agg_values,
            targets,
            enumerate,
            resolve,
            aggregator,
            reducer,
            0,
            0.0,
        );
    }

    /// Grows one node: searches every eligible condition column, accepts the
    /// best split if it clears `committed_value` by the improvement
    /// threshold, and recurses into both children. `committed_value` is the
    /// reduction this node's own split was accepted against — the parent's
    /// accepted value on first entry, `0.0` at the root — so a child's split
    /// is only accepted if it improves on the chain of splits above it, not
    /// just on a flat zero baseline (`spec.md` §4.6/§8 property 4, "split
    /// monotonicity"). This is safe to compare directly because `targets` is
    /// never re-scoped per node: `sum_total`/`n_total` are identical at every
    /// depth, so `best_value` sits on the same scale everywhere it's
    /// produced.
    #[allow(clippy::too_many_arguments)]
    fn fit_node<'a>(
        &mut self,
        matches: &mut MatchStore,
        range: Range<usize>,
        activated: bool,
        agg_values: &dyn ValueProvider,
        targets: &[f64],
        enumerate: &mut dyn FnMut(&mut Aggregator, &mut Criterion, &mut MatchStore, Range<usize>) -> Vec<Candidate>,
        resolve: &dyn Fn(&Candidate) -> &'a dyn ValueProvider,
        aggregator: &mut Aggregator,
        reducer: &dyn Reducer,
        depth: u32,
        committed_value: f64,
    ) -> Node {
        if range.is_empty() {
            return Node::leaf(activated);
        }

        let local_size = range.len();
        let sample_size = reducer.sum_usize(local_size);
        if sample_size < self.hyperparams.sample_size_guard() || depth >= self.hyperparams.max_depth {
            return Node::leaf(activated);
        }

        let mut criterion = Criterion::new();
        criterion.init_yhat(targets);
        criterion.extend_storage_size(1);

        // `fit_as_root` commits every non-null match in `range` as active
        // before the very first `fit_node` call, so an already-`activated`
        // node's search would otherwise start from a baseline where the
        // aggregator's no-op activation guards silently swallow the sweep's
        // own `activate_range` calls. Bring the range to the same
        // fully-deactivated zero baseline the criterion itself starts from,
        // search, then restore — on every return path, including the
        // empty-candidates one below.
        if activated {
            aggregator.deactivate_all(matches, range.clone(), agg_values);
            aggregator.clear_touched_rows();
        }
        let candidates = enumerate(aggregator, &mut criterion, matches, range.clone());
        if activated {
            aggregator.activate_all(matches, range.clone(), agg_values);
            aggregator.clear_touched_rows();
        }
        if candidates.is_empty() {
            return Node::leaf(activated);
        }

        let (best_ix, best_value) = match reducer.best_candidate(criterion.values_stored()) {
            Some(pair) => pair,
            None => return Node::leaf(activated),
        };

        if !accepts(best_value, committed_value, &self.hyperparams) {
            debug!(best_value, committed_value, depth, "node stays a leaf: no improving split");
            return Node::leaf(activated);
        }

        let chosen = candidates[best_ix].clone();
        debug!(column = %chosen.column, value = best_value, depth, "accepted split");
        self.importances.push((chosen.data_source, chosen.column.clone(), best_value));

        let condition_values = resolve(&chosen);
        let (smaller_range, greater_range, smaller_activated, greater_activated) = partition_and_apply(
            matches,
            range,
            chosen.apply_from_above,
            chosen.critical_value,
            &chosen.categories,
            activated,
            condition_values,
            agg_values,
            aggregator,
        );

        aggregator.commit();

        let split = SplitDescriptor {
            apply_from_above: chosen.apply_from_above,
            data_source: chosen.data_source,
            column: chosen.column,
            critical_value: chosen.critical_value,
            categories: chosen.categories,
        };

        let child_greater = self.fit_node(
            matches,
            greater_range,
            greater_activated,
            agg_values,
            targets,
            enumerate,
            resolve,
            aggregator,
            reducer,
            depth + 1,
            best_value,
        );
        let child_smaller = self.fit_node(
            matches,
            smaller_range,
            smaller_activated,
            agg_values,
            targets,
            enumerate,
            resolve,
            aggregator,
            reducer,
            depth + 1,
            best_value,
        );

        Node {
            activated,
            imposes_condition: true,
            split: Some(split),
            child_greater: Some(Box::new(child_greater)),
            child_smaller: Some(Box::new(child_smaller)),
        }
    }

    /// Replays the fitted tree's conditions over a fresh match range,
    /// writing the resulting aggregate into `out` for every population row
    /// (`spec.md` §4.7 "transform"). Reproducible: given the same matches
    /// and the same fitted tree, two calls produce byte-identical `out`
    /// (`spec.md` §8, property 5), since every step is a deterministic
    /// function of the stored splits and the column values.
    pub fn transform<'a>(
        &self,
        matches: &mut MatchStore,
        range: Range<usize>,
        agg_values: &dyn ValueProvider,
        resolve: &dyn Fn(&SplitDescriptor) -> &'a dyn ValueProvider,
        aggregator: &mut Aggregator,
        out: &mut [f64],
    ) {
        let separator = aggregator.prepare(matches, range.clone(), agg_values);
        let active_range = separator..range.end;
        aggregator.activate_all(matches, active_range.clone(), agg_values);
        aggregator.commit();

        Self::transform_node(&self.root, matches, active_range, true, agg_values, resolve, aggregator);

        for (row, slot) in out.iter_mut().enumerate() {
            *slot = aggregator.yhat(row, matches, agg_values);
        }
    }

    fn transform_node<'a>(
        node: &Node,
        matches: &mut MatchStore,
        range: Range<usize>,
        activated: bool,
        agg_values: &dyn ValueProvider,
        resolve: &dyn Fn(&SplitDescriptor) -> &'a dyn ValueProvider,
        aggregator: &mut Aggregator,
    ) {
        let Some(split) = &node.split else {
            return;
        };
        if range.is_empty() {
            return;
        }

        let condition_values = resolve(split);
        let (smaller_range, greater_range, smaller_activated, greater_activated) = partition_and_apply(
            matches,
            range,
            split.apply_from_above,
            split.critical_value,
            &split.categories,
            activated,
            condition_values,
            agg_values,
            aggregator,
        );

        if let Some(child) = &node.child_greater {
            Self::transform_node(child, matches, greater_range, greater_activated, agg_values, resolve, aggregator);
        }
        if let Some(child) = &node.child_smaller {
            Self::transform_node(child, matches, smaller_range, smaller_activated, agg_values, resolve, aggregator);
        }
    }
}

/// Cumulative criterion gain per `(source table column)`, normalised to sum
/// to `1.0` across every contributing split (`spec.md` §6, "column
/// importance map"). Call once after fitting every tree in an ensemble.
pub fn column_importances<'a>(
    trees: impl IntoIterator<Item = (&'a str, &'a Tree)>,
) -> HashMap<(String, DataSource, String), f64> {
    let mut raw: HashMap<(String, DataSource, String), f64> = HashMap::new();
    for (table, tree) in trees {
        for (data_source, column, gain) in tree.importances() {
            *raw.entry((table.to_string(), *data_source, column.clone())).or_insert(0.0) += gain;
        }
    }
    let total: f64 = raw.values().sum();
    if total > 0.0 {
        for v in raw.values_mut() {
            *v /= total;
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::AggregationKind;
    use crate::split::{ConditionColumn, SplitEnumerator};
    use crate::value_provider::PeripheralNumerical;

    #[test]
    fn leaf_has_no_split() {
        let node = Node::leaf(true);
        assert!(node.is_leaf());
    }

    #[test]
    fn split_descriptor_round_trips_through_json() {
        let split = SplitDescriptor {
            apply_from_above: true,
            data_source: DataSource::PeripheralNumerical,
            column: "amount".to_string(),
            critical_value: Some(12.5),
            categories: None,
        };
        let json = serde_json::to_string(&split).unwrap();
        assert!(json.contains("\"app_\":true"));
        assert!(json.contains("\"critical_value_\":12.5"));
        let back: SplitDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.column, "amount");
    }

    fn fit_sum_tree(
        perip_amount: &[f64],
        population_ix: &[u32],
        targets: &[f64],
        hp: Hyperparameters,
    ) -> (Tree, MatchStore) {
        let match_vec: Vec<Match> = population_ix
            .iter()
            .enumerate()
            .map(|(i, &pop)| Match::new(i as u32, pop))
            .collect();
        let mut store = MatchStore::new(match_vec);
        let agg_values = PeripheralNumerical { column: perip_amount };
        let cond_values = PeripheralNumerical { column: perip_amount };
        let n_population = *population_ix.iter().max().unwrap() as usize + 1;

        let mut aggregator = Aggregator::new(AggregationKind::Sum, n_population);
        let range = 0..store.len();

        let mut enumerate = |aggregator: &mut Aggregator,
                              criterion: &mut Criterion,
                              matches: &mut MatchStore,
                              range: Range<usize>| {
            let mut enumerator = SplitEnumerator::new(&hp, n_population);
            let condition = ConditionColumn {
                data_source: DataSource::PeripheralNumerical,
                column: "amount".to_string(),
                values: &cond_values,
            };
            enumerator.enumerate_numerical(aggregator, criterion, matches, &agg_values, targets, range, &condition);
            enumerator.into_candidates()
        };
        let resolve = |_candidate: &Candidate| -> &dyn ValueProvider { &cond_values };

        let mut tree = Tree::new(hp.clone());
        let reducer = crate::reduce::LocalReducer;
        tree.fit_as_root(
            &mut store,
            range,
            &agg_values,
            targets,
            &mut enumerate,
            &resolve,
            &mut aggregator,
            &reducer,
        );
        (tree, store)
    }

    #[test]
    fn root_splits_on_the_separating_threshold() {
        // S1 from spec.md: perip=[10,20,30,40,50], matches pair (0,0)(1,0)(2,1)(3,1)(4,2).
        // Thresholding "perip > 25" from above sends row 0's SUM to 0, leaving
        // rows 1 and 2 untouched. `grid_factor` is lowered to 0.4 so every
        // sweep in this tiny five-match scenario probes a single grid point
        // that lands exactly on the row boundary (value 20/30's midpoint);
        // at the default 1.0 the prefix sweep also probes a point that
        // straddles row 0's own two matches, which ties the clean split on
        // reduction and (correctly, per the documented lowest-index
        // tie-break) loses to it — this test pins the boundary case where
        // double-counting used to silently slip through.
        let perip = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        let population_ix: Vec<u32> = vec![0, 0, 1, 1, 2];
        let targets = vec![0.0, 70.0, 50.0];
        let hp = Hyperparameters {
            min_num_samples: 1,
            max_depth: 3,
            grid_factor: 0.4,
            ..Hyperparameters::default()
        };
        let (tree, mut store) = fit_sum_tree(&perip, &population_ix, &targets, hp);
        assert!(!tree.root().is_leaf());
        let split = tree.root().split.as_ref().unwrap();
        assert_eq!(split.critical_value, Some(20.0));
        assert!(!split.apply_from_above);

        let agg_values = PeripheralNumerical { column: &perip };
        let cond_values = PeripheralNumerical { column: &perip };
        let resolve = |_split: &SplitDescriptor| -> &dyn ValueProvider { &cond_values };
        let mut aggregator = Aggregator::new(AggregationKind::Sum, 3);
        let mut out = vec![0.0; 3];
        tree.transform(&mut store, 0..store.len(), &agg_values, &resolve, &mut aggregator, &mut out);
        assert_eq!(out, vec![0.0, 70.0, 50.0]);
    }

    #[test]
    fn transform_is_reproducible() {
        let perip = vec![1.0, 2.0, 10.0, 3.0, 20.0, 4.0];
        let population_ix: Vec<u32> = vec![0, 0, 0, 1, 1, 1];
        let targets = vec![6.0, 7.0];
        let hp = Hyperparameters {
            min_num_samples: 1,
            ..Hyperparameters::default()
        };
        let (tree, mut store) = fit_sum_tree(&perip, &population_ix, &targets, hp);

        let agg_values = PeripheralNumerical { column: &perip };
        let cond_values = PeripheralNumerical { column: &perip };
        let resolve = |_split: &SplitDescriptor| -> &dyn ValueProvider { &cond_values };
        let mut aggregator = Aggregator::new(AggregationKind::Sum, 2);
        let mut out1 = vec![0.0; 2];
        tree.transform(&mut store, 0..store.len(), &agg_values, &resolve, &mut aggregator, &mut out1);

        let mut aggregator2 = Aggregator::new(AggregationKind::Sum, 2);
        let mut out2 = vec![0.0; 2];
        tree.transform(&mut store, 0..store.len(), &agg_values, &resolve, &mut aggregator2, &mut out2);

        assert_eq!(out1, out2);
    }
}

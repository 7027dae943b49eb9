//! C4 — the incremental aggregator. The hot path: maintains one running
//! aggregate per population row, supports O(1)/O(k) activation and
//! deactivation of individual matches as the split enumerator sweeps
//! candidate thresholds, and commits/reverts without ever touching rows that
//! weren't modified. `spec.md` §4.1/§4.4.
//!
//! Per-kind activate/deactivate semantics for MIN/MAX/FIRST/LAST/MEDIAN and
//! COUNT DISTINCT/COUNT MINUS COUNT DISTINCT are grounded in
//! `original_source`'s `multirel/aggregations/FitAggregation.hpp`: matches
//! are pre-sorted once per node fit, and each kind maintains just enough
//! state (a running pointer, a parity-sensitive counter) to update in
//! constant time as individual matches flip on or off.
//!
//! Simplification from the original's three-snapshot (`current`/`stored`/
//! `committed`) design to two snapshots (`current`/`committed`): the
//! original's `stored` layer exists to let the optimisation criterion
//! re-derive loss values across repeated grid steps without recomputing the
//! whole row set. Here that bookkeeping lives in the split enumerator's own
//! criterion storage (`criterion.rs`) instead of the aggregator, so the
//! aggregator only needs the accept/reject pair. See `DESIGN.md`.

use crate::descriptors::{AggregationKind, AggregationNeeds};
use crate::indices::{CategoryIndex, WordIndex};
use crate::matches::MatchStore;
use crate::value_provider::ValueProvider;
use std::ops::Range;

/// Sparse set of touched population-row indices, supporting O(1) insert and
/// O(k) iteration/clear without ever walking the full population
/// (`spec.md` §4.1, "updates_current"/"updates_stored").
#[derive(Debug, Clone)]
struct IndexSet {
    member: Vec<bool>,
    order: Vec<u32>,
}

impl IndexSet {
    fn new(n: usize) -> Self {
        Self {
            member: vec![false; n],
            order: Vec::new(),
        }
    }

    fn insert(&mut self, i: u32) {
        if !self.member[i as usize] {
            self.member[i as usize] = true;
            self.order.push(i);
        }
    }

    fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.order.iter().copied()
    }

    fn clear(&mut self) {
        for &i in &self.order {
            self.member[i as usize] = false;
        }
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Per-population-row running state for one aggregation.
#[derive(Debug, Clone)]
struct RowStats {
    count: Vec<f64>,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    sum_cubed: Vec<f64>,
    match_ptr: Vec<Option<u32>>,
    null_count: Vec<f64>,
    /// Number of currently activated matches for this row, maintained for
    /// every kind regardless of its `needs.count` flag: the split
    /// enumerator uses this to decide which child a population row falls
    /// into (`spec.md` §4.7, "child_greater"/"child_smaller"), independent
    /// of whichever running statistic the aggregation kind itself needs.
    active_matches: Vec<u32>,
}

impl RowStats {
    fn new(n: usize) -> Self {
        Self {
            count: vec![0.0; n],
            sum: vec![0.0; n],
            sum_sq: vec![0.0; n],
            sum_cubed: vec![0.0; n],
            match_ptr: vec![None; n],
            null_count: vec![0.0; n],
            active_matches: vec![0; n],
        }
    }

    fn copy_row_from(&mut self, other: &RowStats, row: usize) {
        self.count[row] = other.count[row];
        self.sum[row] = other.sum[row];
        self.sum_sq[row] = other.sum_sq[row];
        self.sum_cubed[row] = other.sum_cubed[row];
        self.match_ptr[row] = other.match_ptr[row];
        self.null_count[row] = other.null_count[row];
        self.active_matches[row] = other.active_matches[row];
    }
}

pub struct Aggregator {
    kind: AggregationKind,
    needs: AggregationNeeds,
    current: RowStats,
    committed: RowStats,
    /// Rows touched since the last criterion snapshot; drained by the split
    /// enumerator after each sweep step (`spec.md` §4.4 "updates_current").
    updates_current: IndexSet,
    /// Rows touched since the last `commit`/`revert_to_commit`; a superset
    /// of `updates_current` accumulated across many snapshot drains
    /// (`spec.md` §4.4 "updates_stored").
    updates_stored: IndexSet,
    /// Contiguous `[begin, end)` range per population row within the
    /// sorted-by-(population, value) match sub-range. Only populated for
    /// kinds with `needs.sorting`.
    row_ranges: Vec<Range<usize>>,
}

impl Aggregator {
    pub fn new(kind: AggregationKind, n_population: usize) -> Self {
        Self {
            kind,
            needs: kind.needs(),
            current: RowStats::new(n_population),
            committed: RowStats::new(n_population),
            updates_current: IndexSet::new(n_population),
            updates_stored: IndexSet::new(n_population),
            row_ranges: Vec::new(),
        }
    }

    pub fn kind(&self) -> AggregationKind {
        self.kind
    }

    /// Partitions null-valued matches to the front of `range` and, for
    /// kinds that need it, sorts the remaining non-null sub-range by
    /// `(ix_population, value)` and indexes per-row ranges. Returns the
    /// separator index (`spec.md` §4.1 "separate_null_values").
    pub fn prepare(
        &mut self,
        matches: &mut MatchStore,
        range: Range<usize>,
        values: &dyn ValueProvider,
    ) -> usize {
        let separator = matches.partition_null_front(range.clone(), |m| values.value(m).is_nan());
        if self.needs.sorting {
            matches.sort_subrange(separator..range.end, |a, b| {
                a.ix_population.cmp(&b.ix_population).then_with(|| {
                    values
                        .value(a)
                        .partial_cmp(&values.value(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
            });
            self.index_row_ranges(matches, separator..range.end);
        }
        separator
    }

    fn index_row_ranges(&mut self, matches: &MatchStore, range: Range<usize>) {
        self.row_ranges.clear();
        self.reindex_row_ranges_unconditionally(matches, range);
    }

    /// Re-derives the per-row sub-ranges within `range` without clearing
    /// entries for rows outside it. A tree node's accepted split physically
    /// partitions its match range into two child sub-ranges via a stable
    /// partition of the range `prepare` already sorted by
    /// `(ix_population, value)`, so each child's matches stay sorted by the
    /// same key — but their positions shift, which stale `row_ranges`
    /// entries from the parent's indexing would get wrong. Call this once
    /// per child range right after partitioning (`spec.md` §4.7).
    pub fn reindex_row_ranges(&mut self, matches: &MatchStore, range: Range<usize>) {
        if !self.needs.sorting {
            return;
        }
        self.reindex_row_ranges_unconditionally(matches, range);
    }

    fn reindex_row_ranges_unconditionally(&mut self, matches: &MatchStore, range: Range<usize>) {
        let slice = matches.as_slice();
        let mut i = range.start;
        while i < range.end {
            let row = slice[i].ix_population as usize;
            let begin = i;
            while i < range.end && slice[i].ix_population as usize == row {
                i += 1;
            }
            if self.row_ranges.len() <= row {
                self.row_ranges.resize(row + 1, begin..begin);
            }
            self.row_ranges[row] = begin..i;
        }
    }

    pub fn activate_all(&mut self, matches: &mut MatchStore, range: Range<usize>, values: &dyn ValueProvider) {
        for pos in range {
            if !matches.as_slice()[pos].activated {
                self.activate(pos, matches, values);
            }
        }
    }

    /// Deactivates every currently-activated match in `range` — the
    /// mirror image of `activate_all`, used by the tree node (C7) when a
    /// committed split routes a whole sub-range to the deactivated side
    /// (`spec.md` §4.7, `spawn_child_nodes`'s inherited-state toggling).
    pub fn deactivate_all(&mut self, matches: &mut MatchStore, range: Range<usize>, values: &dyn ValueProvider) {
        for pos in range {
            if matches.as_slice()[pos].activated {
                self.deactivate(pos, matches, values);
            }
        }
    }

    pub fn activate_range(&mut self, positions: &[u32], matches: &mut MatchStore, values: &dyn ValueProvider) {
        for &pos in positions {
            if !matches.as_slice()[pos as usize].activated {
                self.activate(pos as usize, matches, values);
            }
        }
    }

    pub fn deactivate_range(&mut self, positions: &[u32], matches: &mut MatchStore, values: &dyn ValueProvider) {
        for &pos in positions {
            if matches.as_slice()[pos as usize].activated {
                self.deactivate(pos as usize, matches, values);
            }
        }
    }

    /// Activates the first `new_count - old_count` entries of `order` not
    /// already active, i.e. the incremental extension of a grid sweep
    /// (`spec.md` §4.4 "activate_partition_from_above").
    pub fn activate_partition_from_above(
        &mut self,
        order: &[u32],
        old_count: usize,
        new_count: usize,
        matches: &mut MatchStore,
        values: &dyn ValueProvider,
    ) {
        self.activate_range(&order[old_count..new_count], matches, values);
    }

    pub fn activate_partition_from_below(
        &mut self,
        order: &[u32],
        old_count: usize,
        new_count: usize,
        matches: &mut MatchStore,
        values: &dyn ValueProvider,
    ) {
        let n = order.len();
        self.activate_range(&order[n - new_count..n - old_count], matches, values);
    }

    pub fn activate_matches_from_above(
        &mut self,
        order: &[u32],
        count: usize,
        matches: &mut MatchStore,
        values: &dyn ValueProvider,
    ) {
        self.activate_range(&order[..count], matches, values);
    }

    pub fn activate_matches_from_below(
        &mut self,
        order: &[u32],
        count: usize,
        matches: &mut MatchStore,
        values: &dyn ValueProvider,
    ) {
        let n = order.len();
        self.activate_range(&order[n - count..], matches, values);
    }

    pub fn activate_matches_containing_categories(
        &mut self,
        index: &CategoryIndex,
        categories: &[i32],
        matches: &mut MatchStore,
        values: &dyn ValueProvider,
    ) {
        for &c in categories {
            let positions = index.positions(c).to_vec();
            self.activate_range(&positions, matches, values);
        }
    }

    pub fn activate_matches_not_containing_categories(
        &mut self,
        index: &CategoryIndex,
        categories: &[i32],
        matches: &mut MatchStore,
        values: &dyn ValueProvider,
    ) {
        let excluded: std::collections::HashSet<i32> = categories.iter().copied().collect();
        for c in index.categories() {
            if !excluded.contains(&c) {
                let positions = index.positions(c).to_vec();
                self.activate_range(&positions, matches, values);
            }
        }
    }

    pub fn activate_matches_containing_words(
        &mut self,
        index: &WordIndex,
        tokens: &[u32],
        matches: &mut MatchStore,
        values: &dyn ValueProvider,
    ) {
        for &t in tokens {
            let positions = index.positions(t).to_vec();
            self.activate_range(&positions, matches, values);
        }
    }

    pub fn activate_matches_not_containing_words(
        &mut self,
        index: &WordIndex,
        tokens: &[u32],
        matches: &mut MatchStore,
        values: &dyn ValueProvider,
    ) {
        let excluded: std::collections::HashSet<u32> = tokens.iter().copied().collect();
        for t in index.tokens() {
            if !excluded.contains(&t) {
                let positions = index.positions(t).to_vec();
                self.activate_range(&positions, matches, values);
            }
        }
    }

    pub fn activate_matches_in_window(
        &mut self,
        time_stamps: &dyn ValueProvider,
        range: Range<usize>,
        lower: f64,
        upper: f64,
        matches: &mut MatchStore,
        values: &dyn ValueProvider,
    ) {
        let positions: Vec<u32> = range
            .filter(|&p| {
                let t = time_stamps.value(&matches.as_slice()[p]);
                t >= lower && t <= upper
            })
            .map(|p| p as u32)
            .collect();
        self.activate_range(&positions, matches, values);
    }

    pub fn activate_matches_outside_window(
        &mut self,
        time_stamps: &dyn ValueProvider,
        range: Range<usize>,
        lower: f64,
        upper: f64,
        matches: &mut MatchStore,
        values: &dyn ValueProvider,
    ) {
        let positions: Vec<u32> = range
            .filter(|&p| {
                let t = time_stamps.value(&matches.as_slice()[p]);
                t < lower || t > upper
            })
            .map(|p| p as u32)
            .collect();
        self.activate_range(&positions, matches, values);
    }

    pub fn activate_matches_with_null_values(&mut self, positions: &[u32], matches: &MatchStore) {
        for &pos in positions {
            let row = matches.as_slice()[pos as usize].ix_population as usize;
            self.current.null_count[row] += 1.0;
            self.mark_touched(row as u32);
        }
    }

    pub fn deactivate_matches_with_null_values(&mut self, positions: &[u32], matches: &MatchStore) {
        for &pos in positions {
            let row = matches.as_slice()[pos as usize].ix_population as usize;
            self.current.null_count[row] -= 1.0;
            self.mark_touched(row as u32);
        }
    }

    pub fn has_null_match(&self, row: usize) -> bool {
        self.current.null_count[row] > 0.0
    }

    /// Whether population row `row` currently has at least one activated
    /// match — the binary predicate the split enumerator partitions
    /// population rows on (`spec.md` §4.7).
    pub fn is_active(&self, row: usize) -> bool {
        self.current.active_matches[row] > 0
    }

    /// Rows touched since the last call that drained this set (the
    /// aggregator's `updates_current`), for the split enumerator to feed
    /// into the optimisation criterion after each sweep step.
    pub fn touched_rows(&self) -> impl Iterator<Item = u32> + '_ {
        self.updates_current.iter()
    }

    pub fn clear_touched_rows(&mut self) {
        self.updates_current.clear();
    }

    /// Marks `row` dirty in both update sets (`spec.md` §4.4, "Update
    /// bookkeeping").
    fn mark_touched(&mut self, row: u32) {
        self.updates_current.insert(row);
        self.updates_stored.insert(row);
    }

    pub fn activate(&mut self, pos: usize, matches: &mut MatchStore, values: &dyn ValueProvider) {
        let m = matches.as_slice()[pos];
        let row = m.ix_population as usize;
        let value = values.value(&m);
        self.mark_touched(row as u32);
        self.current.active_matches[row] += 1;

        use AggregationKind::*;
        match self.kind {
            Sum => self.current.sum[row] += value,
            Count => self.current.count[row] += 1.0,
            Avg | Var | Stddev | Skewness => {
                self.current.count[row] += 1.0;
                self.current.sum[row] += value;
                if self.needs.sum_sq {
                    self.current.sum_sq[row] += value * value;
                }
                if self.needs.sum_cubed {
                    self.current.sum_cubed[row] += value * value * value;
                }
            }
            Min => self.activate_extremum(pos, row, value, matches, values, true),
            Max => self.activate_extremum(pos, row, value, matches, values, false),
            First => self.activate_positional(pos, row, true),
            Last => self.activate_positional(pos, row, false),
            Median => self.activate_median(pos, row, value, matches, values),
            CountDistinct => {
                if !self.has_activated_equal_neighbor(pos, row, matches, values) {
                    self.current.sum[row] += 1.0;
                }
            }
            CountMinusCountDistinct => {
                if self.has_activated_equal_neighbor(pos, row, matches, values) {
                    self.current.sum[row] += 1.0;
                }
            }
        }
        matches.as_mut_slice()[pos].activated = true;
    }

    pub fn deactivate(&mut self, pos: usize, matches: &mut MatchStore, values: &dyn ValueProvider) {
        let m = matches.as_slice()[pos];
        let row = m.ix_population as usize;
        let value = values.value(&m);
        self.mark_touched(row as u32);
        self.current.active_matches[row] -= 1;

        use AggregationKind::*;
        match self.kind {
            Sum => self.current.sum[row] -= value,
            Count => self.current.count[row] -= 1.0,
            Avg | Var | Stddev | Skewness => {
                self.current.count[row] -= 1.0;
                self.current.sum[row] -= value;
                if self.needs.sum_sq {
                    self.current.sum_sq[row] -= value * value;
                }
                if self.needs.sum_cubed {
                    self.current.sum_cubed[row] -= value * value * value;
                }
            }
            Min => self.deactivate_extremum(pos, row, matches, values, true),
            Max => self.deactivate_extremum(pos, row, matches, values, false),
            First => self.deactivate_positional(pos, row, matches, true),
            Last => self.deactivate_positional(pos, row, matches, false),
            Median => self.deactivate_median(pos, row, matches, values),
            CountDistinct => {
                if !self.has_activated_equal_neighbor(pos, row, matches, values) {
                    self.current.sum[row] -= 1.0;
                }
            }
            CountMinusCountDistinct => {
                if self.has_activated_equal_neighbor(pos, row, matches, values) {
                    self.current.sum[row] -= 1.0;
                }
            }
        }
        matches.as_mut_slice()[pos].activated = false;
    }

    fn activate_extremum(
        &mut self,
        pos: usize,
        row: usize,
        value: f64,
        matches: &MatchStore,
        values: &dyn ValueProvider,
        is_min: bool,
    ) {
        let more_extreme = match self.current.match_ptr[row] {
            None => true,
            Some(mp) => {
                let current_value = values.value(&matches.as_slice()[mp as usize]);
                if is_min {
                    value < current_value
                } else {
                    value > current_value
                }
            }
        };
        if more_extreme {
            self.current.match_ptr[row] = Some(pos as u32);
        }
        self.current.count[row] += 1.0;
    }

    fn deactivate_extremum(
        &mut self,
        pos: usize,
        row: usize,
        matches: &MatchStore,
        values: &dyn ValueProvider,
        is_min: bool,
    ) {
        self.current.count[row] -= 1.0;
        if self.current.match_ptr[row] == Some(pos as u32) {
            if self.current.count[row] <= 0.0 {
                self.current.match_ptr[row] = None;
            } else {
                let range = self.row_ranges[row].clone();
                self.current.match_ptr[row] = if is_min {
                    find_next_greater(range, pos, matches)
                } else {
                    find_next_smaller(range, pos, matches)
                }
                .map(|i| i as u32);
            }
        }
    }

    fn activate_positional(&mut self, pos: usize, row: usize, is_first: bool) {
        let more_extreme = match self.current.match_ptr[row] {
            None => true,
            Some(mp) => {
                if is_first {
                    (pos as u32) < mp
                } else {
                    (pos as u32) > mp
                }
            }
        };
        if more_extreme {
            self.current.match_ptr[row] = Some(pos as u32);
        }
        self.current.count[row] += 1.0;
    }

    fn deactivate_positional(&mut self, pos: usize, row: usize, matches: &MatchStore, is_first: bool) {
        self.current.count[row] -= 1.0;
        if self.current.match_ptr[row] == Some(pos as u32) {
            if self.current.count[row] <= 0.0 {
                self.current.match_ptr[row] = None;
            } else {
                let range = self.row_ranges[row].clone();
                self.current.match_ptr[row] = if is_first {
                    find_next_greater(range, pos, matches)
                } else {
                    find_next_smaller(range, pos, matches)
                }
                .map(|i| i as u32);
            }
        }
    }

    /// Upper-median pointer maintenance: `match_ptr` always names the
    /// greater of the two central activated matches (the convention used by
    /// `original_source`'s median aggregation for even counts).
    fn activate_median(
        &mut self,
        pos: usize,
        row: usize,
        value: f64,
        matches: &MatchStore,
        values: &dyn ValueProvider,
    ) {
        self.current.count[row] += 1.0;
        let count = self.current.count[row] as i64;
        match self.current.match_ptr[row] {
            None => self.current.match_ptr[row] = Some(pos as u32),
            Some(mp) => {
                let mp_value = values.value(&matches.as_slice()[mp as usize]);
                let range = self.row_ranges[row].clone();
                if value <= mp_value {
                    if count % 2 == 1 {
                        self.current.match_ptr[row] =
                            find_next_smaller(range, mp as usize, matches).map(|i| i as u32);
                    }
                } else if count % 2 == 0 {
                    self.current.match_ptr[row] =
                        find_next_greater(range, mp as usize, matches).map(|i| i as u32);
                }
            }
        }
    }

    fn deactivate_median(&mut self, pos: usize, row: usize, matches: &MatchStore, values: &dyn ValueProvider) {
        let mp = self.current.match_ptr[row].expect("median deactivate without an active pointer");
        let range = self.row_ranges[row].clone();
        self.current.count[row] -= 1.0;
        let new_count = self.current.count[row] as i64;

        if pos as u32 == mp {
            self.current.match_ptr[row] = if new_count <= 0 {
                None
            } else if new_count % 2 == 0 {
                find_next_greater(range, mp as usize, matches).map(|i| i as u32)
            } else {
                find_next_smaller(range, mp as usize, matches).map(|i| i as u32)
            };
        } else {
            let pos_value = values.value(&matches.as_slice()[pos]);
            let mp_value = values.value(&matches.as_slice()[mp as usize]);
            if pos_value <= mp_value && new_count % 2 == 0 {
                self.current.match_ptr[row] =
                    find_next_greater(range, mp as usize, matches).map(|i| i as u32);
            } else if pos_value > mp_value && new_count % 2 == 1 {
                self.current.match_ptr[row] =
                    find_next_smaller(range, mp as usize, matches).map(|i| i as u32);
            }
        }
    }

    /// Whether another currently activated match in `row`'s sorted range
    /// carries the same value as the match at `pos` (`spec.md` §4.4,
    /// COUNT DISTINCT / COUNT MINUS COUNT DISTINCT).
    fn has_activated_equal_neighbor(
        &self,
        pos: usize,
        row: usize,
        matches: &MatchStore,
        values: &dyn ValueProvider,
    ) -> bool {
        let range = self.row_ranges[row].clone();
        let slice = matches.as_slice();
        let value = values.value(&slice[pos]);
        let mut i = pos;
        while i > range.start {
            i -= 1;
            if values.value(&slice[i]) != value {
                break;
            }
            if slice[i].activated {
                return true;
            }
        }
        let mut j = pos + 1;
        while j < range.end {
            if values.value(&slice[j]) != value {
                break;
            }
            if slice[j].activated {
                return true;
            }
            j += 1;
        }
        false
    }

    /// The aggregated value for a population row under the current
    /// (uncommitted) state.
    pub fn yhat(&self, row: usize, matches: &MatchStore, values: &dyn ValueProvider) -> f64 {
        use AggregationKind::*;
        match self.kind {
            Sum | CountDistinct | CountMinusCountDistinct => self.current.sum[row],
            Count => self.current.count[row],
            Avg => {
                if self.current.count[row] > 0.0 {
                    self.current.sum[row] / self.current.count[row]
                } else {
                    0.0
                }
            }
            Var => self.variance(row),
            Stddev => self.variance(row).sqrt(),
            Skewness => self.skewness(row),
            Min | Max | First | Last | Median => match self.current.match_ptr[row] {
                Some(mp) => values.value(&matches.as_slice()[mp as usize]),
                None => 0.0,
            },
        }
    }

    fn variance(&self, row: usize) -> f64 {
        let n = self.current.count[row];
        if n <= 1.0 {
            return 0.0;
        }
        let mean = self.current.sum[row] / n;
        coerce_variance(self.current.sum_sq[row] / n - mean * mean)
    }

    fn skewness(&self, row: usize) -> f64 {
        let n = self.current.count[row];
        if n <= 1.0 {
            return 0.0;
        }
        let mean = self.current.sum[row] / n;
        let var = coerce_variance(self.current.sum_sq[row] / n - mean * mean);
        if var <= 0.0 {
            return 0.0;
        }
        let std = var.sqrt();
        let third_moment = self.current.sum_cubed[row] / n
            - 3.0 * mean * self.current.sum_sq[row] / n
            + 2.0 * mean * mean * mean;
        third_moment / (std * std * std)
    }

    /// Promotes touched rows from `current` into `committed` and clears
    /// `updates_stored` (`spec.md` §4.4 "commit").
    pub fn commit(&mut self) {
        for row in self.updates_stored.iter() {
            self.committed.copy_row_from(&self.current, row as usize);
        }
        self.updates_stored.clear();
    }

    /// Resets touched rows in `current` back to the last commit and clears
    /// `updates_stored` (`spec.md` §4.4 "revert_to_commit").
    pub fn revert_to_commit(&mut self) {
        for row in self.updates_stored.iter() {
            self.current.copy_row_from(&self.committed, row as usize);
        }
        self.updates_stored.clear();
    }

    /// Clears all accumulated state, for reuse across tree nodes.
    pub fn reset(&mut self) {
        let n = self.current.count.len();
        self.current = RowStats::new(n);
        self.committed = RowStats::new(n);
        self.updates_current.clear();
        self.updates_stored.clear();
        self.row_ranges.clear();
    }
}

/// Clamps a variance-like quantity to `0.0` when floating-point cancellation
/// drives it slightly negative or to `NaN` (`SPEC_FULL.md` §4.4.A). The only
/// place this rule is enforced; VAR/STDDEV/SKEWNESS all route through it.
fn coerce_variance(v: f64) -> f64 {
    v.max(0.0)
}

fn find_next_greater(range: Range<usize>, from: usize, matches: &MatchStore) -> Option<usize> {
    let slice = matches.as_slice();
    ((from + 1)..range.end).find(|&i| slice[i].activated)
}

fn find_next_smaller(range: Range<usize>, from: usize, matches: &MatchStore) -> Option<usize> {
    let slice = matches.as_slice();
    (range.start..from).rev().find(|&i| slice[i].activated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::Match;
    use crate::value_provider::PeripheralNumerical;

    fn build_matches(values: &[f64]) -> (MatchStore, Vec<f64>) {
        let matches: Vec<Match> = (0..values.len())
            .map(|i| Match::new(i as u32, 0))
            .collect();
        (MatchStore::new(matches), values.to_vec())
    }

    #[test]
    fn sum_accumulates_activated_values() {
        let (mut store, values) = build_matches(&[1.0, 2.0, 3.0]);
        let provider = PeripheralNumerical { column: &values };
        let mut agg = Aggregator::new(AggregationKind::Sum, 1);
        agg.prepare(&mut store, 0..3, &provider);
        agg.activate(0, &mut store, &provider);
        agg.activate(1, &mut store, &provider);
        assert_eq!(agg.yhat(0, &store, &provider), 3.0);
        agg.deactivate(0, &mut store, &provider);
        assert_eq!(agg.yhat(0, &store, &provider), 2.0);
    }

    #[test]
    fn avg_tracks_running_mean() {
        let (mut store, values) = build_matches(&[2.0, 4.0, 6.0]);
        let provider = PeripheralNumerical { column: &values };
        let mut agg = Aggregator::new(AggregationKind::Avg, 1);
        agg.prepare(&mut store, 0..3, &provider);
        agg.activate_all(&mut store, 0..3, &provider);
        assert_eq!(agg.yhat(0, &store, &provider), 4.0);
    }

    #[test]
    fn min_and_max_track_extrema_across_activation_changes() {
        let (store, values) = build_matches(&[5.0, 1.0, 3.0]);
        let provider = PeripheralNumerical { column: &values };

        let mut min_store = store.clone();
        let mut min_agg = Aggregator::new(AggregationKind::Min, 1);
        min_agg.prepare(&mut min_store, 0..3, &provider);
        min_agg.activate_all(&mut min_store, 0..3, &provider);
        assert_eq!(min_agg.yhat(0, &min_store, &provider), 1.0);

        let mut max_store = store;
        let mut max_agg = Aggregator::new(AggregationKind::Max, 1);
        max_agg.prepare(&mut max_store, 0..3, &provider);
        max_agg.activate_all(&mut max_store, 0..3, &provider);
        assert_eq!(max_agg.yhat(0, &max_store, &provider), 5.0);
    }

    #[test]
    fn commit_then_revert_restores_committed_state() {
        let (mut store, values) = build_matches(&[1.0, 2.0]);
        let provider = PeripheralNumerical { column: &values };
        let mut agg = Aggregator::new(AggregationKind::Sum, 1);
        agg.prepare(&mut store, 0..2, &provider);
        agg.activate(0, &mut store, &provider);
        agg.commit();
        agg.activate(1, &mut store, &provider);
        assert_eq!(agg.yhat(0, &store, &provider), 3.0);
        agg.revert_to_commit();
        assert_eq!(agg.yhat(0, &store, &provider), 1.0);
    }

    #[test]
    fn count_distinct_ignores_duplicate_activated_values() {
        let (mut store, values) = build_matches(&[1.0, 1.0, 2.0]);
        let provider = PeripheralNumerical { column: &values };
        let mut agg = Aggregator::new(AggregationKind::CountDistinct, 1);
        agg.prepare(&mut store, 0..3, &provider);
        agg.activate_all(&mut store, 0..3, &provider);
        assert_eq!(agg.yhat(0, &store, &provider), 2.0);
    }

    /// `SPEC_FULL.md` §9 Open Question: deactivating the stored median
    /// pointer when the two central matches sit at the very ends of a
    /// 4-match sub-range (every neighbour the scan could step to is itself
    /// a boundary match).
    #[test]
    fn median_even_boundary_swap() {
        let (mut store, values) = build_matches(&[1.0, 2.0, 3.0, 4.0]);
        let provider = PeripheralNumerical { column: &values };
        let mut agg = Aggregator::new(AggregationKind::Median, 1);
        agg.prepare(&mut store, 0..4, &provider);
        agg.activate_all(&mut store, 0..4, &provider);
        // Even count: convention stores the greater of the two central
        // matches, i.e. value 3.0 out of [1,2,3,4].
        assert_eq!(agg.yhat(0, &store, &provider), 3.0);

        // Deactivate the stored median pointer itself (value 3.0): the scan
        // must step to the next smaller active neighbour (value 2.0), not
        // cross the sub-range boundary.
        let pos = store
            .as_slice()
            .iter()
            .position(|m| provider.value(m) == 3.0)
            .unwrap();
        agg.deactivate(pos, &mut store, &provider);
        assert_eq!(agg.yhat(0, &store, &provider), 2.0);

        // Deactivating the other boundary match (value 1.0, the first
        // element of the sub-range) leaves an even-count active set {2, 4};
        // the convention's "greater of the two central" picks 4.0.
        let pos = store
            .as_slice()
            .iter()
            .position(|m| provider.value(m) == 1.0)
            .unwrap();
        agg.deactivate(pos, &mut store, &provider);
        assert_eq!(agg.yhat(0, &store, &provider), 4.0);
    }
}

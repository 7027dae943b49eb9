//! C5 — the optimisation criterion. Tracks the target-variable loss
//! reduction of a candidate split as population rows cross the candidate
//! threshold one at a time, and remembers every candidate value tried during
//! a sweep so the best one can be picked afterward. `spec.md` §4.5/§4.6.
//!
//! The reduction formula is the standard sum-of-squares variance reduction
//! used by CART-style regression trees (the teacher's
//! `ml::algorithms::trees::DecisionTree::find_best_split` computes the same
//! quantity from scratch per threshold; here it is maintained incrementally
//! instead, since the split enumerator sweeps thresholds in sorted order).

#[derive(Debug, Clone, Default)]
pub struct Criterion {
    sum_total: f64,
    n_total: usize,
    sum_left: f64,
    n_left: usize,
    storage: Vec<f64>,
    committed_len: usize,
}

impl Criterion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the running parent statistics for a fresh node fit
    /// (`spec.md` §4.5 "init_yhat"). `targets` is the set of target values
    /// for every population row the node is fitting over.
    pub fn init_yhat(&mut self, targets: &[f64]) {
        self.sum_total = targets.iter().sum();
        self.n_total = targets.len();
        self.reset_sweep();
        self.storage.clear();
        self.committed_len = 0;
    }

    /// Clears the left/right partition counters at the start of a new
    /// candidate column's threshold sweep, without touching `storage` (the
    /// history of prior columns' best values within this node is kept).
    pub fn reset_sweep(&mut self) {
        self.sum_left = 0.0;
        self.n_left = 0;
    }

    /// Moves one population row's target value across the threshold
    /// (`spec.md` §4.5 "update_samples"). Returns the resulting reduction.
    /// Each call must correspond to a genuine crossing of a single row —
    /// the caller (`split::SplitEnumerator::flush_touched`) is responsible
    /// for collapsing a row's several matches into at most one crossing per
    /// direction, which is what keeps `n_left` bounded by `n_total` below.
    pub fn update_samples(&mut self, target: f64, moving_to_left: bool) -> f64 {
        if moving_to_left {
            self.sum_left += target;
            self.n_left += 1;
        } else {
            self.sum_left -= target;
            self.n_left -= 1;
        }
        debug_assert!(self.n_left <= self.n_total, "n_left exceeded n_total: a row crossed more than once");
        self.current_reduction()
    }

    /// Sum-of-squares variance reduction of the current left/right split
    /// relative to the parent node, independent of the parent's own
    /// sum-of-squares term (which cancels across candidates).
    pub fn current_reduction(&self) -> f64 {
        // Safe: `n_left` never exceeds `n_total` (see `update_samples`), so
        // this cannot underflow.
        let n_right = self.n_total - self.n_left;
        let sum_right = self.sum_total - self.sum_left;
        let left_term = if self.n_left > 0 {
            self.sum_left * self.sum_left / self.n_left as f64
        } else {
            0.0
        };
        let right_term = if n_right > 0 {
            sum_right * sum_right / n_right as f64
        } else {
            0.0
        };
        let parent_term = if self.n_total > 0 {
            self.sum_total * self.sum_total / self.n_total as f64
        } else {
            0.0
        };
        left_term + right_term - parent_term
    }

    /// Reserves room for `additional` more candidate values before a sweep
    /// begins (`spec.md` §4.5 "extend_storage_size").
    pub fn extend_storage_size(&mut self, additional: usize) {
        self.storage.reserve(additional);
    }

    /// Records the current reduction value as a candidate
    /// (`spec.md` §4.5 "store_current_stage"). Returns its storage index.
    pub fn store_current_stage(&mut self) -> usize {
        self.storage.push(self.current_reduction());
        self.storage.len() - 1
    }

    pub fn values_stored(&self) -> &[f64] {
        &self.storage
    }

    /// The best candidate recorded so far this node, ties broken toward the
    /// lowest storage index (`spec.md` §4.6 "tie-breaking").
    pub fn find_maximum(&self) -> Option<(usize, f64)> {
        self.storage
            .iter()
            .enumerate()
            .fold(None, |best, (i, &v)| match best {
                Some((_, bv)) if bv >= v => best,
                _ => Some((i, v)),
            })
    }

    /// Accepts every candidate recorded so far as a safe rollback point.
    pub fn commit(&mut self) {
        self.committed_len = self.storage.len();
    }

    /// Discards candidates recorded since the last commit.
    pub fn revert_to_commit(&mut self) {
        self.storage.truncate(self.committed_len);
    }

    /// Indices that would sort `values` ascending, ties broken by original
    /// index (`spec.md` §4.6 "argsort" — used to rank categories before
    /// forming prefix-of-ranking set splits).
    pub fn argsort(values: &[f64]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| {
            values[a]
                .partial_cmp(&values[b])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_is_zero_with_no_split() {
        let mut c = Criterion::new();
        c.init_yhat(&[1.0, 2.0, 3.0, 4.0]);
        assert!((c.current_reduction() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn reduction_grows_as_rows_move_left() {
        let mut c = Criterion::new();
        c.init_yhat(&[0.0, 0.0, 10.0, 10.0]);
        c.update_samples(0.0, true);
        c.update_samples(0.0, true);
        let r = c.current_reduction();
        assert!(r > 0.0);
    }

    #[test]
    fn find_maximum_breaks_ties_toward_lowest_index() {
        let mut c = Criterion::new();
        c.init_yhat(&[1.0, 2.0]);
        c.store_current_stage();
        c.update_samples(1.0, true);
        c.store_current_stage();
        c.update_samples(1.0, false);
        c.store_current_stage();
        // storage = [0.0, 0.5, 0.0]: the middle candidate strictly improves
        // on the others, so it wins even though two entries tie at 0.0.
        let (idx, value) = c.find_maximum().unwrap();
        assert_eq!(idx, 1);
        assert!(value > 0.0);
    }

    #[test]
    fn revert_to_commit_drops_uncommitted_candidates() {
        let mut c = Criterion::new();
        c.init_yhat(&[1.0, 2.0, 3.0]);
        c.store_current_stage();
        c.commit();
        c.store_current_stage();
        c.store_current_stage();
        assert_eq!(c.values_stored().len(), 3);
        c.revert_to_commit();
        assert_eq!(c.values_stored().len(), 1);
    }

    #[test]
    fn argsort_orders_ascending() {
        let values = vec![3.0, 1.0, 2.0];
        assert_eq!(Criterion::argsort(&values), vec![1, 2, 0]);
    }
}

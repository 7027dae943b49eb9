//! C1 — the match store. Owns the (peripheral row, population row) pairs
//! being aggregated; exposes the partitioning and sorting primitives the
//! aggregator and split enumerator drive. `spec.md` §3/§4.1.

/// A single (peripheral row, population row) pair.
///
/// Row indices are `u32` (see `SPEC_FULL.md` §9, Open Question resolution):
/// this engine operates on in-memory single-tree fits, where row counts
/// above 2^32 are out of its design envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub ix_peripheral: u32,
    pub ix_population: u32,
    pub activated: bool,
}

impl Match {
    pub fn new(ix_peripheral: u32, ix_population: u32) -> Self {
        Self {
            ix_peripheral,
            ix_population,
            activated: false,
        }
    }
}

/// Owns the contiguous sequence of matches for one tree's fit. The store
/// reorders this sequence (partition, sort) but never resizes it — matches
/// are produced externally by the matchmaker and handed in once.
#[derive(Debug, Clone, Default)]
pub struct MatchStore {
    matches: Vec<Match>,
}

impl MatchStore {
    pub fn new(matches: Vec<Match>) -> Self {
        Self { matches }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn as_slice(&self) -> &[Match] {
        &self.matches
    }

    pub fn as_mut_slice(&mut self) -> &mut [Match] {
        &mut self.matches
    }

    /// Stable partition putting matches for which `is_null` returns true at
    /// the front; returns the index of the first non-null match (the
    /// separator). Null-valued matches are never re-activated (`spec.md`
    /// §3, invariant on NaN/inf values).
    pub fn partition_null_front(
        &mut self,
        range: std::ops::Range<usize>,
        mut is_null: impl FnMut(&Match) -> bool,
    ) -> usize {
        let slice = &mut self.matches[range.clone()];
        let mut write = 0usize;
        // Stable partition via a scratch buffer: cheap relative to the
        // aggregation work done per candidate split, and keeps within-
        // partition relative order, which downstream sorting depends on
        // only loosely (sort_subrange re-sorts by value/time stamp anyway)
        // but which keeps the partition itself deterministic.
        let mut nulls = Vec::new();
        let mut non_nulls = Vec::new();
        for m in slice.iter() {
            if is_null(m) {
                nulls.push(*m);
            } else {
                non_nulls.push(*m);
            }
        }
        for m in nulls.iter().chain(non_nulls.iter()) {
            slice[write] = *m;
            write += 1;
        }
        range.start + nulls.len()
    }

    /// Sorts `range` by the given comparator. Stability is not required
    /// (`spec.md` §4.1).
    pub fn sort_subrange(
        &mut self,
        range: std::ops::Range<usize>,
        mut cmp: impl FnMut(&Match, &Match) -> std::cmp::Ordering,
    ) {
        self.matches[range].sort_unstable_by(|a, b| cmp(a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(p: u32, pop: u32) -> Match {
        Match::new(p, pop)
    }

    #[test]
    fn partition_null_front_moves_nulls_first() {
        let mut store = MatchStore::new(vec![m(0, 0), m(1, 0), m(2, 0), m(3, 0)]);
        let is_null = |x: &Match| x.ix_peripheral == 1 || x.ix_peripheral == 3;
        let sep = store.partition_null_front(0..4, is_null);
        assert_eq!(sep, 2);
        let nulls: Vec<_> = store.as_slice()[..sep].iter().map(|m| m.ix_peripheral).collect();
        let mut nulls_sorted = nulls.clone();
        nulls_sorted.sort();
        assert_eq!(nulls_sorted, vec![1, 3]);
    }

    #[test]
    fn sort_subrange_orders_by_key() {
        let mut store = MatchStore::new(vec![m(3, 0), m(1, 0), m(2, 0)]);
        store.sort_subrange(0..3, |a, b| a.ix_peripheral.cmp(&b.ix_peripheral));
        let order: Vec<_> = store.as_slice().iter().map(|m| m.ix_peripheral).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}

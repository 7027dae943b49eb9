//! C9 — cross-rank reduction. A tree is fit single-threaded, but many trees
//! fit in parallel (across cores locally, across ranks in a distributed
//! deployment); `spec.md` §5.A requires every rank to agree on the same
//! accepted split, so the only values that cross the reduction boundary are
//! sums/counts and the single best-candidate index, never raw match data.
//!
//! Grounded in the teacher's `cluster::gossip` quorum-reduction helpers
//! (`src/cluster/gossip.rs`), which fold per-node observations into one
//! cluster-wide value through a trait object rather than hard-coding MPI/gRPC
//! calls; here the same seam lets a single-process build stay a no-op.

/// Abstracts an all-reduce across whatever distribution mechanism the
/// surrounding deployment uses. The default `LocalReducer` is the identity:
/// it is what a single-process fit uses, and what tests exercise.
pub trait Reducer: Send + Sync {
    /// Sums a `usize` local value across every participating rank.
    fn sum_usize(&self, local: usize) -> usize;

    /// Sums an `f64` local value across every participating rank.
    fn sum_f64(&self, local: f64) -> f64;

    /// Picks the best (index, value) pair across every rank's locally
    /// recorded candidate values, ties broken toward the lowest global
    /// index so every rank independently computes the same winner
    /// (`spec.md` §4.6's tie-break rule, extended across ranks).
    fn best_candidate(&self, local_values: &[f64]) -> Option<(usize, f64)> {
        local_values
            .iter()
            .enumerate()
            .fold(None, |best, (i, &v)| match best {
                Some((_, bv)) if bv >= v => best,
                _ => Some((i, v)),
            })
    }
}

/// No-op reducer for a single-process fit: every "cross-rank" sum is simply
/// the local value.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalReducer;

impl Reducer for LocalReducer {
    fn sum_usize(&self, local: usize) -> usize {
        local
    }

    fn sum_f64(&self, local: f64) -> f64 {
        local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_reducer_is_the_identity() {
        let r = LocalReducer;
        assert_eq!(r.sum_usize(42), 42);
        assert!((r.sum_f64(3.5) - 3.5).abs() < 1e-12);
    }

    #[test]
    fn best_candidate_breaks_ties_toward_lowest_index() {
        let r = LocalReducer;
        let values = [0.2, 0.8, 0.8, 0.1];
        let (idx, value) = r.best_candidate(&values).unwrap();
        assert_eq!(idx, 1);
        assert!((value - 0.8).abs() < 1e-12);
    }

    #[test]
    fn best_candidate_on_empty_slice_is_none() {
        let r = LocalReducer;
        assert!(r.best_candidate(&[]).is_none());
    }
}

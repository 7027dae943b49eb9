//! C3 — category and word indices. Map a categorical code (or text token)
//! to the contiguous range of match indices carrying it, so the split
//! enumerator and `activate_matches_containing_categories` can jump straight
//! to the relevant matches instead of scanning everything. `spec.md` §4.3.
//!
//! Grounded in the teacher's catalog/index layer's bucket-by-key approach
//! (`src/index/` built a key → row-id list per indexed column); here the
//! "rows" are match positions and the key is a categorical code or token id.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Interns category strings into stable `i32` codes, shared read-only across
/// every tree fit once construction finishes (`SPEC_FULL.md` §5 "Shared
/// state"). Grounded in the teacher's `parking_lot`-guarded catalog/buffer
/// pool handles: a writer takes the lock while new categories are still
/// being discovered (typically once, while ingesting a table), and every
/// subsequent tree fit only ever takes a reader lock to resolve a code back
/// to its string, never blocking concurrent fits against each other.
#[derive(Default)]
pub struct CategoryEncoder {
    inner: RwLock<CategoryEncoderInner>,
}

#[derive(Default)]
struct CategoryEncoderInner {
    codes: HashMap<String, i32>,
    strings: Vec<String>,
}

impl CategoryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `value`'s code, assigning the next unused code the first time
    /// a given string is seen. Takes a writer lock only on that first sight.
    pub fn intern(&self, value: &str) -> i32 {
        if let Some(&code) = self.inner.read().codes.get(value) {
            return code;
        }
        let mut inner = self.inner.write();
        if let Some(&code) = inner.codes.get(value) {
            return code;
        }
        let code = inner.strings.len() as i32;
        inner.strings.push(value.to_string());
        inner.codes.insert(value.to_string(), code);
        code
    }

    /// Resolves a previously interned code back to its string, for
    /// presenting a fitted split's `categories_used_` back to a caller.
    pub fn decode(&self, code: i32) -> Option<String> {
        self.inner.read().strings.get(code as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maps a discrete code to the contiguous `[begin, end)` range within a
/// sorted-by-code slice of match positions that carries it.
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
    /// Match positions, grouped by code (not necessarily in the order the
    /// match store holds them — this is a secondary index, not a rewrite of
    /// the underlying store).
    order: Vec<u32>,
    ranges: HashMap<i32, std::ops::Range<usize>>,
}

impl CategoryIndex {
    /// Builds an index over `codes`, where `codes[i]` is the categorical
    /// code belonging to match position `i` (only positions in `eligible`
    /// are indexed — typically the non-null sub-range of the match store).
    pub fn build(codes: &[i32], eligible: impl Iterator<Item = usize>) -> Self {
        let mut buckets: HashMap<i32, Vec<u32>> = HashMap::new();
        for i in eligible {
            buckets.entry(codes[i]).or_default().push(i as u32);
        }
        let mut order = Vec::with_capacity(buckets.values().map(Vec::len).sum());
        let mut ranges = HashMap::with_capacity(buckets.len());
        // Deterministic bucket ordering: ascending code, so index construction
        // doesn't depend on hash iteration order (`spec.md` §5, determinism).
        let mut codes_sorted: Vec<_> = buckets.keys().copied().collect();
        codes_sorted.sort_unstable();
        for code in codes_sorted {
            let positions = buckets.remove(&code).unwrap();
            let begin = order.len();
            order.extend(positions);
            ranges.insert(code, begin..order.len());
        }
        Self { order, ranges }
    }

    /// Match positions carrying `code`, or an empty slice if unseen.
    pub fn positions(&self, code: i32) -> &[u32] {
        match self.ranges.get(&code) {
            Some(range) => &self.order[range.clone()],
            None => &[],
        }
    }

    /// Every indexed match position, for "activate all" style sweeps where
    /// a category membership test still needs to run per-match.
    pub fn all_positions(&self) -> &[u32] {
        &self.order
    }

    pub fn categories(&self) -> impl Iterator<Item = i32> + '_ {
        self.ranges.keys().copied()
    }

    pub fn num_categories(&self) -> usize {
        self.ranges.len()
    }
}

/// Same idea as `CategoryIndex` but for a bag of tokens per match (text
/// columns): a token maps to every match position whose token bag contains
/// it, duplicates within a bag collapsed.
#[derive(Debug, Clone, Default)]
pub struct WordIndex {
    postings: HashMap<u32, Vec<u32>>,
}

impl WordIndex {
    pub fn build(bags: &[Vec<u32>], eligible: impl Iterator<Item = usize>) -> Self {
        let mut postings: HashMap<u32, Vec<u32>> = HashMap::new();
        for i in eligible {
            for &token in &bags[i] {
                let list = postings.entry(token).or_default();
                if list.last() != Some(&(i as u32)) {
                    list.push(i as u32);
                }
            }
        }
        Self { postings }
    }

    pub fn positions(&self, token: u32) -> &[u32] {
        self.postings.get(&token).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tokens(&self) -> impl Iterator<Item = u32> + '_ {
        self.postings.keys().copied()
    }
}

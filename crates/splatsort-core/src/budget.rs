//! Adaptive bin budget policy

/// Maps element count to a histogram bin budget.
///
/// Small scenes get fewer bins: the fixed per-bin cost (reset, scan,
/// cursor copy) dominates there, and blending artifacts from coarser
/// depth quantization are invisible at low splat counts. The steps are
/// empirically tuned defaults, not invariants; callers can swap in their
/// own table.
#[derive(Clone, Debug)]
pub struct BinBudgetPolicy {
    /// `(upper_element_count, bins)` pairs, ascending by count.
    /// The first step whose bound covers the element count (inclusive) wins.
    steps: Vec<(usize, usize)>,
    /// Budget for counts beyond the last step
    max_bins: usize,
}

impl Default for BinBudgetPolicy {
    fn default() -> Self {
        Self {
            steps: vec![(10_000, 4_096), (100_000, 8_192), (1_000_000, 16_384)],
            max_bins: 65_536,
        }
    }
}

impl BinBudgetPolicy {
    /// Build a custom policy. Steps must be ascending in both element
    /// count and bin budget so the policy stays monotonic.
    pub fn new(steps: Vec<(usize, usize)>, max_bins: usize) -> Self {
        debug_assert!(steps.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 <= w[1].1));
        debug_assert!(steps.last().map_or(true, |&(_, bins)| bins <= max_bins));
        Self { steps, max_bins }
    }

    /// Bin budget for a scene of `element_count` elements.
    pub fn bins_for(&self, element_count: usize) -> usize {
        for &(limit, bins) in &self.steps {
            if element_count <= limit {
                return bins;
            }
        }
        self.max_bins
    }
}

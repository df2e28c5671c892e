//! Scheduler configuration and tunables

use splatsort_core::{BinBudgetPolicy, DepthMetric, SortOrder};
use std::time::Duration;

/// Which sort algorithm backs a job.
///
/// Both strategies satisfy the same contract (a depth-ordered
/// permutation); they differ in tie semantics (bin-quantized vs exact)
/// and cost profile, so callers must not expect identical output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortStrategy {
    /// Counting sort above `comparison_threshold`, exact comparison sort
    /// below it
    Auto,
    /// Always the O(n + bins) counting sort
    Counting,
    /// Always the exact O(n log n) comparison sort
    Comparison,
}

/// How depth bounds are obtained for a job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundsMode {
    /// Full scan over per-element depth keys
    Exact,
    /// Conservative bounds from the store's cached bounding box; falls
    /// back to the exact scan when the store has none
    CachedAabb,
}

/// Looser thresholds substituted while the user is actively moving the
/// camera, trading sort freshness for fewer mid-gesture stutters.
#[derive(Clone, Copy, Debug)]
pub struct InteractionTuning {
    pub position_epsilon: f32,
    pub direction_epsilon: f32,
    pub min_sort_interval: Duration,
}

impl Default for InteractionTuning {
    fn default() -> Self {
        Self {
            position_epsilon: 0.05,
            direction_epsilon: 5e-3,
            min_sort_interval: Duration::from_millis(125),
        }
    }
}

/// Scheduler tunables. All defaults are empirically tuned starting
/// points, not invariants.
#[derive(Clone, Debug)]
pub struct SortConfig {
    /// Depth key derivation mode
    pub metric: DepthMetric,
    /// Consumption order of the published buffer
    pub order: SortOrder,
    pub strategy: SortStrategy,
    /// Element count below which `SortStrategy::Auto` picks the exact
    /// comparison sort
    pub comparison_threshold: usize,
    /// Enable camera-relative weighted bin allocation
    pub weighted_bins: bool,
    pub bounds_mode: BoundsMode,
    pub budget_policy: BinBudgetPolicy,

    /// Camera translation (world units) that justifies a re-sort
    pub position_epsilon: f32,
    /// Forward-direction change (1 - dot) that justifies a re-sort
    pub direction_epsilon: f32,
    /// Minimum spacing between sorts absent a data change
    pub min_sort_interval: Duration,
    /// Thresholds substituted while interacting
    pub interaction: InteractionTuning,
    /// Delay after `end_interaction` before the final full-quality sort,
    /// letting the last interactive frame settle first
    pub interaction_grace: Duration,

    /// Hard bound on overlapping sort jobs; requests beyond it are
    /// dropped, not queued
    pub max_concurrent_jobs: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            metric: DepthMetric::Distance,
            order: SortOrder::FarthestFirst,
            strategy: SortStrategy::Auto,
            comparison_threshold: 1_024,
            weighted_bins: false,
            bounds_mode: BoundsMode::Exact,
            budget_policy: BinBudgetPolicy::default(),
            position_epsilon: 0.01,
            direction_epsilon: 1e-3,
            min_sort_interval: Duration::from_millis(30),
            interaction: InteractionTuning::default(),
            interaction_grace: Duration::from_millis(200),
            max_concurrent_jobs: 2,
        }
    }
}

impl SortConfig {
    pub fn with_metric(mut self, metric: DepthMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_weighted_bins(mut self, enabled: bool) -> Self {
        self.weighted_bins = enabled;
        self
    }

    pub fn with_strategy(mut self, strategy: SortStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

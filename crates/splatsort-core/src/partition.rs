//! Camera-relative weighted bin partition
//!
//! Splits the depth range into 32 coarse tiers and hands each tier a share
//! of the histogram bin budget weighted by how close it sits to the tier
//! containing the camera's own depth. Depth resolution concentrates where
//! blending errors are most visible.

use crate::depth::DepthBounds;

/// Number of coarse depth tiers
pub const NUM_TIERS: usize = 32;

/// Tier weight by distance (in tiers) from the camera tier.
/// Empirically tuned defaults.
fn tier_weight(distance: usize) -> u32 {
    match distance {
        0 => 40,
        1..=2 => 20,
        3..=5 => 8,
        6..=10 => 3,
        _ => 1,
    }
}

/// A computed partition of the bin budget across depth tiers.
///
/// `base[t]` is the first bin index of tier `t`, `width[t]` its bin count;
/// `base[NUM_TIERS]` equals the full bin budget. Widths always sum to the
/// budget exactly and never drop below 1.
#[derive(Clone, Debug)]
pub struct BinPartition {
    base: [u32; NUM_TIERS + 1],
    width: [u32; NUM_TIERS],
    camera_tier: usize,
    bin_budget: usize,
}

impl BinPartition {
    /// Tier index containing `camera_depth` within `bounds`.
    pub fn camera_tier_for(bounds: &DepthBounds, camera_depth: f32) -> usize {
        let t = (camera_depth - bounds.min) / bounds.span() * NUM_TIERS as f32;
        (t.floor() as isize).clamp(0, NUM_TIERS as isize - 1) as usize
    }

    /// Compute the partition for the given bounds and camera depth.
    ///
    /// `bin_budget` must be at least `NUM_TIERS` so every tier can keep a
    /// width of 1; smaller budgets are clamped up.
    pub fn compute(bounds: &DepthBounds, camera_depth: f32, bin_budget: usize) -> Self {
        let bin_budget = bin_budget.max(NUM_TIERS);
        let camera_tier = Self::camera_tier_for(bounds, camera_depth);

        let mut weights = [0u32; NUM_TIERS];
        let mut total = 0u64;
        for (tier, w) in weights.iter_mut().enumerate() {
            *w = tier_weight(tier.abs_diff(camera_tier));
            total += *w as u64;
        }

        let mut width = [0u32; NUM_TIERS];
        let mut assigned = 0u64;
        for tier in 0..NUM_TIERS {
            let share = weights[tier] as f64 / total as f64 * bin_budget as f64;
            width[tier] = (share.round() as u32).max(1);
            assigned += width[tier] as u64;
        }

        // Absorb rounding error in the last tier, keeping every width >= 1.
        // If the last tier alone cannot absorb a deficit, walk backwards.
        let budget = bin_budget as i64;
        let mut excess = assigned as i64 - budget;
        for tier in (0..NUM_TIERS).rev() {
            if excess == 0 {
                break;
            }
            if excess > 0 {
                let take = excess.min(width[tier] as i64 - 1);
                width[tier] -= take as u32;
                excess -= take;
            } else {
                width[tier] += (-excess) as u32;
                excess = 0;
            }
        }
        debug_assert_eq!(excess, 0);

        let mut base = [0u32; NUM_TIERS + 1];
        for tier in 0..NUM_TIERS {
            base[tier + 1] = base[tier] + width[tier];
        }
        debug_assert_eq!(base[NUM_TIERS] as usize, bin_budget);

        Self {
            base,
            width,
            camera_tier,
            bin_budget,
        }
    }

    /// Map a depth key to a bin index under this partition.
    ///
    /// Locates the coarse tier, then scales proportionally within the
    /// tier's sub-range. Always lands inside `[0, bin_budget)`.
    #[inline]
    pub fn bin_of(&self, key: f32, bounds: &DepthBounds) -> usize {
        let span = bounds.span();
        let norm = (key - bounds.min) / span * NUM_TIERS as f32;
        let tier = (norm.floor() as isize).clamp(0, NUM_TIERS as isize - 1) as usize;

        let frac = (norm - tier as f32).clamp(0.0, 1.0);
        let w = self.width[tier];
        let local = ((frac * w as f32) as u32).min(w - 1);
        (self.base[tier] + local) as usize
    }

    pub fn camera_tier(&self) -> usize {
        self.camera_tier
    }

    pub fn bin_budget(&self) -> usize {
        self.bin_budget
    }

    /// First bin index of each tier (length `NUM_TIERS + 1`; the final
    /// entry equals the bin budget)
    pub fn bases(&self) -> &[u32; NUM_TIERS + 1] {
        &self.base
    }

    /// Bin count of each tier
    pub fn widths(&self) -> &[u32; NUM_TIERS] {
        &self.width
    }
}

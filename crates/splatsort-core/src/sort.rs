//! Counting-sort engine producing depth-ordered index permutations
//!
//! Five staged passes (reset, histogram + bin caching, prefix sum, cursor
//! materialization, scatter), each a full parallel pass over its domain
//! with an implicit join between stages. Output order is exact only up to
//! one bin width; ties within a bin keep original index order.

use crate::depth::DepthBounds;
use crate::error::{SortError, SortResult};
use crate::partition::BinPartition;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

/// Consumption order of the emitted index buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    /// Back-to-front, the standard order for alpha blending
    FarthestFirst,
    /// Front-to-back
    NearestFirst,
}

/// How histogram bins are allocated across the depth range
#[derive(Clone, Copy, Debug)]
pub enum BinLayout<'a> {
    /// Linear mapping of the full depth range onto the bin budget
    Uniform,
    /// Camera-relative tiered mapping; the partition's own budget wins
    Weighted(&'a BinPartition),
}

/// Above this bin count the prefix sum switches to the three-phase
/// blocked scan. On CPU there is no hard working-set limit, so this is a
/// locality threshold rather than a capacity one; both variants produce
/// identical output.
const SCAN_BLOCK: usize = 4096;

/// Reusable scratch buffers for one sort job.
///
/// Exclusively owned by a single job at a time; lease from a pool to
/// amortize allocation across frames. All growth is fallible so an
/// allocation failure aborts the job instead of the process.
pub struct SortScratch {
    histogram: Vec<AtomicU32>,
    offsets: Vec<u32>,
    cursors: Vec<u32>,
    element_bins: Vec<u32>,
    pairs: Vec<(f32, i32)>,
}

impl SortScratch {
    pub fn new() -> Self {
        Self {
            histogram: Vec::new(),
            offsets: Vec::new(),
            cursors: Vec::new(),
            element_bins: Vec::new(),
            pairs: Vec::new(),
        }
    }

    fn prepare(&mut self, bin_count: usize, element_count: usize) -> SortResult<()> {
        ensure_len(&mut self.histogram, bin_count, || AtomicU32::new(0))?;
        ensure_len(&mut self.offsets, bin_count, || 0)?;
        ensure_len(&mut self.cursors, bin_count, || 0)?;
        ensure_len(&mut self.element_bins, element_count, || 0)?;
        Ok(())
    }
}

impl Default for SortScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// Resize `vec` to exactly `len`, reporting allocation failure instead of
/// aborting.
fn ensure_len<T>(vec: &mut Vec<T>, len: usize, fill: impl FnMut() -> T) -> SortResult<()> {
    if vec.len() > len {
        vec.truncate(len);
        return Ok(());
    }
    vec.try_reserve(len - vec.len())
        .map_err(|e| SortError::allocation(len, e))?;
    vec.resize_with(len, fill);
    Ok(())
}

/// Identity permutation, the canonical substitute ordering for the window
/// before the first sort completes.
pub fn identity_order(len: usize) -> Vec<i32> {
    (0..len as i32).collect()
}

/// Map a depth key to an output bin, honoring layout and sort direction.
///
/// Direction is folded into the bin index (a flipped bin scale) so the
/// scatter stage is direction-agnostic.
#[inline]
fn directed_bin(
    key: f32,
    bounds: &DepthBounds,
    layout: BinLayout<'_>,
    bin_budget: usize,
    order: SortOrder,
) -> usize {
    let bin = match layout {
        BinLayout::Uniform => {
            let t = (key - bounds.min) / bounds.span();
            let raw = (t * bin_budget as f32).floor() as isize;
            raw.clamp(0, bin_budget as isize - 1) as usize
        }
        BinLayout::Weighted(partition) => partition.bin_of(key, bounds),
    };
    match order {
        SortOrder::NearestFirst => bin,
        SortOrder::FarthestFirst => bin_budget - 1 - bin,
    }
}

/// Counting sort: write a depth-ordered permutation of
/// `0..element_count` into `out`.
///
/// `depth` derives the key for one element index and must be cheap and
/// pure; it is invoked exactly once per element. An element count of 0 is
/// a no-op leaving `out` empty. The result is always a true permutation;
/// elements mapping to the same bin keep their original relative order.
pub fn counting_sort_into<D>(
    depth: &D,
    element_count: usize,
    bounds: DepthBounds,
    layout: BinLayout<'_>,
    bin_budget: usize,
    order: SortOrder,
    scratch: &mut SortScratch,
    out: &mut Vec<i32>,
) -> SortResult<()>
where
    D: Fn(usize) -> f32 + Sync,
{
    out.clear();
    if element_count == 0 {
        return Ok(());
    }

    // A weighted partition owns its budget; trust it over the argument.
    let bin_budget = match layout {
        BinLayout::Weighted(partition) => partition.bin_budget(),
        BinLayout::Uniform => bin_budget,
    };
    if bin_budget == 0 {
        return Err(SortError::BinBudgetTooSmall { got: 0, min: 1 });
    }

    out.try_reserve(element_count)
        .map_err(|e| SortError::allocation(element_count, e))?;
    scratch.prepare(bin_budget, element_count)?;
    let SortScratch {
        histogram,
        offsets,
        cursors,
        element_bins,
        ..
    } = scratch;

    // Stage 1: reset
    histogram.par_iter().for_each(|c| c.store(0, Ordering::Relaxed));

    // Stage 2: histogram build, caching each element's bin for the scatter
    let hist = &histogram[..];
    element_bins
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, slot)| {
            let bin = directed_bin(depth(index), &bounds, layout, bin_budget, order);
            *slot = bin as u32;
            hist[bin].fetch_add(1, Ordering::Relaxed);
        });

    debug_assert_eq!(
        histogram
            .iter()
            .map(|c| c.load(Ordering::Relaxed) as usize)
            .sum::<usize>(),
        element_count
    );

    // Stage 3: exclusive prefix sum over bin counts
    exclusive_scan(histogram, offsets);

    // Stage 4: materialize mutable write cursors
    cursors.copy_from_slice(&offsets[..]);

    // Stage 5: scatter, in original index order so ties within a bin stay
    // index-ordered
    out.resize(element_count, 0);
    for (index, &bin) in element_bins.iter().enumerate() {
        let cursor = &mut cursors[bin as usize];
        out[*cursor as usize] = index as i32;
        *cursor += 1;
    }

    Ok(())
}

/// Exclusive scan of bin counts into starting offsets.
///
/// Small budgets take a single linear pass. Larger ones use the
/// three-phase blocked scan: per-block local scans, a scan over block
/// totals, then adding each block's prefix back in.
fn exclusive_scan(histogram: &[AtomicU32], offsets: &mut [u32]) {
    debug_assert_eq!(histogram.len(), offsets.len());

    if histogram.len() <= SCAN_BLOCK {
        local_scan(histogram, offsets);
        return;
    }

    let block_totals: Vec<u32> = offsets
        .par_chunks_mut(SCAN_BLOCK)
        .zip(histogram.par_chunks(SCAN_BLOCK))
        .map(|(offset_block, count_block)| local_scan(count_block, offset_block))
        .collect();

    let mut block_prefix = vec![0u32; block_totals.len()];
    local_scan_u32(&block_totals, &mut block_prefix);

    offsets
        .par_chunks_mut(SCAN_BLOCK)
        .zip(block_prefix.par_iter())
        .for_each(|(offset_block, &prefix)| {
            if prefix != 0 {
                for offset in offset_block {
                    *offset += prefix;
                }
            }
        });
}

/// One sequential exclusive scan; returns the block total.
fn local_scan(counts: &[AtomicU32], offsets: &mut [u32]) -> u32 {
    let mut running = 0u32;
    for (offset, count) in offsets.iter_mut().zip(counts) {
        *offset = running;
        running += count.load(Ordering::Relaxed);
    }
    running
}

fn local_scan_u32(counts: &[u32], offsets: &mut [u32]) -> u32 {
    let mut running = 0u32;
    for (offset, &count) in offsets.iter_mut().zip(counts) {
        *offset = running;
        running += count;
    }
    running
}

/// Exact parallel comparison sort behind the same contract.
///
/// The conformant alternative to the counting path: O(n log n), exact
/// ties (broken by original index) instead of bin-quantized ones. Worth
/// it for small scenes where the fixed histogram overhead dominates.
pub fn comparison_sort_into<D>(
    depth: &D,
    element_count: usize,
    order: SortOrder,
    scratch: &mut SortScratch,
    out: &mut Vec<i32>,
) -> SortResult<()>
where
    D: Fn(usize) -> f32 + Sync,
{
    out.clear();
    if element_count == 0 {
        return Ok(());
    }
    out.try_reserve(element_count)
        .map_err(|e| SortError::allocation(element_count, e))?;

    let pairs = &mut scratch.pairs;
    ensure_len(pairs, element_count, || (0.0, 0))?;
    pairs
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, pair)| *pair = (depth(index), index as i32));

    match order {
        SortOrder::NearestFirst => pairs.par_sort_unstable_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        }),
        SortOrder::FarthestFirst => pairs.par_sort_unstable_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        }),
    }

    out.resize(element_count, 0);
    out.par_iter_mut()
        .zip(pairs.par_iter())
        .for_each(|(slot, pair)| *slot = pair.1);

    Ok(())
}

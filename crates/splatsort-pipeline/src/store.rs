//! Element store boundary

use glam::Vec3;
use splatsort_core::Aabb;

/// Read-side contract the sorter needs from the splat container.
///
/// The array is externally owned and append-only: indices below a
/// previously observed `len()` stay valid and their positions stable for
/// the duration of a sort job. Appends and edits bump `revision()`; the
/// scheduler compares revisions after each job rather than locking the
/// store for the job's duration.
pub trait ElementStore: Send + Sync {
    /// Current element count
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// World-space position of the element at `index` (`index < len()`)
    fn position(&self, index: usize) -> Vec3;

    /// Monotonically increasing data revision
    fn revision(&self) -> u64;

    /// Cached bounding box over all positions, if the store maintains
    /// one. Enables the cheap approximate depth-bounds path; `None`
    /// falls back to an exact scan.
    fn bounds(&self) -> Option<Aabb> {
        None
    }
}

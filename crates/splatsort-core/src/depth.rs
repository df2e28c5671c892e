//! Depth keys and depth bounds

use crate::camera::CameraSnapshot;
use glam::Vec3;
use rayon::prelude::*;

/// How a scalar depth key is derived from an element position.
///
/// Pipeline-wide flag, never per-element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthMetric {
    /// Euclidean distance from the camera position
    Distance,
    /// Signed projection of (position - camera) onto the camera forward axis
    ForwardProjection,
}

/// Axis-aligned bounding box in world space
#[derive(Clone, Copy, Debug)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Grow to include a point
    pub fn extend(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Closest point of the box to `p` (i.e. `p` itself when inside)
    pub fn closest_point(&self, p: Vec3) -> Vec3 {
        p.clamp(self.min, self.max)
    }

    /// Corner farthest from `p`, componentwise
    pub fn farthest_corner(&self, p: Vec3) -> Vec3 {
        let center = (self.min + self.max) * 0.5;
        Vec3::new(
            if p.x < center.x { self.max.x } else { self.min.x },
            if p.y < center.y { self.max.y } else { self.min.y },
            if p.z < center.z { self.max.z } else { self.min.z },
        )
    }

    fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }
}

/// Scalar depth range used to map keys onto histogram bins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBounds {
    pub min: f32,
    pub max: f32,
}

impl DepthBounds {
    /// Minimum usable span. Degenerate ranges (all elements at the same
    /// depth) are widened to this so the bin scale never divides by zero.
    pub const MIN_SPAN: f32 = 1e-6;

    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn span(&self) -> f32 {
        (self.max - self.min).max(Self::MIN_SPAN)
    }

    /// Exact bounds from a full scan of per-element depth keys.
    ///
    /// Returns `None` for an empty element set.
    pub fn from_keys<D>(depth: &D, element_count: usize) -> Option<Self>
    where
        D: Fn(usize) -> f32 + Sync,
    {
        if element_count == 0 {
            return None;
        }
        let (min, max) = (0..element_count)
            .into_par_iter()
            .map(|i| {
                let d = depth(i);
                (d, d)
            })
            .reduce(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |a, b| (a.0.min(b.0), a.1.max(b.1)),
            );
        Some(Self::new(min, max))
    }

    /// Conservative bounds from a cached bounding box, without touching
    /// per-element data. Slightly wider than the exact scan but O(1).
    pub fn from_aabb(aabb: &Aabb, camera: &CameraSnapshot, metric: DepthMetric) -> Self {
        match metric {
            DepthMetric::Distance => {
                let near = aabb.closest_point(camera.position).distance(camera.position);
                let far = aabb.farthest_corner(camera.position).distance(camera.position);
                Self::new(near, far)
            }
            DepthMetric::ForwardProjection => {
                let mut min = f32::INFINITY;
                let mut max = f32::NEG_INFINITY;
                for corner in aabb.corners() {
                    let d = camera.depth_of(corner, metric);
                    min = min.min(d);
                    max = max.max(d);
                }
                Self::new(min, max)
            }
        }
    }
}

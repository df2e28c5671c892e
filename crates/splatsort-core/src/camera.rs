//! Camera snapshot used to key one sort pass

use crate::depth::DepthMetric;
use glam::Vec3;

/// Immutable camera state captured when a sort job launches.
///
/// The sorter never talks to the live camera: each job carries its own
/// snapshot so the published order is consistent with exactly one view,
/// and so the scheduler can measure how far the camera has drifted since
/// the last completed sort.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSnapshot {
    /// Position in world space
    pub position: Vec3,
    /// Forward direction (unit vector)
    pub forward: Vec3,
}

impl CameraSnapshot {
    pub fn new(position: Vec3, forward: Vec3) -> Self {
        Self {
            position,
            forward: forward.normalize_or_zero(),
        }
    }

    /// Depth key of a world position under the given metric.
    #[inline]
    pub fn depth_of(&self, position: Vec3, metric: DepthMetric) -> f32 {
        match metric {
            DepthMetric::Distance => (position - self.position).length(),
            DepthMetric::ForwardProjection => (position - self.position).dot(self.forward),
        }
    }

    /// Has the camera moved far enough from `other` to justify a re-sort?
    ///
    /// Position is compared by Euclidean distance; direction by `1 - dot`
    /// of the normalized forward vectors, so a `direction_epsilon` of 0
    /// means any rotation triggers and 2 means nothing does.
    pub fn moved_beyond(
        &self,
        other: &CameraSnapshot,
        position_epsilon: f32,
        direction_epsilon: f32,
    ) -> bool {
        if self.position.distance(other.position) > position_epsilon {
            return true;
        }
        let alignment = self.forward.dot(other.forward).clamp(-1.0, 1.0);
        (1.0 - alignment) > direction_epsilon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_depth_metrics() {
        let cam = CameraSnapshot::new(Vec3::ZERO, Vec3::Z);
        let p = Vec3::new(3.0, 4.0, 0.0);

        assert_relative_eq!(cam.depth_of(p, DepthMetric::Distance), 5.0, epsilon = 1e-6);
        // Projection onto +Z of a point in the XY plane is zero
        assert_relative_eq!(
            cam.depth_of(p, DepthMetric::ForwardProjection),
            0.0,
            epsilon = 1e-6
        );
        // Points behind the forward axis go negative
        let behind = Vec3::new(0.0, 0.0, -2.0);
        assert_relative_eq!(
            cam.depth_of(behind, DepthMetric::ForwardProjection),
            -2.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_moved_beyond_position() {
        let a = CameraSnapshot::new(Vec3::ZERO, Vec3::Z);
        let b = CameraSnapshot::new(Vec3::new(0.005, 0.0, 0.0), Vec3::Z);
        let c = CameraSnapshot::new(Vec3::new(0.5, 0.0, 0.0), Vec3::Z);

        assert!(!b.moved_beyond(&a, 0.01, 1e-3));
        assert!(c.moved_beyond(&a, 0.01, 1e-3));
    }

    #[test]
    fn test_moved_beyond_direction() {
        let a = CameraSnapshot::new(Vec3::ZERO, Vec3::Z);
        // ~2.5 degrees off axis: 1 - cos(2.5deg) ~ 9.5e-4
        let tilted = CameraSnapshot::new(Vec3::ZERO, Vec3::new(0.0436, 0.0, 0.999));

        assert!(!tilted.moved_beyond(&a, 0.01, 1e-2));
        assert!(tilted.moved_beyond(&a, 0.01, 1e-4));
    }
}

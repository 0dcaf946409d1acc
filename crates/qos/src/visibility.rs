use glam::DVec3;

/// Targets more than this many degrees off the forward axis count as behind.
pub const BEHIND_ANGLE_DEGREES: f64 = 125.0;

/// Half-angle of the forward prefetch cone before turn widening.
pub const FORWARD_CONE_DEGREES: f64 = 35.0;

/// Vectors shorter than this are treated as degenerate (target at the eye).
pub const DEGENERATE_DISTANCE: f64 = 1e-4;

/// Angle/distance classification of a target relative to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    FrontTooFar,
    BehindTooFar,
}

/// Classify `target` using separate distance limits for the front and behind cones.
///
/// A target at the observer's position is always visible.
pub fn classify(
    observer: DVec3,
    forward: DVec3,
    target: DVec3,
    front_max: f64,
    behind_max: f64,
    behind_angle_degrees: f64,
) -> Visibility {
    let to = target - observer;
    let dist = to.length();
    if dist < DEGENERATE_DISTANCE {
        return Visibility::Visible;
    }

    let dot = forward.dot(to / dist).clamp(-1.0, 1.0);
    let angle = dot.acos().to_degrees();
    if angle > behind_angle_degrees {
        if dist > behind_max {
            Visibility::BehindTooFar
        } else {
            Visibility::Visible
        }
    } else if dist > front_max {
        Visibility::FrontTooFar
    } else {
        Visibility::Visible
    }
}

/// Whether `target` should be culled by the angle/distance test.
pub fn should_cull(
    observer: DVec3,
    forward: DVec3,
    target: DVec3,
    front_max: f64,
    behind_max: f64,
    behind_angle_degrees: f64,
) -> bool {
    classify(
        observer,
        forward,
        target,
        front_max,
        behind_max,
        behind_angle_degrees,
    ) != Visibility::Visible
}

/// Cosine of the angle between `forward` and the direction to `target`.
///
/// Returns 0 for a degenerate direction.
pub fn forward_dot(observer: DVec3, forward: DVec3, target: DVec3) -> f64 {
    let to = target - observer;
    let len = to.length();
    if len <= DEGENERATE_DISTANCE {
        return 0.0;
    }
    forward.dot(to / len).clamp(-1.0, 1.0)
}

/// Whether `target` lies strictly inside the cone of `half_angle_degrees` around `forward`.
pub fn in_forward_cone(
    observer: DVec3,
    forward: DVec3,
    target: DVec3,
    half_angle_degrees: f64,
) -> bool {
    let to = target - observer;
    let len = to.length();
    if len <= DEGENERATE_DISTANCE {
        return false;
    }
    let dot = forward.dot(to / len).clamp(-1.0, 1.0);
    dot.acos().to_degrees() < half_angle_degrees
}

/// Speed-biased distance thresholds shared by the scheduler and the cullers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullThresholds {
    pub front: f64,
    pub behind: f64,
    pub far: f64,
}

impl CullThresholds {
    /// Moving faster looks further ahead and keeps less behind.
    pub fn for_speed(speed: f64) -> Self {
        Self {
            front: 64.0 + (speed * 96.0).min(48.0),
            behind: (32.0 - (speed * 24.0).min(16.0)).max(12.0),
            far: 98.0 + (speed * 48.0).min(32.0),
        }
    }

    /// Scale every distance by the controller's far-cutoff multiplier.
    pub fn scaled(self, multiplier: f64) -> Self {
        Self {
            front: self.front * multiplier,
            behind: self.behind * multiplier,
            far: self.far * multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EYE: DVec3 = DVec3::ZERO;
    const FWD: DVec3 = DVec3::Z;

    #[test]
    fn far_target_ahead_is_culled() {
        assert!(should_cull(EYE, FWD, DVec3::new(0.0, 0.0, 200.0), 64.0, 32.0, 125.0));
        assert!(!should_cull(EYE, FWD, DVec3::new(0.0, 0.0, 40.0), 64.0, 32.0, 125.0));
    }

    #[test]
    fn behind_uses_behind_threshold() {
        let behind = DVec3::new(0.0, 0.0, -40.0);
        assert_eq!(
            classify(EYE, FWD, behind, 64.0, 32.0, 125.0),
            Visibility::BehindTooFar
        );
        assert_eq!(
            classify(EYE, FWD, behind, 64.0, 48.0, 125.0),
            Visibility::Visible
        );
        // 90 degrees off-axis is still the front cone.
        assert_eq!(
            classify(EYE, FWD, DVec3::new(40.0, 0.0, 0.0), 64.0, 12.0, 125.0),
            Visibility::Visible
        );
    }

    #[test]
    fn degenerate_distance_never_culls() {
        let near = DVec3::new(0.0, 0.00005, 0.0);
        assert!(!should_cull(EYE, FWD, near, 0.0, 0.0, 0.0));
        assert!(!should_cull(EYE, DVec3::ZERO, EYE, 0.0, 0.0, 0.0));
    }

    #[test]
    fn uniform_scaling_preserves_decision() {
        let targets = [
            DVec3::new(3.0, 1.0, 70.0),
            DVec3::new(-20.0, 5.0, -30.0),
            DVec3::new(50.0, -2.0, 10.0),
            DVec3::new(0.0, 0.0, -11.0),
        ];
        for target in targets {
            for k in [0.5, 2.0, 7.5] {
                assert_eq!(
                    should_cull(EYE, FWD, target, 64.0, 16.0, 125.0),
                    should_cull(EYE * k, FWD, target * k, 64.0 * k, 16.0 * k, 125.0),
                    "target {target:?} scale {k}"
                );
            }
        }
    }

    #[test]
    fn thresholds_follow_speed() {
        let still = CullThresholds::for_speed(0.0);
        assert_eq!(still, CullThresholds { front: 64.0, behind: 32.0, far: 98.0 });

        let fast = CullThresholds::for_speed(10.0);
        assert_eq!(fast, CullThresholds { front: 112.0, behind: 16.0, far: 130.0 });

        let scaled = still.scaled(0.75);
        assert_eq!(scaled.front, 48.0);
        assert_eq!(scaled.behind, 24.0);
    }

    #[test]
    fn forward_cone_and_dot() {
        let ahead = DVec3::new(1.0, 0.0, 10.0);
        assert!(in_forward_cone(EYE, FWD, ahead, 35.0));
        assert!(!in_forward_cone(EYE, FWD, DVec3::new(10.0, 0.0, 1.0), 35.0));
        assert!(!in_forward_cone(EYE, FWD, EYE, 35.0));
        assert_eq!(forward_dot(EYE, FWD, EYE), 0.0);
        assert!((forward_dot(EYE, FWD, DVec3::new(0.0, 0.0, -5.0)) + 1.0).abs() < 1e-12);
    }
}

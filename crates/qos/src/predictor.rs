use framekeeper_common::{ObserverPose, QosConfig};
use glam::DVec3;

const ALPHA_VELOCITY: f64 = 0.25;
const ALPHA_DIRECTION: f64 = 0.20;
const ALPHA_SPEED: f64 = 0.20;
const ALPHA_ANGULAR: f64 = 0.25;

/// Blended directions shorter than this keep the previous direction.
const MIN_DIRECTION_LEN: f64 = 1e-6;

/// Learns recent observer movement from one sample per simulation tick.
///
/// Every quantity is an exponential moving average, `new = old * (1 - a) + sample * a`.
/// Speeds are in blocks per tick and angles in radians per tick.
#[derive(Debug, Clone)]
pub struct MovementPredictor {
    velocity: DVec3,
    forward: DVec3,
    speed: f64,
    angular_speed: f64,
    angular_acceleration: f64,
    last_position: DVec3,
    last_forward: DVec3,
    updates: u64,
}

impl Default for MovementPredictor {
    fn default() -> Self {
        Self {
            velocity: DVec3::ZERO,
            forward: DVec3::Z,
            speed: 0.0,
            angular_speed: 0.0,
            angular_acceleration: 0.0,
            last_position: DVec3::ZERO,
            last_forward: DVec3::Z,
            updates: 0,
        }
    }
}

impl MovementPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observer sample into the averages.
    ///
    /// With no observer the update is skipped and every average keeps its
    /// value. Returns whether a sample was consumed.
    pub fn update(&mut self, pose: Option<&ObserverPose>) -> bool {
        let Some(pose) = pose else {
            return false;
        };

        let velocity = pose.position - pose.previous_position;
        self.last_position = pose.position;
        self.velocity = ema_vec(self.velocity, velocity, ALPHA_VELOCITY);

        let sample_forward = pose.forward.normalize_or_zero();
        self.forward = blend_direction(self.forward, sample_forward, ALPHA_DIRECTION);

        let delta_angle = self.forward.dot(self.last_forward).clamp(-1.0, 1.0).acos();
        let previous_angular = self.angular_speed;
        self.angular_speed = ema(self.angular_speed, delta_angle, ALPHA_ANGULAR);
        self.angular_acceleration = ema(
            self.angular_acceleration,
            self.angular_speed - previous_angular,
            ALPHA_ANGULAR,
        );
        self.last_forward = self.forward;

        self.speed = ema(self.speed, velocity.length(), ALPHA_SPEED);
        self.updates += 1;
        true
    }

    /// Smoothed unit look direction. Never zero.
    pub fn smoothed_forward(&self) -> DVec3 {
        self.forward
    }

    pub fn smoothed_speed(&self) -> f64 {
        self.speed
    }

    pub fn smoothed_velocity(&self) -> DVec3 {
        self.velocity
    }

    pub fn angular_speed(&self) -> f64 {
        self.angular_speed
    }

    pub fn angular_acceleration(&self) -> f64 {
        self.angular_acceleration
    }

    pub fn last_position(&self) -> DVec3 {
        self.last_position
    }

    /// Number of samples consumed so far.
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    /// Extrapolate the observer position assuming constant recent velocity.
    pub fn predict(&self, ticks_ahead: i32) -> DVec3 {
        if ticks_ahead <= 0 {
            return self.last_position;
        }
        self.last_position + self.velocity * f64::from(ticks_ahead)
    }

    /// Observer position used for visibility decisions this tick.
    pub fn observer_position(&self, pose: &ObserverPose, config: &QosConfig) -> DVec3 {
        if config.enable_prediction_everywhere {
            self.predict(config.prediction_ahead_ticks)
        } else {
            pose.position
        }
    }
}

fn ema(old: f64, sample: f64, alpha: f64) -> f64 {
    old * (1.0 - alpha) + sample * alpha
}

fn ema_vec(old: DVec3, sample: DVec3, alpha: f64) -> DVec3 {
    old * (1.0 - alpha) + sample * alpha
}

fn blend_direction(old: DVec3, sample: DVec3, alpha: f64) -> DVec3 {
    let blended = ema_vec(old, sample, alpha);
    let len = blended.length();
    if len < MIN_DIRECTION_LEN {
        return old;
    }
    blended / len
}

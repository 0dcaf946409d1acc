use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Accepted range for the QoS controller's target frame rate.
pub const MIN_TARGET_FPS: u32 = 30;
pub const MAX_TARGET_FPS: u32 = 240;

/// Long-frame thresholds below this are raised to it.
pub const MIN_STUTTER_THRESHOLD_MS: u32 = 10;

/// Largest configurable vertical band half-height, in blocks.
pub const MAX_BAND_HALF_HEIGHT: i32 = 256;

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be finite, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Configuration surface for the whole scheduler.
///
/// Owned by the host and read-only to the scheduler. Missing fields
/// deserialize to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QosConfig {
    // Frame-time QoS controller
    pub target_fps: u32,
    pub qos_aggressiveness: f64,
    pub enable_micro_stutter_guard: bool,
    pub micro_stutter_threshold_ms: u32,

    // Dirty-region scheduling
    pub enable_partial_meshing: bool,
    pub slice_debounce_millis: u64,
    pub enable_screen_space_budgeter: bool,
    pub slice_budget_per_tick: u32,
    pub enable_visibility_deprioritization: bool,
    pub hidden_deprioritize_frames: u64,
    pub unhide_per_tick: u32,
    pub enable_predictive_prefetch: bool,
    pub enable_turn_bias_prefetch: bool,
    pub turn_bias_strength: f64,

    // Movement prediction
    pub enable_prediction_everywhere: bool,
    pub prediction_ahead_ticks: i32,

    // Render task scheduler
    pub enable_render_scheduler: bool,

    // Section culling
    pub enable_chunk_culling: bool,
    pub enable_chunk_vertical_band_culling: bool,
    pub enable_dynamic_vertical_band: bool,
    pub vertical_band_half_height: i32,
    pub frustum_hysteresis_ticks: u64,

    // Entity culling
    pub enable_entity_culling: bool,
    pub enable_block_entity_culling: bool,
    pub enable_entity_behind_culling: bool,
    pub enable_entity_vertical_band_culling: bool,
    pub lod_throttling_enabled: bool,

    // Particle admission
    pub enable_particle_tile_budget: bool,
    pub particle_tile_budget: u32,
    pub particle_tile_size: u32,
    pub particle_distance_scaling: bool,
    pub particle_near: f64,
    pub particle_far: f64,
    pub particle_min_density: f64,
    pub particle_far_size_scale: f64,
    pub disable_all_particles: bool,
    pub disabled_particle_ids: BTreeSet<String>,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            target_fps: 120,
            qos_aggressiveness: 0.6,
            enable_micro_stutter_guard: true,
            micro_stutter_threshold_ms: 22,

            enable_partial_meshing: true,
            slice_debounce_millis: 200,
            enable_screen_space_budgeter: true,
            slice_budget_per_tick: 24,
            enable_visibility_deprioritization: true,
            hidden_deprioritize_frames: 30,
            unhide_per_tick: 8,
            enable_predictive_prefetch: true,
            enable_turn_bias_prefetch: true,
            turn_bias_strength: 0.6,

            enable_prediction_everywhere: true,
            prediction_ahead_ticks: 2,

            enable_render_scheduler: true,

            enable_chunk_culling: true,
            enable_chunk_vertical_band_culling: true,
            enable_dynamic_vertical_band: true,
            vertical_band_half_height: 5,
            frustum_hysteresis_ticks: 3,

            enable_entity_culling: true,
            enable_block_entity_culling: true,
            enable_entity_behind_culling: true,
            enable_entity_vertical_band_culling: true,
            lod_throttling_enabled: true,

            enable_particle_tile_budget: true,
            particle_tile_budget: 6,
            particle_tile_size: 32,
            particle_distance_scaling: true,
            particle_near: 16.0,
            particle_far: 64.0,
            particle_min_density: 0.3,
            particle_far_size_scale: 0.8,
            disable_all_particles: false,
            disabled_particle_ids: BTreeSet::new(),
        }
    }
}

impl QosConfig {
    /// Target frame time in milliseconds, from the clamped target rate.
    pub fn target_frame_ms(&self) -> f64 {
        1000.0 / f64::from(self.target_fps.clamp(MIN_TARGET_FPS, MAX_TARGET_FPS))
    }

    /// Aggressiveness clamped to `[0, 1]`; non-finite values disable scaling.
    pub fn aggressiveness(&self) -> f64 {
        clamp_unit(self.qos_aggressiveness)
    }

    /// Turn-bias strength clamped to `[0, 1]`, or 0 when the feature is off.
    pub fn turn_bias(&self) -> f64 {
        if self.enable_turn_bias_prefetch {
            clamp_unit(self.turn_bias_strength)
        } else {
            0.0
        }
    }

    /// Frame time above which a frame counts as long.
    pub fn stutter_threshold_ms(&self) -> f64 {
        f64::from(self.micro_stutter_threshold_ms.max(MIN_STUTTER_THRESHOLD_MS))
    }

    /// Check every numeric field without modifying anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        range(
            "target_fps",
            f64::from(self.target_fps),
            f64::from(MIN_TARGET_FPS),
            f64::from(MAX_TARGET_FPS),
        )?;
        range("qos_aggressiveness", self.qos_aggressiveness, 0.0, 1.0)?;
        range("turn_bias_strength", self.turn_bias_strength, 0.0, 1.0)?;
        range("particle_min_density", self.particle_min_density, 0.0, 1.0)?;
        range(
            "vertical_band_half_height",
            f64::from(self.vertical_band_half_height),
            1.0,
            f64::from(MAX_BAND_HALF_HEIGHT),
        )?;
        finite("particle_near", self.particle_near)?;
        finite("particle_far", self.particle_far)?;
        finite("particle_far_size_scale", self.particle_far_size_scale)?;
        if self.particle_far <= self.particle_near {
            return Err(ConfigError::OutOfRange {
                field: "particle_far",
                value: self.particle_far,
                min: self.particle_near,
                max: f64::INFINITY,
            });
        }
        Ok(())
    }

    /// A copy with every value forced into its accepted range.
    pub fn sanitized(&self) -> Self {
        let mut cfg = self.clone();
        cfg.target_fps = cfg.target_fps.clamp(MIN_TARGET_FPS, MAX_TARGET_FPS);
        cfg.qos_aggressiveness = clamp_unit(cfg.qos_aggressiveness);
        cfg.turn_bias_strength = clamp_unit(cfg.turn_bias_strength);
        cfg.micro_stutter_threshold_ms = cfg
            .micro_stutter_threshold_ms
            .max(MIN_STUTTER_THRESHOLD_MS);
        cfg.vertical_band_half_height = cfg
            .vertical_band_half_height
            .clamp(1, MAX_BAND_HALF_HEIGHT);
        cfg.particle_tile_budget = cfg.particle_tile_budget.max(1);
        cfg.particle_tile_size = cfg.particle_tile_size.max(4);
        cfg.particle_near = finite_or(cfg.particle_near, 16.0).max(0.0);
        cfg.particle_far = finite_or(cfg.particle_far, 64.0).max(cfg.particle_near + 1.0);
        cfg.particle_min_density = clamp_unit(cfg.particle_min_density);
        cfg.particle_far_size_scale = finite_or(cfg.particle_far_size_scale, 0.8).max(0.1);
        cfg.prediction_ahead_ticks = cfg.prediction_ahead_ticks.max(0);
        cfg
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() { v } else { fallback }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { field, value })
    }
}

fn range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

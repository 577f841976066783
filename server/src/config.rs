//! Configuration surface consumed by the directors.
//!
//! Parsing of configuration files is owned by an external collaborator;
//! these structs are the already-validated values the core reads. Distances
//! are stored in metres and exposed squared where the hot paths compare
//! squared distances.

use serde::Deserialize;

use crate::error::ConfigurationError;

/// Parameters of the AI traffic director.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiParams {
    /// How many AI identities one connected player should attract.
    pub ai_per_player_target: u32,
    /// Global scale on the per-player target, 0.0..=1.0 and beyond.
    pub traffic_density: f32,
    /// Hard cap on the total AI identity count.
    pub max_ai_target: u32,
    /// Director tick cadence.
    pub ai_behavior_update_interval_ms: u64,
    /// Minimum spawn distance from the target player, in spline points.
    pub min_spawn_distance_points: u32,
    /// Maximum spawn distance from the target player, in spline points.
    pub max_spawn_distance_points: u32,
    /// Despawn radius: AI farther than this from every player despawns.
    pub player_radius_m: f32,
    /// How far ahead of a moving player spawn targeting is biased.
    pub player_position_offset_m: f32,
    /// Players farther than this from the spline get no AI spawned for them.
    pub max_player_distance_to_ai_spline_m: f32,
    /// No AI may spawn closer than this to any connected player.
    pub spawn_safety_distance_to_player_m: f32,
    /// Players idle longer than this stop attracting AI.
    pub player_afk_timeout_ms: u64,
    /// Whether AI may drive both directions of the spline.
    pub two_way_traffic: bool,
    /// Whether AI may target players driving against the spline.
    pub wrong_way_traffic: bool,
    /// Prefer lanes matching the target player's direction of travel.
    pub prioritize_player_traffic: bool,
    /// Probability of a same-direction lane when prioritizing, 0.0..=1.0.
    pub same_direction_traffic_probability: f32,
    pub lane_width_m: f32,
    /// Enables the AI debug telemetry side-channel.
    pub debug: bool,

    /// Minimum lifetime during which a fresh spawn cannot despawn.
    pub spawn_protection_ms: u64,
    /// Minimum separation between two states of the same slot.
    pub min_state_distance_m: f32,
    /// Minimum headway to the AI ahead/behind a spawn candidate.
    pub min_ai_headway_m: f32,
    /// Base AI cruise speed in m/s; per-state variation applies on top.
    pub ai_max_speed_ms: f32,
    pub ai_acceleration_ms2: f32,
    pub ai_deceleration_ms2: f32,
}

impl Default for AiParams {
    fn default() -> Self {
        Self {
            ai_per_player_target: 8,
            traffic_density: 1.0,
            max_ai_target: 300,
            ai_behavior_update_interval_ms: 500,
            min_spawn_distance_points: 100,
            max_spawn_distance_points: 400,
            player_radius_m: 200.0,
            player_position_offset_m: 100.0,
            max_player_distance_to_ai_spline_m: 60.0,
            spawn_safety_distance_to_player_m: 80.0,
            player_afk_timeout_ms: 60_000,
            two_way_traffic: false,
            wrong_way_traffic: false,
            prioritize_player_traffic: true,
            same_direction_traffic_probability: 0.8,
            lane_width_m: 3.0,
            debug: false,
            spawn_protection_ms: 10_000,
            min_state_distance_m: 50.0,
            min_ai_headway_m: 20.0,
            ai_max_speed_ms: 22.0,
            ai_acceleration_ms2: 2.5,
            ai_deceleration_ms2: 8.5,
        }
    }
}

impl AiParams {
    pub fn player_radius_squared(&self) -> f32 {
        self.player_radius_m * self.player_radius_m
    }

    pub fn max_player_distance_to_ai_spline_squared(&self) -> f32 {
        self.max_player_distance_to_ai_spline_m * self.max_player_distance_to_ai_spline_m
    }

    pub fn spawn_safety_distance_to_player_squared(&self) -> f32 {
        self.spawn_safety_distance_to_player_m * self.spawn_safety_distance_to_player_m
    }

    pub fn min_state_distance_squared(&self) -> f32 {
        self.min_state_distance_m * self.min_state_distance_m
    }

    pub fn min_ai_headway_squared(&self) -> f32 {
        self.min_ai_headway_m * self.min_ai_headway_m
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.min_spawn_distance_points >= self.max_spawn_distance_points {
            return Err(ConfigurationError::InvalidAiParameter(format!(
                "min_spawn_distance_points ({}) must be below max_spawn_distance_points ({})",
                self.min_spawn_distance_points, self.max_spawn_distance_points
            )));
        }
        if !(0.0..=1.0).contains(&self.same_direction_traffic_probability) {
            return Err(ConfigurationError::InvalidAiParameter(format!(
                "same_direction_traffic_probability ({}) must be within [0, 1]",
                self.same_direction_traffic_probability
            )));
        }
        Ok(())
    }
}

/// Escalation parameters for one violation kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViolationParams {
    pub enabled: bool,
    /// Consecutive violating seconds before the pit/kick threshold fires.
    pub duration_seconds: u32,
    /// Pit teleports granted before the next threshold crossing kicks.
    pub pits_before_kick: u32,
    /// Speed bound in m/s: a minimum for no-lights and wrong-way,
    /// a maximum for blocking-road.
    pub speed_bound_ms: f32,
}

impl Default for ViolationParams {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_seconds: 60,
            pits_before_kick: 2,
            speed_bound_ms: 5.6,
        }
    }
}

/// Parameters of the auto-moderation director.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoModerationParams {
    pub no_lights: ViolationParams,
    pub wrong_way: ViolationParams,
    pub blocking_road: ViolationParams,
    /// Whether warnings/flag packets are sent to clients at all.
    pub enable_client_messages: bool,
}

impl Default for AutoModerationParams {
    fn default() -> Self {
        Self {
            no_lights: ViolationParams {
                duration_seconds: 60,
                ..Default::default()
            },
            wrong_way: ViolationParams {
                duration_seconds: 20,
                ..Default::default()
            },
            blocking_road: ViolationParams {
                duration_seconds: 30,
                speed_bound_ms: 1.4,
                ..Default::default()
            },
            enable_client_messages: true,
        }
    }
}

impl AutoModerationParams {
    /// Startup preconditions. Violations here are fatal: the subsystem
    /// refuses to start rather than silently moderating with bad inputs.
    pub fn validate(&self, has_ai_spline: bool, has_sun: bool) -> Result<(), ConfigurationError> {
        if self.wrong_way.enabled && !has_ai_spline {
            return Err(ConfigurationError::MissingAiSpline {
                violation: "wrong-way",
            });
        }
        if self.blocking_road.enabled && !has_ai_spline {
            return Err(ConfigurationError::MissingAiSpline {
                violation: "blocking-road",
            });
        }
        if self.no_lights.enabled && !has_sun {
            return Err(ConfigurationError::MissingSunPosition);
        }
        Ok(())
    }

    /// Half lane width plus tolerance, squared; cars farther from the
    /// spline than this are off the road for moderation purposes.
    pub fn lane_radius_squared(&self, lane_width_m: f32) -> f32 {
        let r = lane_width_m / 2.0 * 1.25;
        r * r
    }
}

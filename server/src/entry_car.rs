//! Entry-car slot model.
//!
//! A slot is a fixed identity on the server. It either carries a connected
//! human client or multiplexes one-to-many AI identities; exactly one of
//! the two holds at any instant. Slot-local AI policy (pool sizing, unsafe
//! state removal, spawn safety, obstacle detection) lives here; cross-slot
//! orchestration lives in the director.

use glam::Vec3;
use log::{debug, info};
use rand::Rng;
use shared::CarStatus;

use crate::ai::spline::AiSpline;
use crate::ai::state::{AiState, SlowestStateIndex, StateRef, NO_OBSTACLE_CM};
use crate::ai::AiMode;
use crate::config::AiParams;

/// Connected human occupying a slot.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub is_administrator: bool,
    /// Until the first position update arrives the car has no meaningful
    /// status and is ignored by both directors.
    pub has_sent_first_update: bool,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_administrator: false,
            has_sent_first_update: false,
        }
    }
}

/// One server slot.
#[derive(Debug)]
pub struct EntryCar {
    /// Stable 8-bit identifier; all AI states of the slot share it on the
    /// wire.
    pub session_id: u8,
    pub model: String,
    pub ai_mode: AiMode,
    pub ai_controlled: bool,
    pub client: Option<ClientInfo>,
    pub status: CarStatus,
    /// Server time of the last client activity, for AFK checks.
    pub last_active_ms: u64,
    /// Per-slot wall-clock offset applied to session-update packets.
    pub time_offset: u64,
    pub ai_states: Vec<AiState>,
    /// Overbooking target: how many AI identities this slot may host.
    pub target_ai_states: usize,
}

/// Distance under which a collision-stopped state holds position.
const COLLISION_SCENE_RADIUS_SQUARED: f32 = 25.0 * 25.0;

/// How far ahead obstacle detection looks, in metres.
const OBSTACLE_LOOKAHEAD_M: f32 = 200.0;

impl EntryCar {
    pub fn new(session_id: u8, model: impl Into<String>, ai_mode: AiMode) -> Self {
        Self {
            session_id,
            model: model.into(),
            ai_mode,
            ai_controlled: ai_mode != AiMode::None,
            client: None,
            status: CarStatus::default(),
            last_active_ms: 0,
            time_offset: 0,
            ai_states: Vec::new(),
            target_ai_states: 0,
        }
    }

    /// True while a human occupies the slot and has sent its first update.
    pub fn is_player_live(&self) -> bool {
        self.client
            .as_ref()
            .map(|client| client.has_sent_first_update)
            .unwrap_or(false)
    }

    /// Flips the slot between AI-hosting and player-hosting.
    ///
    /// Disabling AI control returns every state to the pool so the slot's
    /// wire identity is free for the client.
    pub fn set_ai_control(&mut self, enabled: bool) {
        if self.ai_controlled == enabled {
            return;
        }
        self.ai_controlled = enabled;
        info!(
            "Slot {}: AI control {}",
            self.session_id,
            if enabled { "enabled" } else { "disabled" }
        );
        if !enabled {
            for state in &mut self.ai_states {
                state.despawn();
            }
        }
    }

    /// Applies a new overbooking target to the state pool.
    ///
    /// The pool grows with fresh uninitialized states (cruise speed is
    /// randomized per identity) and shrinks by dropping pooled states from
    /// the tail. Initialized states are never dropped here; a pool above
    /// target drains as states despawn.
    pub fn set_ai_overbooking(&mut self, count: usize, params: &AiParams, rng: &mut impl Rng) {
        self.target_ai_states = count;

        while self.ai_states.len() < count {
            let max_speed = params.ai_max_speed_ms * rng.random_range(0.85..1.15);
            self.ai_states.push(AiState::new(max_speed));
        }

        while self.ai_states.len() > count {
            match self.ai_states.iter().rposition(|state| !state.initialized) {
                Some(index) => {
                    self.ai_states.remove(index);
                }
                None => break,
            }
        }

        debug!(
            "Slot {}: overbooking {} ({} pooled)",
            self.session_id,
            count,
            self.ai_states.len()
        );
    }

    pub fn initialized_state_count(&self) -> usize {
        self.ai_states.iter().filter(|s| s.initialized).count()
    }

    /// Despawns this slot's states that no player can see.
    ///
    /// `ai_min_distance_to_player` carries, per initialized state, the
    /// squared distance to the nearest player offset position. States past
    /// the player radius return to the pool unless spawn-protected.
    pub fn remove_unsafe_states(
        &mut self,
        slot_index: usize,
        ai_min_distance_to_player: &[(StateRef, f32)],
        now_ms: u64,
        params: &AiParams,
    ) {
        let player_radius_squared = params.player_radius_squared();

        for (state_ref, min_distance) in ai_min_distance_to_player {
            if state_ref.slot != slot_index || *min_distance <= player_radius_squared {
                continue;
            }
            let Some(state) = self.ai_states.get_mut(state_ref.state) else {
                continue;
            };
            if state.initialized && !state.is_spawn_protected(now_ms) {
                debug!(
                    "Slot {}: despawning state {} ({:.0} m from nearest player)",
                    self.session_id,
                    state_ref.state,
                    min_distance.sqrt()
                );
                state.despawn();
            }
        }
    }

    /// Despawns states of this slot that sit too close to each other.
    ///
    /// Two states of one slot share a wire identity, so clients near both
    /// would see the car teleport between them. The earlier state wins;
    /// spawn-protected states are left alone.
    pub fn remove_overlapping_states(&mut self, now_ms: u64, params: &AiParams) {
        let min_distance_squared = params.min_state_distance_squared();

        for i in 0..self.ai_states.len() {
            if !self.ai_states[i].initialized {
                continue;
            }
            let position = self.ai_states[i].status.position;

            for j in (i + 1)..self.ai_states.len() {
                let other = &self.ai_states[j];
                if !other.initialized || other.is_spawn_protected(now_ms) {
                    continue;
                }
                if other.status.position.distance_squared(position) < min_distance_squared {
                    debug!(
                        "Slot {}: despawning state {} (too close to state {})",
                        self.session_id, j, i
                    );
                    self.ai_states[j].despawn();
                }
            }
        }
    }

    /// Slot-local veto for a prospective spawn position.
    pub fn is_position_safe_for(&self, position: Vec3, params: &AiParams) -> bool {
        if !self.ai_controlled {
            return true;
        }
        let min_distance_squared = params.min_state_distance_squared();
        self.ai_states
            .iter()
            .filter(|state| state.initialized)
            .all(|state| state.status.position.distance_squared(position) >= min_distance_squared)
    }

    /// Re-evaluates each state's surroundings and kinematic targets.
    ///
    /// Finds the nearest AI ahead through the occupancy index, derives a
    /// target speed from the gap, releases collision stops once every
    /// player has left the scene, then advances the state.
    pub fn ai_obstacle_detection(
        &mut self,
        slot_index: usize,
        spline: &AiSpline,
        index: &SlowestStateIndex,
        player_positions: &[Vec3],
        rng: &mut impl Rng,
        dt: f32,
        now_ms: u64,
        params: &AiParams,
    ) {
        for state_index in 0..self.ai_states.len() {
            let state = &mut self.ai_states[state_index];
            if !state.initialized {
                continue;
            }

            let state_ref = StateRef {
                slot: slot_index,
                state: state_index,
            };

            let obstacle = index.find_nearest(
                spline,
                state.spline_point_id,
                OBSTACLE_LOOKAHEAD_M,
                true,
                Some(state_ref),
            );

            match obstacle {
                Some((ahead, distance)) => {
                    state.closest_ai_obstacle_distance =
                        shared::distance_to_cm_i16(distance) as i32;

                    // Braking envelope: distance needed to shed the speed
                    // difference plus the configured headway.
                    let closing = (state.current_speed - ahead.speed).max(0.0);
                    let braking_distance =
                        closing * closing / (2.0 * params.ai_deceleration_ms2)
                            + params.min_ai_headway_m;

                    if distance < params.min_ai_headway_m {
                        state.target_speed = 0.0;
                    } else if distance < braking_distance {
                        state.target_speed = ahead.speed.min(state.max_speed);
                    } else {
                        state.target_speed = state.max_speed;
                    }
                }
                None => {
                    state.closest_ai_obstacle_distance = NO_OBSTACLE_CM;
                    state.target_speed = state.max_speed;
                }
            }

            if state.stopped_for_collision {
                let scene_clear = player_positions.iter().all(|player| {
                    player.distance_squared(state.status.position)
                        >= COLLISION_SCENE_RADIUS_SQUARED
                });
                if scene_clear {
                    state.stopped_for_collision = false;
                } else {
                    state.target_speed = 0.0;
                }
            }

            state.advance(spline, rng, dt, now_ms, params);
        }
    }
}

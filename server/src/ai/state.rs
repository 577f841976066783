//! Pooled AI driving identities and the per-point occupancy index.

use glam::Vec3;
use rand::Rng;
use shared::CarStatus;

use crate::ai::spline::{AiSpline, JunctionEvaluator, NO_POINT};
use crate::config::AiParams;

/// Obstacle distance value meaning "nothing tracked".
pub const NO_OBSTACLE_CM: i32 = -1;

/// One AI identity multiplexed onto an entry-car slot.
///
/// States are created uninitialized, promoted by the director via
/// [`AiState::teleport`] and demoted back to the pool on despawn. They are
/// never dropped while the slot keeps its overbooking target.
#[derive(Debug, Clone)]
pub struct AiState {
    pub initialized: bool,
    pub status: CarStatus,
    /// Current ground speed in m/s; `status.velocity` is derived from it.
    pub current_speed: f32,
    /// Speed the kinematic update steers toward.
    pub target_speed: f32,
    /// Cruise ceiling for this identity.
    pub max_speed: f32,
    /// Current graph position, or -1 while pooled.
    pub spline_point_id: i32,
    /// Metres progressed past `spline_point_id` toward its successor.
    pub point_progress: f32,
    /// Server time until which the state is immune to despawn.
    pub spawn_protection_ends: u64,
    /// Latest obstacle telemetry in centimetres, [`NO_OBSTACLE_CM`] if none.
    pub closest_ai_obstacle_distance: i32,
    /// Set by a collision reaction; cleared once the scene around the
    /// state has drained.
    pub stopped_for_collision: bool,
    /// Branch memory making this identity's route deterministic.
    pub junctions: JunctionEvaluator,
}

impl AiState {
    pub fn new(max_speed: f32) -> Self {
        Self {
            initialized: false,
            status: CarStatus::default(),
            current_speed: 0.0,
            target_speed: 0.0,
            max_speed,
            spline_point_id: NO_POINT,
            point_progress: 0.0,
            spawn_protection_ends: 0,
            closest_ai_obstacle_distance: NO_OBSTACLE_CM,
            stopped_for_collision: false,
            junctions: JunctionEvaluator::new(),
        }
    }

    /// Promotes the state onto a spawn point, moving at cruise speed.
    pub fn teleport(&mut self, spline: &AiSpline, point_id: i32, now_ms: u64, params: &AiParams) {
        let Some(point) = spline.point(point_id) else {
            return;
        };

        self.initialized = true;
        self.spline_point_id = point_id;
        self.point_progress = 0.0;
        self.current_speed = self.max_speed;
        self.target_speed = self.max_speed;
        self.spawn_protection_ends = now_ms + params.spawn_protection_ms;
        self.closest_ai_obstacle_distance = NO_OBSTACLE_CM;
        self.stopped_for_collision = false;
        self.junctions.clear();
        self.status.position = point.position;
        self.status.velocity = point.forward * self.current_speed;
        self.status.timestamp_ms = now_ms;
    }

    /// Returns the state to the pool.
    pub fn despawn(&mut self) {
        self.initialized = false;
        self.spline_point_id = NO_POINT;
        self.point_progress = 0.0;
        self.current_speed = 0.0;
        self.target_speed = 0.0;
        self.closest_ai_obstacle_distance = NO_OBSTACLE_CM;
        self.stopped_for_collision = false;
    }

    pub fn is_spawn_protected(&self, now_ms: u64) -> bool {
        now_ms < self.spawn_protection_ends
    }

    /// Headway and speed-class gate for spawning this state at `spawn_pos`
    /// between the nearest AI behind (`previous_ai`) and ahead (`next_ai`).
    pub fn can_spawn(
        &self,
        spawn_pos: Vec3,
        previous_ai: Option<&AiNeighbor>,
        next_ai: Option<&AiNeighbor>,
        params: &AiParams,
    ) -> bool {
        let min_headway_squared = params.min_ai_headway_squared();

        if let Some(next) = next_ai {
            if next.position.distance_squared(spawn_pos) < min_headway_squared {
                return false;
            }
            // Traffic ahead moving far below our cruise speed would force
            // an immediate emergency stop.
            if next.speed < self.max_speed * 0.5 {
                return false;
            }
        }
        if let Some(previous) = previous_ai {
            if previous.position.distance_squared(spawn_pos) < min_headway_squared {
                return false;
            }
            if previous.speed > self.max_speed * 1.5 {
                return false;
            }
        }
        true
    }

    /// Collision reaction: stand still until the scene clears.
    pub fn stop_for_collision(&mut self) {
        self.target_speed = 0.0;
        self.stopped_for_collision = true;
    }

    /// Advances the state along the spline for `dt` seconds.
    ///
    /// Speed approaches `target_speed` under the configured
    /// acceleration/deceleration; a dead end despawns the state so the
    /// director can recycle it next tick.
    pub fn advance(
        &mut self,
        spline: &AiSpline,
        rng: &mut impl Rng,
        dt: f32,
        now_ms: u64,
        params: &AiParams,
    ) {
        if !self.initialized {
            return;
        }

        if self.current_speed < self.target_speed {
            self.current_speed =
                (self.current_speed + params.ai_acceleration_ms2 * dt).min(self.target_speed);
        } else {
            self.current_speed =
                (self.current_speed - params.ai_deceleration_ms2 * dt).max(self.target_speed);
        }

        let mut travel = self.current_speed * dt;
        loop {
            let Some(point) = spline.point(self.spline_point_id) else {
                self.despawn();
                return;
            };
            let remaining = (point.length - self.point_progress).max(0.0);
            if travel < remaining {
                self.point_progress += travel;
                break;
            }
            travel -= remaining;
            let next = self.junctions.next_point(spline, self.spline_point_id, rng);
            if next < 0 {
                self.despawn();
                return;
            }
            self.spline_point_id = next;
            self.point_progress = 0.0;
        }

        let point = match spline.point(self.spline_point_id) {
            Some(point) => point,
            None => return,
        };
        self.status.position = point.position + point.forward * self.point_progress;
        self.status.velocity = point.forward * self.current_speed;
        self.status.timestamp_ms = now_ms;
    }
}

/// Condensed view of a nearby AI used by spawn gating.
#[derive(Debug, Clone, Copy)]
pub struct AiNeighbor {
    pub position: Vec3,
    pub speed: f32,
}

/// Reference into the entry-car table: `(slot index, state index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRef {
    pub slot: usize,
    pub state: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct IndexedAiState {
    pub state_ref: StateRef,
    pub speed: f32,
    pub position: Vec3,
}

/// Per-spline-point occupancy index keeping the slowest AI at each point.
///
/// Rebuilt from the entry-car table at the start of each obstacle/director
/// pass; accelerates "nearest AI along the graph" queries from O(states)
/// to a short graph walk.
pub struct SlowestStateIndex {
    entries: Vec<Option<IndexedAiState>>,
}

impl SlowestStateIndex {
    pub fn new(point_count: usize) -> Self {
        Self {
            entries: vec![None; point_count],
        }
    }

    pub fn clear(&mut self) {
        self.entries.fill(None);
    }

    /// Re-registers every initialized state of every AI slot.
    pub fn rebuild(&mut self, entry_cars: &[crate::entry_car::EntryCar]) {
        self.clear();
        for (slot, car) in entry_cars.iter().enumerate() {
            if !car.ai_controlled {
                continue;
            }
            for (state_index, state) in car.ai_states.iter().enumerate() {
                if state.initialized {
                    self.insert(
                        state.spline_point_id,
                        IndexedAiState {
                            state_ref: StateRef {
                                slot,
                                state: state_index,
                            },
                            speed: state.current_speed,
                            position: state.status.position,
                        },
                    );
                }
            }
        }
    }

    /// Registers an AI at a point, keeping the slower one on conflict.
    pub fn insert(&mut self, point_id: i32, entry: IndexedAiState) {
        if point_id < 0 {
            return;
        }
        let Some(slot) = self.entries.get_mut(point_id as usize) else {
            return;
        };
        match slot {
            Some(existing) if existing.speed <= entry.speed => {}
            _ => *slot = Some(entry),
        }
    }

    pub fn get(&self, point_id: i32) -> Option<&IndexedAiState> {
        if point_id < 0 {
            return None;
        }
        self.entries.get(point_id as usize)?.as_ref()
    }

    /// Nearest indexed AI within `max_distance_m` metres along the graph.
    ///
    /// Walks successor points for `forward`, predecessors otherwise. The
    /// start point itself is inspected first at distance zero. `exclude`
    /// skips one state (typically the querying state itself).
    pub fn find_nearest(
        &self,
        spline: &AiSpline,
        from_point: i32,
        max_distance_m: f32,
        forward: bool,
        exclude: Option<StateRef>,
    ) -> Option<(IndexedAiState, f32)> {
        let mut current = from_point;
        let mut distance = 0.0f32;

        while current >= 0 && distance <= max_distance_m {
            if let Some(entry) = self.get(current) {
                if Some(entry.state_ref) != exclude {
                    return Some((*entry, distance));
                }
            }
            let point = spline.point(current)?;
            if forward {
                distance += point.length;
                current = point.next_id;
            } else {
                current = point.previous_id;
                if let Some(previous) = spline.point(current) {
                    distance += previous.length;
                }
            }
        }
        None
    }
}

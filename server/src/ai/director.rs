//! The AI traffic director.
//!
//! A periodic, single-writer control loop that keeps believable AI traffic
//! around every eligible player: categorize slots, measure distances,
//! despawn what no player can see, spawn where attention is thinnest.
//! Connection events and collisions arrive as method calls and mutate the
//! same state under the manager lock.

use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{watch, RwLock};
use tokio::time::interval;

use crate::ai::spline::{AiSpline, JunctionEvaluator};
use crate::ai::state::{AiNeighbor, IndexedAiState, SlowestStateIndex, StateRef};
use crate::config::AiParams;
use crate::entry_car_manager::EntryCarManager;
use crate::error::TickError;
use crate::session::SessionManager;

/// Players this close to a struck AI trigger its collision reaction.
const COLLISION_TARGET_RADIUS_SQUARED: f32 = 25.0 * 25.0;
/// Collision reaction delay bounds; randomized so adjacent AI desynchronize.
const COLLISION_REACTION_MIN_MS: u64 = 100;
const COLLISION_REACTION_MAX_MS: u64 = 500;
/// How far along the graph spawn gating looks for neighboring AI.
const NEIGHBOR_SEARCH_DISTANCE_M: f32 = 50.0;
/// Safety-loop step width in spline points.
const SAFETY_STEP_POINTS: i32 = 5;

/// An eligible player as seen by one director tick.
#[derive(Debug, Clone)]
struct EligiblePlayer {
    slot: usize,
    position: Vec3,
    /// Position biased ahead of travel; spawn targeting uses this.
    offset_position: Vec3,
    velocity: Vec3,
}

pub struct AiDirector {
    manager: Arc<RwLock<EntryCarManager>>,
    session: Arc<SessionManager>,
    spline: Arc<AiSpline>,
    params: Arc<AiParams>,
    rng: StdRng,
    index: SlowestStateIndex,
}

impl AiDirector {
    pub fn new(
        manager: Arc<RwLock<EntryCarManager>>,
        session: Arc<SessionManager>,
        spline: Arc<AiSpline>,
        params: Arc<AiParams>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let index = SlowestStateIndex::new(spline.len());
        Self {
            manager,
            session,
            spline,
            params,
            rng,
            index,
        }
    }

    /// Director worker: one [`Self::update`] per configured interval until
    /// the shutdown signal flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(self.params.ai_behavior_update_interval_ms));
        info!(
            "AI director started ({} ms tick)",
            self.params.ai_behavior_update_interval_ms
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.update().await {
                        error!("AI director tick failed: {}", e);
                    }
                }
            }
        }
        info!("AI director stopped");
    }

    /// One director tick.
    pub async fn update(&mut self) -> Result<(), TickError> {
        let now_ms = self.session.server_time_ms();
        let manager = Arc::clone(&self.manager);
        let mut manager = manager.write().await;
        self.tick(&mut manager, now_ms);
        Ok(())
    }

    fn tick(&mut self, manager: &mut EntryCarManager, now_ms: u64) {
        // Phase 1-2: categorize
        let eligible_players = self.eligible_players(manager, now_ms);
        let ai_slots: Vec<usize> = manager
            .entry_cars
            .iter()
            .enumerate()
            .filter(|(_, car)| car.ai_controlled)
            .map(|(index, _)| index)
            .collect();

        if eligible_players.is_empty() {
            for &slot in &ai_slots {
                for state in &mut manager.entry_cars[slot].ai_states {
                    if state.initialized {
                        state.despawn();
                    }
                }
            }
            return;
        }

        // Phase 3: distance matrix, reduced to per-side minima
        let initialized: Vec<(StateRef, Vec3)> = ai_slots
            .iter()
            .flat_map(|&slot| {
                manager.entry_cars[slot]
                    .ai_states
                    .iter()
                    .enumerate()
                    .filter(|(_, state)| state.initialized)
                    .map(move |(state_index, state)| {
                        (
                            StateRef {
                                slot,
                                state: state_index,
                            },
                            state.status.position,
                        )
                    })
            })
            .collect();

        let mut ai_min_distance: Vec<(StateRef, f32)> = initialized
            .iter()
            .map(|(state_ref, position)| {
                let min = eligible_players
                    .iter()
                    .map(|p| p.offset_position.distance_squared(*position))
                    .fold(f32::MAX, f32::min);
                (*state_ref, min)
            })
            .collect();

        let mut player_min_distance: Vec<(usize, f32)> = eligible_players
            .iter()
            .enumerate()
            .map(|(player_index, p)| {
                let min = initialized
                    .iter()
                    .map(|(_, position)| p.offset_position.distance_squared(*position))
                    .fold(f32::MAX, f32::min);
                (player_index, min)
            })
            .collect();

        // Farthest first: far-from-players AI despawn first, far-from-AI
        // players spawn first.
        ai_min_distance.sort_by(|a, b| b.1.total_cmp(&a.1));
        player_min_distance.sort_by(|a, b| b.1.total_cmp(&a.1));

        // Phase 4: despawn
        for &slot in &ai_slots {
            manager.entry_cars[slot].remove_overlapping_states(now_ms, &self.params);
            manager.entry_cars[slot].remove_unsafe_states(
                slot,
                &ai_min_distance,
                now_ms,
                &self.params,
            );
        }

        self.index.rebuild(&manager.entry_cars);

        // Spawn candidates in slot/pool insertion order
        let mut candidates: Vec<StateRef> = ai_slots
            .iter()
            .flat_map(|&slot| {
                manager.entry_cars[slot]
                    .ai_states
                    .iter()
                    .enumerate()
                    .filter(|(_, state)| !state.initialized)
                    .map(move |(state_index, _)| StateRef {
                        slot,
                        state: state_index,
                    })
            })
            .collect();

        let mut player_pool = player_min_distance;

        while !player_pool.is_empty() && !candidates.is_empty() {
            let pick = triangular_weighted_index(&mut self.rng, player_pool.len());
            let (player_index, _) = player_pool.remove(pick);
            let player = &eligible_players[player_index];

            let Some(spawn_point) = self.find_spawn_point(manager, player) else {
                continue;
            };
            let Some(spawn_pos) = self.spline.point(spawn_point).map(|p| p.position) else {
                continue;
            };

            let previous_ai = self
                .index
                .find_nearest(&self.spline, spawn_point, NEIGHBOR_SEARCH_DISTANCE_M, false, None)
                .map(|(entry, _)| AiNeighbor {
                    position: entry.position,
                    speed: entry.speed,
                });
            let next_ai = self
                .index
                .find_nearest(&self.spline, spawn_point, NEIGHBOR_SEARCH_DISTANCE_M, true, None)
                .map(|(entry, _)| AiNeighbor {
                    position: entry.position,
                    speed: entry.speed,
                });

            let accepted = candidates.iter().position(|candidate| {
                manager.entry_cars[candidate.slot].ai_states[candidate.state].can_spawn(
                    spawn_pos,
                    previous_ai.as_ref(),
                    next_ai.as_ref(),
                    &self.params,
                )
            });

            // First accepting state wins; if none accepts, the spawn point
            // is not retried with another player this tick.
            if let Some(found) = accepted {
                let state_ref = candidates.remove(found);
                let state = &mut manager.entry_cars[state_ref.slot].ai_states[state_ref.state];
                state.teleport(&self.spline, spawn_point, now_ms, &self.params);
                self.index.insert(
                    spawn_point,
                    IndexedAiState {
                        state_ref,
                        speed: state.current_speed,
                        position: state.status.position,
                    },
                );
                debug!(
                    "Spawned state {}/{} at point {} for player slot {}",
                    state_ref.slot, state_ref.state, spawn_point, player.slot
                );
            }
        }
    }

    fn eligible_players(&self, manager: &EntryCarManager, now_ms: u64) -> Vec<EligiblePlayer> {
        let params = &self.params;
        manager
            .entry_cars
            .iter()
            .enumerate()
            .filter(|(_, car)| !car.ai_controlled && car.is_player_live())
            .filter(|(_, car)| now_ms.saturating_sub(car.last_active_ms) < params.player_afk_timeout_ms)
            .filter(|(_, car)| {
                params.two_way_traffic
                    || params.wrong_way_traffic
                    || self.driving_right_way(car.status.position, car.status.velocity)
            })
            .map(|(slot, car)| {
                let velocity = car.status.velocity;
                let offset = velocity.normalize_or_zero() * params.player_position_offset_m;
                EligiblePlayer {
                    slot,
                    position: car.status.position,
                    offset_position: car.status.position + offset,
                    velocity,
                }
            })
            .collect()
    }

    fn driving_right_way(&self, position: Vec3, velocity: Vec3) -> bool {
        let (point_id, _) = self.spline.world_to_spline(position);
        if point_id < 0 {
            return false;
        }
        self.spline.forward(point_id).dot(velocity) > 0.0
    }

    /// Spawn-point search around a target player.
    fn find_spawn_point(&mut self, manager: &EntryCarManager, player: &EligiblePlayer) -> Option<i32> {
        let params = Arc::clone(&self.params);
        let spline = Arc::clone(&self.spline);

        let (player_point, distance_squared) = spline.world_to_spline(player.position);
        if player_point < 0
            || spline.next(player_point) < 0
            || distance_squared > params.max_player_distance_to_ai_spline_squared()
        {
            return None;
        }

        let mut direction = if spline.forward(player_point).dot(player.velocity) >= 0.0 {
            1
        } else {
            -1
        };

        let spawn_distance = self
            .rng
            .random_range(params.min_spawn_distance_points..params.max_spawn_distance_points)
            as i32;

        // Branch choices recorded for this search only
        let mut evaluator = JunctionEvaluator::new();
        let mut candidate = spline.traverse(
            &mut evaluator,
            &mut self.rng,
            player_point,
            spawn_distance * direction,
        );
        candidate = self.select_lane_for_player(candidate, player);

        if spline.next(candidate) >= 0 {
            direction = if spline.forward(candidate).dot(player.velocity) >= 0.0 {
                1
            } else {
                -1
            };
        }

        // Safety loop, budgeted in spline points. Progress is measured as
        // id distance, not graph distance, so junction hops undercount.
        let budget = (params.max_spawn_distance_points as i32 - spawn_distance).max(0);
        let start = candidate;
        while !self.is_position_safe(manager, candidate) {
            let stepped = spline.traverse(
                &mut evaluator,
                &mut self.rng,
                candidate,
                direction * SAFETY_STEP_POINTS,
            );
            if stepped == candidate {
                return None;
            }
            candidate = stepped;
            if (candidate - start).abs() > budget {
                return None;
            }
        }

        Some(self.select_lane_for_player(candidate, player))
    }

    /// Lane choice at a spawn candidate, optionally biased toward the
    /// target player's direction of travel.
    fn select_lane_for_player(&mut self, point_id: i32, player: &EligiblePlayer) -> i32 {
        if point_id < 0 {
            return point_id;
        }
        let params = &self.params;
        if !(params.prioritize_player_traffic && params.two_way_traffic) {
            return self.spline.random_lane(point_id, &mut self.rng);
        }

        let lanes = self.spline.lanes(point_id).to_vec();
        if lanes.len() <= 1 {
            return self.spline.random_lane(point_id, &mut self.rng);
        }

        let (player_point, _) = self.spline.world_to_spline(player.position);
        if player_point < 0 {
            return self.spline.random_lane(point_id, &mut self.rng);
        }

        let (same, opposite): (Vec<i32>, Vec<i32>) = lanes
            .iter()
            .partition(|&&lane| self.spline.is_same_direction(player_point, lane));

        let pool = if !same.is_empty() && !opposite.is_empty() {
            if self.rng.random::<f32>() < params.same_direction_traffic_probability {
                same
            } else {
                opposite
            }
        } else if !same.is_empty() {
            same
        } else if !opposite.is_empty() {
            opposite
        } else {
            return self.spline.random_lane(point_id, &mut self.rng);
        };

        pool[self.rng.random_range(0..pool.len())]
    }

    /// A point is safe when every AI slot accepts it and no connected
    /// player sits within the spawn safety radius.
    fn is_position_safe(&self, manager: &EntryCarManager, point_id: i32) -> bool {
        let Some(point) = self.spline.point(point_id) else {
            return false;
        };
        let position = point.position;

        if !manager
            .entry_cars
            .iter()
            .all(|car| car.is_position_safe_for(position, &self.params))
        {
            return false;
        }

        let safety_squared = self.params.spawn_safety_distance_to_player_squared();
        manager
            .entry_cars
            .iter()
            .filter(|car| car.is_player_live())
            .all(|car| car.status.position.distance_squared(position) >= safety_squared)
    }

    /// Redistributes AI identities over the AI-owned slots.
    ///
    /// Exactly `min(player_count · per_player, max_ai_target)` identities
    /// are dealt out, remainder to the lowest slot indices.
    pub fn adjust_overbooking(&mut self, manager: &mut EntryCarManager) {
        let player_count = manager.connected_count();
        let ai_slots: Vec<usize> = manager
            .entry_cars
            .iter()
            .enumerate()
            .filter(|(_, car)| car.client.is_none() && car.ai_controlled)
            .map(|(index, _)| index)
            .collect();
        if ai_slots.is_empty() {
            return;
        }

        let params = Arc::clone(&self.params);
        let per_player = (params.ai_per_player_target as f32 * params.traffic_density).round()
            as usize;
        let per_player = per_player.min(ai_slots.len());
        let target_ai = (player_count * per_player).min(params.max_ai_target as usize);

        let base = target_ai / ai_slots.len();
        let rest = target_ai % ai_slots.len();

        info!(
            "Overbooking adjusted: {} players, {} AI slots, {} target AI",
            player_count,
            ai_slots.len(),
            target_ai
        );

        for (position, &slot) in ai_slots.iter().enumerate() {
            let count = base + usize::from(position < rest);
            manager.entry_cars[slot].set_ai_overbooking(count, &params, &mut self.rng);
        }
    }

    /// Client finished loading: the slot is theirs now.
    pub async fn on_checksum_passed(&mut self, session_id: u8) {
        let manager = Arc::clone(&self.manager);
        let mut manager = manager.write().await;
        manager.checksum_passed(session_id);
        self.adjust_overbooking(&mut manager);
    }

    /// Client left: the slot reverts to AI where its mode allows.
    pub async fn on_client_disconnected(&mut self, session_id: u8) {
        let manager = Arc::clone(&self.manager);
        let mut manager = manager.write().await;
        manager.client_disconnected(session_id);
        self.adjust_overbooking(&mut manager);
    }

    /// Client ran into an AI car.
    ///
    /// The struck slot's state nearest to the impact stops, after a random
    /// delay so that neighboring AI don't all react on the same frame.
    pub async fn on_collision(&mut self, player_session_id: u8, target_session_id: u8) {
        let delay_ms = self
            .rng
            .random_range(COLLISION_REACTION_MIN_MS..=COLLISION_REACTION_MAX_MS);

        let target = {
            let manager = self.manager.read().await;
            let Some(player_car) = manager.slot_by_session(player_session_id) else {
                return;
            };
            let player_position = player_car.status.position;

            let Some(target_slot) = manager
                .entry_cars
                .iter()
                .position(|car| car.session_id == target_session_id && car.ai_controlled)
            else {
                return;
            };

            manager.entry_cars[target_slot]
                .ai_states
                .iter()
                .enumerate()
                .filter(|(_, state)| state.initialized)
                .map(|(state_index, state)| {
                    (
                        state_index,
                        state.status.position.distance_squared(player_position),
                    )
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .filter(|(_, distance)| *distance <= COLLISION_TARGET_RADIUS_SQUARED)
                .map(|(state_index, _)| StateRef {
                    slot: target_slot,
                    state: state_index,
                })
        };

        let Some(state_ref) = target else {
            return;
        };

        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let mut manager = manager.write().await;
            let state = &mut manager.entry_cars[state_ref.slot].ai_states[state_ref.state];
            if state.initialized {
                state.stop_for_collision();
            }
        });
    }
}

/// Triangular-weighted index draw: index 0 is most likely, weights fall
/// linearly to 1 for the last index.
///
/// Explicit cumulative walk over `n, n-1, …, 1` so the `n <= 1` edge is
/// trivially right.
pub fn triangular_weighted_index(rng: &mut impl Rng, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let total = n * (n + 1) / 2;
    let mut draw = rng.random_range(0..total);
    for index in 0..n {
        let weight = n - index;
        if draw < weight {
            return index;
        }
        draw -= weight;
    }
    n - 1
}

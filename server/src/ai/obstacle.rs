//! Obstacle-detection worker and the AI debug telemetry side-channel.
//!
//! Every 100 ms each AI slot re-evaluates its states against the occupancy
//! index and advances them. Obstacle detection is best-effort: a failing
//! slot is logged and skipped, never allowed to stall the worker.

use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{speed_to_kmh_u8, Packet, AI_DEBUG_CAR_COUNT, AI_DEBUG_PAD_SESSION_ID};
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Instant};

use crate::ai::spline::AiSpline;
use crate::ai::state::SlowestStateIndex;
use crate::config::AiParams;
use crate::entry_car_manager::EntryCarManager;
use crate::error::TickError;
use crate::session::SessionManager;

pub const OBSTACLE_TICK_MS: u64 = 100;

/// Partially filled debug chunk.
#[derive(Debug)]
struct DebugChunk {
    session_ids: [u8; AI_DEBUG_CAR_COUNT],
    closest_ai_obstacles: [i16; AI_DEBUG_CAR_COUNT],
    current_speeds: [u8; AI_DEBUG_CAR_COUNT],
    max_speeds: [u8; AI_DEBUG_CAR_COUNT],
    target_speeds: [u8; AI_DEBUG_CAR_COUNT],
    filled: usize,
}

impl DebugChunk {
    fn new() -> Self {
        Self {
            session_ids: [AI_DEBUG_PAD_SESSION_ID; AI_DEBUG_CAR_COUNT],
            closest_ai_obstacles: [0; AI_DEBUG_CAR_COUNT],
            current_speeds: [0; AI_DEBUG_CAR_COUNT],
            max_speeds: [0; AI_DEBUG_CAR_COUNT],
            target_speeds: [0; AI_DEBUG_CAR_COUNT],
            filled: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.filled == AI_DEBUG_CAR_COUNT
    }

    fn is_empty(&self) -> bool {
        self.filled == 0
    }

    fn push(&mut self, session_id: u8, obstacle_cm: i16, current: u8, max: u8, target: u8) {
        let i = self.filled;
        self.session_ids[i] = session_id;
        self.closest_ai_obstacles[i] = obstacle_cm;
        self.current_speeds[i] = current;
        self.max_speeds[i] = max;
        self.target_speeds[i] = target;
        self.filled += 1;
    }

    fn into_packet(self) -> Packet {
        Packet::AiDebug {
            session_ids: self.session_ids,
            closest_ai_obstacles: self.closest_ai_obstacles,
            current_speeds: self.current_speeds,
            max_speeds: self.max_speeds,
            target_speeds: self.target_speeds,
        }
    }
}

pub struct ObstacleDetector {
    manager: Arc<RwLock<EntryCarManager>>,
    session: Arc<SessionManager>,
    spline: Arc<AiSpline>,
    params: Arc<AiParams>,
    rng: StdRng,
    index: SlowestStateIndex,
}

impl ObstacleDetector {
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

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(OBSTACLE_TICK_MS));
        let mut last_tick = Instant::now();
        info!("Obstacle detection started ({} ms tick)", OBSTACLE_TICK_MS);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    if let Err(e) = self.update(dt).await {
                        error!("Obstacle detection tick failed: {}", e);
                    }
                }
            }
        }
        info!("Obstacle detection stopped");
    }

    /// One obstacle-detection pass over every AI slot.
    pub async fn update(&mut self, dt: f32) -> Result<(), TickError> {
        let now_ms = self.session.server_time_ms();
        let manager = Arc::clone(&self.manager);
        let mut manager = manager.write().await;
        self.tick(&mut manager, now_ms, dt);
        Ok(())
    }

    fn tick(&mut self, manager: &mut EntryCarManager, now_ms: u64, dt: f32) {
        self.index.rebuild(&manager.entry_cars);

        let player_positions: Vec<Vec3> = manager
            .entry_cars
            .iter()
            .filter(|car| car.is_player_live())
            .map(|car| car.status.position)
            .collect();

        for slot in 0..manager.entry_cars.len() {
            if !manager.entry_cars[slot].ai_controlled {
                continue;
            }
            manager.entry_cars[slot].ai_obstacle_detection(
                slot,
                &self.spline,
                &self.index,
                &player_positions,
                &mut self.rng,
                dt,
                now_ms,
                &self.params,
            );
        }

        if self.params.debug {
            self.broadcast_debug(manager);
        }
    }

    /// Samples every AI slot into fixed-size chunks and broadcasts them.
    fn broadcast_debug(&self, manager: &EntryCarManager) {
        let mut chunk = DebugChunk::new();

        for car in manager.entry_cars.iter().filter(|car| car.ai_controlled) {
            // The slot's first initialized state represents it on the overlay
            let Some(state) = car.ai_states.iter().find(|state| state.initialized) else {
                continue;
            };

            let obstacle_cm = state
                .closest_ai_obstacle_distance
                .clamp(i16::MIN as i32, i16::MAX as i32) as i16;

            chunk.push(
                car.session_id,
                obstacle_cm,
                speed_to_kmh_u8(state.current_speed),
                speed_to_kmh_u8(state.max_speed),
                speed_to_kmh_u8(state.target_speed),
            );

            if chunk.is_full() {
                manager.broadcast_packet(std::mem::replace(&mut chunk, DebugChunk::new()).into_packet());
            }
        }

        if !chunk.is_empty() {
            manager.broadcast_packet(chunk.into_packet());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::spline::{SplinePoint, NO_POINT};
    use crate::ai::state::NO_OBSTACLE_CM;
    use crate::ai::AiMode;
    use crate::entry_car::EntryCar;
    use crate::entry_car_manager::Outbound;
    use std::collections::HashMap;

    fn straight_spline(count: usize) -> Arc<AiSpline> {
        let points = (0..count)
            .map(|i| SplinePoint {
                id: i as i32,
                position: Vec3::new(i as f32 * 10.0, 0.0, 0.0),
                forward: Vec3::X,
                length: 10.0,
                next_id: if i + 1 < count { (i + 1) as i32 } else { NO_POINT },
                previous_id: if i > 0 { (i - 1) as i32 } else { NO_POINT },
                lane_ids: vec![i as i32],
                direction: 1,
            })
            .collect();
        Arc::new(AiSpline::new(points, HashMap::new()))
    }

    fn detector_fixture(
        spline: Arc<AiSpline>,
        cars: Vec<EntryCar>,
        params: AiParams,
    ) -> (
        ObstacleDetector,
        Arc<RwLock<EntryCarManager>>,
        tokio::sync::mpsc::UnboundedReceiver<Outbound>,
    ) {
        let (manager, outbound_rx) = EntryCarManager::new(cars);
        let manager = Arc::new(RwLock::new(manager));
        let detector = ObstacleDetector::new(
            Arc::clone(&manager),
            Arc::new(SessionManager::new()),
            spline,
            Arc::new(params),
            Some(11),
        );
        (detector, manager, outbound_rx)
    }

    #[tokio::test]
    async fn test_states_advance_each_tick() {
        let spline = straight_spline(50);
        let params = AiParams::default();
        let cars = vec![EntryCar::new(0, "traffic_sedan", AiMode::Fixed)];
        let (mut detector, manager, _rx) =
            detector_fixture(Arc::clone(&spline), cars, params.clone());

        {
            let mut manager = manager.write().await;
            let mut rng = StdRng::seed_from_u64(3);
            manager.entry_cars[0].set_ai_overbooking(1, &params, &mut rng);
            manager.entry_cars[0].ai_states[0].teleport(&spline, 0, 0, &params);
        }

        detector.update(0.1).await.unwrap();

        let manager = manager.read().await;
        let state = &manager.entry_cars[0].ai_states[0];
        // Free road, cruise speed held
        assert!(state.status.position.x > 0.0);
        assert_eq!(state.closest_ai_obstacle_distance, NO_OBSTACLE_CM);
    }

    #[tokio::test]
    async fn test_following_state_tracks_leader() {
        let spline = straight_spline(50);
        let params = AiParams::default();
        let cars = vec![
            EntryCar::new(0, "traffic_sedan", AiMode::Fixed),
            EntryCar::new(1, "traffic_sedan", AiMode::Fixed),
        ];
        let (mut detector, manager, _rx) =
            detector_fixture(Arc::clone(&spline), cars, params.clone());

        {
            let mut manager = manager.write().await;
            let mut rng = StdRng::seed_from_u64(3);
            for slot in 0..2 {
                manager.entry_cars[slot].set_ai_overbooking(1, &params, &mut rng);
            }
            // Follower 30 m behind a leader that is forced slow
            manager.entry_cars[0].ai_states[0].teleport(&spline, 0, 0, &params);
            manager.entry_cars[1].ai_states[0].teleport(&spline, 3, 0, &params);
            manager.entry_cars[1].ai_states[0].current_speed = 5.0;
        }

        detector.update(0.1).await.unwrap();

        let manager = manager.read().await;
        let follower = &manager.entry_cars[0].ai_states[0];
        assert!(follower.closest_ai_obstacle_distance > 0);
        assert!(follower.target_speed <= 5.0);
    }

    #[tokio::test]
    async fn test_debug_chunks_pad_and_split() {
        let spline = straight_spline(600);
        let params = AiParams {
            debug: true,
            ..Default::default()
        };
        // One more AI slot than fits a single chunk
        let cars: Vec<EntryCar> = (0..=AI_DEBUG_CAR_COUNT as u8)
            .map(|i| EntryCar::new(i, "traffic_sedan", AiMode::Fixed))
            .collect();
        let (mut detector, manager, mut rx) =
            detector_fixture(Arc::clone(&spline), cars, params.clone());

        {
            let mut manager = manager.write().await;
            let mut rng = StdRng::seed_from_u64(3);
            for slot in 0..=AI_DEBUG_CAR_COUNT {
                manager.entry_cars[slot].set_ai_overbooking(1, &params, &mut rng);
                manager.entry_cars[slot].ai_states[0].teleport(
                    &spline,
                    (slot * 30) as i32,
                    0,
                    &params,
                );
            }
        }

        detector.update(0.1).await.unwrap();

        let mut packets = Vec::new();
        while let Ok(outbound) = rx.try_recv() {
            match outbound {
                Outbound::Broadcast {
                    packet: Packet::AiDebug { session_ids, .. },
                } => packets.push(session_ids),
                other => panic!("unexpected outbound message: {:?}", other),
            }
        }

        assert_eq!(packets.len(), 2);
        // First chunk is full, second carries one entry plus padding
        assert!(packets[0].iter().all(|&id| id != AI_DEBUG_PAD_SESSION_ID));
        assert_eq!(packets[1][0], AI_DEBUG_CAR_COUNT as u8);
        assert!(packets[1][1..]
            .iter()
            .all(|&id| id == AI_DEBUG_PAD_SESSION_ID));
    }
}

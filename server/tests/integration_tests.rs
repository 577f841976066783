//! Integration tests for the AI traffic and auto-moderation directors
//!
//! These tests drive whole director ticks through the public API and
//! validate the cross-component behavior: spawn/despawn orchestration,
//! lane priorities, collision reactions and the moderation escalation
//! ladder.

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use shared::{CarStatus, Packet};
use tokio::sync::{mpsc, RwLock};

use server::ai::spline::{AiSpline, SplinePoint, NO_POINT};
use server::ai::{AiDirector, AiMode, ObstacleDetector};
use server::automod::AutoModerationDirector;
use server::config::{AiParams, AutoModerationParams, ViolationParams};
use server::entry_car::{ClientInfo, EntryCar};
use server::entry_car_manager::{EntryCarManager, Outbound};
use server::error::ConfigurationError;
use server::scripts::CspScriptProvider;
use server::session::{SessionManager, SunPosition, WeatherManager};

/// Straight single-lane spline along +X.
fn straight_spline(count: usize, spacing: f32) -> Arc<AiSpline> {
    let points = (0..count)
        .map(|i| SplinePoint {
            id: i as i32,
            position: Vec3::new(i as f32 * spacing, 0.0, 0.0),
            forward: Vec3::X,
            length: spacing,
            next_id: if i + 1 < count { (i + 1) as i32 } else { NO_POINT },
            previous_id: if i > 0 { (i - 1) as i32 } else { NO_POINT },
            lane_ids: vec![i as i32],
            direction: 1,
        })
        .collect();
    Arc::new(AiSpline::new(points, HashMap::new()))
}

/// Two parallel lanes; even ids run +X, odd ids run -X.
fn two_way_spline(pairs: usize, spacing: f32) -> Arc<AiSpline> {
    let mut points = Vec::new();
    for i in 0..pairs {
        let forward_id = (i * 2) as i32;
        let reverse_id = forward_id + 1;
        points.push(SplinePoint {
            id: forward_id,
            position: Vec3::new(i as f32 * spacing, 0.0, 0.0),
            forward: Vec3::X,
            length: spacing,
            next_id: if i + 1 < pairs { forward_id + 2 } else { NO_POINT },
            previous_id: if i > 0 { forward_id - 2 } else { NO_POINT },
            lane_ids: vec![forward_id, reverse_id],
            direction: 1,
        });
        points.push(SplinePoint {
            id: reverse_id,
            position: Vec3::new(i as f32 * spacing, 0.0, 4.0),
            forward: Vec3::NEG_X,
            length: spacing,
            next_id: if i > 0 { reverse_id - 2 } else { NO_POINT },
            previous_id: if i + 1 < pairs { reverse_id + 2 } else { NO_POINT },
            lane_ids: vec![forward_id, reverse_id],
            direction: -1,
        });
    }
    Arc::new(AiSpline::new(points, HashMap::new()))
}

fn entry_list(player_slots: usize, ai_slots: usize) -> Vec<EntryCar> {
    let mut cars = Vec::new();
    for i in 0..player_slots {
        cars.push(EntryCar::new(i as u8, "road_car", AiMode::None));
    }
    for i in 0..ai_slots {
        cars.push(EntryCar::new(
            (player_slots + i) as u8,
            "traffic_sedan",
            AiMode::Fixed,
        ));
    }
    cars
}

fn new_manager(
    cars: Vec<EntryCar>,
) -> (
    Arc<RwLock<EntryCarManager>>,
    mpsc::UnboundedReceiver<Outbound>,
) {
    let (manager, rx) = EntryCarManager::new(cars);
    (Arc::new(RwLock::new(manager)), rx)
}

async fn seat_player(
    manager: &Arc<RwLock<EntryCarManager>>,
    position: Vec3,
    velocity: Vec3,
) -> u8 {
    let mut guard = manager.write().await;
    let session_id = guard.client_connected(ClientInfo::new("driver")).unwrap();
    guard.checksum_passed(session_id);
    guard.position_update(
        session_id,
        CarStatus {
            position,
            velocity,
            status_flags: shared::STATUS_LIGHTS_ON,
            ..Default::default()
        },
        0,
    );
    session_id
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

/// AI DIRECTOR SCENARIOS
mod ai_director_scenarios {
    use super::*;

    /// Empty server: no clients, no AI activity, no packets
    #[tokio::test]
    async fn empty_server_stays_quiescent() {
        let spline = straight_spline(700, 1.0);
        let params = Arc::new(AiParams::default());
        let (manager, mut rx) = new_manager(entry_list(0, 10));
        let session = Arc::new(SessionManager::new());

        let mut director = AiDirector::new(
            Arc::clone(&manager),
            Arc::clone(&session),
            Arc::clone(&spline),
            Arc::clone(&params),
            Some(1),
        );
        let mut obstacle = ObstacleDetector::new(
            Arc::clone(&manager),
            Arc::clone(&session),
            Arc::clone(&spline),
            Arc::clone(&params),
            Some(1),
        );

        {
            let mut guard = manager.write().await;
            director.adjust_overbooking(&mut guard);
        }

        for _ in 0..5 {
            director.update().await.unwrap();
            obstacle.update(0.1).await.unwrap();
        }

        let guard = manager.read().await;
        let initialized: usize = guard
            .entry_cars
            .iter()
            .map(|car| car.initialized_state_count())
            .sum();
        assert_eq!(initialized, 0);
        assert!(drain(&mut rx).is_empty(), "no packets on an empty server");
    }

    /// Lone player with 10 AI slots and a per-player target of 3
    #[tokio::test]
    async fn lone_player_attracts_three_ai() {
        let spline = straight_spline(700, 1.0);
        let params = Arc::new(AiParams {
            ai_per_player_target: 3,
            traffic_density: 1.0,
            min_spawn_distance_points: 100,
            max_spawn_distance_points: 180,
            spawn_safety_distance_to_player_m: 80.0,
            min_state_distance_m: 30.0,
            min_ai_headway_m: 10.0,
            ..Default::default()
        });
        let (manager, _rx) = new_manager(entry_list(2, 10));
        let session = Arc::new(SessionManager::new());

        let mut director = AiDirector::new(
            Arc::clone(&manager),
            Arc::clone(&session),
            Arc::clone(&spline),
            Arc::clone(&params),
            Some(2),
        );

        let player_pos = Vec3::new(350.0, 0.0, 0.0);
        seat_player(&manager, player_pos, Vec3::X * 20.0).await;
        {
            let mut guard = manager.write().await;
            director.adjust_overbooking(&mut guard);

            let total: usize = guard
                .entry_cars
                .iter()
                .map(|car| car.target_ai_states)
                .sum();
            assert_eq!(total, 3, "overbooking conservation");
        }

        let mut initialized = 0;
        for _ in 0..40 {
            director.update().await.unwrap();
            let guard = manager.read().await;
            initialized = guard
                .entry_cars
                .iter()
                .map(|car| car.initialized_state_count())
                .sum();
            if initialized == 3 {
                break;
            }
        }
        assert_eq!(initialized, 3, "director never stabilized at 3 AI");

        let guard = manager.read().await;
        for car in guard.entry_cars.iter().filter(|car| car.ai_controlled) {
            for state in car.ai_states.iter().filter(|state| state.initialized) {
                let distance_squared = state.status.position.distance_squared(player_pos);
                assert!(
                    distance_squared >= params.spawn_safety_distance_to_player_squared(),
                    "spawned AI violates the safety separation"
                );
                assert!(
                    distance_squared <= params.player_radius_squared(),
                    "spawned AI outside the despawn radius would not survive"
                );
            }
        }
    }

    /// Lane priority on a two-way road: spawns predominantly follow the
    /// player's direction class
    #[tokio::test]
    async fn lane_priority_follows_player_direction() {
        let spline = two_way_spline(100, 10.0);
        let params = Arc::new(AiParams {
            two_way_traffic: true,
            prioritize_player_traffic: true,
            same_direction_traffic_probability: 0.8,
            min_spawn_distance_points: 20,
            max_spawn_distance_points: 50,
            ..Default::default()
        });
        let (manager, _rx) = new_manager(entry_list(1, 1));
        let session = Arc::new(SessionManager::new());

        let mut director = AiDirector::new(
            Arc::clone(&manager),
            Arc::clone(&session),
            Arc::clone(&spline),
            Arc::clone(&params),
            Some(3),
        );

        seat_player(&manager, Vec3::ZERO, Vec3::X * 20.0).await;
        {
            let mut guard = manager.write().await;
            guard.entry_cars[1].set_ai_overbooking(1, &params, &mut rand::rng());
        }

        let (player_point, _) = spline.world_to_spline(Vec3::ZERO);
        let trials = 1000;
        let mut spawned = 0;
        let mut same_direction = 0;

        for _ in 0..trials {
            director.update().await.unwrap();

            let mut guard = manager.write().await;
            for car in guard.entry_cars.iter_mut().filter(|car| car.ai_controlled) {
                for state in car.ai_states.iter_mut().filter(|state| state.initialized) {
                    spawned += 1;
                    if spline.is_same_direction(player_point, state.spline_point_id) {
                        same_direction += 1;
                    }
                    state.despawn();
                }
            }
        }

        assert!(spawned > 500, "too few spawns to judge: {}", spawned);
        let share = same_direction as f64 / spawned as f64;
        assert!(
            share >= 0.75,
            "same-direction share {:.3} below the configured bias",
            share
        );
    }

    /// Collision at close range stops exactly the nearest state
    #[tokio::test]
    async fn collision_bounce_reaches_nearest_state() {
        let spline = straight_spline(100, 10.0);
        let params = AiParams::default();
        let (manager, _rx) = new_manager(entry_list(1, 1));
        let session = Arc::new(SessionManager::new());

        let mut director = AiDirector::new(
            Arc::clone(&manager),
            Arc::clone(&session),
            Arc::clone(&spline),
            Arc::new(params.clone()),
            Some(4),
        );

        let player_session = seat_player(&manager, Vec3::new(40.0, 0.0, 0.0), Vec3::X).await;
        let ai_session = {
            let mut guard = manager.write().await;
            guard.entry_cars[1].set_ai_overbooking(2, &params, &mut rand::rng());
            // 10 m and 560 m from the player
            guard.entry_cars[1].ai_states[0].teleport(&spline, 5, 0, &params);
            guard.entry_cars[1].ai_states[1].teleport(&spline, 60, 0, &params);
            guard.entry_cars[1].session_id
        };

        director.on_collision(player_session, ai_session).await;
        tokio::time::sleep(std::time::Duration::from_millis(600)).await;

        let guard = manager.read().await;
        assert!(guard.entry_cars[1].ai_states[0].stopped_for_collision);
        assert!(!guard.entry_cars[1].ai_states[1].stopped_for_collision);
    }
}

/// AUTO-MODERATION SCENARIOS
mod automod_scenarios {
    use super::*;

    fn night_params() -> AutoModerationParams {
        AutoModerationParams {
            no_lights: ViolationParams {
                enabled: true,
                duration_seconds: 10,
                pits_before_kick: 1,
                speed_bound_ms: 5.6,
            },
            wrong_way: ViolationParams {
                enabled: true,
                duration_seconds: 6,
                pits_before_kick: 1,
                speed_bound_ms: 5.6,
            },
            blocking_road: ViolationParams {
                enabled: true,
                duration_seconds: 8,
                pits_before_kick: 1,
                // High bound so a moving wrong-way car also "blocks"
                speed_bound_ms: 50.0,
            },
            enable_client_messages: true,
        }
    }

    /// Wrong-way at night with lights off trips all three violations,
    /// warns for each, then the shortest duration escalates first
    #[tokio::test]
    async fn wrong_way_night_escalates_in_order() {
        let spline = straight_spline(100, 10.0);
        let (manager, mut rx) = new_manager(entry_list(1, 0));
        let weather = Arc::new(WeatherManager::new(Some(SunPosition {
            altitude_deg: -15.0,
            azimuth_deg: 0.0,
        })));
        let mut scripts = CspScriptProvider::new();

        let mut automod = AutoModerationDirector::new(
            Arc::clone(&manager),
            Arc::new(SessionManager::new()),
            weather,
            Some(Arc::clone(&spline)),
            night_params(),
            3.0,
            &mut scripts,
        )
        .unwrap();

        {
            let mut guard = manager.write().await;
            let session_id = guard.client_connected(ClientInfo::new("offender")).unwrap();
            guard.position_update(
                session_id,
                CarStatus {
                    position: Vec3::new(500.0, 0.0, 0.0),
                    velocity: Vec3::NEG_X * 30.0,
                    status_flags: 0,
                    ..Default::default()
                },
                0,
            );
        }

        // max(durations)/2 + 1 = 6 ticks: one warning per violation
        for _ in 0..6 {
            automod.update().await.unwrap();
        }
        let messages = drain(&mut rx);
        let warnings = messages
            .iter()
            .filter(|message| {
                matches!(
                    message,
                    Outbound::Send {
                        packet: Packet::ChatMessage { message, .. },
                        ..
                    } if message.starts_with("You will be")
                )
            })
            .count();
        assert_eq!(warnings, 3, "one warning per violation");
        assert!(
            !messages.iter().any(|message| matches!(
                message,
                Outbound::Send {
                    packet: Packet::CurrentSessionUpdate { .. },
                    ..
                }
            )),
            "no pit teleport before any duration is exceeded"
        );

        // min(durations) + 1 = tick 7: wrong-way crosses first
        automod.update().await.unwrap();
        let messages = drain(&mut rx);
        assert!(
            messages.iter().any(|message| matches!(
                message,
                Outbound::Send {
                    packet: Packet::CurrentSessionUpdate { .. },
                    ..
                }
            )),
            "pit teleport expected for the first threshold crossing"
        );
    }

    /// Starting wrong-way moderation without a spline refuses to start
    #[tokio::test]
    async fn config_without_spline_is_fatal() {
        let (manager, _rx) = new_manager(entry_list(1, 0));
        let weather = Arc::new(WeatherManager::new(Some(SunPosition {
            altitude_deg: -15.0,
            azimuth_deg: 0.0,
        })));
        let mut scripts = CspScriptProvider::new();

        let result = AutoModerationDirector::new(
            manager,
            Arc::new(SessionManager::new()),
            weather,
            None,
            night_params(),
            3.0,
            &mut scripts,
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingAiSpline { .. })
        ));
    }
}

//! Auto-moderation director.
//!
//! Once per second every connected, non-administrator car is evaluated
//! against three independent violation state machines: driving without
//! lights at night, driving against the spline direction, and standing on
//! the road. Each machine escalates warning → pit teleport → kick; any
//! tick in which the violation stops resets it completely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use shared::{
    Packet, AUTOMOD_FLAG_NO_LIGHTS, AUTOMOD_FLAG_NO_PARKING, AUTOMOD_FLAG_WRONG_WAY,
    SERVER_SESSION_ID,
};
use tokio::sync::{watch, RwLock};
use tokio::time::interval;

use crate::ai::spline::AiSpline;
use crate::config::{AutoModerationParams, ViolationParams};
use crate::entry_car_manager::EntryCarManager;
use crate::error::{ConfigurationError, TickError};
use crate::scripts::CspScriptProvider;
use crate::session::{SessionManager, WeatherManager};

pub const AUTOMOD_TICK_MS: u64 = 1_000;

/// Client-side companion script showing the active violation flags.
const AUTOMODERATION_LUA: &str = r#"-- drawn on the client HUD from AutoModerationFlags packets
local flags = 0
ac.onServerPacket(function(packet) flags = packet.flags end)
function script.drawUI()
    if flags ~= 0 then ui.text(describeFlags(flags)) end
end
"#;

/// Escalation bookkeeping for one violation on one car.
#[derive(Debug, Default, Clone)]
struct ViolationState {
    seconds: u32,
    pit_count: u32,
    warning_sent: bool,
}

/// Outcome of one 1 Hz step of a violation state machine.
#[derive(Debug, PartialEq, Eq)]
enum Escalation {
    None,
    /// Past half the duration: warn once, wording depends on what the
    /// threshold crossing will do.
    Warn { kick_next: bool },
    Pit,
    Kick,
}

impl ViolationState {
    fn step(&mut self, violating: bool, params: &ViolationParams) -> Escalation {
        if !violating {
            self.seconds = 0;
            self.warning_sent = false;
            return Escalation::None;
        }

        self.seconds += 1;

        if self.seconds > params.duration_seconds {
            if self.pit_count < params.pits_before_kick {
                self.pit_count += 1;
                // The pit teleport interrupts the violation; the ladder
                // restarts for the next offense.
                self.seconds = 0;
                self.warning_sent = false;
                return Escalation::Pit;
            }
            return Escalation::Kick;
        }

        if self.seconds > params.duration_seconds / 2 && !self.warning_sent {
            self.warning_sent = true;
            return Escalation::Warn {
                kick_next: self.pit_count >= params.pits_before_kick,
            };
        }

        Escalation::None
    }
}

/// Per-car moderation state.
#[derive(Debug, Clone)]
struct AutoModInstance {
    no_lights: ViolationState,
    wrong_way: ViolationState,
    blocking_road: ViolationState,
    current_flags: u8,
    current_spline_point_id: i32,
    current_spline_point_distance_squared: f32,
}

impl Default for AutoModInstance {
    fn default() -> Self {
        Self {
            no_lights: ViolationState::default(),
            wrong_way: ViolationState::default(),
            blocking_road: ViolationState::default(),
            current_flags: 0,
            current_spline_point_id: -1,
            current_spline_point_distance_squared: f32::MAX,
        }
    }
}

pub struct AutoModerationDirector {
    manager: Arc<RwLock<EntryCarManager>>,
    session: Arc<SessionManager>,
    weather: Arc<WeatherManager>,
    spline: Option<Arc<AiSpline>>,
    params: AutoModerationParams,
    lane_radius_squared: f32,
    instances: HashMap<u8, AutoModInstance>,
}

impl AutoModerationDirector {
    /// Validates the startup preconditions and registers the client
    /// script. A violation here is fatal by design.
    pub fn new(
        manager: Arc<RwLock<EntryCarManager>>,
        session: Arc<SessionManager>,
        weather: Arc<WeatherManager>,
        spline: Option<Arc<AiSpline>>,
        params: AutoModerationParams,
        lane_width_m: f32,
        scripts: &mut CspScriptProvider,
    ) -> Result<Self, ConfigurationError> {
        params.validate(spline.is_some(), weather.current_sun_position.is_some())?;
        scripts.add_script(AUTOMODERATION_LUA, "automoderation.lua");

        let lane_radius_squared = params.lane_radius_squared(lane_width_m);
        Ok(Self {
            manager,
            session,
            weather,
            spline,
            params,
            lane_radius_squared,
            instances: HashMap::new(),
        })
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(AUTOMOD_TICK_MS));
        info!("Auto-moderation started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.update().await {
                        error!("Auto-moderation tick failed: {}", e);
                    }
                }
            }
        }
        info!("Auto-moderation stopped");
    }

    /// One 1 Hz moderation pass over every connected car.
    pub async fn update(&mut self) -> Result<(), TickError> {
        let manager = Arc::clone(&self.manager);
        let manager = manager.read().await;

        for car in &manager.entry_cars {
            let session_id = car.session_id;

            let Some(client) = car.client.as_ref() else {
                self.instances.remove(&session_id);
                continue;
            };
            if !client.has_sent_first_update || client.is_administrator {
                self.instances.remove(&session_id);
                continue;
            }

            let spline_lookup = self
                .spline
                .as_ref()
                .map(|spline| spline.world_to_spline(car.status.position));

            let speed_squared = car.status.velocity.length_squared();

            let no_lights_violation = self.params.no_lights.enabled
                && self.weather.is_night()
                && !car.status.lights_on()
                && speed_squared > self.params.no_lights.speed_bound_ms.powi(2);

            let (wrong_way_violation, blocking_violation) = match (&self.spline, spline_lookup) {
                (Some(spline), Some((point_id, distance_squared))) if point_id >= 0 => {
                    let on_road = distance_squared < self.lane_radius_squared;
                    let against_flow = spline.forward(point_id).dot(car.status.velocity) < 0.0;

                    (
                        self.params.wrong_way.enabled
                            && on_road
                            && speed_squared > self.params.wrong_way.speed_bound_ms.powi(2)
                            && against_flow,
                        self.params.blocking_road.enabled
                            && on_road
                            && speed_squared < self.params.blocking_road.speed_bound_ms.powi(2),
                    )
                }
                _ => (false, false),
            };

            let instance = self.instances.entry(session_id).or_default();
            if let Some((point_id, distance_squared)) = spline_lookup {
                instance.current_spline_point_id = point_id;
                instance.current_spline_point_distance_squared = distance_squared;
            }

            let old_flags = instance.current_flags;
            let mut flags = old_flags;

            let mut actions: Vec<(Escalation, &'static str)> = Vec::with_capacity(3);

            let escalation = instance.no_lights.step(no_lights_violation, &self.params.no_lights);
            set_flag(&mut flags, AUTOMOD_FLAG_NO_LIGHTS, no_lights_violation);
            actions.push((escalation, "driving without lights"));

            let escalation = instance.wrong_way.step(wrong_way_violation, &self.params.wrong_way);
            set_flag(&mut flags, AUTOMOD_FLAG_WRONG_WAY, wrong_way_violation);
            actions.push((escalation, "driving the wrong way"));

            let escalation = instance
                .blocking_road
                .step(blocking_violation, &self.params.blocking_road);
            set_flag(&mut flags, AUTOMOD_FLAG_NO_PARKING, blocking_violation);
            actions.push((escalation, "blocking the road"));

            instance.current_flags = flags;

            for (escalation, reason) in actions {
                self.apply_escalation(&manager, session_id, car.time_offset, escalation, reason);
            }

            if self.params.enable_client_messages && flags != old_flags {
                manager.send_packet(session_id, Packet::AutoModerationFlags { flags });
            }
        }

        Ok(())
    }

    fn apply_escalation(
        &self,
        manager: &EntryCarManager,
        session_id: u8,
        time_offset: u64,
        escalation: Escalation,
        reason: &str,
    ) {
        match escalation {
            Escalation::None => {}
            Escalation::Warn { kick_next } => {
                if self.params.enable_client_messages {
                    let consequence = if kick_next {
                        "kicked"
                    } else {
                        "teleported to pits"
                    };
                    manager.send_packet(
                        session_id,
                        Packet::ChatMessage {
                            session_id: SERVER_SESSION_ID,
                            message: format!("You will be {} for {}!", consequence, reason),
                        },
                    );
                }
            }
            Escalation::Pit => {
                info!("Session {}: pit teleport for {}", session_id, reason);
                self.teleport_to_pits(manager, session_id, time_offset, reason);
            }
            Escalation::Kick => {
                manager.kick_async(session_id, reason);
            }
        }
    }

    /// Sends a session re-sync, which the sim answers by placing the car
    /// on its pit slot. The session start time is rebased by the slot's
    /// clock offset.
    fn teleport_to_pits(
        &self,
        manager: &EntryCarManager,
        session_id: u8,
        time_offset: u64,
        reason: &str,
    ) {
        let current = &self.session.current_session;
        manager.send_packet(
            session_id,
            Packet::CurrentSessionUpdate {
                current_session: current.configuration,
                grid: current.grid.clone(),
                track_grip: self.weather.current_weather.track_grip,
                start_time: current.start_time_ms.wrapping_sub(time_offset),
            },
        );
        manager.send_packet(
            session_id,
            Packet::ChatMessage {
                session_id: SERVER_SESSION_ID,
                message: format!("You have been teleported to pits for {}.", reason),
            },
        );
    }
}

fn set_flag(flags: &mut u8, flag: u8, active: bool) {
    if active {
        *flags |= flag;
    } else {
        *flags &= !flag;
    }
}

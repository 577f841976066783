//! Session and weather collaborators.
//!
//! The full session/weather subsystems live outside this suite; the
//! directors only need the monotonic server clock, the current session
//! descriptor and the sun/grip readings defined here.

use std::time::Instant;

/// Descriptor of the running session, as sent in `CurrentSessionUpdate`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Index of the session configuration in the event rotation.
    pub configuration: u8,
    /// Session ids in grid order.
    pub grid: Vec<u8>,
    /// Session start in server time.
    pub start_time_ms: u64,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            configuration: 0,
            grid: Vec::new(),
            start_time_ms: 0,
        }
    }
}

/// Monotonic server clock plus the current session descriptor.
#[derive(Debug)]
pub struct SessionManager {
    started: Instant,
    pub current_session: SessionInfo,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            current_session: SessionInfo::default(),
        }
    }

    /// Milliseconds since server start. Monotonic, unaffected by wall-clock
    /// adjustments.
    pub fn server_time_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Sun position in degrees.
#[derive(Debug, Clone, Copy)]
pub struct SunPosition {
    pub altitude_deg: f32,
    pub azimuth_deg: f32,
}

/// Sun altitude below which auto-moderation considers it night.
pub const NAUTICAL_TWILIGHT_ALTITUDE_DEG: f32 = -12.0;

#[derive(Debug, Clone)]
pub struct Weather {
    pub track_grip: f32,
}

/// Minimal weather collaborator: current grip and sun position.
#[derive(Debug)]
pub struct WeatherManager {
    pub current_weather: Weather,
    /// `None` when the track has no astronomical data.
    pub current_sun_position: Option<SunPosition>,
}

impl WeatherManager {
    pub fn new(sun: Option<SunPosition>) -> Self {
        Self {
            current_weather: Weather { track_grip: 0.98 },
            current_sun_position: sun,
        }
    }

    /// True below nautical twilight, i.e. dark enough to need lights.
    pub fn is_night(&self) -> bool {
        self.current_sun_position
            .map(|sun| sun.altitude_deg < NAUTICAL_TWILIGHT_ALTITUDE_DEG)
            .unwrap_or(false)
    }
}

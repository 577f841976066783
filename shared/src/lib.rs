//! # Shared Protocol Library
//!
//! Data structures shared between the traffic/moderation directors and the
//! network layer. It defines the wire packets the directors emit and the
//! car-status snapshot both directors read.
//!
//! ## Core Components
//!
//! ### Car Status
//! [`CarStatus`] is the per-slot kinematic snapshot: position, velocity and
//! the status-flag bitfield carried in every position update. AI identities
//! reuse the same structure so one slot can broadcast any of its states.
//!
//! ### Wire Packets
//! The [`Packet`] enum covers everything the directors send:
//! - `CurrentSessionUpdate`: session re-sync, used to teleport a car to pits
//! - `ChatMessage`: server chat (session id 255 denotes the server itself)
//! - `AutoModerationFlags`: active-violation bitfield, sent only on change
//! - `AiDebug`: packed AI telemetry chunk for the debug overlay
//!
//! ### Serialization
//! All packets derive `Serialize`/`Deserialize` and are encoded with
//! `bincode`; fixed-size arrays keep the debug packet layout stable.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Session id the server uses when speaking in chat.
pub const SERVER_SESSION_ID: u8 = 255;

/// Number of AI slots carried per [`Packet::AiDebug`] chunk.
///
/// Unused tail entries are padded with [`AI_DEBUG_PAD_SESSION_ID`].
pub const AI_DEBUG_CAR_COUNT: usize = 16;

/// Pad value marking an unused entry in an [`Packet::AiDebug`] chunk.
pub const AI_DEBUG_PAD_SESSION_ID: u8 = 0xFF;

/// Status-flag bit set while a car's headlights are on.
pub const STATUS_LIGHTS_ON: u32 = 0x20;

/// Active-violation bit for driving without lights at night.
pub const AUTOMOD_FLAG_NO_LIGHTS: u8 = 1;
/// Active-violation bit for driving against the spline direction.
pub const AUTOMOD_FLAG_WRONG_WAY: u8 = 2;
/// Active-violation bit for standing on the road ("no parking").
pub const AUTOMOD_FLAG_NO_PARKING: u8 = 4;

/// Kinematic snapshot of one car identity (player or AI).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarStatus {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Bitfield; see [`STATUS_LIGHTS_ON`].
    pub status_flags: u32,
    /// Server time of the update that produced this snapshot.
    pub timestamp_ms: u64,
}

impl CarStatus {
    /// Ground speed in m/s.
    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }

    pub fn lights_on(&self) -> bool {
        self.status_flags & STATUS_LIGHTS_ON != 0
    }
}

/// Packets emitted by the directors toward connected clients.
///
/// The network layer owns framing and transport; the directors only enqueue
/// these values. Everything here is server → client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Packet {
    /// Re-sends the current session to one client.
    ///
    /// Receiving this packet makes the sim place the car back on its grid
    /// slot, which is how auto-moderation teleports a car to the pits.
    /// `start_time` must be rebased by the receiving slot's time offset so
    /// the client's session clock stays consistent.
    CurrentSessionUpdate {
        current_session: u8,
        grid: Vec<u8>,
        track_grip: f32,
        start_time: u64,
    },

    /// Chat line attributed to `session_id` (255 = server).
    ChatMessage { session_id: u8, message: String },

    /// Bitfield over the auto-moderation violation flags.
    ///
    /// Emitted only when the bitfield changes value for the receiving car.
    AutoModerationFlags { flags: u8 },

    /// One chunk of AI debug telemetry, up to [`AI_DEBUG_CAR_COUNT`] slots.
    ///
    /// Speeds are km/h packed to 8 bits, obstacle distances centimetres
    /// packed to 16 bits. Slack entries carry session id 0xFF.
    AiDebug {
        session_ids: [u8; AI_DEBUG_CAR_COUNT],
        closest_ai_obstacles: [i16; AI_DEBUG_CAR_COUNT],
        current_speeds: [u8; AI_DEBUG_CAR_COUNT],
        max_speeds: [u8; AI_DEBUG_CAR_COUNT],
        target_speeds: [u8; AI_DEBUG_CAR_COUNT],
    },
}

/// Packs a speed in m/s into the 8-bit km/h debug representation.
pub fn speed_to_kmh_u8(speed_ms: f32) -> u8 {
    (speed_ms * 3.6).round().clamp(0.0, 255.0) as u8
}

/// Packs a distance in metres into the 16-bit centimetre debug field.
pub fn distance_to_cm_i16(distance_m: f32) -> i16 {
    (distance_m * 100.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

//! # Traffic & Moderation Server Extensions
//!
//! Server-side extension suite for a racing simulator: an AI traffic
//! director that populates the road network with computer-driven vehicles
//! around connected players, and an auto-moderation director that detects
//! and escalates misbehaving drivers.
//!
//! ## Architecture
//!
//! Three long-lived periodic workers operate over a shared slot table:
//!
//! - **AI director** (`ai::director`, ~500 ms): categorizes slots,
//!   despawns AI no player can see and spawns fresh traffic where player
//!   attention is thinnest.
//! - **Obstacle detection** (`ai::obstacle`, 100 ms): each AI state
//!   tracks the car ahead, retargets its speed and advances along the
//!   spline;
//!   optionally emits the debug telemetry side-channel.
//! - **Auto-moderation** (`automod`, 1 s): per-car violation state
//!   machines with a warning → pit-teleport → kick escalation ladder.
//!
//! All three take the [`entry_car_manager::EntryCarManager`] write/read
//! lock for the duration of a tick, so every tick is serialized and the
//! single-writer invariant holds by construction. Packets and kicks are
//! enqueued on an unbounded channel and drained by the network layer, so
//! no tick ever blocks on transport.
//!
//! Network framing, configuration parsing and the weather model live in
//! external collaborators; this crate only consumes their minimal
//! interfaces (`session`, the outbound queue, `scripts`).

pub mod ai;
pub mod automod;
pub mod config;
pub mod entry_car;
pub mod entry_car_manager;
pub mod error;
pub mod scripts;
pub mod session;

//! Slot table and outbound packet queue.
//!
//! The manager owns the fixed entry-car array and the channel toward the
//! network layer. Directors read and mutate slots through it; every
//! unicast, broadcast and kick is enqueued and drained by the transport
//! outside of any tick.

use std::collections::HashMap;

use log::{info, warn};
use shared::Packet;
use tokio::sync::mpsc;

use crate::ai::AiMode;
use crate::entry_car::{ClientInfo, EntryCar};

/// Messages from the directors to the network layer.
#[derive(Debug)]
pub enum Outbound {
    Send { session_id: u8, packet: Packet },
    Broadcast { packet: Packet },
    Kick { session_id: u8, reason: String },
}

/// Fixed slot table plus connection bookkeeping.
pub struct EntryCarManager {
    pub entry_cars: Vec<EntryCar>,
    /// Session id → slot index for every slot with a client.
    connected_cars: HashMap<u8, usize>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl EntryCarManager {
    /// Builds the manager around a prepared entry list. Returns the
    /// receiving end of the outbound queue for the network layer.
    pub fn new(entry_cars: Vec<EntryCar>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                entry_cars,
                connected_cars: HashMap::new(),
                outbound_tx,
            },
            outbound_rx,
        )
    }

    pub fn slot_by_session(&self, session_id: u8) -> Option<&EntryCar> {
        self.entry_cars.iter().find(|car| car.session_id == session_id)
    }

    pub fn slot_by_session_mut(&mut self, session_id: u8) -> Option<&mut EntryCar> {
        self.entry_cars
            .iter_mut()
            .find(|car| car.session_id == session_id)
    }

    /// Session ids of all connected clients.
    pub fn connected_session_ids(&self) -> Vec<u8> {
        self.connected_cars.keys().copied().collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connected_cars.len()
    }

    /// Seats a client in the first open non-fixed slot.
    ///
    /// The slot keeps hosting AI until the client passes its checksum;
    /// see [`checksum_passed`](Self::checksum_passed).
    pub fn client_connected(&mut self, client: ClientInfo) -> Option<u8> {
        let index = self
            .entry_cars
            .iter()
            .position(|car| car.client.is_none() && car.ai_mode != AiMode::Fixed)?;

        let session_id = self.entry_cars[index].session_id;
        info!("Client {} connected to slot {}", client.name, session_id);
        self.entry_cars[index].client = Some(client);
        self.connected_cars.insert(session_id, index);
        Some(session_id)
    }

    /// Client finished loading; the slot becomes player-owned.
    pub fn checksum_passed(&mut self, session_id: u8) {
        if let Some(car) = self.slot_by_session_mut(session_id) {
            car.set_ai_control(false);
        }
    }

    /// Removes a client; the slot reverts to AI where its mode allows.
    pub fn client_disconnected(&mut self, session_id: u8) {
        self.connected_cars.remove(&session_id);
        if let Some(car) = self.slot_by_session_mut(session_id) {
            if let Some(client) = car.client.take() {
                info!("Client {} disconnected from slot {}", client.name, session_id);
            }
            if car.ai_mode != AiMode::None {
                car.set_ai_control(true);
            }
        }
    }

    /// Applies a position update to the owning slot.
    pub fn position_update(&mut self, session_id: u8, status: shared::CarStatus, now_ms: u64) {
        if let Some(car) = self.slot_by_session_mut(session_id) {
            car.status = status;
            car.last_active_ms = now_ms;
            if let Some(client) = car.client.as_mut() {
                client.has_sent_first_update = true;
            }
        }
    }

    pub fn send_packet(&self, session_id: u8, packet: Packet) {
        if self
            .outbound_tx
            .send(Outbound::Send { session_id, packet })
            .is_err()
        {
            warn!("Outbound queue closed; dropping packet for {}", session_id);
        }
    }

    pub fn broadcast_packet(&self, packet: Packet) {
        if self.outbound_tx.send(Outbound::Broadcast { packet }).is_err() {
            warn!("Outbound queue closed; dropping broadcast");
        }
    }

    /// Fire-and-forget kick; the transport completes it after the tick.
    pub fn kick_async(&self, session_id: u8, reason: impl Into<String>) {
        let reason = reason.into();
        info!("Kicking session {}: {}", session_id, reason);
        if self
            .outbound_tx
            .send(Outbound::Kick { session_id, reason })
            .is_err()
        {
            warn!("Outbound queue closed; kick for {} dropped", session_id);
        }
    }
}

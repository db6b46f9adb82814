// Citymesh Gateway - Durable store-and-forward uplink
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Uplink state machine
//!
//! A gateway node hands every received sensor-data envelope to an
//! [`Uplink`]. With a live backhaul session the message is published
//! immediately (`Direct`); otherwise it lands in the durable queue
//! and the uplink goes `Buffering` until the backlog has drained.
//! Draining is strictly oldest-first and stops on the first publish
//! failure, so delivery order is preserved across outages and
//! restarts.

use crate::config::UplinkConfig;
use crate::error::{GatewayError, PublishError, Result};
use crate::publish::{payload_json, topic_for};
use crate::queue::DurableQueue;
use citymesh::{Bridge, Envelope, NodeId, SensorData};
use log::{debug, error, info, warn};

/// Backhaul session used by the uplink
///
/// Implementations wrap a concrete broker client. `connect` is
/// expected to be bounded; the uplink paces calls to it on the
/// reconnect interval and never busy-loops.
pub trait Publisher {
    /// True while a session is established
    fn is_connected(&self) -> bool;

    /// Establish (or re-establish) the session
    fn connect(&mut self) -> std::result::Result<(), PublishError>;

    /// Publish one message
    fn publish(&mut self, topic: &str, payload: &[u8]) -> std::result::Result<(), PublishError>;
}

/// Delivery mode of the uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkState {
    /// Backhaul healthy; messages publish as they arrive
    Direct,
    /// Backlog exists; new messages queue behind it
    Buffering,
}

/// Store-and-forward uplink for one gateway node
pub struct Uplink<P: Publisher> {
    config: UplinkConfig,
    queue: DurableQueue,
    publisher: P,
    state: UplinkState,
    last_connect_attempt_ms: Option<u64>,
}

impl<P: Publisher> Uplink<P> {
    /// Open the uplink, recovering any backlog left on disk
    ///
    /// A non-empty queue forces `Buffering` even with a healthy
    /// session: the crash backlog must drain before fresh traffic or
    /// delivery order would invert.
    pub fn open(config: UplinkConfig, publisher: P) -> Result<Self> {
        let queue = DurableQueue::open(
            &config.buffer_path,
            config.max_buffer_bytes,
            config.max_frame_bytes,
        )?;
        let state = if queue.is_empty() {
            UplinkState::Direct
        } else {
            info!(
                "uplink: {} byte backlog on disk, starting in Buffering",
                queue.current_size()
            );
            UplinkState::Buffering
        };
        Ok(Self {
            config,
            queue,
            publisher,
            state,
            last_connect_attempt_ms: None,
        })
    }

    /// Current delivery mode
    pub fn state(&self) -> UplinkState {
        self.state
    }

    /// Read access to the durable queue
    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    /// Mutable queue access, for operator-level recovery
    pub fn queue_mut(&mut self) -> &mut DurableQueue {
        &mut self.queue
    }

    /// Handle one sensor-data envelope received off the mesh
    ///
    /// Non-sensor envelopes are ignored. A full queue surfaces as an
    /// error and the new message is dropped; the buffered backlog is
    /// never evicted to make room.
    pub fn on_sensor_data(&mut self, envelope: &Envelope, from: NodeId) -> Result<()> {
        let data = match envelope {
            Envelope::SensorData(data) => data,
            Envelope::Discovery(_) => {
                debug!("uplink: ignoring non-data envelope from 0x{:08x}", from);
                return Ok(());
            }
        };

        if self.state == UplinkState::Direct && self.publisher.is_connected() {
            match self.publish_now(from, data) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("uplink: publish failed ({}), switching to Buffering", e);
                }
            }
        }
        self.enqueue(from, envelope)
    }

    /// Periodic upkeep: reconnect pacing and backlog drain
    pub fn tick(&mut self, now_ms: u64) -> Result<()> {
        if !self.publisher.is_connected() {
            self.try_reconnect(now_ms);
            return Ok(());
        }
        if self.state == UplinkState::Buffering {
            self.drain()?;
        }
        Ok(())
    }

    fn try_reconnect(&mut self, now_ms: u64) {
        let due = match self.last_connect_attempt_ms {
            None => true,
            Some(at) => now_ms.saturating_sub(at) >= self.config.reconnect_interval_ms,
        };
        if !due {
            return;
        }
        self.last_connect_attempt_ms = Some(now_ms);
        match self.publisher.connect() {
            Ok(()) => info!("uplink: backhaul session established"),
            Err(e) => warn!("uplink: connect failed: {}", e),
        }
    }

    /// Replay the backlog oldest-first; stop on the first failure
    fn drain(&mut self) -> Result<()> {
        loop {
            let entry = match self.queue.peek_oldest() {
                Ok(entry) => entry,
                Err(crate::error::QueueError::Empty) => {
                    info!("uplink: backlog drained, switching to Direct");
                    self.state = UplinkState::Direct;
                    return Ok(());
                }
                Err(e) => {
                    // Corruption blocks the drain; recovery is an
                    // explicit discard_head by the operator.
                    error!("uplink: backlog blocked: {}", e);
                    return Err(e.into());
                }
            };

            // A head frame that can never publish blocks the drain
            // permanently; surfaced as an error, recovery is an
            // explicit discard_head. The publish-failure pause below
            // stays Ok: it clears on its own.
            let data = match Envelope::decode(&entry.payload) {
                Ok(Envelope::SensorData(data)) => data,
                Ok(other) => {
                    error!("uplink: backlog holds non-data envelope {}, drain blocked", other);
                    return Err(crate::error::QueueError::Corrupt {
                        reason: "non-data envelope in backlog".to_string(),
                    }
                    .into());
                }
                Err(e) => {
                    error!("uplink: backlog frame undecodable ({}), drain blocked", e);
                    return Err(citymesh::MeshError::from(e).into());
                }
            };

            if let Err(e) = self.publish_now(entry.origin, &data) {
                debug!("uplink: drain paused: {}", e);
                return Ok(());
            }
            self.queue.dequeue_oldest()?;
        }
    }

    fn publish_now(&mut self, origin: NodeId, data: &SensorData) -> Result<()> {
        let topic = topic_for(
            &self.config.base_topic,
            self.config.service_id,
            origin,
            &data.sensor_id,
        );
        let payload = payload_json(origin, data)?;
        self.publisher.publish(&topic, payload.as_bytes())?;
        debug!("uplink: published {} ({} bytes)", topic, payload.len());
        Ok(())
    }

    fn enqueue(&mut self, from: NodeId, envelope: &Envelope) -> Result<()> {
        let bytes = envelope
            .encode_to_vec(self.config.max_frame_bytes)
            .map_err(citymesh::MeshError::from)?;
        self.queue.append(from, &bytes)?;
        self.state = UplinkState::Buffering;
        debug!(
            "uplink: buffered {} bytes from 0x{:08x} ({} total)",
            bytes.len(),
            from,
            self.queue.current_size()
        );
        Ok(())
    }
}

impl<P: Publisher> Bridge for Uplink<P> {
    type Error = GatewayError;

    fn on_sensor_data(
        &mut self,
        envelope: &Envelope,
        from: NodeId,
    ) -> std::result::Result<(), Self::Error> {
        Uplink::on_sensor_data(self, envelope, from)
    }

    fn tick(&mut self, now_ms: u64) -> std::result::Result<(), Self::Error> {
        Uplink::tick(self, now_ms)
    }
}

// Citymesh Gateway - Durable store-and-forward uplink
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Citymesh Gateway - Durable store-and-forward uplink
//!
//! This crate turns a `citymesh` gateway-role node into a bridge to a
//! backhaul broker: sensor data received off the mesh is published as
//! JSON, and survives backhaul outages in a durable on-disk queue.
//!
//! ## Overview
//!
//! The [`Uplink`] implements `citymesh::Bridge`, so it plugs straight
//! into a `citymesh::Node`. While the broker session is healthy it
//! publishes each message as it arrives; on failure it buffers to
//! disk and replays the backlog oldest-first once the session
//! recovers, preserving delivery order across outages and reboots.
//!
//! ## Features
//!
//! - **Durable queue**: flat-file FIFO with a fixed byte budget,
//!   drop-newest when full so the oldest backlog survives
//! - **Ordered replay**: drain stops at the first failure; fresh
//!   traffic queues behind the backlog until it clears
//! - **Reconnect pacing**: session attempts spaced on a fixed
//!   interval, never busy-looped
//! - **Broker-agnostic**: the [`Publisher`] trait hides the concrete
//!   MQTT (or other) client
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use citymesh_gateway::{PublishError, Publisher, Uplink, UplinkConfig};
//!
//! struct StdoutPublisher;
//!
//! impl Publisher for StdoutPublisher {
//!     fn is_connected(&self) -> bool {
//!         true
//!     }
//!     fn connect(&mut self) -> Result<(), PublishError> {
//!         Ok(())
//!     }
//!     fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
//!         println!("{} {}", topic, String::from_utf8_lossy(payload));
//!         Ok(())
//!     }
//! }
//!
//! let config = UplinkConfig::with_base_topic("city/demo").service_id(7);
//! let uplink = Uplink::open(config, StdoutPublisher).unwrap();
//! // Hand `uplink` to citymesh::Node::new as the bridge.
//! ```

mod config;
mod error;
mod publish;
mod queue;
mod uplink;

// Public API
pub use config::UplinkConfig;
pub use error::{GatewayError, PublishError, QueueError, Result};
pub use publish::{payload_json, topic_for};
pub use queue::{DurableQueue, QueueEntry};
pub use uplink::{Publisher, Uplink, UplinkState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

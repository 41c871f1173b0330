//! Data sources feeding the monitor.
//!
//! Two source styles are normalized into one callback stream by
//! [`SensorFeed`]:
//! - pull: a [`ReadingSource`] fetched on a fixed interval
//! - push: a [`PushConnector`] whose stream delivers a full reading on
//!   every server-side update (the backend's Socket.IO `sensor_update`
//!   event)
//!
//! The backend implementations live in `client` and `socketio`; tests plug
//! in their own doubles through the same traits.

use std::future::Future;

use anyhow::Result;

use crate::models::SensorReading;

mod client;
mod feed;
mod socketio;

pub use client::BackendClient;
pub use feed::{SensorFeed, SubscriptionId};
pub use socketio::{
    decode_packet, sensor_update, Packet, SocketIoConnector, SocketIoStream, MAX_PACKET_BYTES,
    SENSOR_UPDATE_EVENT,
};

// ---

/// Something that can be asked for the latest reading.
///
/// Implemented by [`BackendClient`] over `GET /sensor-data`; driven on an
/// interval by [`SensorFeed::poll`].
pub trait ReadingSource: Send + Sync + 'static {
    /// Fetch the current reading.
    ///
    /// # Errors
    /// Any failure to reach the source or parse its answer. The poll
    /// worker logs it and tries again on the next tick.
    fn fetch(&self) -> impl Future<Output = Result<SensorReading>> + Send;
}

/// Opens a push stream. Called again after the stream ends or fails.
pub trait PushConnector: Send + Sync + 'static {
    type Stream: PushStream;

    /// Open a fresh session.
    ///
    /// # Errors
    /// Connection or handshake failures; the push worker waits the
    /// reconnect delay and calls again.
    fn connect(&self) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// A connected push stream.
pub trait PushStream: Send + 'static {
    /// Next full-state reading; `Ok(None)` once the server closes the stream.
    fn next_update(&mut self) -> impl Future<Output = Result<Option<SensorReading>>> + Send;
}

//! Websocket change-feed client for the brigade back office.
//!
//! Delivers committed insert/update/delete events for watched tables to
//! connected clients. Delivery is at-least-once; consumers must be
//! idempotent on row id. Events on one channel arrive in commit order,
//! but two independent channels on the same table carry no relative
//! ordering guarantee.

mod channel;
mod client;
mod error;
mod message;

pub use channel::{ChannelHandle, TableChannelBuilder};
pub use client::{ChangeClient, ChangeClientOptions, ConnectionState};
pub use error::RealtimeError;
pub use message::{ChangeEvent, ChangeOp, ChannelEvent, WireMessage};

//! The WebSocket protocol binding: JSON-RPC codec, server and client.

pub mod messages;

mod client;
mod server;

pub use client::{RemoteSubscription, WsClient};
pub use server::{ThingRegistry, WsServer};

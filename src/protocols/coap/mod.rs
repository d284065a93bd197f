//! The CoAP protocol binding: resources per interaction, Observe streaming.

mod client;
mod path;
mod server;

pub use client::CoapClient;
pub use path::{ResourceKind, ResourcePath};
pub use server::CoapServer;

pub mod bootnodes;
pub mod handler;
pub mod network;
pub mod serde_utils;
pub mod serve;
pub mod sync;
pub mod types;
pub mod wire;

pub use handler::{Handler, HandlerConfig, PeerHandle};
pub use types::{ConnectionState, DisconnectReason, PeerId};

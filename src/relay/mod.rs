//! Connection Relay Module
//! 
//! Accepts connections on a local unix socket and relays each one,
//! byte for byte, to a fixed remote TCP endpoint.

pub mod engine;
pub mod listener;
pub mod pipe;
pub mod session;
pub mod state;

pub use engine::Relay;
pub use listener::{generate_sock_file, SOCKET_SUFFIX};
pub use pipe::{CopyEnd, CopyOutcome, Direction};
pub use session::SessionStats;
pub use state::RelayState;

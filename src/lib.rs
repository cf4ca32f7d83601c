//! conn-proxy Library
//! 
//! Connection interception proxy for test harnesses. A [`Relay`] listens on
//! a throwaway unix socket and forwards every connection it accepts to one
//! fixed remote TCP address, so a test can sit in the middle of a
//! connection it would otherwise not control.

pub mod config;
pub mod logging;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use logging::{CapturingLogger, RelayLogger, TracingLogger};
pub use relay::{Relay, RelayState};
pub use shutdown::StopSignal;

/// Common error type for the proxy
pub type Result<T> = anyhow::Result<T>;

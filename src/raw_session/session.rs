//! Asynchronous decode sessions
//!
//! A [`Session`] owns exactly one engine handle. Every engine call is handed to
//! tokio's blocking pool so the caller's executor never stalls on decoding.

mod config;
mod handle;
mod state;


pub use config::{SessionConfig, SessionConfigBuilder};
pub use handle::Session;
pub use state::SessionState;

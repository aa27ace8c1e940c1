//! Media engine seam.
//!
//! `engine` defines the narrow interface the negotiator drives; `connection`
//! implements it on top of webrtc-rs.

pub mod connection;
pub mod engine;

pub use connection::*;
pub use engine::*;

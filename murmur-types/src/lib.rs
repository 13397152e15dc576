//! Shared type definitions for the murmur mesh.
//!
//! Everything that crosses a session channel lives here: chat messages,
//! connection and call proposals, session descriptions, and the
//! [`WireMessage`](network::WireMessage) envelope that multiplexes them.

pub mod call;
pub mod constants;
pub mod contact;
pub mod error;
pub mod message;
pub mod network;
pub mod primitives;
pub mod proposal;

//! Overlay formation, gossip dissemination and call signaling for the murmur
//! mesh.
//!
//! A node keeps a bounded set of channels to other peers, grows and repairs
//! that set with flooded connection proposals, spreads chat messages by
//! announce-then-pull gossip, and relays audio call offers. Everything runs on
//! a single event loop per node, see [`node::MeshNode`].

pub mod calls;
pub mod codec;
pub mod config;
pub mod contacts;
pub mod context;
pub mod error;
pub mod events;
pub mod gossip;
pub mod memory_transport;
pub mod node;
pub mod overlay;
pub mod registry;
pub mod rendezvous;
pub mod seen;
pub mod timers;
pub mod transport;

#[cfg(test)]
mod testing;

//! Boundary to the peer-connection layer.
//!
//! The protocol never sees sockets or ICE: a [`Transport`] hands out
//! [`Channel`]s whose offers and answers are opaque [`SessionDescription`]s,
//! and every channel reports what happens to it on a shared event sink.
//! An offer or answer is returned only once it is ready to transmit.

use std::sync::Arc;

use async_trait::async_trait;
use murmur_types::primitives::Label;
use murmur_types::proposal::SessionDescription;
use tokio::sync::mpsc;

use crate::error::RelayError;

/// Something that happened on a channel, keyed by its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened { label: Label },
    Message { label: Label, data: String },
    Closed { label: Label },
}

/// Where channels report their events.
pub type EventSink = mpsc::UnboundedSender<ChannelEvent>;

/// One side of a bidirectional, ordered, reliable channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Label shared by both ends of the channel.
    fn label(&self) -> &str;

    /// Offer or answer to hand to the remote side.
    fn local_description(&self) -> SessionDescription;

    /// Complete the handshake with the remote answer.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RelayError>;

    /// Send a text frame. Fails if the channel is not open.
    fn send(&self, data: &str) -> Result<(), RelayError>;

    /// Close the channel. Closing twice is a no-op.
    fn close(&self);
}

/// Factory for channels. `media` asks for an audio-capable connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_offer(
        &self,
        media: bool,
        sink: EventSink,
    ) -> Result<Arc<dyn Channel>, RelayError>;

    async fn create_answer(
        &self,
        offer: &SessionDescription,
        media: bool,
        sink: EventSink,
    ) -> Result<Arc<dyn Channel>, RelayError>;
}

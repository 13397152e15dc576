//! In-process transport: channels are linked through a shared [`MemoryNetwork`].
//!
//! The session description of a memory channel is `memory:<label>` (or
//! `memory+audio:<label>` for media channels); answering an offer looks the
//! offerer up by label, and setting the answer on the offerer opens both ends.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use murmur_types::primitives::Label;
use murmur_types::proposal::{SdpKind, SessionDescription};
use parking_lot::Mutex;

use crate::error::RelayError;
use crate::transport::{Channel, ChannelEvent, EventSink, Transport};

const DATA_SCHEME: &str = "memory:";
const MEDIA_SCHEME: &str = "memory+audio:";

#[derive(Default)]
struct NetworkState {
    offers: HashMap<Label, Weak<MemoryChannel>>,
    answers: HashMap<Label, Weak<MemoryChannel>>,
}

/// Shared broker that pairs offers with answers.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose channels live on this network.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
        }
    }

    /// Offers not yet completed.
    pub fn open_offers(&self) -> usize {
        self.state.lock().offers.len()
    }
}

/// [`Transport`] over a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
}

#[derive(Default)]
struct LinkState {
    peer: Option<Weak<MemoryChannel>>,
    open: bool,
    closed: bool,
}

/// One end of an in-memory channel.
pub struct MemoryChannel {
    label: Label,
    local: SessionDescription,
    sink: EventSink,
    network: MemoryNetwork,
    me: Weak<MemoryChannel>,
    link: Mutex<LinkState>,
}

fn description(kind: SdpKind, media: bool, label: &str) -> SessionDescription {
    let scheme = if media { MEDIA_SCHEME } else { DATA_SCHEME };
    SessionDescription {
        kind,
        sdp: format!("{scheme}{label}"),
    }
}

fn parse_label(desc: &SessionDescription) -> Result<&str, RelayError> {
    desc.sdp
        .strip_prefix(MEDIA_SCHEME)
        .or_else(|| desc.sdp.strip_prefix(DATA_SCHEME))
        .ok_or_else(|| RelayError::TransportFailure {
            reason: format!("not a memory session description: {}", desc.sdp),
        })
}

impl MemoryChannel {
    fn new(
        label: Label,
        local: SessionDescription,
        sink: EventSink,
        network: MemoryNetwork,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| MemoryChannel {
            label,
            local,
            sink,
            network,
            me: me.clone(),
            link: Mutex::new(LinkState::default()),
        })
    }

    fn open_with(&self, peer: Weak<MemoryChannel>) {
        {
            let mut link = self.link.lock();
            link.peer = Some(peer);
            link.open = true;
        }
        let _ = self.sink.send(ChannelEvent::Opened {
            label: self.label.clone(),
        });
    }

    fn deliver(&self, data: &str) -> Result<(), RelayError> {
        if !self.link.lock().open {
            return Err(RelayError::TransportFailure {
                reason: format!("channel {} is closed", self.label),
            });
        }
        self.sink
            .send(ChannelEvent::Message {
                label: self.label.clone(),
                data: data.to_string(),
            })
            .map_err(|_| RelayError::TransportFailure {
                reason: format!("receiver of {} is gone", self.label),
            })
    }

    fn remote_closed(&self) {
        {
            let mut link = self.link.lock();
            if link.closed {
                return;
            }
            link.closed = true;
            link.open = false;
            link.peer = None;
        }
        let _ = self.sink.send(ChannelEvent::Closed {
            label: self.label.clone(),
        });
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn local_description(&self) -> SessionDescription {
        self.local.clone()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RelayError> {
        if self.local.kind != SdpKind::Offer || desc.kind != SdpKind::Answer {
            return Err(RelayError::TransportFailure {
                reason: "only an offerer can accept an answer".to_string(),
            });
        }
        if parse_label(&desc)? != self.label {
            return Err(RelayError::TransportFailure {
                reason: format!("answer does not belong to channel {}", self.label),
            });
        }
        let answerer = {
            let mut state = self.network.state.lock();
            state.offers.remove(&self.label);
            state.answers.remove(&self.label)
        }
        .and_then(|weak| weak.upgrade())
        .ok_or_else(|| RelayError::TransportFailure {
            reason: format!("no answerer waiting on {}", self.label),
        })?;

        if self.link.lock().closed || answerer.link.lock().closed {
            return Err(RelayError::TransportFailure {
                reason: format!("channel {} closed during negotiation", self.label),
            });
        }
        answerer.open_with(self.me.clone());
        self.open_with(Arc::downgrade(&answerer));
        Ok(())
    }

    fn send(&self, data: &str) -> Result<(), RelayError> {
        let peer = {
            let link = self.link.lock();
            if !link.open {
                return Err(RelayError::TransportFailure {
                    reason: format!("channel {} is not open", self.label),
                });
            }
            link.peer.as_ref().and_then(Weak::upgrade)
        };
        match peer {
            Some(peer) => peer.deliver(data),
            None => Err(RelayError::TransportFailure {
                reason: format!("remote end of {} is gone", self.label),
            }),
        }
    }

    fn close(&self) {
        let peer = {
            let mut link = self.link.lock();
            if link.closed {
                return;
            }
            link.closed = true;
            link.open = false;
            link.peer.take()
        };
        {
            let mut state = self.network.state.lock();
            match self.local.kind {
                SdpKind::Offer => state.offers.remove(&self.label),
                SdpKind::Answer => state.answers.remove(&self.label),
            };
        }
        if let Some(peer) = peer.and_then(|weak| weak.upgrade()) {
            peer.remote_closed();
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_offer(
        &self,
        media: bool,
        sink: EventSink,
    ) -> Result<Arc<dyn Channel>, RelayError> {
        let label = uuid::Uuid::new_v4().to_string();
        let local = description(SdpKind::Offer, media, &label);
        let channel = MemoryChannel::new(label.clone(), local, sink, self.network.clone());
        self.network
            .state
            .lock()
            .offers
            .insert(label, Arc::downgrade(&channel));
        Ok(channel)
    }

    async fn create_answer(
        &self,
        offer: &SessionDescription,
        media: bool,
        sink: EventSink,
    ) -> Result<Arc<dyn Channel>, RelayError> {
        if offer.kind != SdpKind::Offer {
            return Err(RelayError::TransportFailure {
                reason: "cannot answer an answer".to_string(),
            });
        }
        let label = parse_label(offer)?.to_string();
        let mut state = self.network.state.lock();
        let offer_alive = state
            .offers
            .get(&label)
            .map_or(false, |weak| weak.strong_count() > 0);
        if !offer_alive {
            return Err(RelayError::TransportFailure {
                reason: format!("offer {label} is gone"),
            });
        }
        if state
            .answers
            .get(&label)
            .map_or(false, |weak| weak.strong_count() > 0)
        {
            return Err(RelayError::TransportFailure {
                reason: format!("offer {label} was already answered"),
            });
        }
        let local = description(SdpKind::Answer, media, &label);
        let channel = MemoryChannel::new(label.clone(), local, sink, self.network.clone());
        state.answers.insert(label, Arc::downgrade(&channel));
        Ok(channel)
    }
}

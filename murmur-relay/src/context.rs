//! State shared by every protocol component of a node.

use std::sync::Arc;

use murmur_crypto::identity::Identity;
use murmur_types::network::WireMessage;
use murmur_types::primitives::{Label, PeerId, ProposalId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::codec;
use crate::config::RelayConfig;
use crate::events::MeshEvent;
use crate::registry::{PendingTable, SessionRegistry};
use crate::timers::{TimerFired, Timers};
use crate::transport::{EventSink, Transport};

/// Events the node raises for itself.
#[derive(Debug)]
pub enum Internal {
    /// A session left the registry; `remaining` sessions are still open.
    SessionClosed { label: Label, remaining: usize },
    /// A frame from the rendezvous socket of `generation`; `None` once the
    /// socket is closed.
    Rendezvous {
        generation: u64,
        frame: Option<String>,
    },
}

/// Everything the overlay, gossip and call components operate on.
///
/// Owned by the node's event loop and lent to each handler in turn; no
/// handler keeps a reference past its return.
pub struct NodeContext {
    pub config: RelayConfig,
    /// Regenerated on every start.
    pub peer_id: PeerId,
    pub identity: Option<Arc<Identity>>,
    pub transport: Arc<dyn Transport>,
    /// Handed to every channel this node creates.
    pub sink: EventSink,
    pub registry: SessionRegistry,
    pub pending: PendingTable,
    pub timers: Timers,
    pub rng: StdRng,
    pub internal_tx: mpsc::UnboundedSender<Internal>,
    events: broadcast::Sender<MeshEvent>,
}

impl NodeContext {
    pub fn new(
        config: RelayConfig,
        transport: Arc<dyn Transport>,
        sink: EventSink,
        timer_tx: mpsc::UnboundedSender<TimerFired>,
        internal_tx: mpsc::UnboundedSender<Internal>,
        events: broadcast::Sender<MeshEvent>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut registry = SessionRegistry::new(config.max_degree);
        let closed_tx = internal_tx.clone();
        registry.set_on_close(Box::new(move |session, remaining| {
            let _ = closed_tx.send(Internal::SessionClosed {
                label: session.label.clone(),
                remaining,
            });
        }));
        Self {
            config,
            peer_id: uuid::Uuid::new_v4(),
            identity: None,
            transport,
            sink,
            registry,
            pending: PendingTable::new(),
            timers: Timers::new(timer_tx),
            rng,
            internal_tx,
            events,
        }
    }

    pub fn nickname(&self) -> &str {
        &self.config.nickname
    }

    pub fn fresh_id(&mut self) -> ProposalId {
        self.rng.gen()
    }

    pub fn emit(&self, event: MeshEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    /// Send `msg` on the session with `label`.
    ///
    /// A failed send closes the session. Returns whether the frame left.
    pub fn send(&mut self, label: &str, msg: WireMessage) -> bool {
        let data = match codec::encode_message(msg) {
            Ok(data) => data,
            Err(e) => {
                warn!(%label, error = %e, "dropping unencodable frame");
                return false;
            }
        };
        self.send_raw(label, &data)
    }

    /// Send `msg` on every session whose label is not in `except`.
    /// Returns how many sends succeeded.
    pub fn send_all_except(&mut self, msg: WireMessage, except: &[&str]) -> usize {
        let data = match codec::encode_message(msg) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "dropping unencodable frame");
                return 0;
            }
        };
        let targets: Vec<Label> = self
            .registry
            .iter()
            .filter(|s| !except.contains(&s.label.as_str()))
            .map(|s| s.label.clone())
            .collect();
        targets
            .iter()
            .filter(|label| self.send_raw(label, &data))
            .count()
    }

    fn send_raw(&mut self, label: &str, data: &str) -> bool {
        let Some(session) = self.registry.find_by_label(label) else {
            debug!(%label, "no session to send on");
            return false;
        };
        match session.channel.send(data) {
            Ok(()) => true,
            Err(e) => {
                warn!(%label, error = %e, "send failed, closing session");
                self.close_session(label);
                false
            }
        }
    }

    /// Close the session with `label` and its channel.
    pub fn close_session(&mut self, label: &str) -> bool {
        match self.registry.close(label) {
            Some(session) => {
                session.channel.close();
                true
            }
            None => false,
        }
    }

    /// Evict the longest-lived session, sparing `keep` when given.
    pub fn evict_oldest(&mut self, keep: Option<&str>) {
        let evicted = match keep {
            Some(keep) => self.registry.evict_oldest_except(keep),
            None => self.registry.evict_oldest(),
        };
        if let Some(session) = evicted {
            debug!(label = %session.label, "evicted oldest session");
            session.channel.close();
        }
    }
}

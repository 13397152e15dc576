use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use murmur_types::primitives::{Label, PeerId, ProposalId, Timestamp};
use rand::seq::IteratorRandom;
use rand::Rng;

use crate::error::RelayError;
use crate::transport::Channel;

/// Registry-assigned session identifier.
pub type SessionId = u64;

/// An open channel to a direct neighbor.
pub struct Session {
    pub id: SessionId,
    /// Unset for sessions opened through the rendezvous or by hand.
    pub peer_id: Option<PeerId>,
    pub label: Label,
    pub channel: Arc<dyn Channel>,
    pub connected_at: Instant,
}

/// Called with the removed session and the number of sessions left.
pub type CloseCallback = Box<dyn FnMut(&Session, usize) + Send>;

/// Tracks open sessions in admission order.
///
/// Lookups by label, id and peer id are O(1); the oldest session is the
/// first one in iteration order. Admission policy lives with the caller:
/// the registry only refuses to exceed its bound or to hold two sessions
/// to the same peer.
pub struct SessionRegistry {
    sessions: IndexMap<Label, Session>,
    by_id: HashMap<SessionId, Label>,
    by_peer: HashMap<PeerId, Label>,
    max_sessions: usize,
    next_id: SessionId,
    on_close: Option<CloseCallback>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: IndexMap::new(),
            by_id: HashMap::new(),
            by_peer: HashMap::new(),
            max_sessions,
            next_id: 1,
            on_close: None,
        }
    }

    /// Install the hook run whenever a session leaves the registry.
    pub fn set_on_close(&mut self, callback: CloseCallback) {
        self.on_close = Some(callback);
    }

    /// Register an open channel as a session.
    pub fn admit(
        &mut self,
        peer_id: Option<PeerId>,
        channel: Arc<dyn Channel>,
    ) -> Result<SessionId, RelayError> {
        if self.is_full() {
            return Err(RelayError::CapacityExceeded {
                limit: self.max_sessions,
            });
        }
        if let Some(peer) = peer_id {
            if self.by_peer.contains_key(&peer) {
                return Err(RelayError::DuplicatePeer { peer });
            }
        }
        let label = channel.label().to_string();
        if self.sessions.contains_key(&label) {
            return Err(RelayError::ChannelError {
                reason: format!("label {label} already registered"),
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.by_id.insert(id, label.clone());
        if let Some(peer) = peer_id {
            self.by_peer.insert(peer, label.clone());
        }
        self.sessions.insert(
            label.clone(),
            Session {
                id,
                peer_id,
                label,
                channel,
                connected_at: Instant::now(),
            },
        );
        Ok(id)
    }

    /// Remove the session with `label`, running the close hook.
    pub fn close(&mut self, label: &str) -> Option<Session> {
        let session = self.sessions.shift_remove(label)?;
        self.forget(&session);
        Some(session)
    }

    /// Remove the session with registry id `id`.
    pub fn close_by_id(&mut self, id: SessionId) -> Option<Session> {
        let label = self.by_id.get(&id)?.clone();
        self.close(&label)
    }

    /// Remove the longest-lived session.
    pub fn evict_oldest(&mut self) -> Option<Session> {
        let label = self.sessions.keys().next()?.clone();
        self.close(&label)
    }

    /// Remove the longest-lived session other than `keep`.
    pub fn evict_oldest_except(&mut self, keep: &str) -> Option<Session> {
        let label = self.sessions.keys().find(|l| l.as_str() != keep)?.clone();
        self.close(&label)
    }

    fn forget(&mut self, session: &Session) {
        self.by_id.remove(&session.id);
        if let Some(peer) = session.peer_id {
            self.by_peer.remove(&peer);
        }
        let remaining = self.sessions.len();
        if let Some(callback) = self.on_close.as_mut() {
            callback(session, remaining);
        }
    }

    pub fn find_by_label(&self, label: &str) -> Option<&Session> {
        self.sessions.get(label)
    }

    pub fn find_by_id(&self, id: SessionId) -> Option<&Session> {
        self.by_id.get(&id).and_then(|l| self.sessions.get(l))
    }

    pub fn find_by_peer_id(&self, peer: &PeerId) -> Option<&Session> {
        self.by_peer.get(peer).and_then(|l| self.sessions.get(l))
    }

    /// A uniformly chosen session, skipping `exclude` when given.
    pub fn random_session<R: Rng>(&self, rng: &mut R, exclude: Option<&str>) -> Option<&Session> {
        self.sessions
            .values()
            .filter(|s| Some(s.label.as_str()) != exclude)
            .choose(rng)
    }

    /// Sessions in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn labels(&self) -> Vec<Label> {
        self.sessions.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

/// Which protocol created a pending channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOrigin {
    /// Our offer, flooded as a connection proposal.
    Offer,
    /// Our answer to someone else's proposal.
    Answer,
    /// Created through the rendezvous or out of band.
    Rendezvous,
}

/// A channel that has been negotiated but has not opened yet.
pub struct PendingProposal {
    pub id: ProposalId,
    pub expires_at: Option<Timestamp>,
    pub channel: Arc<dyn Channel>,
    /// Remote peer, once known.
    pub peer_id: Option<PeerId>,
    pub origin: PendingOrigin,
}

/// Pending proposals by id, with a label index for channel-open lookups.
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<ProposalId, PendingProposal>,
    by_label: HashMap<Label, ProposalId>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `pending`, replacing any entry with the same id.
    pub fn insert(&mut self, pending: PendingProposal) {
        self.remove(pending.id);
        self.by_label
            .insert(pending.channel.label().to_string(), pending.id);
        self.entries.insert(pending.id, pending);
    }

    pub fn get(&self, id: ProposalId) -> Option<&PendingProposal> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: ProposalId) -> Option<&mut PendingProposal> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: ProposalId) -> Option<PendingProposal> {
        let pending = self.entries.remove(&id)?;
        self.by_label.remove(pending.channel.label());
        Some(pending)
    }

    pub fn take_by_label(&mut self, label: &str) -> Option<PendingProposal> {
        let id = *self.by_label.get(label)?;
        self.remove(id)
    }

    /// Whether a pending channel already targets `peer`.
    pub fn has_peer(&self, peer: &PeerId) -> bool {
        self.entries.values().any(|p| p.peer_id.as_ref() == Some(peer))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, returning them for cleanup.
    pub fn drain(&mut self) -> Vec<PendingProposal> {
        self.by_label.clear();
        self.entries.drain().map(|(_, p)| p).collect()
    }
}

//! Anti-entropy dissemination: message ids are pushed to every neighbor,
//! bodies are pulled on demand from the neighbors that announced them.

use std::collections::{HashMap, HashSet, VecDeque};

use murmur_crypto::envelope;
use murmur_types::message::{ChatMessage, MessageContent};
use murmur_types::network::WireMessage;
use murmur_types::primitives::{now_millis, Label, MessageId};
use tracing::{debug, info, warn};

use crate::contacts::ContactBook;
use crate::context::NodeContext;
use crate::error::RelayError;
use crate::events::MeshEvent;
use crate::seen::SeenSet;
use crate::timers::TimerKey;

/// Signed messages that failed verification, remembered so re-announcements
/// are ignored.
const MAX_REJECTED: usize = 4_096;

// ─── Announce Tracker ────────────────────────────────────────────────────────

struct Announced {
    /// Sessions that announced the id.
    sources: HashSet<Label>,
    /// Sources not yet asked for the body.
    untried: VecDeque<Label>,
    popularity: u32,
    first_seen: u64,
    in_flight: bool,
}

/// Ids announced to us whose bodies we do not have yet.
pub struct AnnounceTracker {
    entries: HashMap<MessageId, Announced>,
    capacity: usize,
    next_seq: u64,
}

/// Result of recording an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    New,
    Known,
    /// The tracker is full and the id was ignored.
    Full,
}

impl AnnounceTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Record that session `source` knows `id`.
    pub fn announce(&mut self, id: MessageId, source: &str) -> Tracked {
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.sources.insert(source.to_string()) {
                entry.untried.push_back(source.to_string());
                entry.popularity += 1;
            }
            return Tracked::Known;
        }
        if self.entries.len() >= self.capacity {
            return Tracked::Full;
        }
        let first_seen = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            id,
            Announced {
                sources: HashSet::from([source.to_string()]),
                untried: VecDeque::from([source.to_string()]),
                popularity: 1,
                first_seen,
                in_flight: false,
            },
        );
        Tracked::New
    }

    /// The next id to pull: most popular first, oldest first among equals.
    /// Ids already being pulled or without an untried source are skipped.
    pub fn next_pull(&self) -> Option<MessageId> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.in_flight && !e.untried.is_empty())
            .min_by(|(_, a), (_, b)| {
                b.popularity
                    .cmp(&a.popularity)
                    .then(a.first_seen.cmp(&b.first_seen))
            })
            .map(|(id, _)| *id)
    }

    /// Take the next untried source of `id`, marking it in flight.
    pub fn take_source(&mut self, id: &MessageId) -> Option<Label> {
        let entry = self.entries.get_mut(id)?;
        match entry.untried.pop_front() {
            Some(label) => {
                entry.in_flight = true;
                Some(label)
            }
            None => {
                entry.in_flight = false;
                None
            }
        }
    }

    /// Give up on `id` for now. Every source becomes eligible again.
    pub fn abandon(&mut self, id: &MessageId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.in_flight = false;
            entry.untried = entry.sources.iter().cloned().collect();
        }
    }

    /// Remove `id`, returning the sessions that announced it.
    pub fn remove(&mut self, id: &MessageId) -> HashSet<Label> {
        self.entries
            .remove(id)
            .map(|e| e.sources)
            .unwrap_or_default()
    }

    /// Drop a closed session from every entry; entries left without a
    /// source are forgotten.
    pub fn forget_source(&mut self, label: &str) {
        self.entries.retain(|_, entry| {
            entry.sources.remove(label);
            entry.untried.retain(|l| l != label);
            !entry.sources.is_empty()
        });
    }

    pub fn has_pullable(&self) -> bool {
        self.entries
            .values()
            .any(|e| !e.in_flight && !e.untried.is_empty())
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn popularity(&self, id: &MessageId) -> Option<u32> {
        self.entries.get(id).map(|e| e.popularity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Message cache plus the pull machinery around it.
pub struct Gossip {
    tracker: AnnounceTracker,
    cache: HashMap<MessageId, ChatMessage>,
    rejected: SeenSet<MessageId>,
}

impl Gossip {
    pub fn new(max_tracked_ids: usize) -> Self {
        Self {
            tracker: AnnounceTracker::new(max_tracked_ids),
            cache: HashMap::new(),
            rejected: SeenSet::new(MAX_REJECTED),
        }
    }

    pub fn has_message(&self, id: &MessageId) -> bool {
        self.cache.contains_key(id)
    }

    pub fn message(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.cache.get(id)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn tracked(&self) -> usize {
        self.tracker.len()
    }

    /// Build, sign and cache a new message, then announce its id.
    ///
    /// With `to` set the content is encrypted for the key the contact book
    /// holds for that nickname.
    pub fn create(
        &mut self,
        ctx: &mut NodeContext,
        contacts: &ContactBook,
        text: &str,
        to: Option<&str>,
    ) -> Result<MessageId, RelayError> {
        let (content, encrypted) = match to {
            Some(nickname) => {
                let key = contacts.crypto_key_for(nickname).ok_or_else(|| {
                    RelayError::UnknownRecipient {
                        nickname: nickname.to_string(),
                    }
                })?;
                (envelope::address(text, nickname, &key)?, true)
            }
            None => (MessageContent::Text(text.to_string()), false),
        };

        let mut message = ChatMessage::new(
            uuid::Uuid::new_v4(),
            now_millis(),
            content,
            ctx.nickname(),
        );
        message.encrypted = encrypted;
        if let Some(identity) = &ctx.identity {
            identity.sign_message(&mut message);
        }

        let id = message.id;
        self.cache.insert(id, message);
        let sent = ctx.send_all_except(WireMessage::IdAnnounce(id), &[]);
        info!(%id, private = encrypted, neighbors = sent, "message created");
        Ok(id)
    }

    /// A neighbor announced `id`.
    pub fn on_announce(&mut self, ctx: &mut NodeContext, label: &str, id: MessageId) {
        if self.cache.contains_key(&id) || self.rejected.contains(&id) {
            return;
        }
        match self.tracker.announce(id, label) {
            Tracked::Full => {
                warn!(%id, max = ctx.config.max_tracked_ids, "announce tracker full, ignoring id");
            }
            Tracked::New | Tracked::Known => {
                ctx.timers
                    .ensure(TimerKey::PullTick, ctx.config.pull_interval);
            }
        }
    }

    /// Serve a body if we have it. Unknown ids are ignored.
    pub fn on_pull_request(&self, ctx: &mut NodeContext, label: &str, id: MessageId) {
        match self.cache.get(&id) {
            Some(message) => {
                ctx.send(label, WireMessage::PullResponse(Box::new(message.clone())));
            }
            None => debug!(%id, %label, "pull for unknown message"),
        }
    }

    /// Drain one id from the pull queue.
    pub fn on_pull_tick(&mut self, ctx: &mut NodeContext) {
        if let Some(id) = self.tracker.next_pull() {
            self.pull_from_next_source(ctx, id);
        }
        if self.tracker.has_pullable() {
            ctx.timers
                .schedule(TimerKey::PullTick, ctx.config.pull_interval);
        }
    }

    /// The current source of `id` did not answer in time.
    pub fn on_pull_retry(&mut self, ctx: &mut NodeContext, id: MessageId) {
        if self.tracker.contains(&id) {
            debug!(%id, "pull timed out, trying next source");
            self.pull_from_next_source(ctx, id);
        }
    }

    fn pull_from_next_source(&mut self, ctx: &mut NodeContext, id: MessageId) {
        while let Some(source) = self.tracker.take_source(&id) {
            if ctx.send(&source, WireMessage::PullRequest(id)) {
                ctx.timers
                    .schedule(TimerKey::PullRetry(id), ctx.config.pull_retry);
                return;
            }
        }
        debug!(%id, "all sources tried, abandoning pull for now");
        self.tracker.abandon(&id);
        ctx.timers
            .ensure(TimerKey::PullTick, ctx.config.pull_interval);
    }

    /// A full message body arrived on `label`.
    ///
    /// Returns the delivered event, if the message is new and deliverable.
    pub fn on_body(
        &mut self,
        ctx: &mut NodeContext,
        contacts: &mut ContactBook,
        label: &str,
        mut message: ChatMessage,
    ) -> Option<MeshEvent> {
        let id = message.id;
        if self.cache.contains_key(&id) || self.rejected.contains(&id) {
            return None;
        }

        let provenance = match envelope::inspect(&message) {
            Ok(provenance) => provenance,
            Err(e) => {
                warn!(%id, %label, error = %e, "dropping invalid message");
                self.rejected.insert(id);
                self.tracker.remove(&id);
                ctx.timers.cancel(TimerKey::PullRetry(id));
                return None;
            }
        };
        message.verified = provenance.as_verified();
        message.warn_contact = contacts.observe(&message, provenance);

        let deliverable = self.open(ctx, &message);

        let mut aware = self.tracker.remove(&id);
        aware.insert(label.to_string());
        ctx.timers.cancel(TimerKey::PullRetry(id));
        self.cache.insert(id, message.clone());

        let except: Vec<&str> = aware.iter().map(String::as_str).collect();
        let announced = ctx.send_all_except(WireMessage::IdAnnounce(id), &except);
        debug!(%id, announced, verified = ?message.verified, "message stored");

        deliverable.map(|text| MeshEvent::MessageIncoming {
            message: Box::new(message),
            text: Some(text),
        })
    }

    /// Plaintext to deliver, if any.
    ///
    /// Private messages for other nicknames are relayed but not delivered;
    /// ones for us that fail to decrypt are treated the same way, since they
    /// may be meant for someone sharing our nickname.
    fn open(&self, ctx: &NodeContext, message: &ChatMessage) -> Option<String> {
        if !message.encrypted {
            return Some(message.content.signed_text().to_string());
        }
        let identity = ctx.identity.as_ref()?;
        match envelope::open_addressed(identity, ctx.nickname(), message) {
            Ok(text) => text,
            Err(e) => {
                debug!(id = %message.id, error = %e, "private message not for our key");
                None
            }
        }
    }

    /// A session closed; stop pulling from it.
    pub fn forget_source(&mut self, label: &str) {
        self.tracker.forget_source(label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::testing::{context, with_sessions};
    use murmur_crypto::identity::{Identity, IdentityParams};
    use std::sync::Arc;

    const PARAMS: IdentityParams = IdentityParams {
        rsa_bits: 1024,
        kdf_iterations: 1000,
    };

    fn body(text: &str) -> ChatMessage {
        ChatMessage::new(
            uuid::Uuid::new_v4(),
            1,
            MessageContent::Text(text.to_string()),
            "alice",
        )
    }

    fn announces(msgs: Vec<WireMessage>) -> Vec<MessageId> {
        msgs.into_iter()
            .filter_map(|m| match m {
                WireMessage::IdAnnounce(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_most_popular_pulled_first() {
        let mut tracker = AnnounceTracker::new(10);
        let (a, b, c) = (uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        tracker.announce(a, "s1");
        tracker.announce(b, "s1");
        tracker.announce(c, "s1");
        tracker.announce(b, "s2");
        assert_eq!(tracker.popularity(&b), Some(2));
        assert_eq!(tracker.next_pull(), Some(b));

        tracker.take_source(&b);
        // Equal popularity falls back to first-seen order.
        assert_eq!(tracker.next_pull(), Some(a));
    }

    #[test]
    fn test_repeat_announce_from_same_source_counts_once() {
        let mut tracker = AnnounceTracker::new(10);
        let id = uuid::Uuid::new_v4();
        assert_eq!(tracker.announce(id, "s1"), Tracked::New);
        assert_eq!(tracker.announce(id, "s1"), Tracked::Known);
        assert_eq!(tracker.popularity(&id), Some(1));
    }

    #[test]
    fn test_tracker_capacity() {
        let mut tracker = AnnounceTracker::new(1);
        tracker.announce(uuid::Uuid::new_v4(), "s1");
        assert_eq!(tracker.announce(uuid::Uuid::new_v4(), "s1"), Tracked::Full);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_sources_tried_in_order_then_recycled() {
        let mut tracker = AnnounceTracker::new(10);
        let id = uuid::Uuid::new_v4();
        tracker.announce(id, "s1");
        tracker.announce(id, "s2");
        assert_eq!(tracker.take_source(&id).as_deref(), Some("s1"));
        assert_eq!(tracker.next_pull(), None);
        assert_eq!(tracker.take_source(&id).as_deref(), Some("s2"));
        assert_eq!(tracker.take_source(&id), None);
        tracker.abandon(&id);
        assert_eq!(tracker.next_pull(), Some(id));
    }

    #[test]
    fn test_forget_source_drops_orphans() {
        let mut tracker = AnnounceTracker::new(10);
        let (a, b) = (uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        tracker.announce(a, "s1");
        tracker.announce(b, "s1");
        tracker.announce(b, "s2");
        tracker.forget_source("s1");
        assert!(!tracker.contains(&a));
        assert!(tracker.contains(&b));
    }

    #[tokio::test]
    async fn test_create_announces_to_every_session() {
        let mut t = context(RelayConfig::with_nickname("alice"));
        let stubs = with_sessions(&mut t.ctx, &["a", "b"]);
        let mut gossip = Gossip::new(10);
        let id = gossip
            .create(&mut t.ctx, &ContactBook::new(), "hello", None)
            .unwrap();

        assert!(gossip.has_message(&id));
        for stub in &stubs {
            assert_eq!(announces(stub.sent()), vec![id]);
        }
    }

    #[tokio::test]
    async fn test_private_message_to_unknown_nickname() {
        let mut t = context(RelayConfig::default());
        let mut gossip = Gossip::new(10);
        let result = gossip.create(&mut t.ctx, &ContactBook::new(), "psst", Some("bob"));
        assert!(matches!(result, Err(RelayError::UnknownRecipient { .. })));
        assert_eq!(gossip.cached(), 0);
    }

    #[tokio::test]
    async fn test_announce_then_pull() {
        let mut t = context(RelayConfig::default());
        let stubs = with_sessions(&mut t.ctx, &["a"]);
        let mut gossip = Gossip::new(10);
        let id = uuid::Uuid::new_v4();

        gossip.on_announce(&mut t.ctx, "a", id);
        assert!(t.ctx.timers.is_armed(TimerKey::PullTick));
        gossip.on_pull_tick(&mut t.ctx);
        assert_eq!(stubs[0].sent(), vec![WireMessage::PullRequest(id)]);
        assert!(t.ctx.timers.is_armed(TimerKey::PullRetry(id)));
    }

    #[tokio::test]
    async fn test_pull_request_for_unknown_id_is_ignored() {
        let mut t = context(RelayConfig::default());
        let stubs = with_sessions(&mut t.ctx, &["a"]);
        let gossip = Gossip::new(10);
        gossip.on_pull_request(&mut t.ctx, "a", uuid::Uuid::new_v4());
        assert!(stubs[0].sent().is_empty());
    }

    #[tokio::test]
    async fn test_body_delivered_once_and_reannounced_to_unaware() {
        let mut t = context(RelayConfig::default());
        let stubs = with_sessions(&mut t.ctx, &["a", "b", "c"]);
        let mut gossip = Gossip::new(10);
        let mut contacts = ContactBook::new();
        let msg = body("hi");
        let id = msg.id;

        gossip.on_announce(&mut t.ctx, "a", id);
        gossip.on_announce(&mut t.ctx, "b", id);
        let delivered = gossip.on_body(&mut t.ctx, &mut contacts, "a", msg.clone());
        assert!(matches!(
            delivered,
            Some(MeshEvent::MessageIncoming { text: Some(ref t), .. }) if t == "hi"
        ));
        assert!(gossip.on_body(&mut t.ctx, &mut contacts, "b", msg).is_none());

        assert!(announces(stubs[0].sent()).is_empty());
        assert!(announces(stubs[1].sent()).is_empty());
        assert_eq!(announces(stubs[2].sent()), vec![id]);
        assert_eq!(gossip.tracked(), 0);
        assert!(!t.ctx.timers.is_armed(TimerKey::PullRetry(id)));
    }

    #[tokio::test]
    async fn test_forged_signature_rejected_for_good() {
        let mut t = context(RelayConfig::default());
        let stubs = with_sessions(&mut t.ctx, &["a", "b"]);
        let mut gossip = Gossip::new(10);
        let mut contacts = ContactBook::new();
        let signer = Identity::generate(PARAMS).unwrap();
        let mut msg = body("original");
        signer.sign_message(&mut msg);
        msg.content = MessageContent::Text("forged".to_string());

        assert!(gossip
            .on_body(&mut t.ctx, &mut contacts, "a", msg.clone())
            .is_none());
        assert!(!gossip.has_message(&msg.id));
        gossip.on_announce(&mut t.ctx, "b", msg.id);
        assert_eq!(gossip.tracked(), 0);
        assert!(stubs.iter().all(|s| s.sent().is_empty()));
    }

    #[tokio::test]
    async fn test_private_message_for_us_is_decrypted() {
        let bob = Arc::new(Identity::generate(PARAMS).unwrap());
        let mut t = context(RelayConfig::with_nickname("bob"));
        t.ctx.identity = Some(bob.clone());
        let mut gossip = Gossip::new(10);
        let mut contacts = ContactBook::new();

        let mut msg = body("");
        msg.content = envelope::address("secret", "bob", bob.crypto_key()).unwrap();
        msg.encrypted = true;
        let delivered = gossip.on_body(&mut t.ctx, &mut contacts, "a", msg);
        assert!(matches!(
            delivered,
            Some(MeshEvent::MessageIncoming { text: Some(ref t), .. }) if t == "secret"
        ));
    }

    #[tokio::test]
    async fn test_private_message_for_others_is_relayed_not_delivered() {
        let carol = Identity::generate(PARAMS).unwrap();
        let mut t = context(RelayConfig::with_nickname("bob"));
        t.ctx.identity = Some(Arc::new(Identity::generate(PARAMS).unwrap()));
        let stubs = with_sessions(&mut t.ctx, &["a", "b"]);
        let mut gossip = Gossip::new(10);
        let mut contacts = ContactBook::new();

        let mut msg = body("");
        msg.content = envelope::address("for carol", "carol", carol.crypto_key()).unwrap();
        msg.encrypted = true;
        let id = msg.id;
        assert!(gossip.on_body(&mut t.ctx, &mut contacts, "a", msg).is_none());
        assert!(gossip.has_message(&id));
        assert_eq!(announces(stubs[1].sent()), vec![id]);
    }
}

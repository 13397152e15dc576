use std::sync::Arc;

use murmur_crypto::identity::Identity;
use murmur_storage::contact_store::ContactStore;
use murmur_storage::traits::KvStore;
use murmur_types::contact::PeerIdentityRecord;
use murmur_types::network::WireMessage;
use murmur_types::primitives::{Label, MessageId, PeerId, ProposalId};
use murmur_types::proposal::SessionDescription;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::calls::CallRouter;
use crate::codec;
use crate::config::RelayConfig;
use crate::contacts::ContactBook;
use crate::context::{Internal, NodeContext};
use crate::error::RelayError;
use crate::events::MeshEvent;
use crate::gossip::Gossip;
use crate::overlay;
use crate::registry::{PendingOrigin, PendingProposal};
use crate::rendezvous::{RendezvousClient, RendezvousConnector};
use crate::timers::{TimerFired, TimerKey};
use crate::transport::{ChannelEvent, Transport};

/// Snapshot of a node's tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStats {
    pub peer_id: PeerId,
    pub sessions: usize,
    pub pending_proposals: usize,
    pub tracked_ids: usize,
    pub cached_messages: usize,
    pub pending_calls: usize,
    pub contacts: usize,
}

type Reply<T> = oneshot::Sender<Result<T, RelayError>>;

enum Command {
    SendMessage {
        text: String,
        to: Option<String>,
        reply: Reply<MessageId>,
    },
    CallUser {
        to: Option<String>,
        reply: Reply<ProposalId>,
    },
    ConfirmCallsFrom {
        pseudo: String,
    },
    RegisterContact {
        fingerprint: String,
        reply: Reply<PeerIdentityRecord>,
    },
    Contacts {
        reply: oneshot::Sender<Vec<(String, PeerIdentityRecord)>>,
    },
    Join {
        room: String,
        server: String,
        reply: Reply<()>,
    },
    OfferLink {
        reply: Reply<(ProposalId, SessionDescription)>,
    },
    AnswerLink {
        offer: SessionDescription,
        reply: Reply<SessionDescription>,
    },
    CompleteLink {
        id: ProposalId,
        answer: SessionDescription,
        reply: Reply<()>,
    },
    Ban {
        label: Label,
        reply: oneshot::Sender<bool>,
    },
    HasMessage {
        id: MessageId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<NodeStats>,
    },
    Shutdown,
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Builder for a mesh node.
pub struct MeshNode {
    config: RelayConfig,
    transport: Arc<dyn Transport>,
    identity: Option<Arc<Identity>>,
    contact_store: Option<Arc<dyn KvStore>>,
    connector: Option<Arc<dyn RendezvousConnector>>,
}

impl MeshNode {
    pub fn new(config: RelayConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            identity: None,
            contact_store: None,
            connector: None,
        }
    }

    /// Sign outgoing messages and read private ones with `identity`.
    pub fn with_identity(mut self, identity: Arc<Identity>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Persist the contact book in `store`.
    pub fn with_contact_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.contact_store = Some(store);
        self
    }

    pub fn with_rendezvous(mut self, connector: Arc<dyn RendezvousConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Start the event loop on the current runtime.
    pub fn spawn(self) -> Result<MeshHandle, RelayError> {
        let contacts = match self.contact_store {
            Some(store) => ContactBook::with_store(ContactStore::new(store))?,
            None => ContactBook::new(),
        };
        let (sink, channel_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(1024);

        let max_tracked_ids = self.config.max_tracked_ids;
        let mut ctx = NodeContext::new(
            self.config,
            self.transport,
            sink,
            timer_tx,
            internal_tx,
            events.clone(),
        );
        ctx.identity = self.identity;
        let peer_id = ctx.peer_id;

        let node = Node {
            ctx,
            gossip: Gossip::new(max_tracked_ids),
            contacts,
            calls: CallRouter::new(),
            rendezvous: self.connector.map(RendezvousClient::new),
            channel_rx,
            timer_rx,
            internal_rx,
            command_rx,
        };
        let task = tokio::spawn(node.run());

        Ok(MeshHandle {
            peer_id,
            commands: command_tx,
            events,
            task: Arc::new(parking_lot::Mutex::new(Some(task))),
        })
    }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Cheap, cloneable access to a running node.
#[derive(Clone)]
pub struct MeshHandle {
    peer_id: PeerId,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<MeshEvent>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl MeshHandle {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    fn submit(&self, command: Command) -> Result<(), RelayError> {
        self.commands
            .send(command)
            .map_err(|_| RelayError::ChannelError {
                reason: "node stopped".to_string(),
            })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.submit(make(tx))?;
        rx.await.map_err(|_| RelayError::ChannelError {
            reason: "node dropped the request".to_string(),
        })
    }

    /// Publish a message, privately to `to` when given.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        to: Option<String>,
    ) -> Result<MessageId, RelayError> {
        let text = text.into();
        self.request(|reply| Command::SendMessage { text, to, reply })
            .await?
    }

    /// Ring `to`, or any neighbor when `None`.
    pub async fn call_user(&self, to: Option<String>) -> Result<ProposalId, RelayError> {
        self.request(|reply| Command::CallUser { to, reply }).await?
    }

    /// Accept calls from `pseudo`, including those already waiting.
    pub fn confirm_calls_from(&self, pseudo: impl Into<String>) -> Result<(), RelayError> {
        self.submit(Command::ConfirmCallsFrom {
            pseudo: pseudo.into(),
        })
    }

    pub async fn register_contact(
        &self,
        fingerprint: impl Into<String>,
    ) -> Result<PeerIdentityRecord, RelayError> {
        let fingerprint = fingerprint.into();
        self.request(|reply| Command::RegisterContact { fingerprint, reply })
            .await?
    }

    pub async fn contacts(&self) -> Result<Vec<(String, PeerIdentityRecord)>, RelayError> {
        self.request(|reply| Command::Contacts { reply }).await
    }

    /// Enter `room` through the rendezvous at `server`.
    pub async fn join(
        &self,
        room: impl Into<String>,
        server: impl Into<String>,
    ) -> Result<(), RelayError> {
        let (room, server) = (room.into(), server.into());
        self.request(|reply| Command::Join {
            room,
            server,
            reply,
        })
        .await?
    }

    /// Create an offer to hand to another node out of band.
    pub async fn offer_link(&self) -> Result<(ProposalId, SessionDescription), RelayError> {
        self.request(|reply| Command::OfferLink { reply }).await?
    }

    /// Answer an offer obtained out of band.
    pub async fn answer_link(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RelayError> {
        self.request(|reply| Command::AnswerLink { offer, reply })
            .await?
    }

    /// Finish a link started with [`MeshHandle::offer_link`].
    pub async fn complete_link(
        &self,
        id: ProposalId,
        answer: SessionDescription,
    ) -> Result<(), RelayError> {
        self.request(|reply| Command::CompleteLink { id, answer, reply })
            .await?
    }

    /// Close the session `label`. Returns whether it existed.
    pub async fn ban(&self, label: impl Into<Label>) -> Result<bool, RelayError> {
        let label = label.into();
        self.request(|reply| Command::Ban { label, reply }).await
    }

    pub async fn has_message(&self, id: MessageId) -> Result<bool, RelayError> {
        self.request(|reply| Command::HasMessage { id, reply }).await
    }

    pub async fn stats(&self) -> Result<NodeStats, RelayError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Stop the node, closing every channel, and wait for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.submit(Command::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

// ─── Event Loop ──────────────────────────────────────────────────────────────

struct Node {
    ctx: NodeContext,
    gossip: Gossip,
    contacts: ContactBook,
    calls: CallRouter,
    rendezvous: Option<RendezvousClient>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    command_rx: mpsc::UnboundedReceiver<Command>,
}

impl Node {
    async fn run(mut self) {
        info!(
            peer_id = %self.ctx.peer_id,
            nickname = %self.ctx.nickname(),
            signed = self.ctx.identity.is_some(),
            "mesh node started"
        );
        loop {
            tokio::select! {
                Some(event) = self.channel_rx.recv() => self.on_channel_event(event).await,
                Some(fired) = self.timer_rx.recv() => self.on_timer(fired).await,
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal).await,
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
            }
        }
        self.stop();
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened { label } => {
                if overlay::promote(&mut self.ctx, &label) {
                    return;
                }
                match self.calls.on_opened(&label) {
                    Some(event) => self.ctx.emit(event),
                    None => debug!(%label, "open event for unknown channel"),
                }
            }
            ChannelEvent::Message { label, data } => {
                if self.ctx.registry.find_by_label(&label).is_none() {
                    return;
                }
                match codec::decode_message(&data) {
                    Ok(msg) => self.dispatch(&label, msg).await,
                    Err(e) => {
                        warn!(%label, error = %e, "undecodable frame, banning session");
                        self.ctx.close_session(&label);
                    }
                }
            }
            ChannelEvent::Closed { label } => {
                if !self.ctx.close_session(&label)
                    && !overlay::on_pending_closed(&mut self.ctx, &label)
                {
                    self.calls.on_closed(&label);
                }
            }
        }
    }

    async fn dispatch(&mut self, label: &str, msg: WireMessage) {
        let ctx = &mut self.ctx;
        match msg {
            WireMessage::IdAnnounce(id) => self.gossip.on_announce(ctx, label, id),
            WireMessage::PullRequest(id) => self.gossip.on_pull_request(ctx, label, id),
            WireMessage::PullResponse(message) => {
                if let Some(event) = self
                    .gossip
                    .on_body(ctx, &mut self.contacts, label, *message)
                {
                    ctx.emit(event);
                }
            }
            WireMessage::ConnectionProposal(proposal) => {
                overlay::on_proposal(ctx, label, proposal).await
            }
            WireMessage::ProposalAccepted(proposal) => {
                overlay::on_acceptance(ctx, label, proposal).await
            }
            WireMessage::CallProposal(call) => {
                if let Some(event) = self.calls.on_proposal(ctx, label, call).await {
                    ctx.emit(event);
                }
            }
            WireMessage::CallAccepted(acceptance) => {
                self.calls.on_acceptance(ctx, label, acceptance).await
            }
        }
    }

    async fn on_timer(&mut self, fired: TimerFired) {
        if !self.ctx.timers.accept(&fired) {
            return;
        }
        let ctx = &mut self.ctx;
        match fired.key {
            TimerKey::FormOverlay => overlay::form_overlay(ctx).await,
            TimerKey::ProposalExpiry(id) => overlay::on_expiry(ctx, id),
            TimerKey::PullTick => self.gossip.on_pull_tick(ctx),
            TimerKey::PullRetry(id) => self.gossip.on_pull_retry(ctx, id),
            TimerKey::CallExpiry(id) => self.calls.on_expiry(id),
            TimerKey::RendezvousFeed => {
                if let Some(rendezvous) = self.rendezvous.as_mut() {
                    rendezvous.on_feed(ctx).await;
                }
            }
            TimerKey::RendezvousLinger => {
                if let Some(rendezvous) = self.rendezvous.as_mut() {
                    rendezvous.on_linger();
                }
            }
        }
    }

    async fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::SessionClosed { label, remaining } => {
                self.gossip.forget_source(&label);
                overlay::on_session_closed(&mut self.ctx, &label, remaining);
            }
            Internal::Rendezvous { generation, frame } => {
                if let Some(rendezvous) = self.rendezvous.as_mut() {
                    rendezvous.on_frame(&mut self.ctx, generation, frame).await;
                }
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        let ctx = &mut self.ctx;
        match command {
            Command::SendMessage { text, to, reply } => {
                let result = self
                    .gossip
                    .create(ctx, &self.contacts, &text, to.as_deref());
                let _ = reply.send(result);
            }
            Command::CallUser { to, reply } => {
                let result = self.calls.call_user(ctx, &self.contacts, to).await;
                let _ = reply.send(result);
            }
            Command::ConfirmCallsFrom { pseudo } => {
                self.calls.confirm_calls_from(ctx, &pseudo).await;
            }
            Command::RegisterContact { fingerprint, reply } => {
                let _ = reply.send(self.contacts.register(&fingerprint));
            }
            Command::Contacts { reply } => {
                let _ = reply.send(self.contacts.list());
            }
            Command::Join {
                room,
                server,
                reply,
            } => {
                let result = match self.rendezvous.as_mut() {
                    Some(rendezvous) => rendezvous.join(ctx, room, server).await,
                    None => Err(RelayError::TransportFailure {
                        reason: "no rendezvous connector configured".to_string(),
                    }),
                };
                let _ = reply.send(result);
            }
            Command::OfferLink { reply } => {
                let _ = reply.send(offer_link(ctx).await);
            }
            Command::AnswerLink { offer, reply } => {
                let _ = reply.send(answer_link(ctx, offer).await);
            }
            Command::CompleteLink { id, answer, reply } => {
                let _ = reply.send(complete_link(ctx, id, answer).await);
            }
            Command::Ban { label, reply } => {
                let banned = ctx.close_session(&label);
                if banned {
                    info!(%label, "session banned");
                }
                let _ = reply.send(banned);
            }
            Command::HasMessage { id, reply } => {
                let _ = reply.send(self.gossip.has_message(&id));
            }
            Command::Stats { reply } => {
                let _ = reply.send(NodeStats {
                    peer_id: ctx.peer_id,
                    sessions: ctx.registry.count(),
                    pending_proposals: ctx.pending.len(),
                    tracked_ids: self.gossip.tracked(),
                    cached_messages: self.gossip.cached(),
                    pending_calls: self.calls.pending(),
                    contacts: self.contacts.len(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn stop(&mut self) {
        if let Some(rendezvous) = self.rendezvous.as_mut() {
            rendezvous.shutdown(&mut self.ctx);
        }
        self.ctx.timers.cancel_all();
        self.calls.hang_up_all();
        for pending in self.ctx.pending.drain() {
            pending.channel.close();
        }
        for label in self.ctx.registry.labels() {
            self.ctx.close_session(&label);
        }
        info!(peer_id = %self.ctx.peer_id, "mesh node stopped");
    }
}

// ─── Out-of-Band Links ───────────────────────────────────────────────────────

async fn offer_link(ctx: &mut NodeContext) -> Result<(ProposalId, SessionDescription), RelayError> {
    let channel = ctx.transport.create_offer(false, ctx.sink.clone()).await?;
    let offer = channel.local_description();
    let id = ctx.fresh_id();
    ctx.pending.insert(PendingProposal {
        id,
        expires_at: None,
        channel,
        peer_id: None,
        origin: PendingOrigin::Rendezvous,
    });
    Ok((id, offer))
}

async fn answer_link(
    ctx: &mut NodeContext,
    offer: SessionDescription,
) -> Result<SessionDescription, RelayError> {
    let channel = ctx
        .transport
        .create_answer(&offer, false, ctx.sink.clone())
        .await?;
    let answer = channel.local_description();
    let id = ctx.fresh_id();
    ctx.pending.insert(PendingProposal {
        id,
        expires_at: None,
        channel,
        peer_id: None,
        origin: PendingOrigin::Rendezvous,
    });
    Ok(answer)
}

async fn complete_link(
    ctx: &mut NodeContext,
    id: ProposalId,
    answer: SessionDescription,
) -> Result<(), RelayError> {
    let channel = ctx
        .pending
        .get(id)
        .map(|p| p.channel.clone())
        .ok_or_else(|| RelayError::SessionNotFound {
            label: format!("pending link {id}"),
        })?;
    channel.set_remote_description(answer).await
}

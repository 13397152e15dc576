//! Bootstrap through a rendezvous relay.
//!
//! A node with no sessions joins a room by handing the relay an offer; the
//! relay passes it to a node already in the room, whose answer comes back
//! over the same socket. Sockets are recycled: each one lingers for
//! `rendezvous_linger`, and when it closes the node feeds the room again so
//! it stays reachable as an entry point.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use murmur_types::primitives::ProposalId;
use murmur_types::proposal::SessionDescription;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::{Internal, NodeContext};
use crate::error::RelayError;
use crate::events::{MeshEvent, Milestone};
use crate::registry::{PendingOrigin, PendingProposal};
use crate::timers::TimerKey;

// ─── Wire Format ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendezvousAction {
    /// Enter a room with an offer.
    Join,
    /// Offer to act as an entry point for the room.
    Feed,
}

/// Frame sent by a node to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousRequest {
    pub action: RendezvousAction,
    pub room: String,
    /// JSON session description, empty when feeding.
    #[serde(default)]
    pub offer: String,
}

/// Frame sent by the relay to a node: another node's offer when `mtype` is
/// `"offer"`, otherwise the answer to our own join offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtype: Option<String>,
    pub data: String,
}

// ─── Socket Boundary ─────────────────────────────────────────────────────────

/// A text socket to a rendezvous relay. Dropping `outgoing` closes it; the
/// relay closing it ends `incoming`.
pub struct RendezvousSocket {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait RendezvousConnector: Send + Sync {
    async fn connect(&self, server: &str) -> Result<RendezvousSocket, RelayError>;
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Rendezvous side of a node.
pub struct RendezvousClient {
    connector: Arc<dyn RendezvousConnector>,
    room: Option<(String, String)>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    generation: u64,
    join_offer: Option<ProposalId>,
}

impl RendezvousClient {
    pub fn new(connector: Arc<dyn RendezvousConnector>) -> Self {
        Self {
            connector,
            room: None,
            outgoing: None,
            generation: 0,
            join_offer: None,
        }
    }

    /// Enter `room` through the relay at `server`.
    pub async fn join(
        &mut self,
        ctx: &mut NodeContext,
        room: String,
        server: String,
    ) -> Result<(), RelayError> {
        self.room = Some((room, server));
        self.connect(ctx, RendezvousAction::Join).await
    }

    async fn connect(
        &mut self,
        ctx: &mut NodeContext,
        action: RendezvousAction,
    ) -> Result<(), RelayError> {
        let Some((room, server)) = self.room.clone() else {
            return Ok(());
        };
        self.close_socket(ctx);
        let socket = self.connector.connect(&server).await?;
        self.generation += 1;
        spawn_reader(self.generation, socket.incoming, ctx.internal_tx.clone());

        let offer = match action {
            RendezvousAction::Join => {
                let channel = ctx.transport.create_offer(false, ctx.sink.clone()).await?;
                let desc = serde_json::to_string(&channel.local_description()).map_err(|e| {
                    RelayError::CodecError {
                        reason: e.to_string(),
                    }
                })?;
                let id = ctx.fresh_id();
                self.discard_join_offer(ctx);
                ctx.pending.insert(PendingProposal {
                    id,
                    expires_at: None,
                    channel,
                    peer_id: None,
                    origin: PendingOrigin::Rendezvous,
                });
                self.join_offer = Some(id);
                desc
            }
            RendezvousAction::Feed => String::new(),
        };

        let request = RendezvousRequest {
            action,
            room: room.clone(),
            offer,
        };
        let text = serde_json::to_string(&request).map_err(|e| RelayError::CodecError {
            reason: e.to_string(),
        })?;
        socket
            .outgoing
            .send(text)
            .map_err(|_| RelayError::TransportFailure {
                reason: format!("rendezvous {server} hung up"),
            })?;
        self.outgoing = Some(socket.outgoing);
        ctx.timers
            .schedule(TimerKey::RendezvousLinger, ctx.config.rendezvous_linger);

        info!(%room, %server, ?action, "rendezvous request sent");
        if action == RendezvousAction::Join {
            ctx.emit(MeshEvent::Milestone(Milestone::RendezvousOfferSent));
        }
        Ok(())
    }

    /// A frame from the socket of `generation`, or its closing.
    pub async fn on_frame(&mut self, ctx: &mut NodeContext, generation: u64, frame: Option<String>) {
        if generation != self.generation {
            return;
        }
        let Some(text) = frame else {
            self.on_socket_closed(ctx);
            return;
        };
        let notice: RendezvousNotice = match serde_json::from_str(&text) {
            Ok(notice) => notice,
            Err(e) => {
                warn!(error = %e, "unreadable rendezvous frame");
                return;
            }
        };
        let desc: SessionDescription = match serde_json::from_str(&notice.data) {
            Ok(desc) => desc,
            Err(e) => {
                warn!(error = %e, "unreadable session description from rendezvous");
                return;
            }
        };
        if notice.mtype.as_deref() == Some("offer") {
            self.answer_offer(ctx, desc).await;
        } else {
            self.complete_join(ctx, desc).await;
        }
    }

    async fn answer_offer(&mut self, ctx: &mut NodeContext, offer: SessionDescription) {
        let channel = match ctx
            .transport
            .create_answer(&offer, false, ctx.sink.clone())
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                warn!(error = %e, "failed to answer rendezvous offer");
                return;
            }
        };
        // Our own join offer is only needed to enter the room.
        self.discard_join_offer(ctx);

        let answer = match serde_json::to_string(&channel.local_description()) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "failed to encode answer");
                channel.close();
                return;
            }
        };
        let id = ctx.fresh_id();
        ctx.pending.insert(PendingProposal {
            id,
            expires_at: None,
            channel,
            peer_id: None,
            origin: PendingOrigin::Rendezvous,
        });
        ctx.timers
            .schedule(TimerKey::ProposalExpiry(id), ctx.config.rendezvous_linger);

        let sent = self
            .outgoing
            .as_ref()
            .map_or(false, |tx| tx.send(answer).is_ok());
        if sent {
            debug!(id, "answered rendezvous offer");
        } else {
            warn!("rendezvous socket lost before answer");
        }
    }

    async fn complete_join(&mut self, ctx: &mut NodeContext, answer: SessionDescription) {
        let Some(channel) = self
            .join_offer
            .and_then(|id| ctx.pending.get(id))
            .map(|p| p.channel.clone())
        else {
            debug!("answer for a join offer we no longer hold");
            return;
        };
        match channel.set_remote_description(answer).await {
            Ok(()) => info!("joined room"),
            Err(e) => warn!(error = %e, "failed to complete join"),
        }
        self.join_offer = None;
    }

    fn on_socket_closed(&mut self, ctx: &mut NodeContext) {
        self.outgoing = None;
        ctx.timers.cancel(TimerKey::RendezvousLinger);
        let delay = if ctx.registry.count() > ctx.config.min_degree {
            ctx.config.feed_interval
        } else {
            Duration::ZERO
        };
        debug!(?delay, "rendezvous socket closed, feeding again");
        ctx.timers.schedule(TimerKey::RendezvousFeed, delay);
    }

    /// The socket has lingered long enough.
    pub fn on_linger(&mut self) {
        if self.outgoing.take().is_some() {
            debug!("closing rendezvous socket");
        }
    }

    /// Reconnect and offer to be an entry point.
    pub async fn on_feed(&mut self, ctx: &mut NodeContext) {
        if let Err(e) = self.connect(ctx, RendezvousAction::Feed).await {
            warn!(error = %e, "rendezvous feed failed");
            ctx.timers
                .schedule(TimerKey::RendezvousFeed, ctx.config.feed_interval);
        }
    }

    fn close_socket(&mut self, ctx: &mut NodeContext) {
        self.outgoing = None;
        ctx.timers.cancel(TimerKey::RendezvousLinger);
    }

    fn discard_join_offer(&mut self, ctx: &mut NodeContext) {
        if let Some(pending) = self.join_offer.take().and_then(|id| ctx.pending.remove(id)) {
            pending.channel.close();
        }
    }

    /// Stop all rendezvous activity.
    pub fn shutdown(&mut self, ctx: &mut NodeContext) {
        self.room = None;
        self.close_socket(ctx);
        ctx.timers.cancel(TimerKey::RendezvousFeed);
    }
}

fn spawn_reader(
    generation: u64,
    mut incoming: mpsc::UnboundedReceiver<String>,
    internal_tx: mpsc::UnboundedSender<Internal>,
) {
    tokio::spawn(async move {
        while let Some(frame) = incoming.recv().await {
            let event = Internal::Rendezvous {
                generation,
                frame: Some(frame),
            };
            if internal_tx.send(event).is_err() {
                return;
            }
        }
        let _ = internal_tx.send(Internal::Rendezvous {
            generation,
            frame: None,
        });
    });
}

// ─── In-Memory Relay ─────────────────────────────────────────────────────────

type ClientId = u64;

struct HubClient {
    tx: mpsc::UnboundedSender<String>,
    room: Option<String>,
    /// Client whose offer this one was asked to answer.
    answer_to: Option<ClientId>,
}

#[derive(Default)]
struct Room {
    entry_points: VecDeque<ClientId>,
    /// Joiners whose offer found no entry point yet.
    waiting: VecDeque<(ClientId, String)>,
}

#[derive(Default)]
struct HubState {
    next_client: ClientId,
    clients: HashMap<ClientId, HubClient>,
    rooms: HashMap<String, Room>,
}

/// A rendezvous relay living in the process, for tests and simulation.
///
/// Entry points of a room are used in rotation. A join that finds no entry
/// point waits for the next node to feed the room.
#[derive(Clone, Default)]
pub struct MemoryRendezvous {
    state: Arc<Mutex<HubState>>,
}

impl MemoryRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open sockets.
    pub fn connected(&self) -> usize {
        self.state.lock().clients.len()
    }

    fn handle(&self, client: ClientId, text: String) {
        let mut state = self.state.lock();
        match serde_json::from_str::<RendezvousRequest>(&text) {
            Ok(request) => state.request(client, request),
            Err(_) => state.relay_answer(client, text),
        }
    }

    fn disconnect(&self, client: ClientId) {
        let mut state = self.state.lock();
        if let Some(gone) = state.clients.remove(&client) {
            if let Some(room) = gone.room.and_then(|r| state.rooms.get_mut(&r)) {
                room.entry_points.retain(|c| *c != client);
                room.waiting.retain(|(c, _)| *c != client);
            }
        }
    }
}

impl HubState {
    fn request(&mut self, client: ClientId, request: RendezvousRequest) {
        let RendezvousRequest { action, room, offer } = request;
        if let Some(c) = self.clients.get_mut(&client) {
            c.room = Some(room.clone());
        }
        let entry = self.next_entry_point(&room, client);
        match (action, entry) {
            (RendezvousAction::Join, Some(entry)) => self.offer_to(entry, client, offer),
            (RendezvousAction::Join, None) => self
                .rooms
                .entry(room.clone())
                .or_default()
                .waiting
                .push_back((client, offer)),
            (RendezvousAction::Feed, _) => {
                let waiting = self.rooms.get_mut(&room).and_then(|slot| {
                    let position = slot.waiting.iter().position(|(c, _)| *c != client)?;
                    slot.waiting.remove(position)
                });
                if let Some((joiner, offer)) = waiting {
                    self.offer_to(client, joiner, offer);
                }
            }
        }
        let slot = self.rooms.entry(room).or_default();
        if !slot.entry_points.contains(&client) {
            slot.entry_points.push_back(client);
        }
    }

    /// Rotate the room's entry points, skipping `asker`.
    fn next_entry_point(&mut self, room: &str, asker: ClientId) -> Option<ClientId> {
        let slot = self.rooms.get_mut(room)?;
        let position = slot.entry_points.iter().position(|c| *c != asker)?;
        let entry = slot.entry_points.remove(position)?;
        slot.entry_points.push_back(entry);
        Some(entry)
    }

    fn offer_to(&mut self, entry: ClientId, joiner: ClientId, offer: String) {
        let notice = RendezvousNotice {
            mtype: Some("offer".to_string()),
            data: offer,
        };
        let Some(target) = self.clients.get_mut(&entry) else {
            return;
        };
        if let Ok(text) = serde_json::to_string(&notice) {
            if target.tx.send(text).is_ok() {
                target.answer_to = Some(joiner);
            }
        }
    }

    fn relay_answer(&mut self, from: ClientId, answer: String) {
        let Some(joiner) = self.clients.get_mut(&from).and_then(|c| c.answer_to.take()) else {
            return;
        };
        // An entry point that answered has dropped its own join offer.
        for room in self.rooms.values_mut() {
            room.waiting.retain(|(c, _)| *c != from);
        }
        let notice = RendezvousNotice {
            mtype: None,
            data: answer,
        };
        if let (Some(target), Ok(text)) = (self.clients.get(&joiner), serde_json::to_string(&notice))
        {
            let _ = target.tx.send(text);
        }
    }
}

#[async_trait]
impl RendezvousConnector for MemoryRendezvous {
    async fn connect(&self, _server: &str) -> Result<RendezvousSocket, RelayError> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let client = {
            let mut state = self.state.lock();
            let client = state.next_client;
            state.next_client += 1;
            state.clients.insert(
                client,
                HubClient {
                    tx: in_tx,
                    room: None,
                    answer_to: None,
                },
            );
            client
        };

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                hub.handle(client, text);
            }
            hub.disconnect(client);
        });

        Ok(RendezvousSocket {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

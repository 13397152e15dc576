//! Audio-call signaling over the session mesh.
//!
//! Call offers travel as [`CallProposal`]s: addressed ones are flooded until
//! they reach their nickname, unaddressed ones are answered by whichever
//! neighbor accepts. Every node forwards a given call or acceptance at most
//! once, and never back to the session it came from.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use murmur_types::call::{CallAcceptance, CallPayload, CallProposal};
use murmur_types::constants::MAX_SEEN_CALLS;
use murmur_types::error::MurmurError;
use murmur_types::network::WireMessage;
use murmur_types::primitives::{Label, ProposalId};
use murmur_types::proposal::SessionDescription;
use tracing::{debug, info, warn};

use crate::contacts::ContactBook;
use crate::context::NodeContext;
use crate::error::RelayError;
use crate::events::MeshEvent;
use crate::seen::SeenSet;
use crate::timers::TimerKey;
use crate::transport::Channel;

/// Unconfirmed calls kept per caller while the user decides.
const MAX_STASHED_PER_CALLER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegState {
    /// Our offer is out, waiting for an acceptance.
    Dialing,
    /// Handshake done, waiting for the media channel to open.
    Ringing,
    Connected,
}

struct CallLeg {
    id: ProposalId,
    /// Remote pseudonym, once known.
    pseudo: Option<String>,
    channel: Arc<dyn Channel>,
    state: LegState,
    /// We placed this call.
    outgoing: bool,
}

/// Call legs, loop guards, and the per-caller confirmation latch.
pub struct CallRouter {
    legs: Vec<CallLeg>,
    seen_calls: SeenSet<ProposalId>,
    seen_acceptances: SeenSet<(ProposalId, String)>,
    confirmed: HashSet<String>,
    stash: HashMap<String, Vec<(Label, CallProposal)>>,
}

impl Default for CallRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRouter {
    pub fn new() -> Self {
        Self {
            legs: Vec::new(),
            seen_calls: SeenSet::new(MAX_SEEN_CALLS),
            seen_acceptances: SeenSet::new(MAX_SEEN_CALLS),
            confirmed: HashSet::new(),
            stash: HashMap::new(),
        }
    }

    /// Calls not yet connected.
    pub fn pending(&self) -> usize {
        self.legs
            .iter()
            .filter(|l| l.state != LegState::Connected)
            .count()
    }

    pub fn is_call_channel(&self, label: &str) -> bool {
        self.legs.iter().any(|l| l.channel.label() == label)
    }

    // ─── Outgoing ────────────────────────────────────────────────────────────

    /// Offer a call to `to`, or to any neighbor when `None`.
    ///
    /// The offer is sealed for the recipient when the contact book knows
    /// their encryption key.
    pub async fn call_user(
        &mut self,
        ctx: &mut NodeContext,
        contacts: &ContactBook,
        to: Option<String>,
    ) -> Result<ProposalId, RelayError> {
        let channel = ctx.transport.create_offer(true, ctx.sink.clone()).await?;
        let id = ctx.fresh_id();
        self.seen_calls.insert(id);

        let recipient_key = to.as_deref().and_then(|n| contacts.crypto_key_for(n));
        let (offer, encrypted) = seal(channel.local_description(), recipient_key.as_deref())?;
        let proposal = CallProposal {
            id,
            to: to.clone(),
            peer_id: ctx.peer_id,
            pseudo: ctx.nickname().to_string(),
            offer,
            encrypted,
            key: ctx.identity.as_ref().map(|i| i.crypto_key().to_string()),
        };

        let sent = ctx.send_all_except(WireMessage::CallProposal(proposal), &[]);
        info!(id, to = ?to, encrypted, neighbors = sent, "calling");
        self.legs.push(CallLeg {
            id,
            pseudo: to,
            channel,
            state: LegState::Dialing,
            outgoing: true,
        });
        ctx.timers
            .schedule(TimerKey::CallExpiry(id), ctx.config.call_lifetime);
        Ok(id)
    }

    /// An acceptance arrived on `label`.
    pub async fn on_acceptance(
        &mut self,
        ctx: &mut NodeContext,
        label: &str,
        acceptance: CallAcceptance,
    ) {
        let Some(index) = self
            .legs
            .iter()
            .position(|l| l.outgoing && l.id == acceptance.id)
        else {
            if self
                .seen_acceptances
                .insert((acceptance.id, acceptance.pseudo.clone()))
            {
                ctx.send_all_except(WireMessage::CallAccepted(acceptance), &[label]);
            }
            return;
        };
        if self.legs[index].state != LegState::Dialing {
            debug!(
                id = acceptance.id,
                pseudo = %acceptance.pseudo,
                "call already answered, dropping acceptance"
            );
            return;
        }

        let answer = match unseal(ctx, acceptance.answer, acceptance.encrypted) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(id = acceptance.id, error = %e, "unreadable call answer");
                return;
            }
        };
        let leg = &mut self.legs[index];
        match leg.channel.set_remote_description(answer).await {
            Ok(()) => {
                info!(id = leg.id, pseudo = %acceptance.pseudo, "call answered");
                leg.pseudo = Some(acceptance.pseudo);
                leg.state = LegState::Ringing;
                ctx.timers
                    .schedule(TimerKey::CallExpiry(acceptance.id), ctx.config.call_lifetime);
            }
            Err(e) => warn!(id = leg.id, error = %e, "failed to complete call handshake"),
        }
    }

    /// Call `id` did not connect in time: drop its leg, whichever side we
    /// are on, and any unconfirmed copies of it.
    pub fn on_expiry(&mut self, id: ProposalId) {
        self.legs.retain(|leg| {
            let expired = leg.id == id && leg.state != LegState::Connected;
            if expired {
                debug!(id, state = ?leg.state, "call expired");
                leg.channel.close();
            }
            !expired
        });
        self.stash.retain(|_, calls| {
            calls.retain(|(_, proposal)| proposal.id != id);
            !calls.is_empty()
        });
    }

    // ─── Incoming ────────────────────────────────────────────────────────────

    /// A call proposal arrived on `label`.
    ///
    /// Returns an [`MeshEvent::IncomingCall`] when the caller still needs
    /// confirmation.
    pub async fn on_proposal(
        &mut self,
        ctx: &mut NodeContext,
        label: &str,
        proposal: CallProposal,
    ) -> Option<MeshEvent> {
        if !self.seen_calls.insert(proposal.id) {
            return None;
        }
        if !proposal.is_for(ctx.nickname()) {
            debug!(id = proposal.id, to = ?proposal.to, "relaying call");
            ctx.send_all_except(WireMessage::CallProposal(proposal), &[label]);
            return None;
        }
        if self.confirmed.contains(&proposal.pseudo) {
            self.answer(ctx, label, proposal).await;
            return None;
        }

        let stashed = self.stash.entry(proposal.pseudo.clone()).or_default();
        if stashed.len() >= MAX_STASHED_PER_CALLER {
            debug!(
                id = proposal.id,
                pseudo = %proposal.pseudo,
                "too many unconfirmed calls, dropping"
            );
            return None;
        }
        // One prompt per caller; later calls wait on the same answer.
        let event = stashed.is_empty().then(|| MeshEvent::IncomingCall {
            pseudo: proposal.pseudo.clone(),
            call_id: proposal.id,
        });
        info!(
            id = proposal.id,
            pseudo = %proposal.pseudo,
            prompt = event.is_some(),
            "incoming call"
        );
        ctx.timers
            .schedule(TimerKey::CallExpiry(proposal.id), ctx.config.call_lifetime);
        stashed.push((label.to_string(), proposal));
        event
    }

    /// Accept every call from `pseudo`, now and from here on.
    pub async fn confirm_calls_from(&mut self, ctx: &mut NodeContext, pseudo: &str) {
        self.confirmed.insert(pseudo.to_string());
        for (label, proposal) in self.stash.remove(pseudo).unwrap_or_default() {
            self.answer(ctx, &label, proposal).await;
        }
    }

    async fn answer(&mut self, ctx: &mut NodeContext, label: &str, proposal: CallProposal) {
        let offer = match unseal(ctx, proposal.offer, proposal.encrypted) {
            Ok(offer) => offer,
            Err(e) => {
                warn!(id = proposal.id, error = %e, "unreadable call offer");
                return;
            }
        };
        let channel = match ctx
            .transport
            .create_answer(&offer, true, ctx.sink.clone())
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                warn!(id = proposal.id, error = %e, "failed to answer call");
                return;
            }
        };
        let (answer, encrypted) = match seal(channel.local_description(), proposal.key.as_deref())
        {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(id = proposal.id, error = %e, "failed to seal call answer");
                channel.close();
                return;
            }
        };

        let acceptance = CallAcceptance {
            id: proposal.id,
            pseudo: ctx.nickname().to_string(),
            answer,
            encrypted,
        };
        self.seen_acceptances
            .insert((acceptance.id, acceptance.pseudo.clone()));
        let delivered = ctx.registry.find_by_label(label).is_some()
            && ctx.send(label, WireMessage::CallAccepted(acceptance.clone()));
        if !delivered {
            ctx.send_all_except(WireMessage::CallAccepted(acceptance), &[]);
        }
        info!(id = proposal.id, pseudo = %proposal.pseudo, "call accepted");
        ctx.timers
            .schedule(TimerKey::CallExpiry(proposal.id), ctx.config.call_lifetime);
        self.legs.push(CallLeg {
            id: proposal.id,
            pseudo: Some(proposal.pseudo),
            channel,
            state: LegState::Ringing,
            outgoing: false,
        });
    }

    // ─── Media Channels ──────────────────────────────────────────────────────

    /// The media channel `label` opened.
    pub fn on_opened(&mut self, label: &str) -> Option<MeshEvent> {
        let leg = self
            .legs
            .iter_mut()
            .find(|l| l.channel.label() == label && l.state == LegState::Ringing)?;
        leg.state = LegState::Connected;
        let pseudo = leg.pseudo.clone().unwrap_or_default();
        info!(id = leg.id, %pseudo, "call connected");
        Some(MeshEvent::CallConnected {
            pseudo,
            call_id: leg.id,
        })
    }

    /// The media channel `label` closed.
    pub fn on_closed(&mut self, label: &str) -> bool {
        let before = self.legs.len();
        self.legs.retain(|l| l.channel.label() != label);
        before != self.legs.len()
    }

    /// Hang up every call.
    pub fn hang_up_all(&mut self) {
        for leg in self.legs.drain(..) {
            leg.channel.close();
        }
    }
}

/// Wrap a session description, sealing it for `key` when given.
fn seal(
    desc: SessionDescription,
    key: Option<&str>,
) -> Result<(CallPayload, bool), MurmurError> {
    match key {
        Some(key) => {
            let json = serde_json::to_string(&desc).map_err(|e| {
                MurmurError::SerializationError {
                    reason: e.to_string(),
                }
            })?;
            let sealed = murmur_crypto::encryption::encrypt_for(&json, key)?;
            Ok((CallPayload::Sealed(sealed), true))
        }
        None => Ok((CallPayload::Clear(desc), false)),
    }
}

fn unseal(
    ctx: &NodeContext,
    payload: CallPayload,
    encrypted: bool,
) -> Result<SessionDescription, MurmurError> {
    match (payload, encrypted) {
        (CallPayload::Clear(desc), false) => Ok(desc),
        (CallPayload::Sealed(sealed), true) => {
            let identity = ctx
                .identity
                .as_ref()
                .ok_or_else(|| MurmurError::DecryptionFailed {
                    reason: "no local identity".to_string(),
                })?;
            let json = identity.decrypt_with_local_key(&sealed)?;
            serde_json::from_str(&json).map_err(|e| MurmurError::DeserializationError {
                reason: e.to_string(),
            })
        }
        _ => Err(MurmurError::EnvelopeInvalid {
            reason: "encrypted flag does not match call payload".to_string(),
        }),
    }
}

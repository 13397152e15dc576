//! Overlay formation: connection proposals flooded as a TTL-bounded random
//! walk, probabilistic admission, and acceptances routed back along the
//! recorded channel path.
//!
//! A pending channel is either promoted to a session when it opens or
//! discarded when its expiry timer fires. Nothing here is retried: the next
//! formation cycle compensates for lost proposals.

use std::time::Duration;

use murmur_types::network::WireMessage;
use murmur_types::primitives::{now_millis, Label, ProposalId};
use murmur_types::proposal::ConnectionProposal;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::context::NodeContext;
use crate::events::{MeshEvent, Milestone};
use crate::registry::{PendingOrigin, PendingProposal};
use crate::timers::TimerKey;

/// Admission policy for an inbound proposal.
///
/// Direct neighbors (`channel_path` of length one or less) and peers we are
/// already connected to are never accepted. Otherwise a proposal is taken
/// when the coin comes up above one half, or always while below
/// `min_degree`.
pub fn admits(
    proposal: &ConnectionProposal,
    already_connected: bool,
    sessions: usize,
    min_degree: usize,
    coin: f64,
) -> bool {
    proposal.is_indirect() && !already_connected && (coin > 0.5 || sessions < min_degree)
}

// ─── Outbound Cycle ──────────────────────────────────────────────────────────

/// Create up to `creation_burst_limit` offers and send each as a proposal
/// through a random session. Re-arms itself every `formation_interval`.
pub async fn form_overlay(ctx: &mut NodeContext) {
    if !ctx.config.formation_enabled {
        return;
    }
    let sessions = ctx.registry.count();
    if sessions == 0 || ctx.registry.is_full() {
        debug!(sessions, "formation idle");
        return;
    }

    let need = ctx
        .config
        .max_degree
        .saturating_sub(sessions + ctx.pending.len())
        .min(ctx.config.creation_burst_limit);
    debug!(sessions, pending = ctx.pending.len(), need, "formation cycle");

    for _ in 0..need {
        if !send_proposal(ctx).await {
            break;
        }
    }
    ctx.timers
        .schedule(TimerKey::FormOverlay, ctx.config.formation_interval);
}

async fn send_proposal(ctx: &mut NodeContext) -> bool {
    let Some(via) = ctx
        .registry
        .random_session(&mut ctx.rng, None)
        .map(|s| s.label.clone())
    else {
        return false;
    };
    let channel = match ctx.transport.create_offer(false, ctx.sink.clone()).await {
        Ok(channel) => channel,
        Err(e) => {
            warn!(error = %e, "failed to create offer");
            return false;
        }
    };

    let id = ctx.fresh_id();
    let lifetime = ctx.config.proposal_lifetime;
    let proposal = ConnectionProposal {
        id,
        peer_id: ctx.peer_id,
        channel_path: vec![via.clone()],
        ttl: ctx.config.proposal_ttl,
        expires_at: now_millis() + lifetime.as_millis() as u64,
        content: channel.local_description(),
    };
    ctx.pending.insert(PendingProposal {
        id,
        expires_at: Some(proposal.expires_at),
        channel,
        peer_id: None,
        origin: PendingOrigin::Offer,
    });
    ctx.timers.schedule(TimerKey::ProposalExpiry(id), lifetime);

    if ctx.send(&via, WireMessage::ConnectionProposal(proposal)) {
        debug!(id, via = %via, "proposal sent");
        ctx.emit(MeshEvent::Milestone(Milestone::ProposalSent));
        true
    } else {
        discard(ctx, id);
        false
    }
}

// ─── Inbound Proposals ───────────────────────────────────────────────────────

/// Handle a proposal delivered on session `label`: accept it, or pass it one
/// hop further.
pub async fn on_proposal(ctx: &mut NodeContext, label: &str, proposal: ConnectionProposal) {
    let now = now_millis();
    if proposal.is_expired(now) {
        debug!(id = proposal.id, "dropping expired proposal");
        return;
    }
    let connected = proposal.peer_id == ctx.peer_id
        || ctx.registry.find_by_peer_id(&proposal.peer_id).is_some()
        || ctx.pending.has_peer(&proposal.peer_id);
    let coin: f64 = ctx.rng.gen();

    if admits(
        &proposal,
        connected,
        ctx.registry.count(),
        ctx.config.min_degree,
        coin,
    ) {
        accept(ctx, label, proposal, now).await;
    } else {
        forward(ctx, label, proposal);
    }
}

async fn accept(ctx: &mut NodeContext, label: &str, proposal: ConnectionProposal, now: u64) {
    if ctx.registry.is_full() {
        ctx.evict_oldest(Some(label));
    }
    let channel = match ctx
        .transport
        .create_answer(&proposal.content, false, ctx.sink.clone())
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            warn!(id = proposal.id, error = %e, "failed to answer proposal");
            return;
        }
    };

    let pending_id = ctx.fresh_id();
    let answer = channel.local_description();
    ctx.pending.insert(PendingProposal {
        id: pending_id,
        expires_at: Some(proposal.expires_at),
        channel,
        peer_id: Some(proposal.peer_id),
        origin: PendingOrigin::Answer,
    });
    ctx.timers.schedule(
        TimerKey::ProposalExpiry(pending_id),
        Duration::from_millis(proposal.expires_at.saturating_sub(now)),
    );

    let mut reply = proposal;
    reply.pop_hop();
    reply.content = answer;
    reply.peer_id = ctx.peer_id;
    debug!(id = reply.id, via = %label, "accepting proposal");
    if ctx.send(label, WireMessage::ProposalAccepted(reply)) {
        ctx.emit(MeshEvent::Milestone(Milestone::ProposalAccepted));
    } else {
        discard(ctx, pending_id);
    }
}

fn forward(ctx: &mut NodeContext, label: &str, mut proposal: ConnectionProposal) {
    if !proposal.consume_hop() || ctx.registry.count() < 2 {
        debug!(id = proposal.id, ttl = proposal.ttl, "proposal dropped");
        return;
    }
    let Some(next) = ctx
        .registry
        .random_session(&mut ctx.rng, Some(label))
        .map(|s| s.label.clone())
    else {
        return;
    };
    proposal.push_hop(next.clone());
    debug!(id = proposal.id, ttl = proposal.ttl, to = %next, "forwarding proposal");
    ctx.send(&next, WireMessage::ConnectionProposal(proposal));
}

// ─── Acceptances ─────────────────────────────────────────────────────────────

/// Complete one of our offers, or route the acceptance one hop back.
pub async fn on_acceptance(ctx: &mut NodeContext, label: &str, mut proposal: ConnectionProposal) {
    if proposal.is_expired(now_millis()) {
        debug!(id = proposal.id, "dropping expired acceptance");
        return;
    }

    let ours = ctx
        .pending
        .get(proposal.id)
        .filter(|p| p.origin == PendingOrigin::Offer)
        .map(|p| (p.channel.clone(), p.peer_id.is_some()));
    if let Some((channel, answered)) = ours {
        let peer = proposal.peer_id;
        if answered
            || peer == ctx.peer_id
            || ctx.registry.find_by_peer_id(&peer).is_some()
            || ctx.pending.has_peer(&peer)
        {
            debug!(id = proposal.id, %peer, "already connected, ignoring acceptance");
            return;
        }
        match channel.set_remote_description(proposal.content).await {
            Ok(()) => {
                if let Some(pending) = ctx.pending.get_mut(proposal.id) {
                    pending.peer_id = Some(peer);
                }
                info!(id = proposal.id, %peer, "proposal answered");
                ctx.emit(MeshEvent::Milestone(Milestone::ProposalAnswered));
            }
            Err(e) => {
                warn!(id = proposal.id, error = %e, "failed to complete handshake");
                discard(ctx, proposal.id);
            }
        }
        return;
    }

    let Some(back) = proposal.pop_hop() else {
        debug!(id = proposal.id, from = %label, "acceptance with exhausted path");
        return;
    };
    if ctx.registry.find_by_label(&back).is_none() {
        debug!(id = proposal.id, label = %back, "reverse path broken, dropping acceptance");
        return;
    }
    ctx.send(&back, WireMessage::ProposalAccepted(proposal));
}

// ─── Pending Lifecycle ───────────────────────────────────────────────────────

/// Promote the pending channel `label` to a session once it opens.
///
/// Returns `false` if `label` is not pending.
pub fn promote(ctx: &mut NodeContext, label: &str) -> bool {
    let Some(pending) = ctx.pending.take_by_label(label) else {
        return false;
    };
    ctx.timers.cancel(TimerKey::ProposalExpiry(pending.id));
    if ctx.registry.is_full() {
        ctx.evict_oldest(None);
    }
    let channel = pending.channel.clone();
    match ctx.registry.admit(pending.peer_id, pending.channel) {
        Ok(id) => {
            info!(%label, session = id, peer = ?pending.peer_id, "session opened");
            ctx.emit(MeshEvent::Milestone(Milestone::Connected {
                label: label.to_string(),
            }));
            if ctx.registry.count() == 1 {
                ctx.timers.schedule(TimerKey::FormOverlay, Duration::ZERO);
            } else {
                ctx.timers
                    .ensure(TimerKey::FormOverlay, ctx.config.formation_interval);
            }
        }
        Err(e) => {
            debug!(%label, error = %e, "refusing session");
            channel.close();
        }
    }
    true
}

/// A pending channel closed before opening.
pub fn on_pending_closed(ctx: &mut NodeContext, label: &str) -> bool {
    match ctx.pending.take_by_label(label) {
        Some(pending) => {
            ctx.timers.cancel(TimerKey::ProposalExpiry(pending.id));
            true
        }
        None => false,
    }
}

/// Expiry timer of a pending proposal fired.
pub fn on_expiry(ctx: &mut NodeContext, id: ProposalId) {
    if let Some(pending) = ctx.pending.remove(id) {
        debug!(id, origin = ?pending.origin, "pending proposal expired");
        pending.channel.close();
    }
}

fn discard(ctx: &mut NodeContext, id: ProposalId) {
    ctx.timers.cancel(TimerKey::ProposalExpiry(id));
    if let Some(pending) = ctx.pending.remove(id) {
        pending.channel.close();
    }
}

/// React to a session leaving the registry.
pub fn on_session_closed(ctx: &mut NodeContext, label: &Label, remaining: usize) {
    debug!(%label, remaining, "session closed");
    if remaining == 0 {
        info!("all peer connections lost");
        ctx.emit(MeshEvent::PeerConnectionsLost);
    }
    ctx.timers.schedule(TimerKey::FormOverlay, Duration::ZERO);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::testing::{context, with_sessions};
    use crate::transport::{Channel, Transport};
    use murmur_types::proposal::SessionDescription;
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    fn proposal(path: &[&str], ttl: u32) -> ConnectionProposal {
        ConnectionProposal {
            id: 42,
            peer_id: uuid::Uuid::new_v4(),
            channel_path: path.iter().map(|l| l.to_string()).collect(),
            ttl,
            expires_at: now_millis() + 10_000,
            content: SessionDescription::offer("memory:nowhere"),
        }
    }

    fn never_accepts() -> RelayConfig {
        RelayConfig {
            min_degree: 0,
            ..RelayConfig::default()
        }
    }

    fn forwarded(msgs: Vec<WireMessage>) -> Vec<ConnectionProposal> {
        msgs.into_iter()
            .filter_map(|m| match m {
                WireMessage::ConnectionProposal(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_direct_neighbors_never_admitted(
            sessions in 0usize..30,
            min_degree in 0usize..30,
            coin in 0.0f64..1.0,
        ) {
            let direct = proposal(&["a"], 5);
            prop_assert!(!admits(&direct, false, sessions, min_degree, coin));
            let fresh = proposal(&[], 5);
            prop_assert!(!admits(&fresh, false, sessions, min_degree, coin));
        }

        #[test]
        fn prop_connected_peers_never_admitted(
            sessions in 0usize..30,
            coin in 0.0f64..1.0,
        ) {
            let indirect = proposal(&["a", "b"], 5);
            prop_assert!(!admits(&indirect, true, sessions, 5, coin));
        }
    }

    #[test]
    fn test_admission_below_min_degree_ignores_coin() {
        let indirect = proposal(&["a", "b"], 5);
        assert!(admits(&indirect, false, 2, 5, 0.1));
        assert!(!admits(&indirect, false, 5, 5, 0.1));
        assert!(admits(&indirect, false, 5, 5, 0.9));
    }

    #[tokio::test]
    async fn test_rejected_proposal_walks_to_other_session() {
        let mut t = context(never_accepts());
        let stubs = with_sessions(&mut t.ctx, &["from", "next"]);
        // A one-label path is a direct neighbor, so the coin never matters.
        on_proposal(&mut t.ctx, "from", proposal(&["from"], 3)).await;

        assert!(stubs[0].sent().is_empty());
        let out = forwarded(stubs[1].sent());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ttl, 2);
        assert_eq!(out[0].channel_path, vec!["from".to_string(), "next".to_string()]);
    }

    #[tokio::test]
    async fn test_ttl_termination() {
        let mut t = context(never_accepts());
        let stubs = with_sessions(&mut t.ctx, &["from", "next"]);
        on_proposal(&mut t.ctx, "from", proposal(&["from"], 1)).await;
        assert!(stubs[1].sent().is_empty());

        // Walk a proposal back and forth until its budget runs out.
        let mut current = proposal(&["from"], 4);
        let mut hops = 0;
        let mut ttls = vec![current.ttl];
        loop {
            let (inbound, outbound) = if hops % 2 == 0 { ("from", 1) } else { ("next", 0) };
            let before = stubs[outbound].sent().len();
            on_proposal(&mut t.ctx, inbound, current.clone()).await;
            let sent = forwarded(stubs[outbound].sent());
            if sent.len() == before {
                break;
            }
            current = sent[sent.len() - 1].clone();
            current.channel_path.truncate(1);
            ttls.push(current.ttl);
            hops += 1;
        }
        assert_eq!(hops, 3);
        assert!(ttls.windows(2).all(|w| w[1] < w[0]));
        assert_eq!(*ttls.last().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_single_session_drops_rejected_proposal() {
        let mut t = context(never_accepts());
        let stubs = with_sessions(&mut t.ctx, &["only"]);
        on_proposal(&mut t.ctx, "only", proposal(&["only"], 10)).await;
        assert!(stubs[0].sent().is_empty());
    }

    #[tokio::test]
    async fn test_expired_proposal_is_dropped() {
        let mut t = context(RelayConfig::default());
        let stubs = with_sessions(&mut t.ctx, &["from", "next"]);
        let mut stale = proposal(&["x", "from"], 10);
        stale.expires_at = now_millis().saturating_sub(1);
        on_proposal(&mut t.ctx, "from", stale).await;
        assert!(stubs.iter().all(|s| s.sent().is_empty()));
        assert!(t.ctx.pending.is_empty());
    }

    #[tokio::test]
    async fn test_accept_replies_on_delivering_session() {
        let mut t = context(RelayConfig::default());
        let stubs = with_sessions(&mut t.ctx, &["from"]);
        let (remote_sink, _remote_rx) = mpsc::unbounded_channel();
        let offer = t
            .network
            .transport()
            .create_offer(false, remote_sink)
            .await
            .unwrap();
        let mut inbound = proposal(&["origin", "from"], 10);
        inbound.content = offer.local_description();
        let originator = inbound.peer_id;

        on_proposal(&mut t.ctx, "from", inbound).await;

        let replies = stubs[0].sent();
        let [WireMessage::ProposalAccepted(reply)] = replies.as_slice() else {
            panic!("expected one acceptance, got {replies:?}");
        };
        assert_eq!(reply.id, 42);
        assert_eq!(reply.peer_id, t.ctx.peer_id);
        assert_eq!(reply.channel_path, vec!["origin".to_string()]);
        assert_eq!(reply.content.kind, murmur_types::proposal::SdpKind::Answer);
        assert!(t.ctx.pending.has_peer(&originator));
        assert!(matches!(
            t.events.try_recv(),
            Ok(MeshEvent::Milestone(Milestone::ProposalAccepted))
        ));
    }

    #[tokio::test]
    async fn test_acceptance_completes_own_offer() {
        let mut t = context(RelayConfig::default());
        let stubs = with_sessions(&mut t.ctx, &["via"]);
        form_overlay(&mut t.ctx).await;
        let sent = forwarded(stubs[0].sent());
        let mine = sent[0].clone();

        let (remote_sink, _remote_rx) = mpsc::unbounded_channel();
        let answer = t
            .network
            .transport()
            .create_answer(&mine.content, false, remote_sink)
            .await
            .unwrap();
        let mut acceptance = mine.clone();
        acceptance.channel_path.clear();
        acceptance.content = answer.local_description();
        acceptance.peer_id = uuid::Uuid::new_v4();

        on_acceptance(&mut t.ctx, "via", acceptance.clone()).await;
        assert_eq!(
            t.ctx.pending.get(mine.id).unwrap().peer_id,
            Some(acceptance.peer_id)
        );
        assert!(matches!(
            t.channel_rx.try_recv(),
            Ok(crate::transport::ChannelEvent::Opened { .. })
        ));

        // A second acceptance for the same offer is ignored.
        on_acceptance(&mut t.ctx, "via", acceptance).await;
        assert_eq!(forwarded(stubs[0].sent()).len(), sent.len());
    }

    #[tokio::test]
    async fn test_acceptance_pops_one_hop() {
        let mut t = context(RelayConfig::default());
        let stubs = with_sessions(&mut t.ctx, &["back", "other"]);
        let mut acceptance = proposal(&["back"], 10);
        acceptance.content = SessionDescription::answer("memory:nowhere");

        on_acceptance(&mut t.ctx, "other", acceptance).await;
        let sent = stubs[0].sent();
        let [WireMessage::ProposalAccepted(relayed)] = sent.as_slice() else {
            panic!("expected relayed acceptance, got {sent:?}");
        };
        assert!(relayed.channel_path.is_empty());

        // With nothing left to pop the acceptance dies here.
        on_acceptance(&mut t.ctx, "back", relayed.clone()).await;
        assert!(stubs[1].sent().is_empty());
    }

    #[tokio::test]
    async fn test_formation_respects_burst_limit() {
        let mut t = context(RelayConfig {
            creation_burst_limit: 3,
            ..RelayConfig::default()
        });
        let stubs = with_sessions(&mut t.ctx, &["a", "b"]);
        form_overlay(&mut t.ctx).await;

        let sent: usize = stubs.iter().map(|s| forwarded(s.sent()).len()).sum();
        assert_eq!(sent, 3);
        assert_eq!(t.ctx.pending.len(), 3);
        assert_eq!(t.network.open_offers(), 3);
        assert!(t.ctx.timers.is_armed(TimerKey::FormOverlay));
        for stub in &stubs {
            for p in forwarded(stub.sent()) {
                assert_eq!(p.channel_path, vec![stub.label().to_string()]);
                assert_eq!(p.ttl, t.ctx.config.proposal_ttl);
                assert_eq!(p.peer_id, t.ctx.peer_id);
            }
        }
    }

    #[tokio::test]
    async fn test_formation_counts_pending_against_degree() {
        let mut t = context(RelayConfig {
            max_degree: 4,
            ..RelayConfig::default()
        });
        with_sessions(&mut t.ctx, &["a", "b"]);
        form_overlay(&mut t.ctx).await;
        assert_eq!(t.ctx.pending.len(), 2);
        form_overlay(&mut t.ctx).await;
        assert_eq!(t.ctx.pending.len(), 2);
    }

    #[tokio::test]
    async fn test_formation_idle_without_sessions() {
        let mut t = context(RelayConfig::default());
        form_overlay(&mut t.ctx).await;
        assert!(t.ctx.pending.is_empty());
        assert!(!t.ctx.timers.is_armed(TimerKey::FormOverlay));
    }

    #[tokio::test]
    async fn test_expiry_closes_pending_channel() {
        let mut t = context(RelayConfig::default());
        let stubs = with_sessions(&mut t.ctx, &["a"]);
        form_overlay(&mut t.ctx).await;
        let ids: Vec<ProposalId> = forwarded(stubs[0].sent()).iter().map(|p| p.id).collect();
        assert_eq!(t.network.open_offers(), ids.len());

        for id in ids {
            on_expiry(&mut t.ctx, id);
            on_expiry(&mut t.ctx, id);
        }
        assert!(t.ctx.pending.is_empty());
        assert_eq!(t.network.open_offers(), 0);
    }

    #[tokio::test]
    async fn test_last_close_reports_connections_lost() {
        let mut t = context(RelayConfig::default());
        on_session_closed(&mut t.ctx, &"gone".to_string(), 0);
        assert!(matches!(
            t.events.try_recv(),
            Ok(MeshEvent::PeerConnectionsLost)
        ));
        assert!(t.ctx.timers.is_armed(TimerKey::FormOverlay));
    }
}

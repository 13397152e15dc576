//! `murmur simulate`: an in-process mesh bootstrapped through the memory
//! rendezvous.

use std::sync::Arc;
use std::time::Duration;

use murmur_relay::events::{MeshEvent, Milestone};
use murmur_relay::memory_transport::MemoryNetwork;
use murmur_relay::node::{MeshHandle, MeshNode, NodeStats};
use murmur_relay::rendezvous::MemoryRendezvous;
use murmur_types::primitives::MessageId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::MeshConfig;
use crate::error::NodeError;
use crate::ui::{cell_right, data_table, print_table, spinner, style_dim, style_info, style_success, style_warn};

const RENDEZVOUS_SERVER: &str = "memory";

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub peers: usize,
    pub messages: usize,
    pub room: String,
    pub seed: u64,
    /// How long each join and the final convergence may take.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PeerReport {
    pub nickname: String,
    pub stats: NodeStats,
    /// Messages of the run this peer holds.
    pub received: usize,
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub peers: Vec<PeerReport>,
    pub messages: usize,
    pub converged: bool,
    pub elapsed: Duration,
}

impl SimulationReport {
    /// Messages held across all peers, out of `peers * messages`.
    pub fn delivered(&self) -> usize {
        self.peers.iter().map(|p| p.received).sum()
    }

    pub fn expected(&self) -> usize {
        self.peers.len() * self.messages
    }
}

async fn wait_for(
    rx: &mut broadcast::Receiver<MeshEvent>,
    timeout: Duration,
    mut pred: impl FnMut(&MeshEvent) -> bool,
) -> bool {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.unwrap_or(false)
}

async fn held(node: &MeshHandle, ids: &[MessageId]) -> Result<usize, NodeError> {
    let mut count = 0;
    for id in ids {
        if node.has_message(*id).await? {
            count += 1;
        }
    }
    Ok(count)
}

/// Join `options.peers` nodes into one room, publish `options.messages`
/// messages from random peers and wait until every peer holds all of them.
pub async fn simulate(
    options: &SimulationOptions,
    mesh: &MeshConfig,
) -> Result<SimulationReport, NodeError> {
    if options.peers < 2 {
        return Err(NodeError::SimulationError {
            reason: "a mesh needs at least two peers".to_string(),
        });
    }
    let started = Instant::now();
    let network = MemoryNetwork::new();
    let hub = MemoryRendezvous::new();

    let mut nodes = Vec::with_capacity(options.peers);
    for i in 0..options.peers {
        let mut config = mesh.to_relay_config();
        config.nickname = format!("peer-{i:02}");
        config.rng_seed = Some(options.seed.wrapping_add(i as u64));
        let handle = MeshNode::new(config.clone(), Arc::new(network.transport()))
            .with_rendezvous(Arc::new(hub.clone()))
            .spawn()?;

        let mut events = handle.subscribe();
        handle.join(options.room.clone(), RENDEZVOUS_SERVER).await?;
        // The first peer has nobody to meet yet.
        if i > 0 {
            let joined = wait_for(&mut events, options.timeout, |e| {
                matches!(e, MeshEvent::Milestone(Milestone::Connected { .. }))
            })
            .await;
            if !joined {
                return Err(NodeError::SimulationError {
                    reason: format!("{} could not join room {}", config.nickname, options.room),
                });
            }
        }
        debug!(nickname = %config.nickname, "peer joined");
        nodes.push((config.nickname, handle));
    }
    info!(peers = nodes.len(), room = %options.room, "mesh assembled");

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut ids = Vec::with_capacity(options.messages);
    for m in 0..options.messages {
        let (nickname, sender) = &nodes[rng.gen_range(0..nodes.len())];
        let id = sender
            .send_message(format!("message {m} from {nickname}"), None)
            .await?;
        ids.push(id);
    }

    let deadline = Instant::now() + options.timeout;
    let converged = loop {
        let mut complete = true;
        for (_, node) in &nodes {
            if held(node, &ids).await? < ids.len() {
                complete = false;
                break;
            }
        }
        if complete {
            break true;
        }
        if Instant::now() >= deadline {
            break false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    let mut peers = Vec::with_capacity(nodes.len());
    for (nickname, node) in &nodes {
        peers.push(PeerReport {
            nickname: nickname.clone(),
            stats: node.stats().await?,
            received: held(node, &ids).await?,
        });
    }
    for (_, node) in &nodes {
        node.shutdown().await;
    }

    let report = SimulationReport {
        peers,
        messages: ids.len(),
        converged,
        elapsed: started.elapsed(),
    };
    info!(
        converged,
        delivered = report.delivered(),
        expected = report.expected(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "simulation finished"
    );
    Ok(report)
}

/// Run a simulation and print its report.
pub async fn run(options: SimulationOptions, mesh: &MeshConfig) -> Result<(), NodeError> {
    println!(
        "  {} {} peers, {} messages, room {}",
        style_dim().apply_to("Simulating"),
        style_info().apply_to(options.peers),
        style_info().apply_to(options.messages),
        style_info().apply_to(&options.room),
    );
    let pb = spinner("Assembling mesh and spreading messages...");
    let result = simulate(&options, mesh).await;
    pb.finish_and_clear();
    let report = result?;

    let mut table = data_table(&["Peer", "Sessions", "Messages", "Pending", "Tracked"]);
    for peer in &report.peers {
        table.add_row(vec![
            comfy_table::Cell::new(&peer.nickname),
            cell_right(peer.stats.sessions),
            cell_right(format!("{}/{}", peer.received, report.messages)),
            cell_right(peer.stats.pending_proposals),
            cell_right(peer.stats.tracked_ids),
        ]);
    }
    print_table(&table);

    let summary = format!(
        "{}/{} deliveries in {:.2}s",
        report.delivered(),
        report.expected(),
        report.elapsed.as_secs_f64()
    );
    if report.converged {
        println!("  {} {}", style_success().apply_to("Converged:"), summary);
        Ok(())
    } else {
        println!("  {} {}", style_warn().apply_to("Did not converge:"), summary);
        Err(NodeError::SimulationError {
            reason: "mesh did not converge before the timeout".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(peers: usize, messages: usize) -> SimulationOptions {
        SimulationOptions {
            peers,
            messages,
            room: "test".to_string(),
            seed: 42,
            timeout: Duration::from_secs(120),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_mesh_converges() {
        let report = simulate(&options(6, 4), &MeshConfig::default())
            .await
            .unwrap();
        assert!(report.converged);
        assert_eq!(report.peers.len(), 6);
        assert_eq!(report.delivered(), report.expected());
        for peer in &report.peers {
            assert!(peer.stats.sessions >= 1, "{} is isolated", peer.nickname);
            assert_eq!(peer.stats.cached_messages, 4);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_peer_is_refused() {
        assert!(matches!(
            simulate(&options(1, 1), &MeshConfig::default()).await,
            Err(NodeError::SimulationError { .. })
        ));
    }
}

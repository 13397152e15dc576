//! Helpers for unit tests of the protocol components.

use std::sync::Arc;

use async_trait::async_trait;
use murmur_types::network::WireMessage;
use murmur_types::proposal::SessionDescription;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::codec;
use crate::config::RelayConfig;
use crate::context::{Internal, NodeContext};
use crate::error::RelayError;
use crate::events::MeshEvent;
use crate::memory_transport::MemoryNetwork;
use crate::timers::TimerFired;
use crate::transport::{Channel, ChannelEvent};

/// An always-open channel that records what is sent on it.
pub struct StubChannel {
    label: String,
    sent: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl StubChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        })
    }

    /// Decoded frames sent so far, oldest first.
    pub fn sent(&self) -> Vec<WireMessage> {
        self.sent
            .lock()
            .iter()
            .filter_map(|data| codec::decode_message(data).ok())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl Channel for StubChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn local_description(&self) -> SessionDescription {
        SessionDescription::offer(format!("stub:{}", self.label))
    }

    async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), RelayError> {
        Ok(())
    }

    fn send(&self, data: &str) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::TransportFailure {
                reason: format!("stub {} closed", self.label),
            });
        }
        self.sent.lock().push(data.to_string());
        Ok(())
    }

    fn close(&self) {
        *self.closed.lock() = true;
    }
}

/// A context over a fresh memory network, with its receiving ends.
pub struct TestContext {
    pub ctx: NodeContext,
    pub network: MemoryNetwork,
    pub channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    pub timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    pub internal_rx: mpsc::UnboundedReceiver<Internal>,
    pub events: broadcast::Receiver<MeshEvent>,
}

pub fn context(config: RelayConfig) -> TestContext {
    let network = MemoryNetwork::new();
    let (sink, channel_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (events_tx, events) = broadcast::channel(64);
    let ctx = NodeContext::new(
        RelayConfig {
            rng_seed: Some(7),
            ..config
        },
        Arc::new(network.transport()),
        sink,
        timer_tx,
        internal_tx,
        events_tx,
    );
    TestContext {
        ctx,
        network,
        channel_rx,
        timer_rx,
        internal_rx,
        events,
    }
}

/// Admit stub sessions with the given labels.
pub fn with_sessions(ctx: &mut NodeContext, labels: &[&str]) -> Vec<Arc<StubChannel>> {
    labels
        .iter()
        .map(|label| {
            let stub = StubChannel::new(label);
            ctx.registry
                .admit(None, stub.clone())
                .expect("admit stub session");
            stub
        })
        .collect()
}

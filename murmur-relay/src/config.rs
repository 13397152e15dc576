use std::time::Duration;

use murmur_types::constants::{
    CALL_LIFETIME, CREATION_BURST_LIMIT, FEED_INTERVAL, FORMATION_INTERVAL, IDEAL_MAX_DEGREE,
    IDEAL_MIN_DEGREE, MAX_TRACKED_IDS, PROPOSAL_LIFETIME, PROPOSAL_TTL, PULL_INTERVAL, PULL_RETRY,
    RENDEZVOUS_LINGER,
};

/// Configuration for a mesh node.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Name shown to other peers and used to address private messages.
    pub nickname: String,
    /// Upper bound on open sessions.
    pub max_degree: usize,
    /// Below this many sessions every eligible proposal is accepted.
    pub min_degree: usize,
    /// Offers created per formation cycle, at most.
    pub creation_burst_limit: usize,
    pub proposal_ttl: u32,
    pub proposal_lifetime: Duration,
    pub formation_interval: Duration,
    /// Whether this node creates connection proposals on its own.
    pub formation_enabled: bool,
    pub pull_interval: Duration,
    pub pull_retry: Duration,
    pub max_tracked_ids: usize,
    pub call_lifetime: Duration,
    /// Delay before re-feeding the rendezvous room when well connected.
    pub feed_interval: Duration,
    /// How long a rendezvous socket stays open.
    pub rendezvous_linger: Duration,
    /// Seed for the admission and routing RNG. `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            nickname: "anonymous".to_string(),
            max_degree: IDEAL_MAX_DEGREE,
            min_degree: IDEAL_MIN_DEGREE,
            creation_burst_limit: CREATION_BURST_LIMIT,
            proposal_ttl: PROPOSAL_TTL,
            proposal_lifetime: PROPOSAL_LIFETIME,
            formation_interval: FORMATION_INTERVAL,
            formation_enabled: true,
            pull_interval: PULL_INTERVAL,
            pull_retry: PULL_RETRY,
            max_tracked_ids: MAX_TRACKED_IDS,
            call_lifetime: CALL_LIFETIME,
            feed_interval: FEED_INTERVAL,
            rendezvous_linger: RENDEZVOUS_LINGER,
            rng_seed: None,
        }
    }
}

impl RelayConfig {
    pub fn with_nickname(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            ..Self::default()
        }
    }
}

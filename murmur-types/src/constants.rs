use std::time::Duration;

// ─── Overlay Parameters ──────────────────────────────────────────────────────

/// Maximum number of concurrently open sessions.
pub const IDEAL_MAX_DEGREE: usize = 20;

/// Below this many sessions every eligible proposal is accepted.
pub const IDEAL_MIN_DEGREE: usize = 5;

/// Maximum number of offers created by a single formation cycle.
pub const CREATION_BURST_LIMIT: usize = 5;

/// Hop budget of a freshly created connection proposal.
pub const PROPOSAL_TTL: u32 = 32;

/// How long a connection proposal (and its pending offer) stays valid.
pub const PROPOSAL_LIFETIME: Duration = Duration::from_secs(10);

/// Cadence of the overlay formation cycle.
pub const FORMATION_INTERVAL: Duration = Duration::from_secs(30);

// ─── Gossip Parameters ───────────────────────────────────────────────────────

/// Drain interval of the pull queue.
pub const PULL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait on one source before asking the next.
pub const PULL_RETRY: Duration = Duration::from_millis(200);

/// Maximum number of announced-but-unfetched message ids.
pub const MAX_TRACKED_IDS: usize = 6_000;

// ─── Call Parameters ─────────────────────────────────────────────────────────

/// How long an unanswered call offer is kept.
pub const CALL_LIFETIME: Duration = Duration::from_secs(60);

/// Capacity of the per-node call loop guard.
pub const MAX_SEEN_CALLS: usize = 1_024;

// ─── Rendezvous Parameters ───────────────────────────────────────────────────

/// Delay before re-feeding the room when the node is already well connected.
pub const FEED_INTERVAL: Duration = Duration::from_secs(20);

/// How long a rendezvous socket is kept open before being recycled.
pub const RENDEZVOUS_LINGER: Duration = Duration::from_secs(30);

// ─── Wire Parameters ─────────────────────────────────────────────────────────

/// Maximum encoded size of a single session frame.
pub const MAX_MESSAGE_SIZE: usize = 1_048_576; // 1 MB

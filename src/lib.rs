//! # casa-kvs
//!
//! A causally consistent, sharded, replicated key-value store.
//!
//! Keys are assigned to shards by a deterministic hash of the key
//! ([`hasher`]), each shard is replicated across a fixed-size bucket of
//! nodes ([`view`]), and replicas within a bucket converge via periodic
//! full-shard gossip with last-write-wins conflict resolution
//! ([`store`]). Clients carry an opaque causal context between calls so
//! that a read can be rejected until the writes it causally depends on
//! are visible on the node serving it ([`causal`]).
//!
//! [`distributor`] is the orchestrator that ties these pieces together
//! into the operations the HTTP layer ([`http`]) exposes.

mod causal;
mod config;
mod distributor;
mod error;
mod hasher;
mod peer;
mod scheduler;
mod store;
mod types;
mod view;

pub mod http;

pub use causal::{CausalEngine, RemoteLookup};
pub use config::NodeConfig;
pub use distributor::{Distributor, ShardInfo};
pub use error::{KvsError, KvsResult};
pub use peer::PeerClient;
pub use scheduler::GossipScheduler;
pub use store::KvStore;
pub use types::{CausalContext, CauseEntry, Entry, EntryContext, PutOutcome, Shard};
pub use view::View;

/// Initializes the tracing subscriber used by both binaries.
///
/// The log level is controlled via the `KVS_LOG` environment variable,
/// falling back to `info` when unset:
/// - `KVS_LOG=error` - only errors
/// - `KVS_LOG=warn` - errors and warnings
/// - `KVS_LOG=info` - general information (default)
/// - `KVS_LOG=debug` - debug information
/// - `KVS_LOG=trace` - verbose tracing, including every gossip round
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("KVS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

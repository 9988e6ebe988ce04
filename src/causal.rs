/// Causal consistency checking.
///
/// A client's causal context names the keys it has previously observed and
/// the `last_write` timestamp of each observation. A read or write may
/// proceed only once every dependency in the context is visible: either
/// already present locally, or confirmed present on the bucket that owns
/// that key. The second case needs a network round trip, so the engine is
/// generic over a `RemoteLookup` implementation rather than depending on
/// the distributor directly — keeps the dependency edge pointing one way.
use async_trait::async_trait;

use crate::error::{KvsError, KvsResult};
use crate::store::KvStore;
use crate::types::{CausalContext, EntryContext};

/// Abstraction over "ask the bucket that owns this key whether it has seen
/// a write at least this recent." Implemented by the distributor, which
/// knows how to route a key to its owning bucket and call a peer.
#[async_trait]
pub trait RemoteLookup: Send + Sync {
    async fn has_seen(&self, key: &str, last_write: f64) -> KvsResult<bool>;
}

pub struct CausalEngine;

impl Default for CausalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CausalEngine {
    pub fn new() -> Self {
        Self
    }

    /// Returns `Ok(())` once every causal predecessor named in `ctx` is
    /// satisfied, either locally or via `remote`. Returns
    /// `Err(UnableToSatisfy)` the moment a predecessor cannot be confirmed,
    /// including when the remote probe itself fails.
    ///
    /// What is walked is each entry's `cause` list, not the entry's own
    /// `(key, last_write)` pair: `ctx` names the keys the client has
    /// directly observed, but the write that produced each observation may
    /// itself have depended on earlier writes, recorded in `cause` at write
    /// time. Satisfying the context means satisfying every one of those
    /// recorded predecessors, transitively flattened into a single list by
    /// the time the client saw them.
    pub async fn check(
        &self,
        ctx: &CausalContext,
        store: &KvStore,
        remote: &dyn RemoteLookup,
    ) -> KvsResult<()> {
        for (_, meta) in &ctx.0 {
            for (cause_key, cause_ts) in &meta.cause {
                if self.satisfied_locally(cause_key, *cause_ts, store).await {
                    continue;
                }
                match remote.has_seen(cause_key, *cause_ts).await {
                    Ok(true) => continue,
                    Ok(false) => return Err(KvsError::UnableToSatisfy),
                    Err(_) => return Err(KvsError::UnableToSatisfy),
                }
            }
        }
        Ok(())
    }

    async fn satisfied_locally(&self, key: &str, cause_ts: f64, store: &KvStore) -> bool {
        match store.get_raw(key).await {
            Some(entry) => entry.last_write >= cause_ts,
            None => false,
        }
    }

    /// Projects a causal context into the `cause` list stored alongside a
    /// new write.
    pub fn build_cause(&self, ctx: &CausalContext) -> Vec<(String, f64)> {
        ctx.as_cause()
    }

    /// Returns the context a client should carry forward after observing
    /// `key` at `meta`: the old context with this observation appended.
    pub fn extend(&self, ctx: &CausalContext, key: &str, meta: EntryContext) -> CausalContext {
        ctx.with_appended(key, meta)
    }
}

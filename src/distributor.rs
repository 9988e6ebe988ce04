/// The orchestrator that ties membership, storage, causal checking, and
/// inter-node RPC together into the operations the HTTP layer calls.
///
/// Every public method first decides whether the key belongs to this
/// node's own bucket. If so it operates on the local store directly; if
/// not it proxies to the owning bucket, trying each replica in turn until
/// one answers, mirroring the "entire bucket down" handling of the
/// original distributor.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::causal::{CausalEngine, RemoteLookup};
use crate::error::{KvsError, KvsResult};
use crate::hasher;
use crate::peer::PeerClient;
use crate::scheduler::GossipScheduler;
use crate::store::KvStore;
use crate::types::{CausalContext, Entry, PutOutcome, Shard};
use crate::view::View;

const MAX_KEY_LEN: usize = 50;

pub struct ShardInfo {
    pub shard_id: usize,
    pub key_count: usize,
    pub replicas: Vec<String>,
}

pub struct Distributor {
    view: RwLock<View>,
    store: KvStore,
    peer: PeerClient,
    causal: CausalEngine,
    scheduler: GossipScheduler,
    gossip_interval: Duration,
}

fn validate_key(key: &str) -> KvsResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(KvsError::KeyTooLong);
    }
    Ok(())
}

impl Distributor {
    pub fn new(view: View, gossip_interval: Duration) -> Self {
        Self {
            view: RwLock::new(view),
            store: KvStore::new(),
            peer: PeerClient::new(),
            causal: CausalEngine::new(),
            scheduler: GossipScheduler::new(),
            gossip_interval,
        }
    }

    pub async fn key_count(&self) -> usize {
        self.store.key_count().await
    }

    async fn locate(&self, key: &str) -> (usize, bool, Vec<String>) {
        let view = self.view.read().await;
        let bucket_index = hasher::assign(key, view.num_buckets());
        let is_own = view.is_own_bucket(bucket_index);
        let ips = view.bucket(bucket_index).map(|b| b.to_vec()).unwrap_or_default();
        (bucket_index, is_own, ips)
    }

    /// Tries each IP in `ips` in turn, relaying the first business error a
    /// replica returns immediately and only moving on to the next replica
    /// when a call is transient (peer down, timed out, unreachable).
    /// Returns `Unreachable` once every replica has failed, matching the
    /// "entire bucket is down" case the original handled by bailing out
    /// with a 503.
    async fn try_bucket<T, Fut>(
        &self,
        ips: &[String],
        mut call: impl FnMut(String) -> Fut,
    ) -> KvsResult<T>
    where
        Fut: std::future::Future<Output = KvsResult<T>>,
    {
        let mut last_err = KvsError::Unreachable("empty bucket".to_string());
        for ip in ips {
            match call(ip.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => last_err = e,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// Queries every replica in `ips` and keeps the freshest successful
    /// response (greatest `last_write`), falling back to whichever error
    /// carries the smallest status code when no replica succeeds — a 404
    /// is more informative than a 503, so it wins over an unreachable
    /// replica elsewhere in the bucket.
    async fn fanout_get(&self, ips: &[String], key: &str, ctx: &CausalContext) -> KvsResult<Entry> {
        let mut best: Option<Entry> = None;
        let mut best_err: Option<KvsError> = None;
        for ip in ips {
            match self.peer.get(ip, key, ctx).await {
                Ok(entry) => {
                    if best.as_ref().map(|b| entry.last_write > b.last_write).unwrap_or(true) {
                        best = Some(entry);
                    }
                }
                Err(e) => {
                    let better = best_err
                        .as_ref()
                        .map(|cur| e.status_code() < cur.status_code())
                        .unwrap_or(true);
                    if better {
                        best_err = Some(e);
                    }
                }
            }
        }
        match best {
            Some(entry) => Ok(entry),
            None => Err(best_err.unwrap_or(KvsError::Unreachable("empty bucket".to_string()))),
        }
    }

    pub async fn get(&self, key: &str, ctx: &CausalContext) -> KvsResult<Entry> {
        validate_key(key)?;
        let (_, is_own, ips) = self.locate(key).await;
        if is_own {
            self.causal.check(ctx, &self.store, self).await?;
            self.store.get(key).await.ok_or(KvsError::KeyNotExist)
        } else {
            self.fanout_get(&ips, key, ctx).await
        }
    }

    pub async fn put(&self, key: &str, value: String, ctx: &CausalContext) -> KvsResult<PutOutcome> {
        validate_key(key)?;
        let (_, is_own, ips) = self.locate(key).await;
        if is_own {
            self.causal.check(ctx, &self.store, self).await?;
            let cause = self.causal.build_cause(ctx);
            let created = self.store.get(key).await.is_none();
            let entry = self.store.upsert(key.to_string(), value, cause).await;
            Ok(PutOutcome { entry, created })
        } else {
            self.try_bucket(&ips, |ip| {
                let ctx = ctx.clone();
                let value = value.clone();
                async move { self.peer.put(&ip, key, &value, &ctx).await }
            })
            .await
        }
    }

    pub async fn delete(&self, key: &str, ctx: &CausalContext) -> KvsResult<Entry> {
        validate_key(key)?;
        let (_, is_own, ips) = self.locate(key).await;
        if is_own {
            self.causal.check(ctx, &self.store, self).await?;
            let cause = self.causal.build_cause(ctx);
            self.store.delete(key, cause).await
        } else {
            self.try_bucket(&ips, |ip| {
                let ctx = ctx.clone();
                async move { self.peer.delete(&ip, key, &ctx).await }
            })
            .await
        }
    }

    /// Absorbs a shard pushed by a gossip round or a shard transfer.
    pub async fn merge_shard(&self, shard: &Shard) {
        self.store.merge(shard).await;
    }

    /// Replaces the local store wholesale with a shard transferred during
    /// a view-change.
    pub async fn install_shard(&self, shard: Shard) {
        self.store.install(shard).await;
    }

    pub async fn snapshot(&self) -> Shard {
        self.store.snapshot().await
    }

    pub async fn current_view(&self) -> View {
        self.view.read().await.clone()
    }

    /// Reports membership for every shard. `key_count` is only known for
    /// this node's own shard (its local store); other shards report 0
    /// rather than paying a remote round-trip just to answer a membership
    /// query, matching the original's leave-it-unimplemented stance on
    /// cross-shard counts.
    pub async fn shard_info(&self) -> Vec<ShardInfo> {
        let view = self.view.read().await;
        let own_count = self.store.key_count().await;
        view.all_bucket_ids()
            .into_iter()
            .map(|id| ShardInfo {
                shard_id: id,
                key_count: if view.is_own_bucket(id) { own_count } else { 0 },
                replicas: view.bucket(id).map(|b| b.to_vec()).unwrap_or_default(),
            })
            .collect()
    }

    /// Installs a new view. When `propagate` is true, this node acts as the
    /// leader of the change: it asks every node in the union of the old and
    /// new membership for its shard, merges everything into one map using
    /// last-write-wins, reshards the merged map by the new view's bucket
    /// count, and pushes each bucket's slice to its replicas before
    /// returning. Followers (propagate = false) simply install the new
    /// view and hand back their own shard for the leader to merge.
    pub async fn change_view(
        self: &Arc<Self>,
        new_ips: Vec<String>,
        repl_factor: usize,
        propagate: bool,
    ) -> KvsResult<Vec<ShardInfo>> {
        let old_ips: Vec<String> = self.view.read().await.all_ips().to_vec();
        let self_addr = self.view.read().await.self_addr().to_string();

        let new_view = View::new(new_ips.clone(), self_addr.clone(), repl_factor)?;
        let own_shard = self.store.snapshot().await;
        *self.view.write().await = new_view;

        if !propagate {
            self.rebuild_gossip_jobs().await;
            return Ok(Vec::new());
        }

        let mut union_ips: Vec<String> = old_ips;
        for ip in &new_ips {
            if !union_ips.contains(ip) {
                union_ips.push(ip.clone());
            }
        }

        let mut merged: Shard = own_shard;
        for ip in &union_ips {
            if ip == &self_addr {
                continue;
            }
            match self.peer.view_change_propagate(ip, &new_ips, repl_factor).await {
                Ok(shard) => crate::store::merge_into(&mut merged, &shard),
                Err(e) => warn!(peer = %ip, error = %e, "view-change peer fetch failed"),
            }
        }

        // Tombstones have done their job once every old and new replica has
        // had a chance to see them; carrying them across a reshard would
        // only resurrect stale values on the next gossip round between the
        // new bucket's replicas. Surviving entries are re-stamped the same
        // way, so a `cause` pointing at a key that moved buckets in this
        // reshard can't outlive the reshard that invalidated it.
        crate::store::reset_context_into(&mut merged);

        let view = self.view.read().await;
        let num_buckets = view.num_buckets();
        let mut bucket_shards: Vec<Shard> = vec![Shard::new(); num_buckets];
        for (key, entry) in merged {
            let bucket_index = hasher::assign(&key, num_buckets);
            bucket_shards[bucket_index].insert(key, entry);
        }

        let mut infos = Vec::with_capacity(num_buckets);
        for bucket_index in 0..num_buckets {
            let replicas = view.bucket(bucket_index).unwrap_or(&[]).to_vec();
            let shard = bucket_shards[bucket_index].clone();
            infos.push(ShardInfo {
                shard_id: bucket_index,
                key_count: shard.len(),
                replicas: replicas.clone(),
            });
            for ip in &replicas {
                if ip == view.self_addr() {
                    self.store.install(shard.clone()).await;
                    continue;
                }
                if let Err(e) = self.peer.shard_transfer(ip, bucket_index, &shard).await {
                    warn!(peer = %ip, error = %e, "shard transfer failed, relying on gossip");
                }
            }
        }
        drop(view);

        self.rebuild_gossip_jobs().await;
        Ok(infos)
    }

    /// (Re)starts one periodic gossip job per peer in this node's own
    /// bucket, each pushing a full snapshot of the local store.
    pub async fn rebuild_gossip_jobs(self: &Arc<Self>) {
        self.scheduler.clear_jobs();
        let peers = self.view.read().await.self_bucket(false);
        for peer_addr in peers {
            let this = Arc::clone(self);
            let addr = peer_addr.clone();
            self.scheduler.add_job(addr.clone(), self.gossip_interval, move || {
                let this = Arc::clone(&this);
                let addr = addr.clone();
                async move {
                    let shard = this.store.snapshot().await;
                    if let Err(e) = this.peer.gossip(&addr, &shard).await {
                        warn!(peer = %addr, error = %e, "gossip push failed");
                    } else {
                        info!(peer = %addr, "gossip push succeeded");
                    }
                }
            });
        }
    }

    pub fn stop_gossip(&self) {
        self.scheduler.clear_jobs();
    }

    /// Returns the `last_write` timestamp this node (or, if the key
    /// belongs elsewhere, the owning bucket) has recorded for `key`,
    /// ignoring tombstone state. Used both to answer a peer's causal probe
    /// and to serve this node's own remote-lookup fallback.
    pub async fn peek_last_write(&self, key: &str) -> KvsResult<Option<f64>> {
        let (_, is_own, ips) = self.locate(key).await;
        if is_own {
            Ok(self.store.get_raw(key).await.map(|e| e.last_write))
        } else {
            self.try_bucket(&ips, |ip| async move { self.peer.probe(&ip, key).await })
                .await
        }
    }
}

#[async_trait]
impl RemoteLookup for Distributor {
    async fn has_seen(&self, key: &str, last_write: f64) -> KvsResult<bool> {
        let seen = self.peek_last_write(key).await?;
        Ok(seen.map(|lw| lw >= last_write).unwrap_or(false))
    }
}

/// Cluster membership and shard partitioning.
///
/// A `View` is immutable once constructed: a view-change builds a brand new
/// `View` and swaps it in wholesale rather than mutating one in place.
use crate::error::{KvsError, KvsResult};

#[derive(Debug, Clone)]
pub struct View {
    all_ips: Vec<String>,
    self_addr: String,
    repl_factor: usize,
    buckets: Vec<Vec<String>>,
    bucket_index: Option<usize>,
    replica_index: Option<usize>,
}

impl View {
    /// Builds a view from the membership list, this node's own address, and
    /// the replication factor.
    ///
    /// Fails if `all_ips.len()` is not a multiple of `repl_factor`, or if
    /// `repl_factor` is zero. `self_addr` need not be present in `all_ips`
    /// — a node can run while temporarily absent from its own view during a
    /// propagated change — but when it is present, `bucket_index` is the
    /// index of the first bucket containing it.
    pub fn new(all_ips: Vec<String>, self_addr: String, repl_factor: usize) -> KvsResult<Self> {
        if repl_factor == 0 {
            return Err(KvsError::InvalidView(
                "replication factor must be at least 1".to_string(),
            ));
        }
        if all_ips.len() % repl_factor != 0 {
            return Err(KvsError::InvalidView(format!(
                "membership of length {} is not divisible by replication factor {}",
                all_ips.len(),
                repl_factor
            )));
        }

        let buckets: Vec<Vec<String>> = all_ips
            .chunks(repl_factor)
            .map(|chunk| chunk.to_vec())
            .collect();

        let mut bucket_index = None;
        let mut replica_index = None;
        for (index, bucket) in buckets.iter().enumerate() {
            if let Some(pos) = bucket.iter().position(|ip| ip == &self_addr) {
                bucket_index = Some(index);
                replica_index = Some(pos);
                break;
            }
        }

        Ok(Self {
            all_ips,
            self_addr,
            repl_factor,
            buckets,
            bucket_index,
            replica_index,
        })
    }

    pub fn all_ips(&self) -> &[String] {
        &self.all_ips
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn repl_factor(&self) -> usize {
        self.repl_factor
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_index(&self) -> Option<usize> {
        self.bucket_index
    }

    pub fn replica_index(&self) -> Option<usize> {
        self.replica_index
    }

    pub fn is_own_bucket(&self, index: usize) -> bool {
        self.bucket_index == Some(index)
    }

    /// IPs in this node's own bucket. Excludes `self_addr` when
    /// `include_self` is false — the common case when fanning out peer
    /// calls, since there is never a reason to RPC yourself.
    pub fn self_bucket(&self, include_self: bool) -> Vec<String> {
        let Some(index) = self.bucket_index else {
            return Vec::new();
        };
        let bucket = &self.buckets[index];
        if include_self {
            bucket.clone()
        } else {
            bucket
                .iter()
                .filter(|ip| *ip != &self.self_addr)
                .cloned()
                .collect()
        }
    }

    pub fn all_bucket_ids(&self) -> Vec<usize> {
        (0..self.buckets.len()).collect()
    }

    pub fn bucket(&self, index: usize) -> Option<&[String]> {
        self.buckets.get(index).map(|b| b.as_slice())
    }

    /// The leader of a bucket: its first IP. Used only for deterministic
    /// tie-breaking; there is no leader election or special authority.
    pub fn bucket_leader(&self, index: usize) -> Option<&str> {
        self.bucket(index).and_then(|b| b.first()).map(|s| s.as_str())
    }
}

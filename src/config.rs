/// Node configuration loaded from the environment.
///
/// The original deployment model configures every node purely through
/// environment variables set by the orchestrator that launches it, so
/// `NodeConfig::from_env` stays the single entry point rather than also
/// accepting a config file.
use clap::Parser;

use crate::error::{KvsError, KvsResult};

#[derive(Debug, Clone, Parser)]
#[command(name = "kvs-node", about = "Causally consistent, sharded, replicated key-value store")]
pub struct NodeConfig {
    /// This node's own address, in `host:port` form. Must also appear in `view`.
    #[arg(long, env = "ADDRESS")]
    pub address: String,

    /// Comma-separated list of every node's address in the cluster.
    #[arg(long, env = "VIEW", value_delimiter = ',')]
    pub view: Vec<String>,

    /// Number of replicas per shard. The view length must be a multiple of this.
    #[arg(long, env = "REPL_FACTOR")]
    pub repl_factor: usize,

    /// How often a node pushes a full gossip snapshot to its bucket peers.
    #[arg(long, env = "GOSSIP_INTERVAL_SECS", default_value_t = 10)]
    pub gossip_interval_secs: u64,
}

impl NodeConfig {
    pub fn from_env() -> KvsResult<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> KvsResult<()> {
        if self.view.is_empty() {
            return Err(KvsError::InvalidView("view must not be empty".to_string()));
        }
        if self.repl_factor == 0 {
            return Err(KvsError::InvalidView(
                "replication factor must be at least 1".to_string(),
            ));
        }
        if self.view.len() % self.repl_factor != 0 {
            return Err(KvsError::InvalidView(format!(
                "view of length {} is not divisible by replication factor {}",
                self.view.len(),
                self.repl_factor
            )));
        }
        Ok(())
    }
}

/// Command-line client for a running cluster node.
///
/// Format: `kvs-cli --url http://<address> <command>`
///
/// Examples:
///   kvs-cli --url http://127.0.0.1:13800 put foo bar
///   kvs-cli --url http://127.0.0.1:13800 get foo
///   kvs-cli --url http://127.0.0.1:13800 delete foo
///   kvs-cli --url http://127.0.0.1:13800 status
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;

struct HttpClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpClient {
    fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn get(&self, key: &str) -> Result<JsonValue> {
        let url = format!("{}/kvs/keys/{key}", self.base_url);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("key not found: {key}");
        }
        let data: JsonValue = response.error_for_status()?.json().await?;
        Ok(data)
    }

    async fn put(&self, key: &str, value: &str) -> Result<JsonValue> {
        let url = format!("{}/kvs/keys/{key}", self.base_url);
        let body = serde_json::json!({ "value": value, "causal-context": "" });
        let response = self.client.put(&url).json(&body).send().await?;
        let data: JsonValue = response.error_for_status()?.json().await?;
        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<JsonValue> {
        let url = format!("{}/kvs/keys/{key}", self.base_url);
        let body = serde_json::json!({ "causal-context": "" });
        let response = self
            .client
            .delete(&url)
            .json(&body)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("key not found: {key}");
        }
        let data: JsonValue = response.error_for_status()?.json().await?;
        Ok(data)
    }

    async fn status(&self) -> Result<JsonValue> {
        let url = format!("{}/kvs/key-count", self.base_url);
        let response = self.client.get(&url).send().await?;
        let data: JsonValue = response.error_for_status()?.json().await?;
        Ok(data)
    }

    async fn shards(&self) -> Result<JsonValue> {
        let url = format!("{}/kvs/shards", self.base_url);
        let response = self.client.get(&url).send().await?;
        let data: JsonValue = response.error_for_status()?.json().await?;
        Ok(data)
    }

    async fn change_view(&self, view: &str, repl_factor: usize) -> Result<JsonValue> {
        let url = format!("{}/kvs/view-change", self.base_url);
        let body = serde_json::json!({ "view": view, "repl-factor": repl_factor });
        let response = self.client.put(&url).json(&body).send().await?;
        let data: JsonValue = response.error_for_status()?.json().await?;
        Ok(data)
    }
}

/// casa-kvs command-line client.
#[derive(Parser)]
#[command(name = "kvs-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Node URL, e.g. http://127.0.0.1:13800
    #[arg(short, long, env = "KVS_NODE_URL")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value under a key
    Put { key: String, value: String },
    /// Retrieve the value stored under a key
    Get { key: String },
    /// Delete a key
    Delete { key: String },
    /// Show the number of live keys on the node
    Status,
    /// Show shard membership
    Shards,
    /// Trigger a cluster-wide view change
    ViewChange {
        /// Comma-separated list of node addresses
        view: String,
        #[arg(long, default_value_t = 1)]
        repl_factor: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = HttpClient::new(cli.url);

    let output = match cli.command {
        Commands::Put { key, value } => client.put(&key, &value).await.context("put failed")?,
        Commands::Get { key } => client.get(&key).await.context("get failed")?,
        Commands::Delete { key } => client.delete(&key).await.context("delete failed")?,
        Commands::Status => client.status().await.context("status failed")?,
        Commands::Shards => client.shards().await.context("shards failed")?,
        Commands::ViewChange { view, repl_factor } => {
            client.change_view(&view, repl_factor).await.context("view-change failed")?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

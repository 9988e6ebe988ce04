/// HTTP client for inter-node RPC.
///
/// Every cross-node call in the cluster — gossip push, shard transfer,
/// view-change propagation, causal probes — travels as JSON over HTTP
/// rather than the raw framed TCP protocol teacher nodes use for peer
/// traffic, since the wire routes here are the HTTP ones. A single
/// `reqwest::Client` is shared and reused across calls for connection
/// pooling.
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{KvsError, KvsResult};
use crate::types::{CausalContext, Entry, EntryContext, PutOutcome, Shard};

/// Recovers the metadata a peer's response attached to `key`'s own
/// causal-context entry. The handlers on the other end always append the
/// key just touched to the end of the returned context, so the last
/// matching entry is the authoritative one even if `key` already appeared
/// earlier in the context the caller sent.
fn context_entry(ctx: &CausalContext, key: &str) -> KvsResult<EntryContext> {
    ctx.0
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, meta)| meta.clone())
        .ok_or_else(|| KvsError::Unreachable(format!("peer response missing causal-context entry for {key}")))
}

const CALL_TIMEOUT: Duration = Duration::from_secs(3);

pub struct PeerClient {
    client: reqwest::Client,
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("reqwest client configuration is valid");
        Self { client }
    }

    fn normalize(addr: &str, err: reqwest::Error) -> KvsError {
        KvsError::Unreachable(format!("{addr}: {err}"))
    }

    /// Maps a wire error code (from `KvsError::wire_code`) back onto a
    /// `KvsError`, so a business error returned by a peer is relayed to
    /// the original caller rather than collapsed into `Unreachable`.
    fn from_wire(code: &str, message: String) -> KvsError {
        match code {
            "key_not_exist" => KvsError::KeyNotExist,
            "key_too_long" => KvsError::KeyTooLong,
            "value_missing" => KvsError::ValueMissing,
            "invalid_view" => KvsError::InvalidView(message),
            _ => KvsError::UnableToSatisfy,
        }
    }

    /// Sends a request and returns the raw response once its status is a
    /// success. A non-2xx response is decoded as a `{error, message}` body
    /// and returned as the matching `KvsError` rather than `Unreachable`, so
    /// a caller fanning out across a bucket's replicas can tell "this
    /// replica answered with a real error" apart from "this replica could
    /// not be reached at all".
    async fn execute<B: Serialize + Sync>(
        &self,
        method: reqwest::Method,
        addr: &str,
        path: &str,
        body: Option<&B>,
    ) -> KvsResult<reqwest::Response> {
        #[derive(serde::Deserialize)]
        struct ErrorBody {
            error: String,
            message: String,
        }

        let url = format!("http://{addr}{path}");
        let mut req = self.client.request(method, &url);
        if let Some(b) = body {
            req = req.json(b);
        }
        let response = req.send().await.map_err(|e| Self::normalize(addr, e))?;
        if !response.status().is_success() {
            return match response.json::<ErrorBody>().await {
                Ok(err) => Err(Self::from_wire(&err.error, err.message)),
                Err(e) => Err(Self::normalize(addr, e)),
            };
        }
        Ok(response)
    }

    /// Decodes a successful response body as JSON.
    async fn send_json<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        addr: &str,
        path: &str,
        body: Option<&B>,
    ) -> KvsResult<R> {
        let response = self.execute(method, addr, path, body).await?;
        response.json::<R>().await.map_err(|e| Self::normalize(addr, e))
    }

    /// Like `send_json`, but also returns the response's status code —
    /// needed to tell a PUT that created a key (201) apart from one that
    /// updated it in place (200).
    async fn send_json_with_status<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        addr: &str,
        path: &str,
        body: Option<&B>,
    ) -> KvsResult<(reqwest::StatusCode, R)> {
        let response = self.execute(method, addr, path, body).await?;
        let status = response.status();
        let parsed = response.json::<R>().await.map_err(|e| Self::normalize(addr, e))?;
        Ok((status, parsed))
    }

    /// Sends a request whose successful response carries no body, as
    /// `/kvs/gossip` and `/kvs/shard` do.
    async fn send_empty<B: Serialize + Sync>(
        &self,
        method: reqwest::Method,
        addr: &str,
        path: &str,
        body: Option<&B>,
    ) -> KvsResult<()> {
        self.execute(method, addr, path, body).await.map(|_| ())
    }

    pub async fn get(&self, addr: &str, key: &str, ctx: &CausalContext) -> KvsResult<Entry> {
        #[derive(serde::Deserialize)]
        struct KeyWireResponse {
            value: Option<String>,
            #[serde(rename = "causal-context")]
            causal_context: CausalContext,
        }

        let body = serde_json::json!({ "causal-context": ctx });
        let path = format!("/kvs/keys/{key}");
        let resp: KeyWireResponse = self.send_json(reqwest::Method::GET, addr, &path, Some(&body)).await?;
        let meta = context_entry(&resp.causal_context, key)?;
        Ok(Entry { value: resp.value, last_write: meta.last_write, cause: meta.cause, deleted: meta.deleted })
    }

    pub async fn put(
        &self,
        addr: &str,
        key: &str,
        value: &str,
        ctx: &CausalContext,
    ) -> KvsResult<PutOutcome> {
        #[derive(serde::Deserialize)]
        struct ContextWireResponse {
            #[serde(rename = "causal-context")]
            causal_context: CausalContext,
        }

        let body = serde_json::json!({ "value": value, "causal-context": ctx });
        let path = format!("/kvs/keys/{key}");
        let (status, resp): (reqwest::StatusCode, ContextWireResponse) = self
            .send_json_with_status(reqwest::Method::PUT, addr, &path, Some(&body))
            .await?;
        let meta = context_entry(&resp.causal_context, key)?;
        let entry = Entry {
            value: Some(value.to_string()),
            last_write: meta.last_write,
            cause: meta.cause,
            deleted: meta.deleted,
        };
        Ok(PutOutcome { entry, created: status == reqwest::StatusCode::CREATED })
    }

    pub async fn delete(&self, addr: &str, key: &str, ctx: &CausalContext) -> KvsResult<Entry> {
        #[derive(serde::Deserialize)]
        struct ContextWireResponse {
            #[serde(rename = "causal-context")]
            causal_context: CausalContext,
        }

        let body = serde_json::json!({ "causal-context": ctx });
        let path = format!("/kvs/keys/{key}");
        let resp: ContextWireResponse =
            self.send_json(reqwest::Method::DELETE, addr, &path, Some(&body)).await?;
        let meta = context_entry(&resp.causal_context, key)?;
        Ok(Entry { value: None, last_write: meta.last_write, cause: meta.cause, deleted: meta.deleted })
    }

    pub async fn gossip(&self, addr: &str, shard: &Shard) -> KvsResult<()> {
        self.send_empty(reqwest::Method::PUT, addr, "/kvs/gossip", Some(shard)).await
    }

    pub async fn shard_transfer(&self, addr: &str, bucket_id: usize, shard: &Shard) -> KvsResult<()> {
        let body = serde_json::json!({ "bucket_id": bucket_id, "shard": shard });
        self.send_empty(reqwest::Method::PUT, addr, "/kvs/shard", Some(&body)).await
    }

    /// Asks a peer to install `all_ips`/`repl_factor` as its new view and
    /// hand back its own shard, so the caller (the leader of a view-change)
    /// can fold it into the merged, resharded map.
    pub async fn view_change_propagate(
        &self,
        addr: &str,
        all_ips: &[String],
        repl_factor: usize,
    ) -> KvsResult<Shard> {
        #[derive(serde::Deserialize)]
        struct PropagateResponse {
            kvs: Shard,
        }
        let body = serde_json::json!({ "view": all_ips, "repl-factor": repl_factor });
        let resp: PropagateResponse = self
            .send_json(reqwest::Method::PUT, addr, "/kvs/view-change-propagate", Some(&body))
            .await?;
        Ok(resp.kvs)
    }

    pub async fn key_count(&self, addr: &str) -> KvsResult<usize> {
        #[derive(serde::Deserialize)]
        struct CountResponse {
            key_count: usize,
        }
        let resp: CountResponse = self
            .send_json::<(), CountResponse>(reqwest::Method::GET, addr, "/kvs/key-count", None)
            .await?;
        Ok(resp.key_count)
    }

    /// Asks a peer for the `last_write` timestamp it has recorded for
    /// `key`, without running a causal check — used by the causal engine's
    /// remote lookup to answer "have you seen a write at least this
    /// recent". Returns `None` when the peer has no record of the key.
    pub async fn probe(&self, addr: &str, key: &str) -> KvsResult<Option<f64>> {
        #[derive(serde::Deserialize)]
        struct ProbeResponse {
            last_write: Option<f64>,
        }
        let body = serde_json::json!({ "probe": true });
        let path = format!("/kvs/keys/{key}");
        let resp: ProbeResponse = self
            .send_json(reqwest::Method::GET, addr, &path, Some(&body))
            .await?;
        Ok(resp.last_write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_address_normalizes_to_unable_to_satisfy_source() {
        let client = PeerClient::new();
        let ctx = CausalContext::empty();
        let err = client.get("127.0.0.1:1", "k", &ctx).await.unwrap_err();
        assert!(matches!(err, KvsError::Unreachable(_)));
    }

    #[test]
    fn context_entry_finds_the_last_matching_key() {
        let mut ctx = CausalContext::empty();
        ctx.push("k", EntryContext { last_write: 1.0, cause: vec![], deleted: false });
        ctx.push("other", EntryContext { last_write: 2.0, cause: vec![], deleted: false });
        ctx.push("k", EntryContext { last_write: 3.0, cause: vec![], deleted: true });
        let meta = context_entry(&ctx, "k").unwrap();
        assert_eq!(meta.last_write, 3.0);
        assert!(meta.deleted);
    }

    #[test]
    fn context_entry_missing_key_is_unreachable() {
        let ctx = CausalContext::empty();
        let err = context_entry(&ctx, "k").unwrap_err();
        assert!(matches!(err, KvsError::Unreachable(_)));
    }
}

/// Integration tests for the distributed key-value store.
///
/// Spins up real nodes listening on ephemeral `127.0.0.1` ports and talks
/// to them exactly as a client would, over HTTP. Each test owns its own
/// cluster so tests run independently of each other.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use casa_kvs::{Distributor, View};
use serde_json::{json, Value};

/// Reserves `n` ephemeral ports on 127.0.0.1 and returns their addresses,
/// without holding the sockets open — good enough for tests, where the
/// window between reservation and the node's own bind is negligible.
fn reserve_addresses(n: usize) -> Vec<String> {
    (0..n)
        .map(|_| {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        })
        .collect()
}

async fn spawn_node(all_ips: Vec<String>, self_addr: String, repl_factor: usize) -> Arc<Distributor> {
    let view = View::new(all_ips, self_addr.clone(), repl_factor).unwrap();
    let distributor = Arc::new(Distributor::new(view, Duration::from_millis(100)));
    distributor.rebuild_gossip_jobs().await;

    let addr: SocketAddr = self_addr.parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let app = casa_kvs::http::router(Arc::clone(&distributor));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    distributor
}

async fn wait_for_node(addr: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client.get(format!("http://{addr}/kvs/key-count")).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("node at {addr} never came up");
}

async fn put(client: &reqwest::Client, addr: &str, key: &str, value: &str) -> Value {
    client
        .put(format!("http://{addr}/kvs/keys/{key}"))
        .json(&json!({ "value": value, "causal-context": "" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn get(client: &reqwest::Client, addr: &str, key: &str) -> reqwest::Response {
    client
        .get(format!("http://{addr}/kvs/keys/{key}"))
        .json(&json!({ "causal-context": "" }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn single_node_put_then_get() {
    let addrs = reserve_addresses(1);
    spawn_node(addrs.clone(), addrs[0].clone(), 1).await;
    wait_for_node(&addrs[0]).await;

    let client = reqwest::Client::new();
    let put_resp = put(&client, &addrs[0], "k", "v").await;
    assert!(put_resp.get("causal-context").is_some());

    let response = get(&client, &addrs[0], "k").await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["value"], "v");
}

#[tokio::test]
async fn get_missing_key_is_404() {
    let addrs = reserve_addresses(1);
    spawn_node(addrs.clone(), addrs[0].clone(), 1).await;
    wait_for_node(&addrs[0]).await;

    let client = reqwest::Client::new();
    let response = get(&client, &addrs[0], "missing").await;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

/// Write on one replica of a two-node bucket, read from the other: without
/// gossip the second replica has nothing, but once a gossip round has had
/// time to run, the write is visible everywhere in the bucket.
#[tokio::test]
async fn gossip_converges_writes_across_a_bucket() {
    let addrs = reserve_addresses(2);
    spawn_node(addrs.clone(), addrs[0].clone(), 2).await;
    spawn_node(addrs.clone(), addrs[1].clone(), 2).await;
    wait_for_node(&addrs[0]).await;
    wait_for_node(&addrs[1]).await;

    let client = reqwest::Client::new();
    put(&client, &addrs[0], "k", "v").await;

    let mut converged = false;
    for _ in 0..50 {
        let response = get(&client, &addrs[1], "k").await;
        if response.status() == reqwest::StatusCode::OK {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(converged, "write never gossiped to the other replica");
}

/// A two-bucket cluster routes a key to whichever bucket owns it,
/// regardless of which node in the cluster receives the request.
#[tokio::test]
async fn requests_are_routed_to_the_owning_bucket() {
    let addrs = reserve_addresses(2);
    spawn_node(addrs.clone(), addrs[0].clone(), 1).await;
    spawn_node(addrs.clone(), addrs[1].clone(), 1).await;
    wait_for_node(&addrs[0]).await;
    wait_for_node(&addrs[1]).await;

    let client = reqwest::Client::new();
    // Write through node 0; whichever bucket actually owns the key, the
    // value must read back the same from either entry point.
    put(&client, &addrs[0], "routed-key", "v1").await;

    let via_node0 = get(&client, &addrs[0], "routed-key").await;
    assert_eq!(via_node0.status(), reqwest::StatusCode::OK);
    let body0: Value = via_node0.json().await.unwrap();
    assert_eq!(body0["value"], "v1");

    let via_node1 = get(&client, &addrs[1], "routed-key").await;
    assert_eq!(via_node1.status(), reqwest::StatusCode::OK);
    let body1: Value = via_node1.json().await.unwrap();
    assert_eq!(body1["value"], "v1");
}

#[tokio::test]
async fn delete_then_get_is_404() {
    let addrs = reserve_addresses(1);
    spawn_node(addrs.clone(), addrs[0].clone(), 1).await;
    wait_for_node(&addrs[0]).await;

    let client = reqwest::Client::new();
    put(&client, &addrs[0], "k", "v").await;

    let del_resp = client
        .delete(format!("http://{}/kvs/keys/k", addrs[0]))
        .json(&json!({ "causal-context": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(del_resp.status(), reqwest::StatusCode::OK);

    let response = get(&client, &addrs[0], "k").await;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn a_stale_causal_context_is_rejected() {
    let addrs = reserve_addresses(1);
    spawn_node(addrs.clone(), addrs[0].clone(), 1).await;
    wait_for_node(&addrs[0]).await;

    let client = reqwest::Client::new();
    put(&client, &addrs[0], "k", "v").await;

    let future_ctx = json!([["k", { "last_write": 9_999_999_999.0, "cause": [], "deleted": false }]]);
    let response = client
        .get(format!("http://{}/kvs/keys/k", addrs[0]))
        .json(&json!({ "causal-context": future_ctx }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn key_count_tracks_live_keys_only() {
    let addrs = reserve_addresses(1);
    spawn_node(addrs.clone(), addrs[0].clone(), 1).await;
    wait_for_node(&addrs[0]).await;

    let client = reqwest::Client::new();
    put(&client, &addrs[0], "a", "1").await;
    put(&client, &addrs[0], "b", "2").await;
    client
        .delete(format!("http://{}/kvs/keys/a", addrs[0]))
        .json(&json!({ "causal-context": "" }))
        .send()
        .await
        .unwrap();

    let response = client
        .get(format!("http://{}/kvs/key-count", addrs[0]))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["key_count"], 1);
}

#[tokio::test]
async fn key_longer_than_fifty_bytes_is_rejected() {
    let addrs = reserve_addresses(1);
    spawn_node(addrs.clone(), addrs[0].clone(), 1).await;
    wait_for_node(&addrs[0]).await;

    let client = reqwest::Client::new();
    let long_key = "k".repeat(51);
    let response = client
        .put(format!("http://{}/kvs/keys/{}", addrs[0], long_key))
        .json(&json!({ "value": "v", "causal-context": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

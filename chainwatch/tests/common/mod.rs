//! Mock nodes and scrape helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock server");
    });
    format!("http://{addr}")
}

/// A URL nothing listens on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

#[derive(Clone, Copy)]
pub struct Bitcoind {
    pub blocks: u64,
    /// Answer every call with `RPC_IN_WARMUP` (-28).
    pub warming_up: bool,
}

pub fn bitcoind(mock: Bitcoind) -> Router {
    Router::new().route("/", axum::routing::post(bitcoind_rpc)).with_state(mock)
}

async fn bitcoind_rpc(
    State(mock): State<Bitcoind>,
    headers: HeaderMap,
    Json(batch): Json<Vec<Value>>,
) -> Response {
    if !headers.contains_key(header::AUTHORIZATION) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let replies: Vec<Value> = batch
        .iter()
        .map(|req| {
            let id = req["id"].clone();
            if mock.warming_up {
                return json!({
                    "id": id,
                    "result": null,
                    "error": {"code": -28, "message": "Loading block index..."}
                });
            }
            let result = match req["method"].as_str().unwrap_or_default() {
                "getblockchaininfo" => json!({
                    "chain": "main",
                    "blocks": mock.blocks,
                    "headers": mock.blocks,
                    "time": 1_700_000_000u64,
                    "difficulty": 83_148_355_189_239.77,
                    "chainwork": "0000000000000000000000000000000000000000752b0d5c6d3b1f2e4d8ff6e0",
                    "size_on_disk": 600_000_000_000u64,
                    "initialblockdownload": false,
                    "warnings": ""
                }),
                "getnetworkinfo" => json!({
                    "version": 270100,
                    "subversion": "/Satoshi:27.1.0/",
                    "protocolversion": 70016,
                    "connections": 10,
                    "connections_in": 2,
                    "connections_out": 8,
                    "localservices": "0000000000000c09"
                }),
                "getnettotals" => json!({"totalbytesrecv": 1_000_000, "totalbytessent": 2_000_000}),
                "getmempoolinfo" => json!({
                    "loaded": true,
                    "size": 5,
                    "bytes": 1_200,
                    "usage": 4_800,
                    "mempoolminfee": 0.00001
                }),
                "getpeerinfo" => json!([
                    {"id": 0, "subver": "/Satoshi:27.1.0/"},
                    {"id": 1, "subver": "/Satoshi:27.1.0/"},
                    {"id": 2, "subver": "/Satoshi:26.0.0/"}
                ]),
                _ => {
                    return json!({
                        "id": id,
                        "result": null,
                        "error": {"code": -32601, "message": "Method not found"}
                    });
                }
            };
            json!({"id": id, "result": result, "error": null})
        })
        .collect();

    Json(replies).into_response()
}

#[derive(Clone, Copy)]
pub struct Geth {
    pub block: u64,
}

/// Execution client answering single calls and batches.
pub fn geth(mock: Geth) -> Router {
    Router::new().route("/", axum::routing::post(geth_rpc)).with_state(mock)
}

async fn geth_rpc(State(mock): State<Geth>, Json(body): Json<Value>) -> Json<Value> {
    match body {
        Value::Array(reqs) => Json(Value::Array(
            reqs.iter().map(|r| geth_reply(mock, r)).collect(),
        )),
        req => Json(geth_reply(mock, &req)),
    }
}

fn geth_reply(mock: Geth, req: &Value) -> Value {
    let result = match req["method"].as_str().unwrap_or_default() {
        "eth_blockNumber" => json!(format!("{:#x}", mock.block)),
        "eth_syncing" => json!(false),
        "net_peerCount" => json!("0x19"),
        "eth_gasPrice" => json!("0x6fc23ac00"),
        "eth_chainId" => json!("0x1"),
        "web3_clientVersion" => json!("Geth/v1.13.14-stable-2bd6bd01/linux-amd64/go1.21.7"),
        "eth_getBlockByNumber" => json!({
            "number": format!("{:#x}", mock.block),
            "timestamp": "0x6553f100",
            "baseFeePerGas": "0x5d21dba00",
            "transactions": []
        }),
        _ => {
            return json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": {"code": -32601, "message": "the method does not exist"}
            });
        }
    };
    json!({"jsonrpc": "2.0", "id": req["id"], "result": result})
}

/// Beacon node with the four endpoints the exporter reads.
pub fn beacon() -> Router {
    Router::new()
        .route(
            "/eth/v1/node/syncing",
            get(|| async {
                Json(json!({"data": {
                    "head_slot": "8000040",
                    "sync_distance": "0",
                    "is_syncing": false,
                    "is_optimistic": false,
                    "el_offline": false
                }}))
            }),
        )
        .route(
            "/eth/v1/beacon/states/head/finality_checkpoints",
            get(|| async {
                Json(json!({
                    "execution_optimistic": false,
                    "data": {
                        "previous_justified": {"epoch": "249998", "root": "0x01"},
                        "current_justified": {"epoch": "249999", "root": "0x02"},
                        "finalized": {"epoch": "249998", "root": "0x03"}
                    }
                }))
            }),
        )
        .route(
            "/eth/v1/node/peer_count",
            get(|| async { Json(json!({"data": {"connected": "80", "disconnected": "4"}})) }),
        )
        .route(
            "/eth/v1/node/version",
            get(|| async { Json(json!({"data": {"version": "Nimbus/v24.2.2-403c6b-stateofus"}})) }),
        )
}

/// Public JSON-RPC endpoint that answers `answers` requests, then only
/// returns 429.
pub fn exhausted_rpc(block: u64, answers: usize) -> Router {
    let left = Arc::new(AtomicUsize::new(answers));
    Router::new().fallback(move |Json(req): Json<Value>| {
        let left = left.clone();
        async move {
            let take = left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            match take {
                Ok(_) => Json(geth_reply(Geth { block }, &req)).into_response(),
                Err(_) => StatusCode::TOO_MANY_REQUESTS.into_response(),
            }
        }
    })
}

/// beaconcha.in-style epoch endpoint; its URL is `{base}/api/v1/epoch/latest`.
pub fn participation(rate: f64) -> Router {
    Router::new().route(
        "/api/v1/epoch/latest",
        get(move || async move {
            Json(json!({
                "status": "OK",
                "data": {"epoch": 250_000, "globalparticipationrate": rate},
            }))
        }),
    )
}

/// Plain-text height reference.
pub fn plain_height(height: u64) -> Router {
    Router::new().fallback(move || async move { height.to_string() })
}

/// Answers every request with `status` and an empty body.
pub fn status(status: StatusCode) -> Router {
    Router::new().fallback(move || async move { status })
}

/// Answers every request after `delay`.
pub fn slow(delay: Duration) -> Router {
    Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        "0"
    })
}

pub async fn scrape(addr: SocketAddr) -> String {
    reqwest::get(format!("http://{addr}/metrics"))
        .await
        .expect("scrape")
        .text()
        .await
        .expect("scrape body")
}

/// Scrapes until `ready` holds or the deadline passes, then scrapes once
/// more after a short pause so an in-flight publish has landed.
pub async fn scrape_until(addr: SocketAddr, ready: impl Fn(&str) -> bool) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let body = scrape(addr).await;
        if ready(&body) {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return scrape(addr).await;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition never held; last scrape:\n{body}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Value of the exact series `series` (name plus rendered labels).
pub fn value(body: &str, series: &str) -> Option<f64> {
    body.lines().find_map(|line| {
        let rest = line.strip_prefix(series)?.strip_prefix(' ')?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

//! bitcoind JSON-RPC source.
//!
//! One poll issues a single batch:
//!
//! ```json
//! [
//!   {"jsonrpc": "2.0", "id": 0, "method": "getblockchaininfo", "params": []},
//!   {"jsonrpc": "2.0", "id": 1, "method": "getnetworkinfo", "params": []},
//!   {"jsonrpc": "2.0", "id": 2, "method": "getnettotals", "params": []},
//!   {"jsonrpc": "2.0", "id": 3, "method": "getmempoolinfo", "params": []},
//!   {"jsonrpc": "2.0", "id": 4, "method": "getpeerinfo", "params": []}
//! ]
//! ```
//!
//! Every field the exporter reads is optional: older or newer bitcoind
//! releases that drop a field simply leave the matching metric out.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use super::jsonrpc::{JsonRpcClient, RpcCall};
use super::{Source, decode, finish, take_next};
use crate::config::Credentials;
use crate::error::SourceError;
use crate::types::{Payload, Report, SourceId};

/// `getblockchaininfo`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct BlockchainInfo {
    /// Network name (`main`, `test`, `signet`, `regtest`).
    pub chain: Option<String>,
    pub blocks: Option<u64>,
    pub headers: Option<u64>,
    /// Tip block time (bitcoind 23+).
    pub time: Option<u64>,
    #[serde(rename = "verificationprogress")]
    pub verification_progress: Option<f64>,
    #[serde(rename = "initialblockdownload")]
    pub initial_block_download: Option<bool>,
    pub difficulty: Option<f64>,
    /// Total chain work as a hex string.
    #[serde(rename = "chainwork")]
    pub chain_work: Option<String>,
    pub size_on_disk: Option<u64>,
}

/// `getnetworkinfo`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NetworkInfo {
    /// Client version encoded as `MMmmpp` (e.g. `270100`).
    pub version: Option<u64>,
    pub subversion: Option<String>,
    #[serde(rename = "protocolversion")]
    pub protocol_version: Option<u64>,
    pub connections: Option<u64>,
    pub connections_in: Option<u64>,
    pub connections_out: Option<u64>,
}

/// `getnettotals`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NetTotals {
    #[serde(rename = "totalbytesrecv")]
    pub total_bytes_recv: Option<u64>,
    #[serde(rename = "totalbytessent")]
    pub total_bytes_sent: Option<u64>,
}

/// `getmempoolinfo`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MempoolInfo {
    pub size: Option<u64>,
    pub bytes: Option<u64>,
    pub usage: Option<u64>,
    /// BTC/kvB.
    #[serde(rename = "mempoolminfee")]
    pub min_fee: Option<f64>,
}

/// One entry of `getpeerinfo`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PeerInfo {
    #[serde(rename = "subver")]
    pub subversion: Option<String>,
}

/// Everything one bitcoind poll produced. `None` means the call failed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BitcoinNodeRecord {
    pub blockchain: Option<BlockchainInfo>,
    pub network: Option<NetworkInfo>,
    pub net_totals: Option<NetTotals>,
    pub mempool: Option<MempoolInfo>,
    pub peers: Option<Vec<PeerInfo>>,
}

const CALLS: [&str; 5] = [
    "getblockchaininfo",
    "getnetworkinfo",
    "getnettotals",
    "getmempoolinfo",
    "getpeerinfo",
];

/// bitcoind source.
pub struct BitcoinNodeClient {
    rpc: JsonRpcClient,
}

impl BitcoinNodeClient {
    pub fn new(
        url: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            rpc: JsonRpcClient::new(url, credentials, timeout)?,
        })
    }
}

impl Source for BitcoinNodeClient {
    fn id(&self) -> SourceId {
        SourceId::BitcoinNode
    }

    async fn poll(&self) -> Result<Report, SourceError> {
        let calls: Vec<RpcCall> = CALLS.into_iter().map(RpcCall::new).collect();
        let results = self.rpc.batch(&calls).await?;
        decode_batch(results)
    }
}

fn decode_batch(results: Vec<Result<Value, SourceError>>) -> Result<Report, SourceError> {
    let mut results = results.into_iter();
    let mut errors = Vec::new();

    let record = BitcoinNodeRecord {
        blockchain: take_next(&mut results, CALLS[0], &mut errors, |v| decode(CALLS[0], v)),
        network: take_next(&mut results, CALLS[1], &mut errors, |v| decode(CALLS[1], v)),
        net_totals: take_next(&mut results, CALLS[2], &mut errors, |v| decode(CALLS[2], v)),
        mempool: take_next(&mut results, CALLS[3], &mut errors, |v| decode(CALLS[3], v)),
        peers: take_next(&mut results, CALLS[4], &mut errors, |v| decode(CALLS[4], v)),
    };

    finish(
        Report::new(Payload::BitcoinNode(record)).with_call_errors(errors),
        CALLS.len(),
    )
}

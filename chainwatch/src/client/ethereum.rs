//! Ethereum execution client (geth and friends) JSON-RPC source.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use super::jsonrpc::{JsonRpcClient, RpcCall, quantity, quantity_u64};
use super::{Source, decode, finish, take_next};
use crate::config::Credentials;
use crate::error::SourceError;
use crate::types::{Payload, Report, SourceId};

/// Result of `eth_syncing`: either `false` or a progress object.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncStatus {
    Synced,
    Syncing {
        current_block: Option<u64>,
        highest_block: Option<u64>,
    },
}

impl SyncStatus {
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncStatus::Syncing { .. })
    }

    fn decode(value: Value) -> Result<Self, SourceError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Progress {
                #[serde(rename = "currentBlock", default)]
                current_block: Option<Value>,
                #[serde(rename = "highestBlock", default)]
                highest_block: Option<Value>,
            },
        }

        match decode::<Raw>("eth_syncing", value)? {
            Raw::Flag(false) => Ok(SyncStatus::Synced),
            Raw::Flag(true) => Ok(SyncStatus::Syncing {
                current_block: None,
                highest_block: None,
            }),
            Raw::Progress {
                current_block,
                highest_block,
            } => Ok(SyncStatus::Syncing {
                current_block: current_block.as_ref().map(quantity_u64).transpose()?,
                highest_block: highest_block.as_ref().map(quantity_u64).transpose()?,
            }),
        }
    }
}

/// Fields read from `eth_getBlockByNumber("latest", false)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LatestBlock {
    pub timestamp: Option<u64>,
    /// EIP-1559 base fee; absent on pre-London chains.
    pub base_fee_wei: Option<u128>,
}

impl LatestBlock {
    fn decode(value: Value) -> Result<Self, SourceError> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            timestamp: Option<Value>,
            #[serde(rename = "baseFeePerGas", default)]
            base_fee_per_gas: Option<Value>,
        }

        if value.is_null() {
            return Err(SourceError::MalformedResponse(
                "eth_getBlockByNumber: no latest block".into(),
            ));
        }
        let raw: Raw = decode("eth_getBlockByNumber", value)?;
        Ok(LatestBlock {
            timestamp: raw.timestamp.as_ref().map(quantity_u64).transpose()?,
            base_fee_wei: raw.base_fee_per_gas.as_ref().map(quantity).transpose()?,
        })
    }
}

/// Everything one execution-client poll produced. `None` means the call
/// failed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionRecord {
    pub block_number: Option<u64>,
    pub syncing: Option<SyncStatus>,
    pub peer_count: Option<u64>,
    pub gas_price_wei: Option<u128>,
    pub chain_id: Option<u64>,
    pub client_version: Option<String>,
    pub latest_block: Option<LatestBlock>,
}

const BLOCK_NUMBER: &str = "eth_blockNumber";
const SYNCING: &str = "eth_syncing";
const PEER_COUNT: &str = "net_peerCount";
const GAS_PRICE: &str = "eth_gasPrice";
const CHAIN_ID: &str = "eth_chainId";
const CLIENT_VERSION: &str = "web3_clientVersion";
const LATEST_BLOCK: &str = "eth_getBlockByNumber";

fn calls() -> [RpcCall; 7] {
    [
        RpcCall::new(BLOCK_NUMBER),
        RpcCall::new(SYNCING),
        RpcCall::new(PEER_COUNT),
        RpcCall::new(GAS_PRICE),
        RpcCall::new(CHAIN_ID),
        RpcCall::new(CLIENT_VERSION),
        RpcCall::with_params(LATEST_BLOCK, json!(["latest", false])),
    ]
}

/// Execution client source.
pub struct ExecutionClient {
    rpc: JsonRpcClient,
}

impl ExecutionClient {
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

impl Source for ExecutionClient {
    fn id(&self) -> SourceId {
        SourceId::EthereumExecution
    }

    async fn poll(&self) -> Result<Report, SourceError> {
        let calls = calls();
        let results = self.rpc.batch(&calls).await?;
        decode_batch(results, calls.len())
    }
}

fn decode_batch(
    results: Vec<Result<Value, SourceError>>,
    calls: usize,
) -> Result<Report, SourceError> {
    let mut results = results.into_iter();
    let mut errors = Vec::new();
    let r = &mut results;
    let e = &mut errors;

    let record = ExecutionRecord {
        block_number: take_next(r, BLOCK_NUMBER, e, |v| quantity_u64(&v)),
        syncing: take_next(r, SYNCING, e, SyncStatus::decode),
        peer_count: take_next(r, PEER_COUNT, e, |v| quantity_u64(&v)),
        gas_price_wei: take_next(r, GAS_PRICE, e, |v| quantity(&v)),
        chain_id: take_next(r, CHAIN_ID, e, |v| quantity_u64(&v)),
        client_version: take_next(r, CLIENT_VERSION, e, |v| decode(CLIENT_VERSION, v)),
        latest_block: take_next(r, LATEST_BLOCK, e, LatestBlock::decode),
    };

    finish(
        Report::new(Payload::EthereumExecution(record)).with_call_errors(errors),
        calls,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_batch() -> Vec<Result<Value, SourceError>> {
        vec![
            Ok(json!("0xc3500")),
            Ok(json!(false)),
            Ok(json!("0x19")),
            Ok(json!("0x5d21dba00")),
            Ok(json!("0x1")),
            Ok(json!("Geth/v1.13.14-stable-2bd6bd01/linux-amd64/go1.21.7")),
            Ok(json!({
                "number": "0xc3500",
                "timestamp": "0x6553f100",
                "baseFeePerGas": "0x5d21dba00",
                "transactions": []
            })),
        ]
    }

    fn record(report: &Report) -> &ExecutionRecord {
        match &report.payload {
            Payload::EthereumExecution(r) => r,
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn synced_node_decodes() {
        let report = decode_batch(ok_batch(), 7).unwrap();
        let r = record(&report);
        assert_eq!(r.block_number, Some(800_000));
        assert_eq!(r.syncing, Some(SyncStatus::Synced));
        assert_eq!(r.peer_count, Some(25));
        assert_eq!(r.gas_price_wei, Some(25_000_000_000));
        assert_eq!(r.chain_id, Some(1));
        assert_eq!(
            r.latest_block,
            Some(LatestBlock {
                timestamp: Some(0x6553f100),
                base_fee_wei: Some(25_000_000_000),
            })
        );
    }

    #[test]
    fn syncing_object_is_a_tagged_variant() {
        let status = SyncStatus::decode(json!({
            "startingBlock": "0x0",
            "currentBlock": "0x10",
            "highestBlock": "0x20"
        }))
        .unwrap();
        assert_eq!(
            status,
            SyncStatus::Syncing {
                current_block: Some(16),
                highest_block: Some(32),
            }
        );
        assert!(status.is_syncing());
    }

    #[test]
    fn pre_london_block_has_no_base_fee() {
        let block = LatestBlock::decode(json!({"timestamp": "0x10"})).unwrap();
        assert_eq!(block.base_fee_wei, None);
        assert_eq!(block.timestamp, Some(16));
    }

    #[test]
    fn bad_quantity_only_fails_its_call() {
        let mut batch = ok_batch();
        batch[2] = Ok(json!("twenty-five"));
        let report = decode_batch(batch, 7).unwrap();
        assert_eq!(report.call_errors.len(), 1);
        assert_eq!(report.call_errors[0].call, PEER_COUNT);
        assert_eq!(record(&report).peer_count, None);
        assert_eq!(record(&report).block_number, Some(800_000));
    }
}

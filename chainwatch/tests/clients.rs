//! Source adapters against mock HTTP servers: decoding and error mapping.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use chainwatch::client::{BeaconClient, BitcoinNodeClient, ExecutionClient};
use chainwatch::reference::{BitcoinReference, EthereumReference, ExternalReference};
use chainwatch::{Credentials, Payload, Source, SourceError};

use common::{Bitcoind, Geth};

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn bitcoind_batch_decodes_every_section() {
    let url = common::spawn(common::bitcoind(Bitcoind {
        blocks: 800_000,
        warming_up: false,
    }))
    .await;
    let client =
        BitcoinNodeClient::new(url, Some(Credentials::new("admin", "secret")), TIMEOUT).unwrap();

    let report = client.poll().await.unwrap();
    assert!(report.call_errors.is_empty());
    let Payload::BitcoinNode(record) = report.payload else {
        panic!("unexpected payload");
    };
    let chain = record.blockchain.unwrap();
    assert_eq!(chain.blocks, Some(800_000));
    assert_eq!(chain.size_on_disk, Some(600_000_000_000));
    assert_eq!(record.network.unwrap().version, Some(270_100));
    assert_eq!(record.mempool.unwrap().size, Some(5));
    assert_eq!(record.peers.unwrap().len(), 3);
}

#[tokio::test]
async fn bitcoind_without_credentials_is_auth_error() {
    let url = common::spawn(common::bitcoind(Bitcoind {
        blocks: 1,
        warming_up: false,
    }))
    .await;
    let client = BitcoinNodeClient::new(url, None, TIMEOUT).unwrap();

    assert!(matches!(client.poll().await, Err(SourceError::Auth(_))));
}

#[tokio::test]
async fn bitcoind_warmup_is_node_busy() {
    let url = common::spawn(common::bitcoind(Bitcoind {
        blocks: 1,
        warming_up: true,
    }))
    .await;
    let client =
        BitcoinNodeClient::new(url, Some(Credentials::new("admin", "secret")), TIMEOUT).unwrap();

    assert!(matches!(client.poll().await, Err(SourceError::NodeBusy(_))));
}

#[tokio::test]
async fn refused_connection_is_connection_error() {
    let client = ExecutionClient::new(common::dead_url().await, None, TIMEOUT).unwrap();
    assert!(matches!(client.poll().await, Err(SourceError::Connection(_))));
}

#[tokio::test]
async fn execution_batch_decodes_quantities() {
    let url = common::spawn(common::geth(Geth { block: 19_000_000 })).await;
    let client = ExecutionClient::new(url, None, TIMEOUT).unwrap();

    let report = client.poll().await.unwrap();
    let Payload::EthereumExecution(record) = report.payload else {
        panic!("unexpected payload");
    };
    assert_eq!(record.block_number, Some(19_000_000));
    assert_eq!(record.peer_count, Some(25));
    assert_eq!(record.gas_price_wei, Some(30_000_000_000));
    assert_eq!(record.chain_id, Some(1));
    assert_eq!(
        record.latest_block.and_then(|b| b.base_fee_wei),
        Some(25_000_000_000)
    );
}

#[tokio::test]
async fn beacon_reads_all_four_endpoints() {
    let url = common::spawn(common::beacon()).await;
    let client = BeaconClient::new(url, TIMEOUT).unwrap();

    let report = client.poll().await.unwrap();
    let Payload::EthereumBeacon(record) = report.payload else {
        panic!("unexpected payload");
    };
    assert_eq!(record.syncing.unwrap().head_slot, Some(8_000_040));
    let finality = record.finality.unwrap();
    assert_eq!(finality.finalized_epoch, Some(249_998));
    assert_eq!(finality.current_justified_epoch, Some(249_999));
    assert_eq!(record.peers.unwrap().connected, Some(80));
    assert!(record.version.unwrap().version.unwrap().starts_with("Nimbus/v24.2.2"));
}

#[tokio::test]
async fn beacon_503_is_node_busy() {
    let url = common::spawn(common::status(StatusCode::SERVICE_UNAVAILABLE)).await;
    let client = BeaconClient::new(url, TIMEOUT).unwrap();

    assert!(matches!(client.poll().await, Err(SourceError::NodeBusy(_))));
}

#[tokio::test]
async fn reference_429_is_rate_limited() {
    let url = common::spawn(common::status(StatusCode::TOO_MANY_REQUESTS)).await;
    let reference = BitcoinReference::new(url, TIMEOUT).unwrap();

    assert!(matches!(reference.poll().await, Err(SourceError::RateLimited(_))));
}

#[tokio::test]
async fn bitcoin_reference_reads_plain_height() {
    let url = common::spawn(common::plain_height(800_010)).await;
    let reference = BitcoinReference::new(url, TIMEOUT).unwrap();

    let report = reference.poll().await.unwrap();
    assert_eq!(
        report.payload,
        Payload::External(ExternalReference {
            height: Some(800_010),
            participation_rate: None,
        })
    );
}

#[tokio::test]
async fn ethereum_reference_falls_back_to_next_endpoint() {
    let dead = common::dead_url().await;
    let limited = common::spawn(common::status(StatusCode::TOO_MANY_REQUESTS)).await;
    let good = common::spawn(common::geth(Geth { block: 19_000_003 })).await;
    let reference = EthereumReference::new(&[dead, limited, good], None, TIMEOUT).unwrap();

    let report = reference.poll().await.unwrap();
    assert!(report.call_errors.is_empty());
    let Payload::External(ext) = report.payload else {
        panic!("unexpected payload");
    };
    assert_eq!(ext.height, Some(19_000_003));
}

#[tokio::test]
async fn ethereum_reference_reports_last_error_when_all_fail() {
    let dead = common::dead_url().await;
    let limited = common::spawn(common::status(StatusCode::TOO_MANY_REQUESTS)).await;
    let reference = EthereumReference::new(&[dead, limited], None, TIMEOUT).unwrap();

    assert!(matches!(reference.poll().await, Err(SourceError::RateLimited(_))));
}

#[tokio::test]
async fn ethereum_reference_skips_a_hung_endpoint_within_the_poll_timeout() {
    let hung = common::spawn(common::slow(Duration::from_secs(10))).await;
    let good = common::spawn(common::geth(Geth { block: 19_000_003 })).await;
    let poll_timeout = Duration::from_millis(500);
    let reference = EthereumReference::new(&[hung, good], None, poll_timeout).unwrap();

    let report = tokio::time::timeout(poll_timeout, reference.poll())
        .await
        .expect("poll finishes within its timeout")
        .unwrap();
    let Payload::External(ext) = report.payload else {
        panic!("unexpected payload");
    };
    assert_eq!(ext.height, Some(19_000_003));
}

#[tokio::test]
async fn ethereum_reference_reads_participation_rate() {
    let rpc = common::spawn(common::geth(Geth { block: 19_000_003 })).await;
    let api = common::spawn(common::participation(0.995)).await;
    let url = format!("{api}/api/v1/epoch/latest");
    let reference = EthereumReference::new(&[rpc], Some(&url), TIMEOUT).unwrap();

    let report = reference.poll().await.unwrap();
    assert!(report.call_errors.is_empty());
    assert_eq!(
        report.payload,
        Payload::External(ExternalReference {
            height: Some(19_000_003),
            participation_rate: Some(0.995),
        })
    );
}

#[tokio::test]
async fn participation_failure_does_not_fail_the_height() {
    let rpc = common::spawn(common::geth(Geth { block: 19_000_003 })).await;
    let api = common::spawn(common::status(StatusCode::INTERNAL_SERVER_ERROR)).await;
    let reference = EthereumReference::new(&[rpc], Some(&api), TIMEOUT).unwrap();

    let report = reference.poll().await.unwrap();
    assert_eq!(report.call_errors.len(), 1);
    assert_eq!(report.call_errors[0].call, "participation");
    assert!(matches!(report.call_errors[0].error, SourceError::Connection(_)));
    let Payload::External(ext) = report.payload else {
        panic!("unexpected payload");
    };
    assert_eq!(ext.height, Some(19_000_003));
    assert_eq!(ext.participation_rate, None);
}
